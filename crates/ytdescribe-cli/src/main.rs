//! mx-youtube-describe-bot CLI
//!
//! Matrix bot that answers YouTube links with the video title and duration

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use ytdescribe_config::{redact, Config};
use ytdescribe_core::DescribeRuntime;
use ytdescribe_ipc::EventBus;
use ytdescribe_matrix::MatrixAdapter;
use ytdescribe_youtube::YouTubeClient;

#[derive(Parser)]
#[command(name = "mx-youtube-describe-bot")]
#[command(about = "Matrix bot that describes YouTube links", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (default: ./config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level, overrides `logLevel` from the config
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Connect to the homeserver and start describing links (default)
    Run,
    /// Load and validate the config, then print a redacted summary
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = load_config(&config_path)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Check => {
            print_config_summary(&config_path, &config);
        }
        Commands::Run => {
            let log_level = cli.log_level.unwrap_or_else(|| config.log_level.clone());
            let _logging_guard = logging::init_logging(config.log_dir.as_deref(), &log_level)?;
            run(config).await?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("failed to load config {}", path.display()))
}

fn print_config_summary(path: &Path, config: &Config) {
    println!("Config OK: {}", path.display());
    println!("  homeserverUrl:     {}", config.homeserver_url);
    println!("  accessToken:       {}", redact(&config.access_token));
    println!("  syncStateFile:     {}", config.sync_state_file.display());
    println!("  youTubeApiKey:     {}", redact(&config.youtube_api_key));
    println!("  youTubeApiBaseUrl: {}", config.youtube_api_base_url);
    println!("  replyStyle:        {:?}", config.reply_style);
    println!("  autoJoin:          {}", config.auto_join);
    println!("  syncTimeoutMs:     {}", config.sync_timeout_ms);
    match &config.log_dir {
        Some(dir) => println!("  logDir:            {}", dir.display()),
        None => println!("  logDir:            (stderr only)"),
    }
}

async fn run(config: Config) -> Result<()> {
    let event_bus = EventBus::new();
    let adapter = MatrixAdapter::new(&config)?.with_event_bus(event_bus.clone());

    let user_id = adapter
        .whoami()
        .await
        .with_context(|| format!("failed to connect to {}", config.homeserver_url))?;
    info!(user_id = %user_id, "mx-youtube-describe-bot connected");

    let lookup = Arc::new(YouTubeClient::new(
        config.youtube_api_key.clone(),
        config.youtube_api_base_url.clone(),
    ));
    let runtime =
        Arc::new(DescribeRuntime::new(lookup, config.reply_style).with_own_user_id(user_id));

    // Subscribe before the sync loop can publish anything.
    let inbound = event_bus.subscribe();
    let outbound = event_bus.outbound_subscribe();

    tokio::select! {
        result = adapter.poll() => result?,
        _ = adapter.run_outbound_handler(outbound) => {},
        _ = runtime.run(inbound, event_bus.outbound_sender()) => {},
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
