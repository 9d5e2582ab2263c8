//! Logging setup
//!
//! stderr output, plus daily log files with 7-day cleanup when a log
//! directory is configured

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_RETENTION_DAYS: u64 = 7;
const LOG_PREFIX: &str = "mx-youtube-describe-bot";

pub struct LogManager {
    log_dir: PathBuf,
}

impl LogManager {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    pub fn get_current_log_path(&self) -> PathBuf {
        let today = chrono::Local::now().format("%Y-%m-%d");
        self.log_dir.join(format!("{}.{}.log", LOG_PREFIX, today))
    }

    fn is_bot_log(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.starts_with(LOG_PREFIX) && name.ends_with(".log"))
    }

    /// Deletes bot log files not modified within the retention window.
    /// Returns how many were removed.
    pub fn cleanup_old_logs(&self) -> Result<usize> {
        let cutoff = SystemTime::now() - Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60);
        let mut deleted_count = 0;
        for entry in fs::read_dir(&self.log_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || !Self::is_bot_log(&path) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if modified < cutoff {
                if let Err(e) = fs::remove_file(&path) {
                    eprintln!("Failed to delete old log {}: {}", path.display(), e);
                } else {
                    deleted_count += 1;
                }
            }
        }
        Ok(deleted_count)
    }
}

pub struct LoggingGuard {
    _guard: Option<WorkerGuard>,
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

pub fn init_logging(log_dir: Option<&Path>, log_level: &str) -> Result<LoggingGuard> {
    let mut deleted = 0;
    let (file_layer, guard) = match log_dir {
        Some(log_dir) => {
            fs::create_dir_all(log_dir)?;
            let manager = LogManager::new(log_dir.to_path_buf());
            deleted = manager.cleanup_old_logs()?;

            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(manager.get_current_log_path())?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);

            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true)
                .with_filter(env_filter(log_level));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_filter(env_filter(log_level));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    if deleted > 0 {
        tracing::info!("Cleaned up {} old log file(s)", deleted);
    }

    Ok(LoggingGuard { _guard: guard })
}
