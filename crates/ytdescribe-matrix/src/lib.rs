//! mx-youtube-describe-bot Matrix Adapter
//!
//! Matrix client-server API long-polling with sync cursor persistence,
//! auto-join on invite, and notice/rich-reply sending

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, ClientBuilder, Method, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use ytdescribe_config::Config;
use ytdescribe_ipc::{ChatEvent, EventBus, OutboundMessage, RoomEvent};

const ROOM_MESSAGE_TYPE: &str = "m.room.message";
const SYNC_RETRY_DELAY: Duration = Duration::from_secs(2);
const SYNC_TIMEOUT_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: Option<SyncRooms>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncRooms {
    #[serde(default)]
    pub join: HashMap<String, JoinedRoom>,
    #[serde(default)]
    pub invite: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub timeline: Timeline,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WhoAmIResponse {
    user_id: String,
}

/// On-disk sync cursor.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SyncState {
    #[serde(rename = "syncToken", default)]
    sync_token: Option<String>,
}

impl SyncResponse {
    /// `m.room.message` timeline events of joined rooms, in timeline order.
    pub fn room_messages(&self) -> Vec<RoomEvent> {
        let Some(rooms) = &self.rooms else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for (room_id, room) in &rooms.join {
            for raw in &room.timeline.events {
                if raw.get("type").and_then(|t| t.as_str()) != Some(ROOM_MESSAGE_TYPE) {
                    continue;
                }
                match serde_json::from_value::<ChatEvent>(raw.clone()) {
                    Ok(event) => out.push(RoomEvent::new(room_id, event)),
                    Err(e) => debug!(room_id = %room_id, "skipping undecodable event: {}", e),
                }
            }
        }
        out
    }

    pub fn invited_rooms(&self) -> Vec<String> {
        self.rooms
            .as_ref()
            .map(|rooms| rooms.invite.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Wire content for an outbound notice.
pub fn message_content(message: &OutboundMessage) -> serde_json::Value {
    let mut content = serde_json::json!({
        "msgtype": message.msgtype(),
        "body": message.body,
    });

    if let Some(event_id) = &message.reply_to {
        content["m.relates_to"] = serde_json::json!({
            "m.in_reply_to": { "event_id": event_id }
        });
    }

    content
}

pub struct MatrixAdapter {
    client: Client,
    homeserver_url: String,
    access_token: String,
    sync_state_file: PathBuf,
    sync_timeout_ms: u64,
    auto_join: bool,
    event_bus: Option<EventBus>,
}

impl MatrixAdapter {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Self::build_client(config.sync_timeout_ms)?;
        Ok(Self {
            client,
            homeserver_url: config.homeserver_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            sync_state_file: config.sync_state_file.clone(),
            sync_timeout_ms: config.sync_timeout_ms,
            auto_join: config.auto_join,
            event_bus: None,
        })
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn build_client(sync_timeout_ms: u64) -> Result<Client> {
        ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(600))
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(Duration::from_millis(sync_timeout_ms) + SYNC_TIMEOUT_GRACE)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("failed to build Matrix HTTP client")
    }

    /// `{homeserver}/_matrix/client/v3/{segments..}` with each segment
    /// percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.homeserver_url)
            .with_context(|| format!("invalid homeserver URL '{}'", self.homeserver_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("homeserver URL cannot be a base: {}", self.homeserver_url))?
            .pop_if_empty()
            .extend(["_matrix", "client", "v3"])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.access_token)
    }

    async fn read_sync_token(&self) -> Option<String> {
        let content = fs::read_to_string(&self.sync_state_file).await.ok()?;
        match serde_json::from_str::<SyncState>(&content) {
            Ok(state) => state.sync_token.filter(|token| !token.is_empty()),
            Err(e) => {
                warn!(
                    "Ignoring unreadable sync state {}: {}",
                    self.sync_state_file.display(),
                    e
                );
                None
            }
        }
    }

    async fn write_sync_token(&self, token: &str) {
        if let Some(parent) = self.sync_state_file.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = fs::create_dir_all(parent).await;
            }
        }
        let state = SyncState {
            sync_token: Some(token.to_string()),
        };
        let body = match serde_json::to_string(&state) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to encode sync state: {}", e);
                return;
            }
        };
        if let Err(e) = fs::write(&self.sync_state_file, body).await {
            warn!(
                "Failed to persist sync state to {}: {}",
                self.sync_state_file.display(),
                e
            );
        }
    }

    /// Resolves the access token to a user id. Fails when the homeserver is
    /// unreachable or rejects the token.
    pub async fn whoami(&self) -> Result<String> {
        let url = self.endpoint(&["account", "whoami"])?;
        let resp = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| anyhow!("matrix whoami request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("matrix whoami HTTP {}: {}", status, body));
        }

        let parsed: WhoAmIResponse = resp
            .json()
            .await
            .map_err(|e| anyhow!("matrix whoami decode failed: {}", e))?;
        Ok(parsed.user_id)
    }

    pub async fn sync(&self, since: Option<&str>) -> Result<SyncResponse> {
        let mut url = self.endpoint(&["sync"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("timeout", &self.sync_timeout_ms.to_string());
            if let Some(since) = since {
                query.append_pair("since", since);
            }
        }

        let resp = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| anyhow!("matrix sync request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("matrix sync HTTP {}: {}", status, body));
        }

        resp.json()
            .await
            .map_err(|e| anyhow!("matrix sync decode failed: {}", e))
    }

    pub async fn join_room(&self, room_id: &str) -> Result<()> {
        let url = self.endpoint(&["join", room_id])?;
        let resp = self
            .request(Method::POST, url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| anyhow!("matrix join request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("matrix join {} HTTP {}: {}", room_id, status, body));
        }
        Ok(())
    }

    pub async fn send_message(&self, message: &OutboundMessage) -> Result<String> {
        let txn_id = uuid::Uuid::new_v4().to_string();
        let url = self.endpoint(&[
            "rooms",
            &message.room_id,
            "send",
            ROOM_MESSAGE_TYPE,
            &txn_id,
        ])?;

        let resp = self
            .request(Method::PUT, url)
            .json(&message_content(message))
            .send()
            .await
            .map_err(|e| anyhow!("matrix send request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "matrix send to {} HTTP {}: {}",
                message.room_id,
                status,
                body
            ));
        }

        #[derive(Deserialize)]
        struct SendResponse {
            event_id: String,
        }

        let parsed: SendResponse = resp
            .json()
            .await
            .map_err(|e| anyhow!("matrix send decode failed: {}", e))?;
        Ok(parsed.event_id)
    }

    /// One sync round: persists the new cursor, accepts invites and publishes
    /// room messages. The backlog of the very first sync is not published.
    pub async fn sync_once(&self, since: Option<&str>) -> Result<String> {
        let response = self.sync(since).await?;
        self.write_sync_token(&response.next_batch).await;

        if self.auto_join {
            for room_id in response.invited_rooms() {
                match self.join_room(&room_id).await {
                    Ok(()) => info!("Joined room {} after invite", room_id),
                    Err(e) => warn!("Failed to join room {}: {}", room_id, e),
                }
            }
        }

        if since.is_none() {
            info!("Initial sync complete; skipping backlog");
            return Ok(response.next_batch);
        }

        for room_event in response.room_messages() {
            if let Some(event_bus) = &self.event_bus {
                if let Err(e) = event_bus.publish(room_event) {
                    warn!("Failed to publish room message to event bus: {}", e);
                }
            } else {
                debug!("No event bus configured, room message not forwarded");
            }
        }

        Ok(response.next_batch)
    }

    pub async fn poll(&self) -> Result<()> {
        let mut since = self.read_sync_token().await;

        info!(since = ?since, "Matrix sync started");

        loop {
            match self.sync_once(since.as_deref()).await {
                Ok(next_batch) => since = Some(next_batch),
                Err(err) => {
                    warn!("Matrix sync error: {}", err);
                    tokio::time::sleep(SYNC_RETRY_DELAY).await;
                }
            }
        }
    }

    pub async fn run_outbound_handler(&self, mut receiver: broadcast::Receiver<OutboundMessage>) {
        info!("Matrix outbound handler started");

        loop {
            match receiver.recv().await {
                Ok(msg) => match self.send_message(&msg).await {
                    Ok(event_id) => debug!(
                        trace_id = %msg.trace_id,
                        room_id = %msg.room_id,
                        %event_id,
                        "notice sent"
                    ),
                    Err(e) => warn!(trace_id = %msg.trace_id, "Failed to send outbound message: {}", e),
                },
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Matrix outbound handler stopped: channel closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Matrix outbound handler lagged; skipped {} messages",
                        skipped
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{message_content, MatrixAdapter, SyncResponse};
    use serde_json::json;
    use std::path::PathBuf;
    use wiremock::matchers::{body_partial_json, header, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use ytdescribe_config::{Config, ReplyStyle};
    use ytdescribe_ipc::{EventBus, OutboundMessage};

    fn temp_state_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "ytdescribe-matrix-{}-{}.json",
            name,
            std::process::id()
        ))
    }

    fn config_for(homeserver_url: &str, state: PathBuf) -> Config {
        Config {
            homeserver_url: homeserver_url.to_string(),
            access_token: "syt_token".to_string(),
            sync_state_file: state,
            youtube_api_key: "k".to_string(),
            youtube_api_base_url: "https://example.test".to_string(),
            reply_style: ReplyStyle::Thread,
            auto_join: true,
            sync_timeout_ms: 1000,
            log_level: "info".to_string(),
            log_dir: None,
        }
    }

    fn make_adapter(homeserver_url: &str, name: &str) -> MatrixAdapter {
        MatrixAdapter::new(&config_for(homeserver_url, temp_state_path(name))).expect("adapter")
    }

    fn sync_body() -> serde_json::Value {
        json!({
            "next_batch": "s2",
            "rooms": {
                "join": {
                    "!room:example.org": {
                        "timeline": {
                            "events": [
                                {
                                    "type": "m.room.message",
                                    "event_id": "$msg",
                                    "sender": "@alice:example.org",
                                    "content": {"msgtype": "m.text", "body": "https://www.youtube.com/watch?v=TeG4XHxb6BU"}
                                },
                                {
                                    "type": "m.room.member",
                                    "event_id": "$member",
                                    "sender": "@alice:example.org",
                                    "state_key": "@alice:example.org",
                                    "content": {"membership": "join"}
                                },
                                {
                                    "type": "m.room.message",
                                    "event_id": "$redacted",
                                    "sender": "@alice:example.org",
                                    "content": {}
                                }
                            ]
                        }
                    }
                },
                "invite": {
                    "!invite:example.org": {"invite_state": {"events": []}}
                }
            }
        })
    }

    #[test]
    fn notice_content_has_no_relation() {
        let msg = OutboundMessage::notice("!room:example.org", "Title (3:09)".to_string());
        assert_eq!(
            message_content(&msg),
            json!({"msgtype": "m.notice", "body": "Title (3:09)"})
        );
    }

    #[test]
    fn reply_content_carries_in_reply_to() {
        let msg = OutboundMessage::notice("!room:example.org", "Title (3:09)".to_string())
            .in_reply_to("$orig");
        assert_eq!(
            message_content(&msg),
            json!({
                "msgtype": "m.notice",
                "body": "Title (3:09)",
                "m.relates_to": {"m.in_reply_to": {"event_id": "$orig"}}
            })
        );
    }

    #[test]
    fn room_messages_keep_only_room_message_events() {
        let sync: SyncResponse = serde_json::from_value(sync_body()).expect("sync");
        let messages = sync.room_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].room_id, "!room:example.org");
        assert_eq!(messages[0].event.event_id, "$msg");
        assert_eq!(messages[1].event.event_id, "$redacted");
        assert_eq!(sync.invited_rooms(), vec!["!invite:example.org".to_string()]);
    }

    #[test]
    fn empty_sync_has_no_messages() {
        let sync: SyncResponse = serde_json::from_value(json!({"next_batch": "s1"})).expect("sync");
        assert!(sync.room_messages().is_empty());
        assert!(sync.invited_rooms().is_empty());
    }

    #[test]
    fn endpoint_encodes_path_segments() {
        let adapter = make_adapter("https://matrix.example.org/", "endpoint");
        let url = adapter
            .endpoint(&["rooms", "!a/b:example.org", "send"])
            .expect("url");
        assert_eq!(
            url.as_str(),
            "https://matrix.example.org/_matrix/client/v3/rooms/!a%2Fb:example.org/send"
        );
    }

    #[tokio::test]
    async fn sync_token_round_trips_through_state_file() {
        let adapter = make_adapter("https://matrix.example.org", "roundtrip");
        let _ = std::fs::remove_file(&adapter.sync_state_file);

        assert!(adapter.read_sync_token().await.is_none());
        adapter.write_sync_token("s42_token").await;
        assert_eq!(adapter.read_sync_token().await.as_deref(), Some("s42_token"));

        let _ = std::fs::remove_file(&adapter.sync_state_file);
    }

    #[tokio::test]
    async fn corrupt_state_file_is_ignored() {
        let adapter = make_adapter("https://matrix.example.org", "corrupt");
        std::fs::write(&adapter.sync_state_file, "not json").expect("write");
        assert!(adapter.read_sync_token().await.is_none());
        let _ = std::fs::remove_file(&adapter.sync_state_file);
    }

    #[tokio::test]
    async fn whoami_returns_user_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/account/whoami"))
            .and(header("authorization", "Bearer syt_token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"user_id": "@bot:example.org"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let adapter = make_adapter(&server.uri(), "whoami");
        assert_eq!(adapter.whoami().await.expect("whoami"), "@bot:example.org");
    }

    #[tokio::test]
    async fn whoami_rejected_token_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/account/whoami"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "errcode": "M_UNKNOWN_TOKEN",
                "error": "Invalid access token"
            })))
            .mount(&server)
            .await;

        let adapter = make_adapter(&server.uri(), "whoami-401");
        let err = adapter.whoami().await.expect_err("unauthorized");
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn send_message_puts_reply_content() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path_regex(
                r"^/_matrix/client/v3/rooms/!room:example.org/send/m.room.message/[0-9a-f-]+$",
            ))
            .and(body_partial_json(json!({
                "msgtype": "m.notice",
                "body": "Title (3:09)",
                "m.relates_to": {"m.in_reply_to": {"event_id": "$orig"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"event_id": "$sent"})))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = make_adapter(&server.uri(), "send");
        let msg = OutboundMessage::notice("!room:example.org", "Title (3:09)".to_string())
            .in_reply_to("$orig");
        assert_eq!(adapter.send_message(&msg).await.expect("send"), "$sent");
    }

    #[tokio::test]
    async fn initial_sync_joins_invites_and_skips_backlog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sync_body()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_matrix/client/v3/join/!invite:example.org"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"room_id": "!invite:example.org"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let bus = EventBus::new();
        let mut inbound = bus.subscribe();
        let adapter = make_adapter(&server.uri(), "initial").with_event_bus(bus);

        let next = adapter.sync_once(None).await.expect("sync");
        assert_eq!(next, "s2");
        assert_eq!(adapter.read_sync_token().await.as_deref(), Some("s2"));
        assert!(inbound.try_recv().is_err());

        let _ = std::fs::remove_file(&adapter.sync_state_file);
    }

    #[tokio::test]
    async fn incremental_sync_publishes_room_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/sync"))
            .and(query_param("since", "s1"))
            .and(query_param("timeout", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sync_body()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_matrix/client/v3/join/!invite:example.org"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let bus = EventBus::new();
        let mut inbound = bus.subscribe();
        let adapter = make_adapter(&server.uri(), "incremental").with_event_bus(bus);

        adapter.sync_once(Some("s1")).await.expect("sync");

        let first = inbound.try_recv().expect("first event");
        assert_eq!(first.room_id, "!room:example.org");
        assert_eq!(first.event.event_id, "$msg");
        let second = inbound.try_recv().expect("second event");
        assert_eq!(second.event.event_id, "$redacted");

        let _ = std::fs::remove_file(&adapter.sync_state_file);
    }
}
