//! mx-youtube-describe-bot IPC
//!
//! Event bus between the chat transport and the describe runtime

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

pub const MSGTYPE_TEXT: &str = "m.text";
pub const MSGTYPE_NOTICE: &str = "m.notice";

static NEXT_TRACE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn generate_trace_id() -> String {
    let ts = now_unix_secs();
    let n = NEXT_TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("trace-{}-{}", ts, n)
}

/// Inbound room message as delivered by the homeserver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub msgtype: String,
    #[serde(default)]
    pub body: String,
}

impl ChatEvent {
    pub fn text(event_id: &str, sender: &str, body: &str) -> Self {
        Self {
            event_id: event_id.to_string(),
            sender: sender.to_string(),
            content: Some(MessageContent {
                msgtype: MSGTYPE_TEXT.to_string(),
                body: body.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomEvent {
    pub trace_id: String,
    pub room_id: String,
    pub event: ChatEvent,
}

impl RoomEvent {
    pub fn new(room_id: &str, event: ChatEvent) -> Self {
        Self {
            trace_id: generate_trace_id(),
            room_id: room_id.to_string(),
            event,
        }
    }
}

/// Notice to post into a room, optionally as a rich reply.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub trace_id: String,
    pub room_id: String,
    pub body: String,
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    pub fn notice(room_id: &str, body: String) -> Self {
        Self {
            trace_id: generate_trace_id(),
            room_id: room_id.to_string(),
            body,
            reply_to: None,
        }
    }

    pub fn in_reply_to(mut self, event_id: &str) -> Self {
        self.reply_to = Some(event_id.to_string());
        self
    }

    pub fn with_trace_id(mut self, trace_id: String) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn msgtype(&self) -> &'static str {
        MSGTYPE_NOTICE
    }
}

pub const EVENT_BUS_CAPACITY: usize = 256;
pub const OUTBOUND_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    inbound: broadcast::Sender<RoomEvent>,
    outbound: broadcast::Sender<OutboundMessage>,
}

impl EventBus {
    pub fn new() -> Self {
        let (inbound_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (outbound_tx, _) = broadcast::channel(OUTBOUND_CAPACITY);

        Self {
            inbound: inbound_tx,
            outbound: outbound_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.inbound.subscribe()
    }

    pub fn publish(&self, event: RoomEvent) -> anyhow::Result<()> {
        self.inbound.send(event)?;
        Ok(())
    }

    pub fn outbound_sender(&self) -> broadcast::Sender<OutboundMessage> {
        self.outbound.clone()
    }

    pub fn outbound_subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.outbound.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
