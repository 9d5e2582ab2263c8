//! mx-youtube-describe-bot Core
//!
//! Per-event pipeline: detect link -> look up video -> format duration -> reply

pub mod detect;
pub mod duration;
pub mod reply;

pub use detect::LinkDetector;
pub use duration::{format_duration, InvalidDurationFormat};
pub use reply::{compose_reply, reply_body};

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use ytdescribe_config::ReplyStyle;
use ytdescribe_ipc::{OutboundMessage, RoomEvent};
use ytdescribe_youtube::{LookupError, VideoLookup};

#[derive(Debug, thiserror::Error)]
pub enum DescribeError {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Duration(#[from] InvalidDurationFormat),
}

#[derive(Debug)]
pub enum Outcome {
    /// Not a plain-text message with a watch link, or sent by the bot itself.
    Ignored,
    /// The provider has no item for the linked id.
    NotFound { video_id: String },
    Failed {
        video_id: String,
        error: DescribeError,
    },
    Reply(OutboundMessage),
}

/// Application context shared by every event task.
pub struct DescribeRuntime {
    lookup: Arc<dyn VideoLookup>,
    detector: LinkDetector,
    reply_style: ReplyStyle,
    own_user_id: Option<String>,
}

impl DescribeRuntime {
    pub fn new(lookup: Arc<dyn VideoLookup>, reply_style: ReplyStyle) -> Self {
        Self {
            lookup,
            detector: LinkDetector::new(),
            reply_style,
            own_user_id: None,
        }
    }

    pub fn with_own_user_id(mut self, user_id: String) -> Self {
        self.own_user_id = Some(user_id);
        self
    }

    pub fn reply_style(&self) -> ReplyStyle {
        self.reply_style
    }

    fn is_own_event(&self, room_event: &RoomEvent) -> bool {
        self.own_user_id
            .as_deref()
            .is_some_and(|own| own == room_event.event.sender)
    }

    pub async fn handle_event(&self, room_event: &RoomEvent) -> Outcome {
        if self.is_own_event(room_event) {
            return Outcome::Ignored;
        }

        let Some(video_id) = self.detector.detect(&room_event.event) else {
            return Outcome::Ignored;
        };

        let metadata = match self.lookup.lookup(&video_id).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                return Outcome::NotFound {
                    video_id: video_id.to_string(),
                }
            }
            Err(e) => {
                return Outcome::Failed {
                    video_id: video_id.to_string(),
                    error: e.into(),
                }
            }
        };

        match format_duration(&metadata.duration) {
            Ok(formatted) => Outcome::Reply(
                compose_reply(
                    self.reply_style,
                    &room_event.room_id,
                    &room_event.event,
                    &metadata,
                    &formatted,
                )
                .with_trace_id(room_event.trace_id.clone()),
            ),
            Err(e) => Outcome::Failed {
                video_id: video_id.to_string(),
                error: e.into(),
            },
        }
    }

    /// Runs one event through the pipeline and publishes the reply, if any.
    /// Failures are logged here and never reach the room.
    pub async fn dispatch(
        &self,
        room_event: RoomEvent,
        outbound: &broadcast::Sender<OutboundMessage>,
    ) {
        let room_id = room_event.room_id.as_str();
        let event_id = room_event.event.event_id.as_str();
        let trace_id = room_event.trace_id.as_str();

        match self.handle_event(&room_event).await {
            Outcome::Ignored => {
                debug!(trace_id, room_id, event_id, "no video link, ignoring event");
            }
            Outcome::NotFound { video_id } => {
                info!(trace_id, room_id, event_id, %video_id, "no video found for link");
            }
            Outcome::Failed { video_id, error } => {
                warn!(
                    trace_id,
                    room_id,
                    event_id,
                    %video_id,
                    "failed to describe video: {}",
                    error
                );
            }
            Outcome::Reply(message) => {
                info!(trace_id, room_id, event_id, body = %message.body, "describing video");
                if let Err(e) = outbound.send(message) {
                    warn!(trace_id, room_id, "failed to publish reply: {}", e);
                }
            }
        }
    }

    /// Consumes inbound room events until the bus closes, one task per event.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: broadcast::Receiver<RoomEvent>,
        outbound: broadcast::Sender<OutboundMessage>,
    ) {
        info!("Describe runtime started");

        loop {
            match inbound.recv().await {
                Ok(room_event) => {
                    let runtime = Arc::clone(&self);
                    let outbound = outbound.clone();
                    tokio::spawn(async move {
                        runtime.dispatch(room_event, &outbound).await;
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Describe runtime stopped: channel closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Describe runtime lagged; skipped {} events", skipped);
                }
            }
        }
    }
}
