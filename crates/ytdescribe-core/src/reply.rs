use ytdescribe_config::ReplyStyle;
use ytdescribe_ipc::{ChatEvent, OutboundMessage};
use ytdescribe_youtube::VideoMetadata;

pub fn reply_body(title: &str, formatted_duration: &str) -> String {
    format!("{} ({})", title, formatted_duration)
}

/// Builds the notice for a described video. `Thread` links it to the
/// triggering event so clients render a rich reply.
pub fn compose_reply(
    style: ReplyStyle,
    room_id: &str,
    event: &ChatEvent,
    metadata: &VideoMetadata,
    formatted_duration: &str,
) -> OutboundMessage {
    let notice = OutboundMessage::notice(room_id, reply_body(&metadata.title, formatted_duration));
    match style {
        ReplyStyle::Thread if !event.event_id.is_empty() => notice.in_reply_to(&event.event_id),
        _ => notice,
    }
}
