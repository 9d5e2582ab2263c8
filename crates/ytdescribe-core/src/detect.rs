use regex::Regex;
use ytdescribe_ipc::{ChatEvent, MSGTYPE_TEXT};
use ytdescribe_youtube::VideoId;

const WATCH_LINK_PATTERN: &str = r"youtube\.com/watch\?v=([a-zA-Z0-9_-]{11})";

/// Finds the first `youtube.com/watch?v=<id>` link in plain-text messages.
pub struct LinkDetector {
    watch_re: Regex,
}

impl LinkDetector {
    pub fn new() -> Self {
        Self {
            watch_re: Regex::new(WATCH_LINK_PATTERN).expect("watch link pattern is valid"),
        }
    }

    pub fn detect(&self, event: &ChatEvent) -> Option<VideoId> {
        let content = event.content.as_ref()?;
        if content.msgtype != MSGTYPE_TEXT {
            return None;
        }
        self.find_video_id(&content.body)
    }

    pub fn find_video_id(&self, body: &str) -> Option<VideoId> {
        self.watch_re
            .captures(body)
            .and_then(|caps| caps.get(1))
            .and_then(|m| VideoId::parse(m.as_str()))
    }
}

impl Default for LinkDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::LinkDetector;
    use ytdescribe_ipc::{ChatEvent, MessageContent};

    fn event_with(msgtype: &str, body: &str) -> ChatEvent {
        ChatEvent {
            event_id: "$e".to_string(),
            sender: "@alice:example.org".to_string(),
            content: Some(MessageContent {
                msgtype: msgtype.to_string(),
                body: body.to_string(),
            }),
        }
    }

    fn detected(event: &ChatEvent) -> Option<String> {
        LinkDetector::new()
            .detect(event)
            .map(|id| id.as_str().to_string())
    }

    #[test]
    fn extracts_id_from_text_message() {
        let event = event_with(
            "m.text",
            "check this out https://www.youtube.com/watch?v=TeG4XHxb6BU",
        );
        assert_eq!(detected(&event).as_deref(), Some("TeG4XHxb6BU"));
    }

    #[test]
    fn missing_content_is_rejected() {
        let event = ChatEvent {
            event_id: "$e".to_string(),
            sender: "@alice:example.org".to_string(),
            content: None,
        };
        assert!(detected(&event).is_none());
    }

    #[test]
    fn non_text_msgtypes_are_rejected_regardless_of_body() {
        let body = "https://www.youtube.com/watch?v=TeG4XHxb6BU";
        for msgtype in ["m.notice", "m.emote", "m.image", ""] {
            assert!(
                detected(&event_with(msgtype, body)).is_none(),
                "msgtype {msgtype:?} should be ignored"
            );
        }
    }

    #[test]
    fn body_without_watch_link_is_rejected() {
        for body in [
            "no links here",
            "https://youtu.be/TeG4XHxb6BU",
            "https://vimeo.com/123456",
            "youtube.com/watch?v=short",
        ] {
            assert!(detected(&event_with("m.text", body)).is_none(), "{body}");
        }
    }

    #[test]
    fn first_link_wins() {
        let event = event_with(
            "m.text",
            "youtube.com/watch?v=AAAAAAAAAAA and youtube.com/watch?v=BBBBBBBBBBB",
        );
        assert_eq!(detected(&event).as_deref(), Some("AAAAAAAAAAA"));
    }

    #[test]
    fn captures_exactly_eleven_chars_when_more_follow() {
        let event = event_with(
            "m.text",
            "https://m.youtube.com/watch?v=TeG4XHxb6BU&t=42s",
        );
        assert_eq!(detected(&event).as_deref(), Some("TeG4XHxb6BU"));

        let longer = event_with("m.text", "youtube.com/watch?v=TeG4XHxb6BUextra");
        assert_eq!(detected(&longer).as_deref(), Some("TeG4XHxb6BU"));
    }

    #[test]
    fn ids_with_dash_and_underscore_are_accepted() {
        let event = event_with("m.text", "youtube.com/watch?v=a-b_c-d_e-f");
        assert_eq!(detected(&event).as_deref(), Some("a-b_c-d_e-f"));
    }
}
