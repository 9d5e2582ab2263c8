//! mx-youtube-describe-bot YouTube Lookup
//!
//! YouTube Data API v3 `videos` client behind a lookup trait

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

pub const VIDEO_ID_LEN: usize = 11;
const VIDEO_PARTS: &str = "snippet,contentDetails";
const VIDEO_FIELDS: &str = "items(id,snippet/title,contentDetails/duration)";
const ERROR_BODY_MAX_CHARS: usize = 300;

/// 11-character YouTube video identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoId(String);

impl VideoId {
    pub fn parse(candidate: &str) -> Option<Self> {
        let valid = candidate.len() == VIDEO_ID_LEN
            && candidate
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        valid.then(|| Self(candidate.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    /// ISO-8601 duration as returned by the API, e.g. `PT4M13S`.
    pub duration: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("youtube videos request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("youtube videos HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("youtube videos decode failed: {0}")]
    Decode(String),
}

#[async_trait::async_trait]
pub trait VideoLookup: Send + Sync {
    /// `Ok(None)` when the provider has no item for `id`.
    async fn lookup(&self, id: &VideoId) -> Result<Option<VideoMetadata>, LookupError>;
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    snippet: Snippet,
    #[serde(rename = "contentDetails")]
    content_details: ContentDetails,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: String,
}

impl From<VideoItem> for VideoMetadata {
    fn from(item: VideoItem) -> Self {
        Self {
            id: item.id,
            title: item.snippet.title,
            duration: item.content_details.duration,
        }
    }
}

pub struct YouTubeClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl YouTubeClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self::with_client(Client::new(), api_key, base_url)
    }

    pub fn with_client(client: Client, api_key: String, base_url: String) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn truncate_for_error(text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            text.to_string()
        } else {
            let truncated: String = text.chars().take(max_chars).collect();
            format!("{}...", truncated)
        }
    }

    fn parse_response(raw_body: &str) -> Result<Option<VideoMetadata>, LookupError> {
        let parsed: VideoListResponse = serde_json::from_str(raw_body).map_err(|e| {
            LookupError::Decode(format!(
                "{} | body={}",
                e,
                Self::truncate_for_error(raw_body, ERROR_BODY_MAX_CHARS)
            ))
        })?;
        Ok(parsed.items.into_iter().next().map(VideoMetadata::from))
    }
}

#[async_trait::async_trait]
impl VideoLookup for YouTubeClient {
    async fn lookup(&self, id: &VideoId) -> Result<Option<VideoMetadata>, LookupError> {
        let url = format!("{}/videos", self.base_url);
        debug!(video_id = %id, "youtube videos lookup");

        // The key travels in the query string; strip the URL from transport errors.
        let response = self
            .client
            .get(&url)
            .query(&[
                ("id", id.as_str()),
                ("key", self.api_key.as_str()),
                ("part", VIDEO_PARTS),
                ("fields", VIDEO_FIELDS),
            ])
            .send()
            .await
            .map_err(|e| LookupError::Request(e.without_url()))?;

        let status = response.status();
        let raw_body = response
            .text()
            .await
            .map_err(|e| LookupError::Request(e.without_url()))?;

        if !status.is_success() {
            return Err(LookupError::Status {
                status: status.as_u16(),
                body: Self::truncate_for_error(&raw_body, ERROR_BODY_MAX_CHARS),
            });
        }

        Self::parse_response(&raw_body)
    }
}
