//! # Sources Module
//!
//! Track resolution and search for the jukebox.
//!
//! - [`TrackResolver`] turns a URL or free-text query into a playable
//!   [`ResolvedTrack`] and enumerates playlists.
//! - [`SearchService`] turns free text into a short list of candidates.
//! - [`classify`] / [`clean_video_url`] inspect YouTube URLs without any
//!   network call.
//!
//! Implementations: [`ytdlp::YtDlpResolver`] (resolution, playlists and the
//! search fallback), [`youtube_api::YouTubeApiSearch`] (search with an API
//! key) and [`cached::CachedResolver`] (metadata cache decorator).

pub mod cached;
pub mod youtube_api;
pub mod ytdlp;

use async_trait::async_trait;
use regex::Regex;
use std::{sync::LazyLock, time::Duration};

use crate::error::PlayerResult;

/// One playable audio item, identified by its source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub url: String,
    pub title: String,
    /// `None` means unknown or live.
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
}

impl Track {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            duration: None,
            thumbnail: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: String) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }
}

/// Directly streamable audio endpoint. Expires after a few hours, so it is
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRef(pub String);

impl StreamRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of a resolution: the track metadata plus where to stream it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrack {
    pub track: Track,
    pub stream: StreamRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    pub title: String,
    pub entries: Vec<PlaylistEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub channel: Option<String>,
    pub duration: Option<Duration>,
}

/// Resolves tracks through an external extraction service.
///
/// Implementations must be safe for concurrent calls across guilds; calls
/// are independent of each other.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resolves a URL or free-text query into a playable stream.
    async fn resolve(&self, url_or_query: &str) -> PlayerResult<ResolvedTrack>;

    /// Fetches display metadata only (title, duration, thumbnail).
    async fn describe(&self, url: &str) -> PlayerResult<Track>;

    /// Lists up to `limit` playlist entries, skipping unavailable ones.
    async fn enumerate_playlist(&self, url: &str, limit: usize) -> PlayerResult<Playlist>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<SearchHit>>;
}

/// What a URL points at, decided from its query parameters alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlKind {
    pub is_playlist: bool,
    pub playlist_id: Option<String>,
}

static PLAYLIST_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]list=([^&#]+)").expect("valid playlist regex"));

static VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:v=|youtu\.be/|/shorts/|/embed/)([0-9A-Za-z_-]{11})").expect("valid video id regex")
});

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.|m\.|music\.)?(youtube\.com|youtu\.be)/.+")
        .expect("valid youtube regex")
});

/// Classifies a URL as a single video or a playlist. No network call.
pub fn classify(url: &str) -> UrlKind {
    let playlist_id = PLAYLIST_PARAM
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    UrlKind {
        is_playlist: playlist_id.is_some(),
        playlist_id,
    }
}

pub fn video_id(url: &str) -> Option<String> {
    VIDEO_ID
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Strips playlist parameters from a watch URL.
pub fn clean_video_url(url: &str) -> String {
    match video_id(url) {
        Some(id) => watch_url(&id),
        None => url.to_string(),
    }
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

pub fn playlist_url(playlist_id: &str) -> String {
    format!("https://www.youtube.com/playlist?list={}", playlist_id)
}

pub fn is_youtube_url(url: &str) -> bool {
    YOUTUBE_URL.is_match(url)
}

/// Links without a scheme count when they point at YouTube.
pub fn is_url(query: &str) -> bool {
    query.starts_with("http://") || query.starts_with("https://") || is_youtube_url(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn watch_url_with_list_is_playlist() {
        let kind = classify("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL123abc&index=2");
        assert_eq!(
            kind,
            UrlKind {
                is_playlist: true,
                playlist_id: Some("PL123abc".to_string()),
            }
        );
    }

    #[test]
    fn plain_watch_url_is_single_video() {
        let kind = classify("https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert!(!kind.is_playlist);
        assert_eq!(kind.playlist_id, None);
    }

    #[test]
    fn playlist_page_is_playlist() {
        let kind = classify("https://www.youtube.com/playlist?list=PLxyz");
        assert_eq!(kind.playlist_id.as_deref(), Some("PLxyz"));
    }

    #[test]
    fn clean_video_url_drops_playlist_parameters() {
        assert_eq!(
            clean_video_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL123&index=4"),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert_eq!(
            clean_video_url("https://youtu.be/dQw4w9WgXcQ?list=PL123"),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
    }

    #[test]
    fn clean_video_url_keeps_unknown_urls() {
        assert_eq!(
            clean_video_url("https://example.com/song.mp3"),
            "https://example.com/song.mp3"
        );
    }

    #[test]
    fn youtube_url_detection() {
        assert!(is_youtube_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_youtube_url("https://music.youtube.com/watch?v=test"));
        assert!(!is_youtube_url("https://example.com/video"));
        assert!(!is_youtube_url("never gonna give you up"));
    }
}
