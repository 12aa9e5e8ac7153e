use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};
use tracing::{debug, error, info, warn};

use super::{watch_url, SearchHit, SearchService};

const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/search";
const VIDEOS_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/videos";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    channel_title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetails {
    id: String,
    content_details: ContentDetails,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: String,
}

/// Búsqueda con YouTube Data API v3 (requiere `YOUTUBE_API_KEY`).
pub struct YouTubeApiSearch {
    api_key: String,
    client: reqwest::Client,
}

impl YouTubeApiSearch {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("No se pudo crear el cliente HTTP")?;

        Ok(Self { api_key, client })
    }

    /// Duraciones de los vídeos encontrados; si falla, la búsqueda sigue sin ellas.
    async fn durations(&self, ids: &[String]) -> Result<HashMap<String, Duration>> {
        let joined = ids.join(",");
        let response = self
            .client
            .get(VIDEOS_ENDPOINT)
            .query(&[
                ("part", "contentDetails"),
                ("id", joined.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("YouTube API error: {}", response.status());
        }

        let details: VideosResponse = response.json().await?;
        Ok(details
            .items
            .into_iter()
            .filter_map(|video| {
                parse_iso8601_duration(&video.content_details.duration).map(|d| (video.id, d))
            })
            .collect())
    }
}

#[async_trait]
impl SearchService for YouTubeApiSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        debug!("🔍 Búsqueda YouTube API v3: {}", query);

        let limit = max_results.to_string();
        let response = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[
                ("part", "snippet"),
                ("q", query),
                ("type", "video"),
                ("maxResults", limit.as_str()),
                ("key", self.api_key.as_str()),
                ("videoEmbeddable", "true"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("❌ YouTube API error: {} - {}", status, error_text);
            anyhow::bail!("YouTube API error: {}", status);
        }

        let results: SearchResponse = response.json().await?;
        let videos: Vec<(String, Snippet)> = results
            .items
            .into_iter()
            .filter_map(|item| Some((item.id.video_id?, item.snippet)))
            .collect();

        let ids: Vec<String> = videos.iter().map(|(id, _)| id.clone()).collect();
        let durations = if ids.is_empty() {
            HashMap::new()
        } else {
            self.durations(&ids).await.unwrap_or_else(|e| {
                warn!("⚠️ No se pudieron obtener duraciones: {}", e);
                HashMap::new()
            })
        };

        let hits: Vec<SearchHit> = videos
            .into_iter()
            .map(|(id, snippet)| SearchHit {
                url: watch_url(&id),
                duration: durations.get(&id).copied(),
                title: snippet.title,
                channel: snippet.channel_title,
            })
            .collect();

        info!("✅ YouTube API v3: {} resultados", hits.len());
        Ok(hits)
    }
}

/// Parsea duraciones ISO 8601 de la API (`PT1H2M3S`). `P0D` es un directo.
fn parse_iso8601_duration(duration: &str) -> Option<Duration> {
    let mut total = 0u64;
    let mut current = String::new();
    let mut in_time = false;

    for ch in duration.chars() {
        match ch {
            'P' => continue,
            'T' => in_time = true,
            _ if ch.is_ascii_digit() => current.push(ch),
            unit => {
                let value: u64 = current.parse().ok()?;
                current.clear();
                total += match (in_time, unit) {
                    (false, 'D') => value * 86_400,
                    (true, 'H') => value * 3_600,
                    (true, 'M') => value * 60,
                    (true, 'S') => value,
                    _ => return None,
                };
            }
        }
    }

    (total > 0).then(|| Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hours_minutes_seconds() {
        assert_eq!(
            parse_iso8601_duration("PT1H2M3S"),
            Some(Duration::from_secs(3723))
        );
        assert_eq!(parse_iso8601_duration("PT4M"), Some(Duration::from_secs(240)));
    }

    #[test]
    fn live_streams_have_no_duration() {
        assert_eq!(parse_iso8601_duration("P0D"), None);
        assert_eq!(parse_iso8601_duration("garbage"), None);
    }

    #[test]
    fn search_response_skips_channels() {
        let json = r#"{"items": [
            {"id": {"kind": "youtube#video", "videoId": "dQw4w9WgXcQ"},
             "snippet": {"title": "Rick", "channelTitle": "RickAstleyVEVO"}},
            {"id": {"kind": "youtube#channel", "channelId": "UC1"},
             "snippet": {"title": "Canal"}}
        ]}"#;
        let response: SearchResponse = serde_json::from_str(json).unwrap();
        let ids: Vec<_> = response
            .items
            .into_iter()
            .filter_map(|item| item.id.video_id)
            .collect();
        assert_eq!(ids, vec!["dQw4w9WgXcQ".to_string()]);
    }
}
