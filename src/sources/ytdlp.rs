use anyhow::Context;
use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::{process::Output, sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{
    is_url, watch_url, Playlist, PlaylistEntry, ResolvedTrack, SearchHit, SearchService, StreamRef,
    Track, TrackResolver,
};
use crate::error::{PlayerError, PlayerResult};

/// Preferencia de formato: opus en webm primero, luego cualquier audio.
pub const FORMAT_PREFERENCE: &str =
    "251/250/249/bestaudio[ext=webm][acodec=opus]/bestaudio[acodec=opus]/bestaudio";

const PREFERRED_FORMAT_IDS: [&str; 3] = ["251", "250", "249"];

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    /// Presente cuando `-f` seleccionó un único formato.
    url: Option<String>,
    #[serde(default)]
    formats: Vec<Format>,
    uploader: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Format {
    format_id: String,
    url: Option<String>,
    ext: Option<String>,
    acodec: Option<String>,
    vcodec: Option<String>,
}

impl Format {
    fn has_audio(&self) -> bool {
        self.acodec.as_deref().is_some_and(|codec| codec != "none")
    }

    fn is_opus(&self) -> bool {
        self.acodec.as_deref().is_some_and(|codec| codec.contains("opus"))
    }

    fn audio_only(&self) -> bool {
        self.has_audio() && self.vcodec.as_deref().is_none_or(|codec| codec == "none")
    }
}

#[derive(Debug, Deserialize)]
struct FlatPlaylist {
    title: Option<String>,
    #[serde(default)]
    entries: Vec<Option<FlatEntry>>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    url: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    channel: Option<String>,
    uploader: Option<String>,
}

/// Cliente de yt-dlp con un pool acotado de extracciones concurrentes.
///
/// Cada llamada ocupa un permiso del semáforo, así que una extracción lenta
/// en un servidor nunca bloquea a los demás más allá del tamaño del pool.
/// El proceso hijo se mata si la llamada se cancela o vence el timeout.
pub struct YtDlpResolver {
    workers: Arc<Semaphore>,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(workers: usize, timeout: Duration) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
        }
    }

    async fn run(&self, query: &str, args: &[&str]) -> PlayerResult<String> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|e| PlayerError::resolution(query, e))?;

        let mut command = Command::new("yt-dlp");
        command.args(args).arg(query).kill_on_drop(true);

        let output: Output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                PlayerError::resolution(
                    query,
                    format!("tiempo de espera agotado ({}s)", self.timeout.as_secs()),
                )
            })?
            .map_err(|e| PlayerError::resolution(query, format!("no se pudo ejecutar yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("yt-dlp terminó con error")
                .to_string();
            return Err(PlayerError::resolution(query, reason));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Versión instalada de yt-dlp (health check y mantenimiento)
    pub async fn version() -> anyhow::Result<String> {
        let mut command = Command::new("yt-dlp");
        command.arg("--version").kill_on_drop(true);
        let output = command.output().await.context("Error al ejecutar yt-dlp")?;

        if !output.status.success() {
            anyhow::bail!(
                "yt-dlp --version falló: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, url_or_query: &str) -> PlayerResult<ResolvedTrack> {
        let target = if is_url(url_or_query) {
            url_or_query.to_string()
        } else {
            format!("ytsearch1:{}", url_or_query)
        };

        debug!("🎵 Resolviendo stream: {}", target);

        let stdout = self
            .run(
                &target,
                &["--no-playlist", "--dump-json", "--no-warnings", "-f", FORMAT_PREFERENCE],
            )
            .await?;

        let line = stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| PlayerError::resolution(url_or_query, "sin resultados"))?;

        let info: YtDlpInfo = serde_json::from_str(line)
            .map_err(|e| PlayerError::resolution(url_or_query, format!("JSON inválido: {}", e)))?;

        resolved_from_info(url_or_query, info)
    }

    async fn describe(&self, url: &str) -> PlayerResult<Track> {
        debug!("📊 Obteniendo info de: {}", url);

        let stdout = self
            .run(url, &["--no-playlist", "--dump-json", "--skip-download", "--no-warnings"])
            .await?;

        let info: YtDlpInfo = serde_json::from_str(stdout.trim())
            .map_err(|e| PlayerError::resolution(url, format!("JSON inválido: {}", e)))?;

        Ok(track_from_info(url, &info))
    }

    async fn enumerate_playlist(&self, url: &str, limit: usize) -> PlayerResult<Playlist> {
        info!("📋 Obteniendo playlist: {}", url);

        let end = limit.to_string();
        let stdout = self
            .run(
                url,
                &[
                    "--flat-playlist",
                    "--dump-single-json",
                    "--playlist-end",
                    &end,
                    "--ignore-errors",
                    "--no-warnings",
                ],
            )
            .await?;

        parse_playlist(url, &stdout, limit)
    }
}

#[async_trait]
impl SearchService for YtDlpResolver {
    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<SearchHit>> {
        info!("🔍 Buscando con yt-dlp: {}", query);

        let search_query = format!("ytsearch{}:{}", max_results, query);
        let stdout = self
            .run(&search_query, &["--flat-playlist", "--dump-json", "--no-warnings"])
            .await?;

        Ok(parse_search_lines(&stdout, max_results))
    }
}

fn track_from_info(query: &str, info: &YtDlpInfo) -> Track {
    let url = info
        .webpage_url
        .clone()
        .or_else(|| info.id.as_deref().map(watch_url))
        .unwrap_or_else(|| query.to_string());

    let mut track = Track::new(url, info.title.clone().unwrap_or_else(|| query.to_string()));
    if let Some(secs) = info.duration.filter(|d| *d > 0.0) {
        track = track.with_duration(Duration::from_secs_f64(secs));
    }
    if let Some(thumbnail) = &info.thumbnail {
        track = track.with_thumbnail(thumbnail.clone());
    }
    track
}

fn resolved_from_info(query: &str, info: YtDlpInfo) -> PlayerResult<ResolvedTrack> {
    let track = track_from_info(query, &info);

    let stream = info
        .url
        .clone()
        .or_else(|| select_audio_format(&info.formats).map(str::to_string))
        .ok_or_else(|| PlayerError::resolution(query, "ningún formato de audio disponible"))?;

    debug!(
        "✅ Resuelto: {} ({})",
        track.title,
        info.uploader.as_deref().unwrap_or("desconocido")
    );

    Ok(ResolvedTrack {
        track,
        stream: StreamRef(stream),
    })
}

/// Elige la URL del mejor formato de audio según [`FORMAT_PREFERENCE`].
fn select_audio_format(formats: &[Format]) -> Option<&str> {
    let playable = || formats.iter().filter(|f| f.url.is_some());

    PREFERRED_FORMAT_IDS
        .iter()
        .find_map(|id| playable().find(|f| f.format_id == *id))
        .or_else(|| playable().find(|f| f.audio_only() && f.is_opus() && f.ext.as_deref() == Some("webm")))
        .or_else(|| playable().find(|f| f.audio_only() && f.is_opus()))
        .or_else(|| playable().filter(|f| f.audio_only()).last())
        .or_else(|| playable().filter(|f| f.has_audio()).last())
        .and_then(|f| f.url.as_deref())
}

fn entry_url(entry: &FlatEntry) -> Option<String> {
    match (&entry.url, &entry.id) {
        (Some(url), _) if is_url(url) => Some(url.clone()),
        (_, Some(id)) => Some(watch_url(id)),
        _ => None,
    }
}

/// Las entradas sin URL o sin título (privadas, borradas) se descartan.
fn parse_playlist(url: &str, stdout: &str, limit: usize) -> PlayerResult<Playlist> {
    let raw: FlatPlaylist = serde_json::from_str(stdout.trim())
        .map_err(|e| PlayerError::resolution(url, format!("JSON inválido: {}", e)))?;

    let total = raw.entries.len();
    let entries: Vec<PlaylistEntry> = raw
        .entries
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            let url = entry_url(&entry)?;
            let title = entry.title.filter(|t| !t.trim().is_empty())?;
            Some(PlaylistEntry { url, title })
        })
        .take(limit)
        .collect();

    if entries.len() < total {
        warn!("⚠️ {} entradas de la playlist no disponibles", total - entries.len());
    }

    if entries.is_empty() {
        return Err(PlayerError::resolution(url, "la playlist no tiene vídeos disponibles"));
    }

    Ok(Playlist {
        title: raw.title.unwrap_or_else(|| "Playlist".to_string()),
        entries,
    })
}

fn parse_search_lines(stdout: &str, max_results: usize) -> Vec<SearchHit> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<FlatEntry>(line).ok())
        .filter_map(|entry| {
            let url = entry_url(&entry)?;
            Some(SearchHit {
                title: entry.title?,
                url,
                channel: entry.channel.or(entry.uploader),
                duration: entry
                    .duration
                    .filter(|d| *d > 0.0)
                    .map(Duration::from_secs_f64),
            })
        })
        .take(max_results)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn format(id: &str, ext: &str, acodec: &str, vcodec: &str) -> Format {
        Format {
            format_id: id.to_string(),
            url: Some(format!("https://cdn.example/{}", id)),
            ext: Some(ext.to_string()),
            acodec: Some(acodec.to_string()),
            vcodec: Some(vcodec.to_string()),
        }
    }

    #[test]
    fn prefers_opus_251_over_everything() {
        let formats = vec![
            format("140", "m4a", "mp4a.40.2", "none"),
            format("249", "webm", "opus", "none"),
            format("251", "webm", "opus", "none"),
            format("18", "mp4", "mp4a.40.2", "avc1"),
        ];
        assert_eq!(select_audio_format(&formats), Some("https://cdn.example/251"));
    }

    #[test]
    fn falls_back_to_any_opus_audio() {
        let formats = vec![
            format("140", "m4a", "mp4a.40.2", "none"),
            format("600", "ogg", "opus", "none"),
        ];
        assert_eq!(select_audio_format(&formats), Some("https://cdn.example/600"));
    }

    #[test]
    fn falls_back_to_muxed_stream_when_no_audio_only_format() {
        let formats = vec![
            format("sb0", "mhtml", "none", "none"),
            format("18", "mp4", "mp4a.40.2", "avc1"),
        ];
        assert_eq!(select_audio_format(&formats), Some("https://cdn.example/18"));
    }

    #[test]
    fn no_audio_is_a_resolution_error() {
        let info = YtDlpInfo {
            id: Some("abc".to_string()),
            title: Some("Silencio".to_string()),
            duration: None,
            thumbnail: None,
            webpage_url: None,
            url: None,
            formats: vec![format("sb0", "mhtml", "none", "none")],
            uploader: None,
        };
        let err = resolved_from_info("abc", info).unwrap_err();
        assert!(matches!(err, PlayerError::Resolution { .. }));
    }

    #[test]
    fn selected_url_wins_over_format_list() {
        let json = r#"{
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "duration": 212.0,
            "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "url": "https://cdn.example/direct",
            "formats": []
        }"#;
        let info: YtDlpInfo = serde_json::from_str(json).unwrap();
        let resolved = resolved_from_info("dQw4w9WgXcQ", info).unwrap();

        assert_eq!(resolved.stream.as_str(), "https://cdn.example/direct");
        assert_eq!(resolved.track.title, "Never Gonna Give You Up");
        assert_eq!(resolved.track.duration, Some(Duration::from_secs(212)));
    }

    #[test]
    fn playlist_skips_unavailable_entries() {
        let json = r#"{
            "title": "Mix",
            "entries": [
                {"id": "aaaaaaaaaaa", "url": "https://www.youtube.com/watch?v=aaaaaaaaaaa", "title": "Uno"},
                null,
                {"id": "bbbbbbbbbbb", "title": null},
                {"id": "ccccccccccc", "title": "Tres"}
            ]
        }"#;
        let playlist = parse_playlist("https://www.youtube.com/playlist?list=PL1", json, 50).unwrap();

        assert_eq!(playlist.title, "Mix");
        assert_eq!(
            playlist.entries,
            vec![
                PlaylistEntry {
                    url: "https://www.youtube.com/watch?v=aaaaaaaaaaa".to_string(),
                    title: "Uno".to_string(),
                },
                PlaylistEntry {
                    url: "https://www.youtube.com/watch?v=ccccccccccc".to_string(),
                    title: "Tres".to_string(),
                },
            ]
        );
    }

    #[test]
    fn playlist_respects_limit() {
        let json = r#"{"entries": [
            {"id": "aaaaaaaaaaa", "title": "Uno"},
            {"id": "bbbbbbbbbbb", "title": "Dos"},
            {"id": "ccccccccccc", "title": "Tres"}
        ]}"#;
        let playlist = parse_playlist("list", json, 2).unwrap();
        assert_eq!(playlist.entries.len(), 2);
        assert_eq!(playlist.title, "Playlist");
    }

    #[test]
    fn empty_playlist_is_an_error() {
        let json = r#"{"title": "Vacía", "entries": [null]}"#;
        assert!(parse_playlist("list", json, 50).is_err());
    }

    #[test]
    fn search_lines_are_parsed_until_limit() {
        let stdout = concat!(
            r#"{"id": "aaaaaaaaaaa", "title": "Uno", "channel": "Canal", "duration": 180}"#,
            "\n",
            "not json\n",
            r#"{"id": "bbbbbbbbbbb", "title": "Dos", "uploader": "Otro"}"#,
            "\n",
            r#"{"id": "ccccccccccc", "title": "Tres"}"#,
        );
        let hits = parse_search_lines(stdout, 2);

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].channel.as_deref(), Some("Canal"));
        assert_eq!(hits[0].duration, Some(Duration::from_secs(180)));
        assert_eq!(hits[1].url, "https://www.youtube.com/watch?v=bbbbbbbbbbb");
        assert_eq!(hits[1].channel.as_deref(), Some("Otro"));
    }
}
