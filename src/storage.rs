use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use crate::sources::Track;

const METADATA_FILE: &str = "metadata.json";

/// Metadatos de un track guardados en disco. La URL del stream no se
/// guarda nunca: caduca en pocas horas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTrack {
    pub title: String,
    pub duration_secs: Option<u64>,
    pub thumbnail: Option<String>,
    pub saved_at: DateTime<Utc>,
}

impl StoredTrack {
    fn from_track(track: &Track) -> Self {
        Self {
            title: track.title.clone(),
            duration_secs: track.duration.map(|d| d.as_secs()),
            thumbnail: track.thumbnail.clone(),
            saved_at: Utc::now(),
        }
    }

    fn to_track(&self, url: &str) -> Track {
        let mut track = Track::new(url, self.title.clone());
        track.duration = self.duration_secs.map(Duration::from_secs);
        track.thumbnail = self.thumbnail.clone();
        track
    }

    fn same_metadata(&self, track: &Track) -> bool {
        self.title == track.title
            && self.duration_secs == track.duration.map(|d| d.as_secs())
            && self.thumbnail == track.thumbnail
    }

    fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now - self.saved_at > ttl,
            Err(_) => false,
        }
    }
}

/// Almacén de metadatos en un archivo JSON dentro de `DATA_DIR`, para que
/// los títulos sobrevivan a un reinicio.
///
/// `record` solo toca memoria; el archivo se reescribe en `flush`, que
/// corre periódicamente fuera del camino de reproducción.
pub struct MetadataStore {
    path: PathBuf,
    ttl: Duration,
    max_entries: usize,
    tracks: Mutex<HashMap<String, StoredTrack>>,
    dirty: AtomicBool,
    /// Serializa escrituras del archivo sin bloquear `get`/`record`
    write_lock: Mutex<()>,
}

impl MetadataStore {
    pub async fn open(data_dir: PathBuf, ttl: Duration, max_entries: usize) -> Result<Self> {
        fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("No se pudo crear {}", data_dir.display()))?;

        let path = data_dir.join(METADATA_FILE);
        let mut tracks = match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<HashMap<String, StoredTrack>>(&content) {
                Ok(tracks) => tracks,
                Err(e) => {
                    // Un archivo corrupto no impide arrancar; se reescribe al guardar
                    warn!("⚠️ {} ilegible, se empieza vacío: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e).with_context(|| format!("Error leyendo {}", path.display())),
        };

        let pruned = prune(&mut tracks, ttl, max_entries);
        info!(
            "📁 Metadatos cargados: {} tracks desde {} ({} caducados)",
            tracks.len(),
            path.display(),
            pruned
        );

        Ok(Self {
            path,
            ttl,
            max_entries,
            tracks: Mutex::new(tracks),
            dirty: AtomicBool::new(pruned > 0),
            write_lock: Mutex::new(()),
        })
    }

    pub async fn get(&self, url: &str) -> Option<Track> {
        self.tracks
            .lock()
            .await
            .get(url)
            .filter(|stored| !stored.is_expired(self.ttl, Utc::now()))
            .map(|stored| stored.to_track(url))
    }

    /// Guarda (o reemplaza) los metadatos en memoria. Devuelve `false` si
    /// ya estaban tal cual.
    pub async fn record(&self, track: &Track) -> bool {
        let mut tracks = self.tracks.lock().await;
        let unchanged = tracks
            .get(&track.url)
            .is_some_and(|stored| stored.same_metadata(track) && !stored.is_expired(self.ttl, Utc::now()));
        if unchanged {
            return false;
        }

        tracks.insert(track.url.clone(), StoredTrack::from_track(track));
        self.dirty.store(true, Ordering::Release);
        true
    }

    /// Reescribe el archivo si hubo cambios desde la última vez.
    pub async fn flush(&self) -> Result<()> {
        let _writing = self.write_lock.lock().await;
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let content = {
            let mut tracks = self.tracks.lock().await;
            prune(&mut tracks, self.ttl, self.max_entries);
            serde_json::to_string(&*tracks)?
        };

        let tmp = self.path.with_extension("json.tmp");
        let written = async {
            fs::write(&tmp, content).await?;
            fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(e) = written {
            // Se reintenta en el siguiente ciclo
            self.dirty.store(true, Ordering::Release);
            return Err(e).with_context(|| format!("Error escribiendo {}", self.path.display()));
        }

        debug!("💾 Metadatos guardados en {}", self.path.display());
        Ok(())
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.tracks.lock().await.len()
    }
}

/// Quita entradas caducadas y, si sobran, las más antiguas.
fn prune(tracks: &mut HashMap<String, StoredTrack>, ttl: Duration, max_entries: usize) -> usize {
    let before = tracks.len();
    let now = Utc::now();
    tracks.retain(|_, stored| !stored.is_expired(ttl, now));

    if tracks.len() > max_entries {
        let mut by_age: Vec<(String, DateTime<Utc>)> = tracks
            .iter()
            .map(|(url, stored)| (url.clone(), stored.saved_at))
            .collect();
        by_age.sort_by_key(|(_, saved_at)| *saved_at);
        let excess = tracks.len() - max_entries;
        for (url, _) in by_age.into_iter().take(excess) {
            tracks.remove(&url);
        }
    }

    before - tracks.len()
}

/// Vuelca el almacén a disco cada `every` mientras la app corre.
pub async fn flush_loop(store: Arc<MetadataStore>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // el primer tick es inmediato
    interval.tick().await;

    loop {
        interval.tick().await;
        if let Err(e) = store.flush().await {
            warn!("⚠️ No se pudieron guardar los metadatos: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DAY: Duration = Duration::from_secs(86400);

    fn track() -> Track {
        Track::new("https://www.youtube.com/watch?v=abc", "Canción")
            .with_duration(Duration::from_secs(215))
            .with_thumbnail("https://i.ytimg.com/vi/abc/hqdefault.jpg".to_string())
    }

    fn stored(title: &str, age: chrono::Duration) -> StoredTrack {
        StoredTrack {
            title: title.to_string(),
            duration_secs: None,
            thumbnail: None,
            saved_at: Utc::now() - age,
        }
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = MetadataStore::open(dir.path().to_path_buf(), DAY, 10).await.unwrap();
        assert!(store.record(&track()).await);
        store.flush().await.unwrap();
        drop(store);

        let reopened = MetadataStore::open(dir.path().to_path_buf(), DAY, 10).await.unwrap();
        assert_eq!(reopened.len().await, 1);
        assert_eq!(reopened.get(&track().url).await, Some(track()));
        assert_eq!(reopened.get("https://otra").await, None);
    }

    #[tokio::test]
    async fn record_only_touches_memory_until_flush() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path().to_path_buf(), DAY, 10).await.unwrap();

        store.record(&track()).await;
        assert!(!dir.path().join(METADATA_FILE).exists());

        store.flush().await.unwrap();
        assert!(dir.path().join(METADATA_FILE).exists());
    }

    #[tokio::test]
    async fn unchanged_metadata_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path().to_path_buf(), DAY, 10).await.unwrap();

        assert!(store.record(&track()).await);
        store.flush().await.unwrap();
        std::fs::remove_file(dir.path().join(METADATA_FILE)).unwrap();

        assert!(!store.record(&track()).await);
        store.flush().await.unwrap();
        assert!(!dir.path().join(METADATA_FILE).exists());

        let renamed = Track::new(track().url, "Otro título");
        assert!(store.record(&renamed).await);
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), "{ no es json").unwrap();

        let store = MetadataStore::open(dir.path().to_path_buf(), DAY, 10).await.unwrap();
        assert_eq!(store.len().await, 0);

        store.record(&track()).await;
        store.flush().await.unwrap();
        let content = std::fs::read_to_string(dir.path().join(METADATA_FILE)).unwrap();
        assert!(content.contains("Canción"));
        assert!(!content.contains("stream"));
    }

    #[tokio::test]
    async fn creates_missing_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        let store = MetadataStore::open(nested.clone(), DAY, 10).await.unwrap();
        store.record(&track()).await;
        store.flush().await.unwrap();
        assert!(nested.join(METADATA_FILE).exists());
    }

    #[tokio::test]
    async fn expired_entries_are_dropped_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracks = HashMap::new();
        tracks.insert("https://vieja".to_string(), stored("Vieja", chrono::Duration::days(3)));
        tracks.insert("https://nueva".to_string(), stored("Nueva", chrono::Duration::hours(1)));
        std::fs::write(
            dir.path().join(METADATA_FILE),
            serde_json::to_string(&tracks).unwrap(),
        )
        .unwrap();

        let store = MetadataStore::open(dir.path().to_path_buf(), DAY, 10).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("https://vieja").await, None);
        assert_eq!(store.get("https://nueva").await.map(|t| t.title), Some("Nueva".to_string()));
    }

    #[test]
    fn prune_keeps_the_newest_entries() {
        let mut tracks = HashMap::new();
        for (n, hours) in [(1, 5), (2, 1), (3, 3)] {
            tracks.insert(format!("https://t/{}", n), stored("t", chrono::Duration::hours(hours)));
        }

        assert_eq!(prune(&mut tracks, DAY, 2), 1);
        assert!(!tracks.contains_key("https://t/1"));
        assert!(tracks.contains_key("https://t/2"));
        assert!(tracks.contains_key("https://t/3"));
    }
}
