use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{Playlist, ResolvedTrack, Track, TrackResolver};
use crate::{cache::MetadataCache, error::PlayerResult, storage::MetadataStore};

/// Resolver con caché de metadatos delante.
///
/// `describe` se sirve desde memoria, luego desde disco, y solo al final
/// pregunta al resolver interno. `resolve` siempre llega al resolver interno
/// porque las URLs de stream caducan; solo aprovecha para guardar metadatos.
pub struct CachedResolver {
    inner: Arc<dyn TrackResolver>,
    cache: MetadataCache,
    store: Option<Arc<MetadataStore>>,
}

impl CachedResolver {
    pub fn new(inner: Arc<dyn TrackResolver>, cache: MetadataCache, store: Option<Arc<MetadataStore>>) -> Self {
        Self { inner, cache, store }
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    async fn remember(&self, track: &Track) {
        self.cache.insert(track.url.clone(), track.clone());
        if let Some(store) = &self.store {
            if store.record(track).await {
                debug!("💾 Metadatos nuevos para guardar: {}", track.url);
            }
        }
    }
}

#[async_trait]
impl TrackResolver for CachedResolver {
    async fn resolve(&self, url_or_query: &str) -> PlayerResult<ResolvedTrack> {
        let resolved = self.inner.resolve(url_or_query).await?;
        self.remember(&resolved.track).await;
        Ok(resolved)
    }

    async fn describe(&self, url: &str) -> PlayerResult<Track> {
        if let Some(track) = self.cache.get(&url.to_string()) {
            debug!("📦 Metadatos en caché: {}", url);
            return Ok(track);
        }

        if let Some(store) = &self.store {
            if let Some(track) = store.get(url).await {
                debug!("💾 Metadatos en disco: {}", url);
                self.cache.insert(url.to_string(), track.clone());
                return Ok(track);
            }
        }

        let track = self.inner.describe(url).await?;
        self.remember(&track).await;
        Ok(track)
    }

    async fn enumerate_playlist(&self, url: &str, limit: usize) -> PlayerResult<Playlist> {
        self.inner.enumerate_playlist(url, limit).await
    }
}
