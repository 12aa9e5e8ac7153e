//! # Cache Module
//!
//! Two caches with very different lifetimes:
//!
//! - [`PrefetchCache`]: at most one warm, already-resolved stream per guild,
//!   for the track expected to play next. Entries are consumed exactly once
//!   and only when the track about to play is the one that was prefetched.
//! - [`MetadataCache`]: titles, durations and thumbnails by URL, with a TTL
//!   and a bounded size. Stream URLs are never cached here since they expire.

pub mod ttl_cache;

use dashmap::DashMap;
use serenity::model::id::GuildId;
use tracing::debug;

use crate::sources::{ResolvedTrack, Track};
use ttl_cache::TtlCache;

/// Metadata cache keyed by track URL.
pub type MetadataCache = TtlCache<String, Track>;

/// A stream resolved ahead of time for a queued track.
#[derive(Debug, Clone)]
pub struct PrefetchEntry {
    /// URL of the queue entry this was resolved for.
    pub requested_url: String,
    pub resolved: ResolvedTrack,
}

impl PrefetchEntry {
    pub fn new(requested_url: impl Into<String>, resolved: ResolvedTrack) -> Self {
        Self {
            requested_url: requested_url.into(),
            resolved,
        }
    }
}

/// One prefetch slot per guild.
#[derive(Debug, Default)]
pub struct PrefetchCache {
    slots: DashMap<GuildId, PrefetchEntry>,
}

impl PrefetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a warm stream, replacing whatever the guild had.
    pub fn put(&self, guild_id: GuildId, entry: PrefetchEntry) {
        debug!("🔥 Precarga lista para {}: {}", guild_id, entry.requested_url);
        self.slots.insert(guild_id, entry);
    }

    /// Consumes the slot only if it was resolved for `url`.
    ///
    /// A slot for any other track is left alone; it will be overwritten or
    /// invalidated later.
    pub fn take_if_matches(&self, guild_id: GuildId, url: &str) -> Option<PrefetchEntry> {
        self.slots
            .remove_if(&guild_id, |_, entry| entry.requested_url == url)
            .map(|(_, entry)| entry)
    }

    pub fn invalidate(&self, guild_id: GuildId) {
        if self.slots.remove(&guild_id).is_some() {
            debug!("🧹 Precarga descartada para {}", guild_id);
        }
    }

    pub fn is_warm_for(&self, guild_id: GuildId, url: &str) -> bool {
        self.slots
            .get(&guild_id)
            .is_some_and(|entry| entry.requested_url == url)
    }
}
