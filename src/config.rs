use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Búsqueda (opcional, sin clave se usa yt-dlp)
    pub youtube_api_key: Option<String>,
    pub search_results: usize,

    // Audio
    pub default_volume: f32,
    pub reconnect_attempts: u32,
    pub reconnect_delay_max_secs: u64,

    // Cola y reproductor
    pub max_queue_size: usize,
    pub max_playlist_size: usize,
    pub progress_interval_secs: u64,
    pub prompt_timeout_secs: u64,

    // Rendimiento
    pub resolver_workers: usize,
    pub resolve_timeout_secs: u64,
    pub cache_size: usize,
    pub metadata_ttl_secs: u64,

    // Persistencia
    pub persist_metadata: bool,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN")
                .context("DISCORD_TOKEN no está definido")?,
            command_prefix: std::env::var("COMMAND_PREFIX").unwrap_or_else(|_| "!".to_string()),

            youtube_api_key: std::env::var("YOUTUBE_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            search_results: std::env::var("SEARCH_RESULTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,

            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "1.0".to_string())
                .parse()?,
            reconnect_attempts: std::env::var("RECONNECT_ATTEMPTS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()?,
            reconnect_delay_max_secs: std::env::var("RECONNECT_DELAY_MAX_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,

            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            max_playlist_size: std::env::var("MAX_PLAYLIST_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            progress_interval_secs: std::env::var("PROGRESS_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            prompt_timeout_secs: std::env::var("PROMPT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,

            resolver_workers: match std::env::var("RESOLVER_WORKERS") {
                Ok(val) if !val.trim().is_empty() => val.parse()?,
                _ => num_cpus::get(),
            },
            resolve_timeout_secs: std::env::var("RESOLVE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            cache_size: std::env::var("CACHE_SIZE")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,
            metadata_ttl_secs: std::env::var("METADATA_TTL_SECS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()?,

            persist_metadata: std::env::var("PERSIST_METADATA")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "./data".to_string())
                .into(),
        };

        if config.persist_metadata {
            std::fs::create_dir_all(&config.data_dir)?;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Token and prefix must not be empty
    /// - Volume must be between 0.0 and 1.0 (the volume ladder tops out at 100%)
    /// - Worker pool, cache and queue sizes must be greater than 0
    /// - The progress refresh interval must be at least one second
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN está vacío");
        }

        if self.command_prefix.is_empty() {
            anyhow::bail!("Command prefix must not be empty");
        }

        if !(0.0..=1.0).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between 0.0 and 1.0, got: {}",
                self.default_volume
            );
        }

        if self.resolver_workers == 0 {
            anyhow::bail!("Resolver worker pool must have at least one worker");
        }

        if self.cache_size == 0 {
            anyhow::bail!("Cache size must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.progress_interval_secs == 0 {
            anyhow::bail!("Progress interval must be at least 1 second");
        }

        if self.search_results == 0 || self.search_results > 5 {
            anyhow::bail!(
                "Search results must be between 1 and 5, got: {}",
                self.search_results
            );
        }

        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_ttl_secs)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the Discord token and the API key.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix '{}'\n  \
            Search: {} ({} results)\n  \
            Audio: {}% vol, reconnect {} attempts / {}s max delay\n  \
            Queue: {} max, {} per playlist, refresh every {}s\n  \
            Resolver: {} workers, {}s timeout\n  \
            Cache: {} entries, {}s TTL, persisted={}",
            self.command_prefix,
            if self.youtube_api_key.is_some() { "YouTube API v3" } else { "yt-dlp" },
            self.search_results,
            (self.default_volume * 100.0) as u32,
            self.reconnect_attempts,
            self.reconnect_delay_max_secs,
            self.max_queue_size,
            self.max_playlist_size,
            self.progress_interval_secs,
            self.resolver_workers,
            self.resolve_timeout_secs,
            self.cache_size,
            self.metadata_ttl_secs,
            self.persist_metadata,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            command_prefix: "!".to_string(),

            youtube_api_key: None,
            search_results: 5,

            default_volume: 1.0,
            reconnect_attempts: 0,
            reconnect_delay_max_secs: 5,

            max_queue_size: 1000,
            max_playlist_size: 50,
            progress_interval_secs: 5,
            prompt_timeout_secs: 30,

            resolver_workers: num_cpus::get(),
            resolve_timeout_secs: 60,
            cache_size: 500,
            metadata_ttl_secs: 86400,

            persist_metadata: true,
            data_dir: "./data".into(),
        }
    }
}
