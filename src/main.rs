use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod sources;
mod storage;
mod ui;

use crate::audio::{
    player::SongbirdSink,
    scheduler::{PlaybackScheduler, SchedulerOptions},
};
use crate::bot::JukeboxBot;
use crate::cache::MetadataCache;
use crate::config::Config;
use crate::sources::{
    cached::CachedResolver, youtube_api::YouTubeApiSearch, ytdlp::YtDlpResolver, SearchService,
};
use crate::storage::MetadataStore;
use crate::ui::gateway::SerenityGateway;

/// Cada cuánto se vuelcan a disco los metadatos nuevos
const METADATA_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jukebox_bot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    // El health check no necesita token
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    info!("🎵 Iniciando Jukebox Bot v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);
    info!("⚙️ {}", config.summary());

    // Resolución de canciones: yt-dlp con caché de metadatos delante
    let ytdlp = Arc::new(YtDlpResolver::new(
        config.resolver_workers,
        config.resolve_timeout(),
    ));
    let store = if config.persist_metadata {
        let store = Arc::new(
            MetadataStore::open(config.data_dir.clone(), config.metadata_ttl(), config.cache_size).await?,
        );
        tokio::spawn(storage::flush_loop(store.clone(), METADATA_FLUSH_INTERVAL));
        Some(store)
    } else {
        None
    };
    let resolver = Arc::new(CachedResolver::new(
        ytdlp.clone(),
        MetadataCache::new(config.cache_size, config.metadata_ttl()),
        store.clone(),
    ));

    let search: Arc<dyn SearchService> = match &config.youtube_api_key {
        Some(key) => {
            info!("🔎 Búsqueda con YouTube Data API");
            Arc::new(YouTubeApiSearch::new(key.clone())?)
        }
        None => {
            info!("🔎 Búsqueda con yt-dlp (sin YOUTUBE_API_KEY)");
            ytdlp
        }
    };

    // Voz y reproducción
    let songbird = Songbird::serenity();
    // El gateway recibe el `Http` del cliente una vez construido
    let gateway = Arc::new(SerenityGateway::new());
    let scheduler = PlaybackScheduler::new(
        resolver.clone(),
        Arc::new(SongbirdSink::new(songbird.clone())),
        gateway.clone(),
        SchedulerOptions::from_config(&config),
    );

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = JukeboxBot::new(config.clone(), scheduler, resolver, search);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;
    gateway.bind(client.http.clone());

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("⚠️ Señal de shutdown recibida, cerrando...");
                if let Some(store) = &store {
                    if let Err(e) = store.flush().await {
                        error!("Error guardando metadatos: {:?}", e);
                    }
                }
                shard_manager.shutdown_all().await;
            }
            Err(e) => error!("Error al registrar Ctrl+C: {:?}", e),
        }
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
