//! # Bot Module
//!
//! Serenity event handler for the jukebox.
//!
//! - Text commands with a fixed prefix (see [`commands`])
//! - Button presses for transport, search picks and playlist prompts
//! - Voice state tracking: when the bot is dropped from voice, the guild's
//!   playback is stopped
//! - Hourly maintenance (metadata cache cleanup, yt-dlp probe)
//!
//! Playback itself lives in [`crate::audio`]; the handler only translates
//! chat events into scheduler calls.

use dashmap::DashMap;
use serenity::{
    all::{Context, EventHandler, Interaction, Message, MessageId, Ready, UserId, VoiceState},
    async_trait,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{
    audio::{scheduler::PlaybackScheduler, transport::TransportController},
    config::Config,
    sources::{cached::CachedResolver, ytdlp::YtDlpResolver, SearchService},
};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Selección pendiente (búsqueda o playlist): solo su autor puede elegir.
#[derive(Debug, Clone, Copy)]
pub struct PendingPrompt {
    pub author: UserId,
}

/// Main Discord event handler.
///
/// All fields are shared across guilds; per-guild state lives inside the
/// [`PlaybackScheduler`].
pub struct JukeboxBot {
    config: Arc<Config>,
    scheduler: Arc<PlaybackScheduler>,
    transport: TransportController,
    resolver: Arc<CachedResolver>,
    search: Arc<dyn SearchService>,
    /// Mensajes con botones de selección aún vigentes
    prompts: Arc<DashMap<MessageId, PendingPrompt>>,
    maintenance_started: AtomicBool,
}

impl JukeboxBot {
    pub fn new(
        config: Arc<Config>,
        scheduler: Arc<PlaybackScheduler>,
        resolver: Arc<CachedResolver>,
        search: Arc<dyn SearchService>,
    ) -> Self {
        Self {
            config,
            transport: TransportController::new(scheduler.clone()),
            scheduler,
            resolver,
            search,
            prompts: Arc::new(DashMap::new()),
            maintenance_started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        // `ready` se repite en cada reconexión del gateway
        if self.maintenance_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let resolver = self.resolver.clone();
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            maintenance_tasks(resolver, scheduler).await;
        });
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if let Err(e) = handlers::handle_message(&ctx, &msg, self).await {
            error!("Error manejando mensaje: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Component(component) = interaction {
            if let Err(e) = handlers::handle_component(&ctx, &component, self).await {
                error!("Error manejando componente: {:?}", e);
            }
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id {
            return;
        }

        let Some(guild_id) = new.guild_id else {
            return;
        };

        match new.channel_id {
            // Bot desconectado (a mano o por `leave`)
            None if old.is_some() => {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                self.scheduler.detach(guild_id).await;
            }
            // Movido a otro canal: la autorización sigue al canal real
            Some(channel_id) => {
                self.scheduler.set_voice_channel(guild_id, channel_id).await;
            }
            None => {}
        }
    }
}

/// Runs hourly housekeeping: expired metadata cleanup, a session count and
/// a yt-dlp probe.
/// Failures are logged and the loop keeps going.
async fn maintenance_tasks(resolver: Arc<CachedResolver>, scheduler: Arc<PlaybackScheduler>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    // el primer tick es inmediato
    interval.tick().await;

    loop {
        interval.tick().await;

        let removed = resolver.cache().cleanup_expired();
        let metrics = resolver.cache().metrics();
        info!(
            "🧹 Caché de metadatos: {} expiradas, {} entradas, {:.1}% aciertos",
            removed,
            metrics.entries,
            metrics.hit_rate() * 100.0
        );

        info!("🎶 Sesiones activas: {}", scheduler.active_sessions().await);

        match YtDlpResolver::version().await {
            Ok(version) => info!("✅ yt-dlp {}", version),
            Err(e) => warn!("⚠️ yt-dlp no responde: {:?}", e),
        }

        info!("🧹 Tareas de mantenimiento completadas");
    }
}
