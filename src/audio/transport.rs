use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{scheduler::PlaybackScheduler, session::NowPlayingMessage};
use crate::{
    error::{PlayerError, PlayerResult},
    ui::embeds::volume_line,
};

/// Acciones de reproducción, desde comandos o desde los botones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportAction {
    TogglePause,
    Pause,
    Resume,
    Skip,
    CycleVolume,
    ToggleLoop,
}

impl TransportAction {
    /// Nombre usado en el custom id de los botones
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TogglePause => "pause",
            Self::Pause => "pause_on",
            Self::Resume => "pause_off",
            Self::Skip => "skip",
            Self::CycleVolume => "volume",
            Self::ToggleLoop => "loop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pause" => Some(Self::TogglePause),
            "pause_on" => Some(Self::Pause),
            "pause_off" => Some(Self::Resume),
            "skip" => Some(Self::Skip),
            "volume" => Some(Self::CycleVolume),
            "loop" => Some(Self::ToggleLoop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportOutcome {
    Paused { paused: bool, changed: bool },
    Skipped(String),
    Volume(f32),
    Looping(bool),
}

impl TransportOutcome {
    pub fn message(&self) -> String {
        match self {
            Self::Paused {
                paused: true,
                changed: true,
            } => "⏸️ Música pausada".to_string(),
            Self::Paused {
                paused: false,
                changed: true,
            } => "▶️ Música reanudada".to_string(),
            Self::Paused {
                paused: true,
                changed: false,
            } => "ℹ️ La música ya estaba en pausa".to_string(),
            Self::Paused {
                paused: false,
                changed: false,
            } => "ℹ️ La música no estaba en pausa".to_string(),
            Self::Skipped(title) => format!("⏭️ Saltando: **{}**", title),
            Self::Volume(volume) => volume_line(*volume),
            Self::Looping(true) => "🔁 Repetición activada".to_string(),
            Self::Looping(false) => "➡️ Repetición desactivada".to_string(),
        }
    }
}

/// Aplica las acciones de reproducción de los usuarios, solo si están en el
/// mismo canal de voz que el bot.
pub struct TransportController {
    scheduler: Arc<PlaybackScheduler>,
}

impl TransportController {
    pub fn new(scheduler: Arc<PlaybackScheduler>) -> Self {
        Self { scheduler }
    }

    pub async fn authorize(&self, guild_id: GuildId, user_channel: Option<ChannelId>) -> PlayerResult<()> {
        let bot_channel = self
            .scheduler
            .voice_channel(guild_id)
            .await
            .ok_or(PlayerError::NotConnected)?;

        if user_channel != Some(bot_channel) {
            debug!(
                "Acción rechazada en guild {}: usuario en {:?}, bot en {}",
                guild_id, user_channel, bot_channel
            );
            return Err(PlayerError::Authorization);
        }

        Ok(())
    }

    pub async fn apply(
        &self,
        guild_id: GuildId,
        user_channel: Option<ChannelId>,
        action: TransportAction,
    ) -> PlayerResult<TransportOutcome> {
        self.authorize(guild_id, user_channel).await?;

        let outcome = match action {
            TransportAction::TogglePause => TransportOutcome::Paused {
                paused: self.scheduler.toggle_pause(guild_id).await?,
                changed: true,
            },
            TransportAction::Pause => TransportOutcome::Paused {
                paused: true,
                changed: self.scheduler.set_paused(guild_id, true).await?,
            },
            TransportAction::Resume => TransportOutcome::Paused {
                paused: false,
                changed: self.scheduler.set_paused(guild_id, false).await?,
            },
            TransportAction::Skip => TransportOutcome::Skipped(self.scheduler.skip(guild_id).await?),
            TransportAction::CycleVolume => TransportOutcome::Volume(self.scheduler.cycle_volume(guild_id).await?),
            TransportAction::ToggleLoop => TransportOutcome::Looping(self.scheduler.toggle_loop(guild_id).await?),
        };

        // El mensaje de una sesión saltada lo cierra el fin de la sesión
        if !matches!(outcome, TransportOutcome::Skipped(_)) {
            self.scheduler.refresh_now(guild_id).await;
        }

        Ok(outcome)
    }

    pub async fn stop(&self, guild_id: GuildId, user_channel: Option<ChannelId>) -> PlayerResult<()> {
        self.authorize(guild_id, user_channel).await?;
        self.scheduler.stop(guild_id).await;
        Ok(())
    }
}

/// Publica el mensaje "Reproduciendo" de una sesión y lo refresca cada
/// intervalo hasta que la sesión termina.
///
/// Cada tarea solo edita su propio mensaje, y se corta en cuanto `play_id`
/// deja de ser la sesión activa.
pub fn spawn_progress_refresh(
    scheduler: Arc<PlaybackScheduler>,
    guild_id: GuildId,
    play_id: u64,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        let Some((Some(channel_id), view)) = scheduler.session_view(guild_id, play_id).await else {
            return;
        };

        let posted = tokio::select! {
            _ = token.cancelled() => return,
            posted = scheduler.gateway().post_now_playing(channel_id, &view) => posted,
        };
        let message = match posted {
            Ok(message_id) => NowPlayingMessage {
                channel_id,
                message_id,
            },
            Err(e) => {
                warn!("⚠️ No se pudo publicar el reproductor en guild {}: {}", guild_id, e);
                return;
            }
        };

        if !scheduler.bind_message(guild_id, play_id, message).await {
            return;
        }

        let mut ticker = interval(scheduler.progress_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // el primer tick es inmediato
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some((_, view)) = scheduler.session_view(guild_id, play_id).await else {
                break;
            };
            if let Err(e) = scheduler.gateway().edit_now_playing(message, &view).await {
                debug!("Refresco fallido en guild {}: {}", guild_id, e);
            }
        }

        info!("🛑 Refresco detenido en guild {} (sesión {})", guild_id, play_id);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        scheduler::SchedulerOptions,
        testing::{item, wait_until, FakeGateway, FakeSink, ScriptedResolver},
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const GUILD: GuildId = GuildId::new(1);
    const VOICE: ChannelId = ChannelId::new(2);
    const TEXT: ChannelId = ChannelId::new(3);

    fn scheduler(gateway: Arc<FakeGateway>, progress: Duration) -> Arc<PlaybackScheduler> {
        PlaybackScheduler::new(
            Arc::new(ScriptedResolver::default()),
            Arc::new(FakeSink::default()),
            gateway,
            SchedulerOptions {
                progress_interval: progress,
                ..SchedulerOptions::default()
            },
        )
    }

    #[test]
    fn button_names_round_trip() {
        for action in [
            TransportAction::TogglePause,
            TransportAction::Pause,
            TransportAction::Resume,
            TransportAction::Skip,
            TransportAction::CycleVolume,
            TransportAction::ToggleLoop,
        ] {
            assert_eq!(TransportAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(TransportAction::parse("stop"), None);
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(
            TransportOutcome::Volume(0.5).message(),
            "🔉 `█████░░░░░` **50%**"
        );
        assert_eq!(
            TransportOutcome::Paused {
                paused: true,
                changed: false
            }
            .message(),
            "ℹ️ La música ya estaba en pausa"
        );
    }

    #[tokio::test]
    async fn rejects_users_outside_the_bot_channel() {
        let controller = TransportController::new(scheduler(Arc::default(), Duration::from_secs(60)));

        assert!(matches!(
            controller.authorize(GUILD, Some(VOICE)).await,
            Err(PlayerError::NotConnected)
        ));

        controller.scheduler.attach(GUILD, VOICE, TEXT).await;
        assert!(matches!(
            controller.authorize(GUILD, None).await,
            Err(PlayerError::Authorization)
        ));
        assert!(matches!(
            controller
                .apply(GUILD, Some(ChannelId::new(99)), TransportAction::Skip)
                .await,
            Err(PlayerError::Authorization)
        ));
        assert!(controller.authorize(GUILD, Some(VOICE)).await.is_ok());
    }

    #[tokio::test]
    async fn rejected_action_changes_nothing() {
        let controller = TransportController::new(scheduler(Arc::default(), Duration::from_secs(60)));
        controller.scheduler.attach(GUILD, VOICE, TEXT).await;
        controller.scheduler.enqueue(GUILD, item("a")).await.unwrap();

        let denied = controller
            .apply(GUILD, Some(ChannelId::new(99)), TransportAction::TogglePause)
            .await;
        assert!(denied.is_err());
        assert!(!controller.scheduler.now_playing(GUILD).await.unwrap().paused);
    }

    #[tokio::test]
    async fn actions_update_session() {
        let controller = TransportController::new(scheduler(Arc::default(), Duration::from_secs(60)));
        controller.scheduler.attach(GUILD, VOICE, TEXT).await;
        controller.scheduler.enqueue(GUILD, item("a")).await.unwrap();

        let outcome = controller
            .apply(GUILD, Some(VOICE), TransportAction::Pause)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TransportOutcome::Paused {
                paused: true,
                changed: true
            }
        );

        let outcome = controller
            .apply(GUILD, Some(VOICE), TransportAction::CycleVolume)
            .await
            .unwrap();
        assert_eq!(outcome, TransportOutcome::Volume(0.75));

        let outcome = controller
            .apply(GUILD, Some(VOICE), TransportAction::ToggleLoop)
            .await
            .unwrap();
        assert_eq!(outcome, TransportOutcome::Looping(true));

        let view = controller.scheduler.now_playing(GUILD).await.unwrap();
        assert!(view.paused);
        assert!(view.looping);
        assert_eq!(view.volume, 0.75);
    }

    #[tokio::test]
    async fn refresh_edits_own_message_until_session_ends() {
        let gateway = Arc::new(FakeGateway::default());
        let scheduler = scheduler(gateway.clone(), Duration::from_millis(20));
        let controller = TransportController::new(scheduler.clone());
        scheduler.attach(GUILD, VOICE, TEXT).await;
        scheduler.enqueue(GUILD, item("a")).await.unwrap();

        let g = &gateway;
        wait_until(move || async move { g.edits().len() >= 2 }).await;
        let first_message = g.edits()[0].0;
        assert!(g.edits().iter().all(|(id, _)| *id == first_message));

        controller.stop(GUILD, Some(VOICE)).await.unwrap();
        // dar tiempo a que la tarea vea la cancelación
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after_stop = g.edits().len();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(g.edits().len(), after_stop);
    }
}
