use async_trait::async_trait;
use serenity::model::id::GuildId;
use songbird::{
    input::{ChildContainer, Input},
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{
    process::{Command, Stdio},
    sync::Arc,
};
use tracing::{debug, error, info};

use super::sink::{AudioSink, CompletionSender, PlayOptions, PlaybackHandle, ReconnectPolicy};
use crate::{
    error::{PlayerError, PlayerResult},
    sources::StreamRef,
};

/// Reproduce streams en el `Call` de songbird de cada servidor, pasando el
/// audio por ffmpeg para reconectar si el origen se corta.
pub struct SongbirdSink {
    manager: Arc<Songbird>,
}

impl SongbirdSink {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

/// Argumentos de ffmpeg: entrada remota con reconexión, salida Ogg/Opus por stdout.
pub fn ffmpeg_args(stream: &StreamRef, reconnect: &ReconnectPolicy) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-nostdin",
        "-reconnect",
        "1",
        "-reconnect_streamed",
        "1",
        "-reconnect_delay_max",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect();
    args.push(reconnect.delay_max.as_secs().max(1).to_string());

    if reconnect.attempts > 0 {
        args.push("-reconnect_max_retries".to_string());
        args.push(reconnect.attempts.to_string());
    }

    args.extend(
        [
            "-i",
            stream.as_str(),
            "-vn",
            "-c:a",
            "libopus",
            "-b:a",
            "128k",
            "-ar",
            "48000",
            "-ac",
            "2",
            "-f",
            "ogg",
            "pipe:1",
        ]
        .iter()
        .map(|arg| arg.to_string()),
    );

    args
}

fn transport_error(context: &str, err: impl std::fmt::Display) -> PlayerError {
    PlayerError::Transport(format!("{}: {}", context, err))
}

#[async_trait]
impl AudioSink for SongbirdSink {
    async fn play(
        &self,
        guild_id: GuildId,
        stream: &StreamRef,
        options: PlayOptions,
        on_complete: CompletionSender,
    ) -> PlayerResult<Box<dyn PlaybackHandle>> {
        let call = self.manager.get(guild_id).ok_or(PlayerError::NotConnected)?;

        let child = Command::new("ffmpeg")
            .args(ffmpeg_args(stream, &options.reconnect))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| transport_error("no se pudo iniciar ffmpeg", e))?;

        let input: Input = ChildContainer::from(child).into();

        let track_handle = {
            let mut handler = call.lock().await;
            handler.play_only_input(input)
        };

        // Registrar los avisos de fin antes de cualquier otra operación
        track_handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    completion: on_complete.clone(),
                },
            )
            .map_err(|e| transport_error("error al registrar evento de fin", e))?;

        track_handle
            .add_event(
                Event::Track(TrackEvent::Error),
                TrackErrorNotifier {
                    guild_id,
                    completion: on_complete,
                },
            )
            .map_err(|e| transport_error("error al registrar evento de error", e))?;

        track_handle
            .set_volume(options.volume)
            .map_err(|e| transport_error("no se pudo ajustar el volumen", e))?;

        info!("▶️ Stream iniciado en guild {}", guild_id);

        Ok(Box::new(SongbirdPlayback {
            handle: track_handle,
        }))
    }
}

struct SongbirdPlayback {
    handle: TrackHandle,
}

impl PlaybackHandle for SongbirdPlayback {
    fn stop(&self) {
        // Si ya terminó, songbird devuelve error; no importa
        if let Err(e) = self.handle.stop() {
            debug!("stop sobre un track ya terminado: {}", e);
        }
    }

    fn pause(&self) -> PlayerResult<()> {
        self.handle
            .pause()
            .map_err(|e| transport_error("no se pudo pausar", e))
    }

    fn resume(&self) -> PlayerResult<()> {
        self.handle
            .play()
            .map_err(|e| transport_error("no se pudo reanudar", e))
    }

    fn set_volume(&self, volume: f32) -> PlayerResult<()> {
        self.handle
            .set_volume(volume)
            .map_err(|e| transport_error("no se pudo ajustar el volumen", e))
    }
}

/// Handler para cuando termina (o se detiene) un track
struct TrackEndNotifier {
    completion: CompletionSender,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        debug!("Track {} terminado", self.completion.play_id());
        self.completion.complete(None);
        None
    }
}

/// Handler para errores de tracks
struct TrackErrorNotifier {
    guild_id: GuildId,
    completion: CompletionSender,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let mut reason = "error desconocido".to_string();

        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                if let PlayMode::Errored(err) = &state.playing {
                    reason = format!("{:?}", err);
                }
            }
        }

        error!("❌ Error en track para guild {}: {}", self.guild_id, reason);
        self.completion.complete(Some(reason));
        None
    }
}
