//! The seam between the scheduler and whatever actually emits audio.

use async_trait::async_trait;
use serenity::model::id::GuildId;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;

use crate::{error::PlayerResult, sources::StreamRef};

/// How the transcoder should retry a dropped upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// `0` leaves the retry count to the transcoder's default.
    pub attempts: u32,
    pub delay_max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 0,
            delay_max: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlayOptions {
    pub volume: f32,
    pub reconnect: ReconnectPolicy,
}

/// Completion notice for one playback. `error` is set when the stream
/// broke instead of finishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkEvent {
    pub guild_id: GuildId,
    pub play_id: u64,
    pub error: Option<String>,
}

/// Delivers the completion of a single playback at most once.
///
/// Clones share the "already fired" flag, so an end event and an error
/// event for the same stream produce one [`SinkEvent`].
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<SinkEvent>,
    guild_id: GuildId,
    play_id: u64,
    fired: Arc<AtomicBool>,
}

impl CompletionSender {
    pub fn new(tx: mpsc::UnboundedSender<SinkEvent>, guild_id: GuildId, play_id: u64) -> Self {
        Self {
            tx,
            guild_id,
            play_id,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn play_id(&self) -> u64 {
        self.play_id
    }

    pub fn complete(&self, error: Option<String>) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }

        // El receptor solo desaparece al apagar el bot
        let _ = self.tx.send(SinkEvent {
            guild_id: self.guild_id,
            play_id: self.play_id,
            error,
        });
    }
}

/// Control over one running stream.
pub trait PlaybackHandle: Send + Sync {
    /// Stops the stream. Completion is still reported through the
    /// [`CompletionSender`] given to [`AudioSink::play`].
    fn stop(&self);

    fn pause(&self) -> PlayerResult<()>;

    fn resume(&self) -> PlayerResult<()>;

    fn set_volume(&self, volume: f32) -> PlayerResult<()>;
}

/// Plays one stream at a time per guild and reports its end.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(
        &self,
        guild_id: GuildId,
        stream: &StreamRef,
        options: PlayOptions,
        on_complete: CompletionSender,
    ) -> PlayerResult<Box<dyn PlaybackHandle>>;
}
