use serenity::model::id::{ChannelId, MessageId, UserId};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::sink::PlaybackHandle;
use crate::{error::PlayerResult, sources::ResolvedTrack};

/// Next rung on the ladder: 1.0 → 0.75 → 0.5 → 0.25 → 0.0 → 1.0.
///
/// Values between rungs snap down to the next lower one.
pub fn next_volume(current: f32) -> f32 {
    if current >= 0.9 {
        0.75
    } else if current >= 0.7 {
        0.5
    } else if current >= 0.4 {
        0.25
    } else if current >= 0.2 {
        0.0
    } else {
        1.0
    }
}

/// Where the live now-playing message of a session lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NowPlayingMessage {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

/// The one track currently playing in a guild.
///
/// Dropping the session cancels its progress refresh task.
pub struct PlaybackSession {
    play_id: u64,
    resolved: ResolvedTrack,
    requested_by: Option<UserId>,
    handle: Box<dyn PlaybackHandle>,
    started_at: Instant,
    paused_at: Option<Instant>,
    volume: f32,
    looping: bool,
    skip_requested: bool,
    refresh: CancellationToken,
    message: Option<NowPlayingMessage>,
}

impl PlaybackSession {
    pub fn new(
        play_id: u64,
        resolved: ResolvedTrack,
        requested_by: Option<UserId>,
        handle: Box<dyn PlaybackHandle>,
        volume: f32,
        looping: bool,
        now: Instant,
    ) -> Self {
        Self {
            play_id,
            resolved,
            requested_by,
            handle,
            started_at: now,
            paused_at: None,
            volume,
            looping,
            skip_requested: false,
            refresh: CancellationToken::new(),
            message: None,
        }
    }

    pub fn play_id(&self) -> u64 {
        self.play_id
    }

    pub fn resolved(&self) -> &ResolvedTrack {
        &self.resolved
    }

    pub fn requested_by(&self) -> Option<UserId> {
        self.requested_by
    }

    pub fn refresh_token(&self) -> CancellationToken {
        self.refresh.clone()
    }

    pub fn message(&self) -> Option<NowPlayingMessage> {
        self.message
    }

    pub fn set_message(&mut self, message: NowPlayingMessage) {
        self.message = Some(message);
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Pauses the stream. Returns `false` if it was already paused.
    pub fn pause(&mut self, now: Instant) -> PlayerResult<bool> {
        if self.paused_at.is_some() {
            return Ok(false);
        }

        self.handle.pause()?;
        self.paused_at = Some(now);
        Ok(true)
    }

    /// Resumes the stream, shifting the start forward by the paused span.
    /// Returns `false` if it was not paused.
    pub fn resume(&mut self, now: Instant) -> PlayerResult<bool> {
        let Some(paused_at) = self.paused_at else {
            return Ok(false);
        };

        self.handle.resume()?;
        self.started_at += now.saturating_duration_since(paused_at);
        self.paused_at = None;
        Ok(true)
    }

    /// Time actually played; frozen while paused.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        self.paused_at
            .unwrap_or(now)
            .saturating_duration_since(self.started_at)
    }

    /// `None` when the track has no known duration.
    pub fn remaining_at(&self, now: Instant) -> Option<Duration> {
        self.resolved
            .track
            .duration
            .map(|total| total.saturating_sub(self.elapsed_at(now)))
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Applies the volume to the live stream.
    pub fn set_volume(&mut self, volume: f32) -> PlayerResult<()> {
        self.handle.set_volume(volume)?;
        self.volume = volume;
        Ok(())
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.looping = !self.looping;
        self.looping
    }

    pub fn skip_requested(&self) -> bool {
        self.skip_requested
    }

    /// Stops the stream and marks the end as a skip, so loop mode does not
    /// replay it.
    pub fn skip(&mut self) {
        self.skip_requested = true;
        self.handle.stop();
    }

    pub fn stop(&self) {
        self.handle.stop();
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.refresh.cancel();
        debug!("Sesión {} cerrada", self.play_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::PlayerError,
        sources::{StreamRef, Track},
    };
    use std::sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    };

    /// Handle that only records what was asked of it.
    #[derive(Default, Clone)]
    pub(crate) struct RecordingHandle {
        pub stopped: Arc<AtomicBool>,
        pub paused: Arc<AtomicBool>,
        pub volume_bits: Arc<AtomicU32>,
        pub fail_pause: bool,
    }

    impl PlaybackHandle for RecordingHandle {
        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        fn pause(&self) -> PlayerResult<()> {
            if self.fail_pause {
                return Err(PlayerError::Transport("sin conexión".to_string()));
            }
            self.paused.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn resume(&self) -> PlayerResult<()> {
            self.paused.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn set_volume(&self, volume: f32) -> PlayerResult<()> {
            self.volume_bits.store(volume.to_bits(), Ordering::SeqCst);
            Ok(())
        }
    }

    fn resolved(duration: Option<u64>) -> ResolvedTrack {
        let mut track = Track::new("https://t/1", "Uno");
        if let Some(secs) = duration {
            track = track.with_duration(Duration::from_secs(secs));
        }
        ResolvedTrack {
            track,
            stream: StreamRef("https://cdn/1".to_string()),
        }
    }

    fn session(duration: Option<u64>, handle: RecordingHandle, now: Instant) -> PlaybackSession {
        PlaybackSession::new(1, resolved(duration), None, Box::new(handle), 1.0, false, now)
    }

    #[test]
    fn volume_ladder_cycles() {
        let mut volume = 1.0;
        let mut seen = Vec::new();
        for _ in 0..5 {
            volume = next_volume(volume);
            seen.push(volume);
        }
        assert_eq!(seen, vec![0.75, 0.5, 0.25, 0.0, 1.0]);
    }

    #[test]
    fn volume_ladder_snaps_odd_values() {
        assert_eq!(next_volume(0.6), 0.25);
        assert_eq!(next_volume(0.1), 1.0);
        assert_eq!(next_volume(1.5), 0.75);
    }

    #[test]
    fn elapsed_excludes_paused_time() {
        let t0 = Instant::now();
        let mut s = session(Some(200), RecordingHandle::default(), t0);

        assert!(s.pause(t0 + Duration::from_secs(10)).unwrap());
        // en pausa el tiempo no avanza
        assert_eq!(s.elapsed_at(t0 + Duration::from_secs(30)), Duration::from_secs(10));

        assert!(s.resume(t0 + Duration::from_secs(30)).unwrap());
        assert_eq!(s.elapsed_at(t0 + Duration::from_secs(35)), Duration::from_secs(15));
        assert_eq!(
            s.remaining_at(t0 + Duration::from_secs(35)),
            Some(Duration::from_secs(185))
        );
    }

    #[test]
    fn repeated_pause_and_resume_are_noops() {
        let t0 = Instant::now();
        let handle = RecordingHandle::default();
        let mut s = session(Some(60), handle.clone(), t0);

        assert!(!s.resume(t0).unwrap());
        assert!(s.pause(t0 + Duration::from_secs(1)).unwrap());
        assert!(!s.pause(t0 + Duration::from_secs(2)).unwrap());
        assert!(s.is_paused());
        assert!(handle.paused.load(Ordering::SeqCst));
    }

    #[test]
    fn remaining_never_negative_and_unknown_without_duration() {
        let t0 = Instant::now();
        let s = session(Some(10), RecordingHandle::default(), t0);
        assert_eq!(s.remaining_at(t0 + Duration::from_secs(99)), Some(Duration::ZERO));

        let live = session(None, RecordingHandle::default(), t0);
        assert_eq!(live.remaining_at(t0 + Duration::from_secs(5)), None);
    }

    #[test]
    fn failed_pause_keeps_session_running() {
        let t0 = Instant::now();
        let handle = RecordingHandle {
            fail_pause: true,
            ..RecordingHandle::default()
        };
        let mut s = session(Some(60), handle, t0);

        assert!(s.pause(t0).is_err());
        assert!(!s.is_paused());
    }

    #[test]
    fn skip_marks_and_stops() {
        let handle = RecordingHandle::default();
        let mut s = session(None, handle.clone(), Instant::now());
        s.skip();

        assert!(s.skip_requested());
        assert!(handle.stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn dropping_session_cancels_refresh() {
        let s = session(None, RecordingHandle::default(), Instant::now());
        let token = s.refresh_token();
        assert!(!token.is_cancelled());
        drop(s);
        assert!(token.is_cancelled());
    }
}
