//! # Audio Module
//!
//! Playback core of the bot: one queue and at most one live stream per
//! guild, with the next track resolved while the current one plays.
//!
//! ## Architecture
//!
//! ### [`scheduler`] - Playback Scheduler
//! - Owns every guild's queue and session behind a per-guild lock
//! - Advances to the next track on end, skip or failure
//! - Prefetches the queue head into [`crate::cache::PrefetchCache`]
//!
//! ### [`queue`] - Queue Management
//! - FIFO of pending tracks with 1-based removal and shuffle
//!
//! ### [`session`] - Playback Session
//! - Pause-aware progress accounting, volume ladder and loop flag
//!
//! ### [`sink`] / [`player`] - Audio Output
//! - The [`sink::AudioSink`] seam and its songbird + ffmpeg implementation
//!
//! ### [`transport`] - Transport Controls
//! - Voice-channel authorization for user actions
//! - Periodic refresh of the now-playing message

pub mod player;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod transport;

#[cfg(test)]
mod testing;
