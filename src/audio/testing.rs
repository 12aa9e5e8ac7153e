//! Fakes shared by the scheduler and transport tests.

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::Notify;

use super::{
    queue::QueueItem,
    session::NowPlayingMessage,
    sink::{AudioSink, CompletionSender, PlayOptions, PlaybackHandle},
};
use crate::{
    error::{PlayerError, PlayerResult},
    sources::{Playlist, ResolvedTrack, StreamRef, Track, TrackResolver},
    ui::{embeds::NowPlayingView, gateway::ChatGateway},
};

pub fn item(url: &str) -> QueueItem {
    QueueItem::new(Track::new(url, url), UserId::new(1))
}

/// Polls `check` until it holds, failing the test after about two seconds.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("la condición no se cumplió a tiempo");
}

/// Resolves every URL to `stream:<url>`, with optional failures and gates.
#[derive(Default)]
pub struct ScriptedResolver {
    failing: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: Mutex<HashMap<String, usize>>,
    completed: Mutex<HashMap<String, usize>>,
}

impl ScriptedResolver {
    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// The next resolution of `url` waits until the returned gate is notified.
    pub fn hold(&self, url: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(url.to_string(), gate.clone());
        gate
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn completed(&self, url: &str) -> usize {
        self.completed.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TrackResolver for ScriptedResolver {
    async fn resolve(&self, url_or_query: &str) -> PlayerResult<ResolvedTrack> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(url_or_query.to_string())
            .or_default() += 1;

        let gate = self.gates.lock().unwrap().remove(url_or_query);
        if let Some(gate) = gate {
            gate.notified().await;
        }

        *self
            .completed
            .lock()
            .unwrap()
            .entry(url_or_query.to_string())
            .or_default() += 1;

        if self.failing.lock().unwrap().contains(url_or_query) {
            return Err(PlayerError::resolution(url_or_query, "sin formatos de audio"));
        }

        Ok(ResolvedTrack {
            track: Track::new(url_or_query, url_or_query),
            stream: StreamRef(format!("stream:{}", url_or_query)),
        })
    }

    async fn describe(&self, url: &str) -> PlayerResult<Track> {
        Ok(Track::new(url, url))
    }

    async fn enumerate_playlist(&self, url: &str, _limit: usize) -> PlayerResult<Playlist> {
        Err(PlayerError::resolution(url, "no es una playlist"))
    }
}

#[derive(Default)]
struct SinkState {
    live: HashMap<u64, (GuildId, CompletionSender)>,
    streams: Vec<String>,
    volumes: Vec<f32>,
    failing: HashSet<String>,
    disconnected: bool,
    max_live: usize,
}

impl SinkState {
    fn live_in(&self, guild_id: GuildId) -> usize {
        self.live.values().filter(|(g, _)| *g == guild_id).count()
    }
}

/// Sink that plays nothing. `stop()` on a handle fires the completion right
/// away, like songbird does.
#[derive(Default)]
pub struct FakeSink {
    state: Arc<Mutex<SinkState>>,
}

impl FakeSink {
    pub fn fail_stream(&self, stream: &str) {
        self.state.lock().unwrap().failing.insert(stream.to_string());
    }

    /// Every `play` fails as if the voice call were gone.
    pub fn set_disconnected(&self, disconnected: bool) {
        self.state.lock().unwrap().disconnected = disconnected;
    }

    pub fn streams(&self) -> Vec<String> {
        self.state.lock().unwrap().streams.clone()
    }

    pub fn volumes(&self) -> Vec<f32> {
        self.state.lock().unwrap().volumes.clone()
    }

    pub fn live(&self, guild_id: GuildId) -> usize {
        self.state.lock().unwrap().live_in(guild_id)
    }

    /// Highest number of simultaneous streams seen in any one guild.
    pub fn max_live(&self) -> usize {
        self.state.lock().unwrap().max_live
    }

    /// Ends the guild's stream as if it reached its end.
    pub fn finish(&self, guild_id: GuildId) {
        complete_guild(&self.state, guild_id, None);
    }

    pub fn break_stream(&self, guild_id: GuildId, reason: &str) {
        complete_guild(&self.state, guild_id, Some(reason.to_string()));
    }
}

fn complete_guild(state: &Mutex<SinkState>, guild_id: GuildId, error: Option<String>) {
    let play_id = state
        .lock()
        .unwrap()
        .live
        .iter()
        .find(|(_, (g, _))| *g == guild_id)
        .map(|(id, _)| *id);
    if let Some(play_id) = play_id {
        complete(state, play_id, error);
    }
}

fn complete(state: &Mutex<SinkState>, play_id: u64, error: Option<String>) {
    let entry = state.lock().unwrap().live.remove(&play_id);
    if let Some((_, completion)) = entry {
        completion.complete(error);
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn play(
        &self,
        guild_id: GuildId,
        stream: &StreamRef,
        options: PlayOptions,
        on_complete: CompletionSender,
    ) -> PlayerResult<Box<dyn PlaybackHandle>> {
        let mut state = self.state.lock().unwrap();
        if state.disconnected {
            return Err(PlayerError::NotConnected);
        }
        if state.failing.contains(stream.as_str()) {
            return Err(PlayerError::Transport("ffmpeg no arrancó".to_string()));
        }

        let play_id = on_complete.play_id();
        state.live.insert(play_id, (guild_id, on_complete));
        state.max_live = state.max_live.max(state.live_in(guild_id));
        state.streams.push(stream.as_str().to_string());
        state.volumes.push(options.volume);

        Ok(Box::new(FakeHandle {
            state: self.state.clone(),
            play_id,
        }))
    }
}

struct FakeHandle {
    state: Arc<Mutex<SinkState>>,
    play_id: u64,
}

impl PlaybackHandle for FakeHandle {
    fn stop(&self) {
        complete(&self.state, self.play_id, None);
    }

    fn pause(&self) -> PlayerResult<()> {
        Ok(())
    }

    fn resume(&self) -> PlayerResult<()> {
        Ok(())
    }

    fn set_volume(&self, _volume: f32) -> PlayerResult<()> {
        Ok(())
    }
}

/// Records what would have been sent to the chat.
#[derive(Default)]
pub struct FakeGateway {
    said: Mutex<Vec<(ChannelId, String)>>,
    posted: Mutex<Vec<(ChannelId, String)>>,
    edits: Mutex<Vec<(MessageId, NowPlayingView)>>,
    next_id: AtomicU64,
}

impl FakeGateway {
    pub fn said_containing(&self, needle: &str) -> usize {
        self.said
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, text)| text.contains(needle))
            .count()
    }

    pub fn said_total(&self) -> usize {
        self.said.lock().unwrap().len()
    }

    /// `(channel, title)` of every now-playing message posted.
    pub fn posted(&self) -> Vec<(ChannelId, String)> {
        self.posted.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<(MessageId, NowPlayingView)> {
        self.edits.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatGateway for FakeGateway {
    async fn say(&self, channel_id: ChannelId, text: &str) -> Result<()> {
        self.said
            .lock()
            .unwrap()
            .push((channel_id, text.to_string()));
        Ok(())
    }

    async fn post_now_playing(&self, channel_id: ChannelId, view: &NowPlayingView) -> Result<MessageId> {
        self.posted
            .lock()
            .unwrap()
            .push((channel_id, view.title.clone()));
        Ok(MessageId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1))
    }

    async fn edit_now_playing(&self, message: NowPlayingMessage, view: &NowPlayingView) -> Result<()> {
        self.edits
            .lock()
            .unwrap()
            .push((message.message_id, view.clone()));
        Ok(())
    }
}
