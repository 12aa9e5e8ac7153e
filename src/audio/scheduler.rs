//! Per-guild playback state machine.
//!
//! Every guild owns one [`GuildMusicState`] behind its own async mutex;
//! nothing here takes a lock across guilds. Completion notices from the
//! audio sink arrive on a channel and are handled on spawned tasks, so the
//! voice driver never touches guild state directly.
//!
//! Phases: `Idle` → `Resolving` → `Playing` (paused or not) → back to
//! `Resolving` or `Idle` when the track ends, is skipped, or fails.

use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    queue::{MusicQueue, QueueInfo, QueueItem},
    session::{next_volume, NowPlayingMessage, PlaybackSession},
    sink::{AudioSink, CompletionSender, PlayOptions, ReconnectPolicy, SinkEvent},
    transport,
};
use crate::{
    cache::{PrefetchCache, PrefetchEntry},
    config::Config,
    error::{PlayerError, PlayerResult},
    sources::{ResolvedTrack, TrackResolver},
    ui::{embeds::NowPlayingView, gateway::ChatGateway},
};

/// How many queued titles the now-playing view carries.
const UPCOMING_PREVIEW: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub max_queue_size: usize,
    pub default_volume: f32,
    pub reconnect: ReconnectPolicy,
    pub progress_interval: Duration,
}

impl SchedulerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            default_volume: config.default_volume,
            reconnect: ReconnectPolicy {
                attempts: config.reconnect_attempts,
                delay_max: Duration::from_secs(config.reconnect_delay_max_secs),
            },
            progress_interval: config.progress_interval(),
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            default_volume: 1.0,
            reconnect: ReconnectPolicy::default(),
            progress_interval: Duration::from_secs(5),
        }
    }
}

enum Phase {
    Idle,
    /// A head was taken from the queue and its stream is being resolved.
    Resolving,
    Playing(PlaybackSession),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Resolving,
    Playing,
    Paused,
}

/// Everything the bot keeps for one guild.
pub struct GuildMusicState {
    queue: MusicQueue,
    phase: Phase,
    /// Bumped by `stop` and `clear`; work started under an older value is
    /// thrown away when it comes back.
    generation: u64,
    /// Carried from one session to the next.
    volume: f32,
    voice_channel: Option<ChannelId>,
    text_channel: Option<ChannelId>,
}

impl GuildMusicState {
    fn new(options: &SchedulerOptions) -> Self {
        Self {
            queue: MusicQueue::new(options.max_queue_size),
            phase: Phase::Idle,
            generation: 0,
            volume: options.default_volume,
            voice_channel: None,
            text_channel: None,
        }
    }

    fn status(&self) -> PlaybackStatus {
        match &self.phase {
            Phase::Idle => PlaybackStatus::Idle,
            Phase::Resolving => PlaybackStatus::Resolving,
            Phase::Playing(session) if session.is_paused() => PlaybackStatus::Paused,
            Phase::Playing(_) => PlaybackStatus::Playing,
        }
    }

    fn view(&self, session: &PlaybackSession, now: Instant) -> NowPlayingView {
        let track = &session.resolved().track;
        NowPlayingView {
            title: track.title.clone(),
            url: track.url.clone(),
            thumbnail: track.thumbnail.clone(),
            requested_by: session.requested_by(),
            elapsed: session.elapsed_at(now),
            duration: track.duration,
            paused: session.is_paused(),
            looping: session.looping(),
            volume: session.volume(),
            upcoming: self.queue.upcoming(UPCOMING_PREVIEW),
            queue_len: self.queue.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// 1-based position in the queue right after insertion.
    pub position: usize,
    /// The guild was idle and playback was kicked off.
    pub started: bool,
}

/// The track a looping session hands to the next one.
struct Replay {
    resolved: ResolvedTrack,
    requested_by: Option<UserId>,
}

enum Candidate {
    Warm {
        resolved: ResolvedTrack,
        requested_by: Option<UserId>,
        looping: bool,
        /// Entry to put back at the head if the voice link is gone.
        origin: Option<QueueItem>,
    },
    Cold(QueueItem),
}

pub struct PlaybackScheduler {
    guilds: DashMap<GuildId, Arc<Mutex<GuildMusicState>>>,
    prefetch: PrefetchCache,
    resolver: Arc<dyn TrackResolver>,
    sink: Arc<dyn AudioSink>,
    gateway: Arc<dyn ChatGateway>,
    events: mpsc::UnboundedSender<SinkEvent>,
    next_play_id: AtomicU64,
    options: SchedulerOptions,
}

impl PlaybackScheduler {
    /// Builds the scheduler and starts the task that turns sink completions
    /// into track transitions.
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        sink: Arc<dyn AudioSink>,
        gateway: Arc<dyn ChatGateway>,
        options: SchedulerOptions,
    ) -> Arc<Self> {
        let (events, mut rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Self {
            guilds: DashMap::new(),
            prefetch: PrefetchCache::new(),
            resolver,
            sink,
            gateway,
            events,
            next_play_id: AtomicU64::new(1),
            options,
        });

        let weak = Arc::downgrade(&scheduler);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(scheduler) = weak.upgrade() else {
                    break;
                };
                tokio::spawn(async move { scheduler.on_track_end(event).await });
            }
            debug!("Canal de eventos de audio cerrado");
        });

        scheduler
    }

    fn state(&self, guild_id: GuildId) -> Arc<Mutex<GuildMusicState>> {
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(GuildMusicState::new(&self.options))))
            .clone()
    }

    fn existing(&self, guild_id: GuildId) -> Option<Arc<Mutex<GuildMusicState>>> {
        self.guilds.get(&guild_id).map(|entry| entry.value().clone())
    }

    pub fn gateway(&self) -> &dyn ChatGateway {
        self.gateway.as_ref()
    }

    pub fn progress_interval(&self) -> Duration {
        self.options.progress_interval
    }

    async fn announce(&self, channel: Option<ChannelId>, text: &str) {
        let Some(channel) = channel else {
            return;
        };
        if let Err(e) = self.gateway.say(channel, text).await {
            warn!("⚠️ No se pudo enviar aviso a {}: {}", channel, e);
        }
    }

    /// Records the voice channel the bot joined and where to post.
    pub async fn attach(&self, guild_id: GuildId, voice: ChannelId, text: ChannelId) {
        let state = self.state(guild_id);
        let mut st = state.lock().await;
        st.voice_channel = Some(voice);
        st.text_channel = Some(text);
        info!("🔗 Guild {} unido al canal de voz {}", guild_id, voice);
    }

    /// Stops everything and forgets the voice channel.
    pub async fn detach(&self, guild_id: GuildId) {
        self.stop(guild_id).await;
        if let Some(state) = self.existing(guild_id) {
            state.lock().await.voice_channel = None;
        }
        info!("👋 Guild {} desconectado de voz", guild_id);
    }

    /// Follows the bot when it is moved to another voice channel. Returns
    /// whether the recorded channel changed.
    pub async fn set_voice_channel(&self, guild_id: GuildId, voice: ChannelId) -> bool {
        let Some(state) = self.existing(guild_id) else {
            return false;
        };
        let mut st = state.lock().await;
        match st.voice_channel {
            Some(current) if current != voice => {
                info!("🔀 Guild {} movido del canal de voz {} a {}", guild_id, current, voice);
                st.voice_channel = Some(voice);
                true
            }
            _ => false,
        }
    }

    pub async fn set_text_channel(&self, guild_id: GuildId, text: ChannelId) {
        self.state(guild_id).lock().await.text_channel = Some(text);
    }

    pub async fn voice_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        let state = self.existing(guild_id)?;
        let voice = state.lock().await.voice_channel;
        voice
    }

    /// Appends a track. An idle guild starts playing right away; otherwise
    /// a new head gets prefetched.
    pub async fn enqueue(self: &Arc<Self>, guild_id: GuildId, item: QueueItem) -> PlayerResult<EnqueueOutcome> {
        let state = self.state(guild_id);
        let (position, idle) = {
            let mut st = state.lock().await;
            let position = st.queue.enqueue(item)?;
            (position, matches!(st.phase, Phase::Idle))
        };

        if idle {
            self.advance(guild_id, None).await;
        } else if position == 1 {
            self.spawn_prefetch(guild_id);
        }

        Ok(EnqueueOutcome {
            position,
            started: idle,
        })
    }

    /// Appends without starting playback. Returns how many were accepted.
    pub async fn extend(&self, guild_id: GuildId, items: Vec<QueueItem>) -> usize {
        let state = self.state(guild_id);
        let mut st = state.lock().await;
        st.queue.extend(items)
    }

    /// Starts playback if the guild is idle, else warms the head.
    pub async fn ensure_playing(self: &Arc<Self>, guild_id: GuildId) {
        let idle = match self.existing(guild_id) {
            Some(state) => matches!(state.lock().await.phase, Phase::Idle),
            None => return,
        };

        if idle {
            self.advance(guild_id, None).await;
        } else {
            self.spawn_prefetch(guild_id);
        }
    }

    /// Plays the next track, skipping over any that fail to resolve or start.
    ///
    /// Runs only from `Idle`; a second call while another advance is in
    /// flight returns immediately.
    async fn advance(self: &Arc<Self>, guild_id: GuildId, mut replay: Option<Replay>) {
        let state = self.state(guild_id);

        loop {
            let (candidate, generation) = {
                let mut st = state.lock().await;
                if !matches!(st.phase, Phase::Idle) {
                    debug!("Guild {} ya está avanzando o reproduciendo", guild_id);
                    return;
                }

                let candidate = if let Some(Replay {
                    resolved,
                    requested_by,
                }) = replay.take()
                {
                    debug!("🔁 Repitiendo en guild {}: {}", guild_id, resolved.track.title);
                    let origin = requested_by.map(|user| QueueItem::new(resolved.track.clone(), user));
                    Candidate::Warm {
                        resolved,
                        requested_by,
                        looping: true,
                        origin,
                    }
                } else {
                    let Some(item) = st.queue.pop_head() else {
                        let channel = st.text_channel;
                        drop(st);
                        info!("📭 Cola vacía en guild {}", guild_id);
                        self.announce(channel, "📭 La cola está vacía. ¡Agrega más canciones con `play`!")
                            .await;
                        return;
                    };

                    match self.prefetch.take_if_matches(guild_id, item.url()) {
                        Some(entry) => {
                            debug!("⚡ Usando precarga en guild {}: {}", guild_id, item.title());
                            Candidate::Warm {
                                resolved: entry.resolved,
                                requested_by: Some(item.requested_by),
                                looping: false,
                                origin: Some(item),
                            }
                        }
                        None => Candidate::Cold(item),
                    }
                };

                st.phase = Phase::Resolving;
                (candidate, st.generation)
            };

            let (resolved, requested_by, looping, origin) = match candidate {
                Candidate::Warm {
                    resolved,
                    requested_by,
                    looping,
                    origin,
                } => (resolved, requested_by, looping, origin),
                Candidate::Cold(item) => match self.resolver.resolve(item.url()).await {
                    Ok(resolved) => (resolved, Some(item.requested_by), false, Some(item)),
                    Err(e) => {
                        warn!("❌ Falló la resolución en guild {}: {}", guild_id, e);
                        let channel = {
                            let mut st = state.lock().await;
                            if st.generation != generation {
                                return;
                            }
                            st.phase = Phase::Idle;
                            st.text_channel
                        };
                        self.announce(channel, &e.user_message()).await;
                        continue;
                    }
                },
            };

            let mut st = state.lock().await;
            if st.generation != generation {
                debug!(
                    "🗑️ Resolución descartada en guild {} (cola detenida o limpiada): {}",
                    guild_id, resolved.track.title
                );
                return;
            }

            match self.start_session(guild_id, &mut st, resolved, requested_by, looping).await {
                Ok((play_id, token)) => {
                    drop(st);
                    transport::spawn_progress_refresh(Arc::clone(self), guild_id, play_id, token);
                    self.spawn_prefetch(guild_id);
                    return;
                }
                Err(PlayerError::NotConnected) => {
                    // Sin voz no arrancará ninguna: la cola se conserva entera
                    warn!("🔌 Sin conexión de voz en guild {}, reproducción en espera", guild_id);
                    st.phase = Phase::Idle;
                    st.voice_channel = None;
                    if let Some(item) = origin {
                        st.queue.requeue_front(item);
                    }
                    let channel = st.text_channel;
                    drop(st);
                    self.announce(
                        channel,
                        "🔌 Se perdió la conexión de voz. La cola se conserva: usa `join` o `play` para continuar",
                    )
                    .await;
                    return;
                }
                Err(e) => {
                    warn!("❌ No se pudo iniciar el stream en guild {}: {}", guild_id, e);
                    st.phase = Phase::Idle;
                    let channel = st.text_channel;
                    drop(st);
                    self.announce(channel, &e.user_message()).await;
                }
            }
        }
    }

    /// Hands the stream to the sink. Runs with the guild locked, so a
    /// completion that fires immediately is only seen once the session is
    /// in place.
    async fn start_session(
        &self,
        guild_id: GuildId,
        st: &mut GuildMusicState,
        resolved: ResolvedTrack,
        requested_by: Option<UserId>,
        looping: bool,
    ) -> PlayerResult<(u64, CancellationToken)> {
        let play_id = self.next_play_id.fetch_add(1, Ordering::Relaxed);
        let completion = CompletionSender::new(self.events.clone(), guild_id, play_id);
        let options = PlayOptions {
            volume: st.volume,
            reconnect: self.options.reconnect,
        };

        let handle = self.sink.play(guild_id, &resolved.stream, options, completion).await?;

        info!("🎵 Reproduciendo en guild {}: {}", guild_id, resolved.track.title);
        let session = PlaybackSession::new(
            play_id,
            resolved,
            requested_by,
            handle,
            st.volume,
            looping,
            Instant::now(),
        );
        let token = session.refresh_token();
        st.phase = Phase::Playing(session);

        Ok((play_id, token))
    }

    async fn on_track_end(self: Arc<Self>, event: SinkEvent) {
        let Some(state) = self.existing(event.guild_id) else {
            return;
        };

        let (replay, channel) = {
            let mut st = state.lock().await;
            let session = match mem::replace(&mut st.phase, Phase::Idle) {
                Phase::Playing(session) if session.play_id() == event.play_id => session,
                other => {
                    st.phase = other;
                    debug!(
                        "Fin tardío ignorado en guild {} (sesión {})",
                        event.guild_id, event.play_id
                    );
                    return;
                }
            };

            st.volume = session.volume();
            let replay = (session.looping() && !session.skip_requested() && event.error.is_none())
                .then(|| Replay {
                    resolved: session.resolved().clone(),
                    requested_by: session.requested_by(),
                });
            drop(session);
            (replay, st.text_channel)
        };

        if let Some(error) = &event.error {
            self.announce(channel, &format!("⚠️ La reproducción se interrumpió: {}", error))
                .await;
        }

        self.advance(event.guild_id, replay).await;
    }

    fn spawn_prefetch(self: &Arc<Self>, guild_id: GuildId) {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.prefetch_head(guild_id).await });
    }

    /// Resolves the current head ahead of time. Failures only cost latency
    /// later, so they are logged and dropped.
    async fn prefetch_head(&self, guild_id: GuildId) {
        let Some(state) = self.existing(guild_id) else {
            return;
        };

        let (url, generation) = {
            let st = state.lock().await;
            let Some(head) = st.queue.peek_head() else {
                return;
            };
            (head.url().to_string(), st.generation)
        };

        if self.prefetch.is_warm_for(guild_id, &url) {
            return;
        }

        debug!("⏳ Precargando en guild {}: {}", guild_id, url);
        match self.resolver.resolve(&url).await {
            Ok(resolved) => {
                let st = state.lock().await;
                let still_head = st.queue.peek_head().is_some_and(|head| head.url() == url);
                if st.generation == generation && still_head {
                    self.prefetch.put(guild_id, PrefetchEntry::new(url, resolved));
                } else {
                    debug!("🗑️ Precarga obsoleta descartada en guild {}: {}", guild_id, url);
                }
            }
            Err(e) => warn!("⚠️ Falló la precarga en guild {}: {}", guild_id, e),
        }
    }

    /// Stops the current stream; the end notice moves on to the next track.
    /// Returns the skipped title.
    pub async fn skip(&self, guild_id: GuildId) -> PlayerResult<String> {
        self.with_session(guild_id, |session| {
            let title = session.resolved().track.title.clone();
            let remaining = session.remaining_at(Instant::now());
            session.skip();
            info!("⏭️ Saltando en guild {}: {} (quedaban {:?})", guild_id, title, remaining);
            Ok(title)
        })
        .await
    }

    /// Returns whether the session is paused afterwards.
    pub async fn toggle_pause(&self, guild_id: GuildId) -> PlayerResult<bool> {
        self.with_session(guild_id, |session| {
            let now = Instant::now();
            if session.is_paused() {
                session.resume(now)?;
                Ok(false)
            } else {
                session.pause(now)?;
                Ok(true)
            }
        })
        .await
    }

    /// Returns `false` when the session was already in the requested state.
    pub async fn set_paused(&self, guild_id: GuildId, paused: bool) -> PlayerResult<bool> {
        self.with_session(guild_id, |session| {
            if paused {
                session.pause(Instant::now())
            } else {
                session.resume(Instant::now())
            }
        })
        .await
    }

    /// Moves to the next rung of the volume ladder and returns it.
    pub async fn cycle_volume(&self, guild_id: GuildId) -> PlayerResult<f32> {
        let state = self.existing(guild_id).ok_or(PlayerError::NothingPlaying)?;
        let mut st = state.lock().await;
        let GuildMusicState { phase, volume, .. } = &mut *st;

        match phase {
            Phase::Playing(session) => {
                let next = next_volume(session.volume());
                session.set_volume(next)?;
                *volume = next;
                debug!("🔊 Volumen en guild {}: {}", guild_id, next);
                Ok(next)
            }
            _ => Err(PlayerError::NothingPlaying),
        }
    }

    pub async fn toggle_loop(&self, guild_id: GuildId) -> PlayerResult<bool> {
        self.with_session(guild_id, |session| Ok(session.toggle_loop())).await
    }

    async fn with_session<T>(
        &self,
        guild_id: GuildId,
        f: impl FnOnce(&mut PlaybackSession) -> PlayerResult<T>,
    ) -> PlayerResult<T> {
        let state = self.existing(guild_id).ok_or(PlayerError::NothingPlaying)?;
        let mut st = state.lock().await;
        match &mut st.phase {
            Phase::Playing(session) => f(session),
            _ => Err(PlayerError::NothingPlaying),
        }
    }

    /// Ends the session, empties the queue and drops the prefetch. Any
    /// resolution still in flight is discarded when it returns.
    pub async fn stop(&self, guild_id: GuildId) {
        let Some(state) = self.existing(guild_id) else {
            return;
        };

        let mut st = state.lock().await;
        st.generation += 1;
        let dropped = st.queue.clear();
        self.prefetch.invalidate(guild_id);

        if let Phase::Playing(session) = mem::replace(&mut st.phase, Phase::Idle) {
            session.stop();
        }
        info!("⏹️ Reproducción detenida en guild {} ({} en cola descartadas)", guild_id, dropped);
    }

    /// Empties the queue but leaves the current track playing.
    pub async fn clear(&self, guild_id: GuildId) -> usize {
        let Some(state) = self.existing(guild_id) else {
            return 0;
        };

        let mut st = state.lock().await;
        st.generation += 1;
        let cleared = st.queue.clear();
        self.prefetch.invalidate(guild_id);
        if matches!(st.phase, Phase::Resolving) {
            st.phase = Phase::Idle;
        }
        cleared
    }

    /// Removes the entry at a 1-based position.
    pub async fn remove(self: &Arc<Self>, guild_id: GuildId, position: usize) -> PlayerResult<QueueItem> {
        let state = self.existing(guild_id).ok_or(PlayerError::OutOfRange {
            index: position,
            len: 0,
        })?;

        let (item, refill) = {
            let mut st = state.lock().await;
            let item = st.queue.remove_at(position)?;
            let head_changed = position == 1;
            if head_changed {
                self.prefetch.invalidate(guild_id);
            }
            (item, head_changed && !matches!(st.phase, Phase::Idle))
        };

        if refill {
            self.spawn_prefetch(guild_id);
        }
        Ok(item)
    }

    /// Shuffles the queue and returns its length.
    pub async fn shuffle(self: &Arc<Self>, guild_id: GuildId) -> usize {
        let Some(state) = self.existing(guild_id) else {
            return 0;
        };

        let (len, playing) = {
            let mut st = state.lock().await;
            if st.queue.is_empty() {
                return 0;
            }
            st.queue.shuffle();
            self.prefetch.invalidate(guild_id);
            (st.queue.len(), !matches!(st.phase, Phase::Idle))
        };

        if playing {
            self.spawn_prefetch(guild_id);
        }
        len
    }

    pub async fn queue_info(&self, guild_id: GuildId) -> QueueInfo {
        match self.existing(guild_id) {
            Some(state) => state.lock().await.queue.get_info(),
            None => MusicQueue::new(self.options.max_queue_size).get_info(),
        }
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> Option<NowPlayingView> {
        let state = self.existing(guild_id)?;
        let st = state.lock().await;
        match &st.phase {
            Phase::Playing(session) => Some(st.view(session, Instant::now())),
            _ => None,
        }
    }

    pub async fn status(&self, guild_id: GuildId) -> PlaybackStatus {
        match self.existing(guild_id) {
            Some(state) => state.lock().await.status(),
            None => PlaybackStatus::Idle,
        }
    }

    /// Number of guilds with a live session.
    pub async fn active_sessions(&self) -> usize {
        let states: Vec<_> = self.guilds.iter().map(|entry| entry.value().clone()).collect();
        let mut active = 0;
        for state in states {
            if matches!(state.lock().await.phase, Phase::Playing(_)) {
                active += 1;
            }
        }
        active
    }

    /// The text channel and current view, as long as `play_id` is still the
    /// live session.
    pub async fn session_view(
        &self,
        guild_id: GuildId,
        play_id: u64,
    ) -> Option<(Option<ChannelId>, NowPlayingView)> {
        let state = self.existing(guild_id)?;
        let st = state.lock().await;
        match &st.phase {
            Phase::Playing(session) if session.play_id() == play_id => {
                Some((st.text_channel, st.view(session, Instant::now())))
            }
            _ => None,
        }
    }

    /// Returns `false` if the session ended before its message was posted.
    pub async fn bind_message(&self, guild_id: GuildId, play_id: u64, message: NowPlayingMessage) -> bool {
        let Some(state) = self.existing(guild_id) else {
            return false;
        };
        let mut st = state.lock().await;
        match &mut st.phase {
            Phase::Playing(session) if session.play_id() == play_id => {
                session.set_message(message);
                true
            }
            _ => false,
        }
    }

    /// Repaints the now-playing message after a transport action.
    pub async fn refresh_now(&self, guild_id: GuildId) {
        let Some(state) = self.existing(guild_id) else {
            return;
        };

        let target = {
            let st = state.lock().await;
            match &st.phase {
                Phase::Playing(session) => session
                    .message()
                    .map(|message| (message, st.view(session, Instant::now()))),
                _ => None,
            }
        };

        if let Some((message, view)) = target {
            if let Err(e) = self.gateway.edit_now_playing(message, &view).await {
                debug!("No se pudo actualizar el reproductor en guild {}: {}", guild_id, e);
            }
        }
    }
}
