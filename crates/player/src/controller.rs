use crate::queue::Queue;
use crate::{AudioEngine, EngineEvent, EngineState, RemoteEvent};
use anyhow::{Context, Result};
use cadence_core::{
    from_playable_item, to_playable_source, PlayableItem, RepeatMode, SourceResolver, Track,
};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub const MAX_LOAD_ATTEMPTS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Playing,
    Paused,
    Error {
        attempt: u8,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlayOptions {
    pub reset_first: bool,
    pub clear_queue: bool,
    pub shuffle: bool,
}

impl PlayOptions {
    pub fn reset() -> Self {
        Self {
            reset_first: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub track: Option<Track>,
    pub position: f64,
    pub paused: bool,
}

pub struct PlaybackController {
    engine: Box<dyn AudioEngine>,
    resolver: SourceResolver,
    queue: Queue<Track>,
    back_queue: Queue<Track>,
    current: Option<Track>,
    repeat_mode: RepeatMode,
    phase: PlaybackPhase,
    force_pause: bool,
    in_flight: bool,
}

impl PlaybackController {
    pub fn new(engine: Box<dyn AudioEngine>, resolver: SourceResolver) -> Self {
        Self {
            engine,
            resolver,
            queue: Queue::new(),
            back_queue: Queue::new(),
            current: None,
            repeat_mode: RepeatMode::Off,
            phase: PlaybackPhase::Idle,
            force_pause: false,
            in_flight: false,
        }
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn queue(&self) -> &Queue<Track> {
        &self.queue
    }

    pub fn back_queue(&self) -> &Queue<Track> {
        &self.back_queue
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    pub fn force_pause(&self) -> bool {
        self.force_pause
    }

    pub fn set_force_pause(&mut self, force_pause: bool) {
        self.force_pause = force_pause;
    }

    pub fn engine(&self) -> &dyn AudioEngine {
        self.engine.as_ref()
    }

    pub async fn play(&mut self, tracks: Vec<Track>, options: PlayOptions) -> Result<Option<Track>> {
        self.begin().await?;
        let result = self.play_inner(tracks, options).await;
        self.in_flight = false;
        result
    }

    async fn play_inner(
        &mut self,
        mut tracks: Vec<Track>,
        options: PlayOptions,
    ) -> Result<Option<Track>> {
        self.force_pause = false;
        if options.clear_queue {
            self.queue.clear();
        }
        if options.shuffle {
            tracks.shuffle(&mut rand::thread_rng());
        }

        let idle = options.reset_first || self.engine_idle().await?;

        if tracks.is_empty() {
            if idle {
                if let Some(track) = self.advance(options.reset_first).await? {
                    return Ok(Some(track));
                }
            }
            self.engine.play().await.context("engine play failed")?;
            return Ok(self.current.clone());
        }

        if !idle {
            debug!(count = tracks.len(), "track active; appending to queue");
            self.queue.enqueue_all(tracks);
            return Ok(self.current.clone());
        }

        let mut tracks = tracks.into_iter();
        let Some(first) = tracks.next() else {
            return Ok(self.current.clone());
        };
        self.queue.enqueue_all(tracks);
        self.start(first).await.map(Some)
    }

    pub async fn skip_to_next(&mut self) -> Result<Option<Track>> {
        self.play(Vec::new(), PlayOptions::reset()).await
    }

    pub async fn skip_to_previous(&mut self) -> Result<Option<Track>> {
        self.begin().await?;
        let result = self.skip_to_previous_inner().await;
        self.in_flight = false;
        result
    }

    async fn skip_to_previous_inner(&mut self) -> Result<Option<Track>> {
        let Some(previous) = self.back_queue.dequeue() else {
            debug!("history empty; skip to previous ignored");
            return Ok(None);
        };
        self.force_pause = false;
        if let Some(current) = self.current.take() {
            self.queue.enqueue_front(current);
        }
        self.load(&previous).await?;
        self.current = Some(previous.clone());
        Ok(Some(previous))
    }

    pub async fn force_load(&mut self, track: Track) -> Result<Track> {
        self.begin().await?;
        let result = self.start(track).await;
        self.in_flight = false;
        result
    }

    pub fn load_playlist(&mut self, tracks: Vec<Track>) {
        let mut order: Vec<String> = Vec::new();
        let mut by_id: HashMap<String, Track> = HashMap::new();
        for track in tracks {
            match by_id.get(&track.id) {
                Some(existing) if existing.is_local() || !track.is_local() => {}
                Some(_) => {
                    by_id.insert(track.id.clone(), track);
                }
                None => {
                    order.push(track.id.clone());
                    by_id.insert(track.id.clone(), track);
                }
            }
        }
        self.queue.clear();
        self.queue
            .enqueue_all(order.into_iter().filter_map(|id| by_id.remove(&id)));
    }

    pub fn shuffle(&mut self) {
        self.queue.shuffle();
    }

    pub async fn next_repeat_mode(&mut self) -> Result<RepeatMode> {
        self.repeat_mode = self.repeat_mode.next();
        self.engine
            .set_repeat_mode(self.repeat_mode)
            .await
            .context("engine rejected repeat mode")?;
        info!(mode = ?self.repeat_mode, "repeat mode changed");
        Ok(self.repeat_mode)
    }

    pub async fn pause(&mut self) -> Result<()> {
        self.engine.pause().await.context("engine pause failed")
    }

    pub async fn resume(&mut self) -> Result<()> {
        self.force_pause = false;
        self.engine.play().await.context("engine play failed")
    }

    pub async fn seek_to(&mut self, position: f64) -> Result<()> {
        self.engine
            .seek_to(position.max(0.0))
            .await
            .context("engine seek failed")
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.engine.stop().await.context("engine stop failed")?;
        self.phase = PlaybackPhase::Idle;
        Ok(())
    }

    pub async fn reset(&mut self) -> Result<()> {
        self.engine.reset().await.context("engine reset failed")?;
        self.current = None;
        self.phase = PlaybackPhase::Idle;
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<PlaybackSnapshot> {
        let state = self.engine.playback_state().await?;
        let position = self.engine.position().await?;
        Ok(PlaybackSnapshot {
            track: self.current.clone(),
            position,
            paused: state.is_paused(),
        })
    }

    pub async fn handle_event(&mut self, event: EngineEvent) -> Result<()> {
        match event {
            EngineEvent::PlaybackState(state) => self.on_state(state).await,
            EngineEvent::ActiveTrackChanged(Some(item)) => self.on_active_track(item).await,
            EngineEvent::ActiveTrackChanged(None) => {
                debug!("engine has no active track");
                Ok(())
            }
            EngineEvent::Remote(remote) => match remote {
                RemoteEvent::Play => self.play(Vec::new(), PlayOptions::default()).await.map(drop),
                RemoteEvent::Pause => self.pause().await,
                RemoteEvent::Stop => self.stop().await,
                RemoteEvent::Next => self.skip_to_next().await.map(drop),
                RemoteEvent::Previous => self.skip_to_previous().await.map(drop),
                RemoteEvent::Seek(position) => self.seek_to(position).await,
            },
        }
    }

    // Callbacks can trail a newer load; only adopt what the engine still holds.
    async fn on_active_track(&mut self, item: PlayableItem) -> Result<()> {
        let Some(id) = item.id.as_deref() else {
            return Ok(());
        };
        if self.current.as_ref().is_some_and(|t| t.id == id) {
            return Ok(());
        }
        let active = self.engine.active_track().await?;
        if active.as_ref().and_then(|a| a.id.as_deref()) != Some(id) {
            debug!(track_id = id, "ignoring stale active-track notification");
            return Ok(());
        }
        info!(track_id = id, "engine switched track on its own");
        self.current = Some(from_playable_item(&item));
        Ok(())
    }

    async fn on_state(&mut self, state: EngineState) -> Result<()> {
        match state {
            EngineState::Playing => self.phase = PlaybackPhase::Playing,
            EngineState::Paused => self.phase = PlaybackPhase::Paused,
            EngineState::Ready => {
                if self.force_pause {
                    self.engine.pause().await?;
                } else {
                    self.engine.play().await?;
                }
            }
            EngineState::Ended => self.on_ended().await?,
            EngineState::Error => self.on_error().await?,
            EngineState::None | EngineState::Stopped => {
                if !matches!(self.phase, PlaybackPhase::Error { .. }) {
                    self.phase = PlaybackPhase::Idle;
                }
            }
            EngineState::Loading | EngineState::Buffering => {}
        }
        Ok(())
    }

    async fn on_ended(&mut self) -> Result<()> {
        self.begin().await?;
        let result = self.advance(false).await;
        self.in_flight = false;
        if result?.is_none() {
            debug!("queue exhausted; stopping");
            self.stop().await?;
        }
        Ok(())
    }

    async fn on_error(&mut self) -> Result<()> {
        let attempt = match self.phase {
            PlaybackPhase::Error { attempt } => attempt.saturating_add(1),
            _ => 1,
        };

        if attempt < MAX_LOAD_ATTEMPTS {
            warn!(attempt, "engine error; retrying load");
            self.phase = PlaybackPhase::Error { attempt };
            return self.engine.retry().await.context("engine retry failed");
        }

        warn!(attempt, "engine error persisted; skipping track");
        self.phase = PlaybackPhase::Idle;
        if self.queue.is_empty() {
            self.stop().await
        } else {
            self.skip_to_next().await.map(drop)
        }
    }

    async fn advance(&mut self, manual: bool) -> Result<Option<Track>> {
        if let Some(current) = self.current.clone() {
            match self.repeat_mode {
                RepeatMode::Track if !manual => {
                    self.engine.seek_to(0.0).await.context("engine seek failed")?;
                    self.engine.play().await.context("engine play failed")?;
                    return Ok(Some(current));
                }
                RepeatMode::Queue => self.queue.enqueue(current),
                _ => {}
            }
        }

        match self.queue.dequeue() {
            Some(next) => self.start(next).await.map(Some),
            None => Ok(None),
        }
    }

    async fn start(&mut self, track: Track) -> Result<Track> {
        if let Some(previous) = self.current.take() {
            if previous.id != track.id {
                self.back_queue.enqueue_front(previous);
            }
        }
        self.load(&track).await?;
        self.current = Some(track.clone());
        Ok(track)
    }

    async fn load(&mut self, track: &Track) -> Result<()> {
        let item = to_playable_source(track, track.is_local(), &self.resolver);
        debug!(track_id = %track.id, url = %item.url, "loading track");
        self.phase = PlaybackPhase::Idle;
        self.engine.reset().await.context("engine reset failed")?;
        self.engine
            .add(item)
            .await
            .with_context(|| format!("engine rejected track {}", track.id))?;
        if self.force_pause {
            self.engine.pause().await.context("engine pause failed")
        } else {
            self.engine.play().await.context("engine play failed")
        }
    }

    async fn engine_idle(&self) -> Result<bool> {
        let state = self.engine.playback_state().await?;
        if state.is_idle() {
            return Ok(true);
        }
        Ok(self.engine.active_track().await?.is_none())
    }

    async fn begin(&mut self) -> Result<()> {
        if self.in_flight {
            warn!("previous playback operation was interrupted; resyncing with engine");
            let active = self.engine.active_track().await?;
            self.current = match (active, self.current.take()) {
                (None, _) => None,
                (Some(item), Some(current)) if item.id.as_deref() == Some(current.id.as_str()) => {
                    Some(current)
                }
                (Some(item), _) => Some(from_playable_item(&item)),
            };
        }
        self.in_flight = true;
        Ok(())
    }
}
