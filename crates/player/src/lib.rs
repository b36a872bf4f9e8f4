use anyhow::Result;
use async_trait::async_trait;
use cadence_core::{PlayableItem, RepeatMode};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub mod controller;
pub mod queue;

pub use controller::{PlayOptions, PlaybackController, PlaybackPhase, PlaybackSnapshot, MAX_LOAD_ATTEMPTS};
pub use queue::Queue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    None,
    Ready,
    Loading,
    Buffering,
    Playing,
    Paused,
    Stopped,
    Ended,
    Error,
}

impl EngineState {
    pub fn is_idle(self) -> bool {
        matches!(
            self,
            EngineState::None | EngineState::Stopped | EngineState::Ended | EngineState::Error
        )
    }

    pub fn is_paused(self) -> bool {
        matches!(
            self,
            EngineState::None
                | EngineState::Paused
                | EngineState::Stopped
                | EngineState::Ended
                | EngineState::Error
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RemoteEvent {
    Play,
    Pause,
    Stop,
    Next,
    Previous,
    Seek(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    PlaybackState(EngineState),
    ActiveTrackChanged(Option<PlayableItem>),
    Remote(RemoteEvent),
}

#[async_trait]
pub trait AudioEngine: Send + Sync {
    fn name(&self) -> &'static str;
    async fn add(&self, item: PlayableItem) -> Result<()>;
    async fn play(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn reset(&self) -> Result<()>;
    async fn retry(&self) -> Result<()>;
    async fn seek_to(&self, position: f64) -> Result<()>;
    async fn skip_to_next(&self) -> Result<()>;
    async fn skip_to_previous(&self) -> Result<()>;
    async fn get_queue(&self) -> Result<Vec<PlayableItem>>;
    async fn active_track(&self) -> Result<Option<PlayableItem>>;
    async fn playback_state(&self) -> Result<EngineState>;
    async fn position(&self) -> Result<f64>;
    async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<()>;
    async fn repeat_mode(&self) -> Result<RepeatMode>;
}

#[derive(Debug, Default)]
struct NullState {
    items: Vec<PlayableItem>,
    active: Option<usize>,
    state: EngineState,
    position: f64,
    repeat: RepeatMode,
}

#[derive(Debug, Clone, Default)]
pub struct NullEngine {
    inner: Arc<Mutex<NullState>>,
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl NullEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            inner: Arc::default(),
            events: Some(tx),
        };
        (engine, rx)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut NullState) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut *guard)
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn set_state(&self, state: EngineState) {
        let changed = self.with_state(|s| {
            let changed = s.state != state;
            s.state = state;
            changed
        });
        if changed {
            self.emit(EngineEvent::PlaybackState(state));
        }
    }

    fn active_item(&self) -> Option<PlayableItem> {
        self.with_state(|s| s.active.and_then(|idx| s.items.get(idx).cloned()))
    }

    fn move_active(&self, forward: bool) {
        let moved = self.with_state(|s| {
            let idx = s.active?;
            let next = if forward {
                idx.checked_add(1).filter(|n| *n < s.items.len())
            } else {
                idx.checked_sub(1)
            }?;
            s.active = Some(next);
            s.position = 0.0;
            s.items.get(next).cloned()
        });
        if let Some(item) = moved {
            self.emit(EngineEvent::ActiveTrackChanged(Some(item)));
        }
    }
}

#[async_trait]
impl AudioEngine for NullEngine {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn add(&self, item: PlayableItem) -> Result<()> {
        debug!(url = %item.url, "null engine: add");
        let became_active = self.with_state(|s| {
            s.items.push(item.clone());
            if s.active.is_none() {
                s.active = Some(s.items.len() - 1);
                s.position = 0.0;
                true
            } else {
                false
            }
        });
        if became_active {
            self.emit(EngineEvent::ActiveTrackChanged(Some(item)));
        }
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        if self.active_item().is_some() {
            info!("null engine: play");
            self.set_state(EngineState::Playing);
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        if self.active_item().is_some() {
            info!("null engine: pause");
            self.set_state(EngineState::Paused);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        info!("null engine: stop");
        self.with_state(|s| s.position = 0.0);
        self.set_state(EngineState::Stopped);
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        debug!("null engine: reset");
        let had_track = self.with_state(|s| {
            let had = s.active.is_some();
            s.items.clear();
            s.active = None;
            s.position = 0.0;
            had
        });
        self.set_state(EngineState::None);
        if had_track {
            self.emit(EngineEvent::ActiveTrackChanged(None));
        }
        Ok(())
    }

    async fn retry(&self) -> Result<()> {
        debug!("null engine: retry");
        self.play().await
    }

    async fn seek_to(&self, position: f64) -> Result<()> {
        debug!(position, "null engine: seek");
        self.with_state(|s| s.position = position.max(0.0));
        Ok(())
    }

    async fn skip_to_next(&self) -> Result<()> {
        self.move_active(true);
        Ok(())
    }

    async fn skip_to_previous(&self) -> Result<()> {
        self.move_active(false);
        Ok(())
    }

    async fn get_queue(&self) -> Result<Vec<PlayableItem>> {
        Ok(self.with_state(|s| s.items.clone()))
    }

    async fn active_track(&self) -> Result<Option<PlayableItem>> {
        Ok(self.active_item())
    }

    async fn playback_state(&self) -> Result<EngineState> {
        Ok(self.with_state(|s| s.state))
    }

    async fn position(&self) -> Result<f64> {
        Ok(self.with_state(|s| s.position))
    }

    async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<()> {
        self.with_state(|s| s.repeat = mode);
        Ok(())
    }

    async fn repeat_mode(&self) -> Result<RepeatMode> {
        Ok(self.with_state(|s| s.repeat))
    }
}

#[cfg(test)]
mod tests {
    use super::{AudioEngine, EngineEvent, EngineState, NullEngine};
    use cadence_core::PlayableItem;

    fn item(id: &str) -> PlayableItem {
        PlayableItem {
            id: Some(id.to_string()),
            url: format!("https://example.com/{id}"),
            ..PlayableItem::default()
        }
    }

    #[tokio::test]
    async fn null_engine_tracks_active_item_and_state() {
        let (engine, mut events) = NullEngine::with_events();

        engine.add(item("a")).await.unwrap();
        engine.play().await.unwrap();
        assert_eq!(engine.playback_state().await.unwrap(), EngineState::Playing);
        assert_eq!(
            engine.active_track().await.unwrap().and_then(|i| i.id),
            Some("a".to_string())
        );

        engine.reset().await.unwrap();
        assert!(engine.active_track().await.unwrap().is_none());

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                EngineEvent::ActiveTrackChanged(Some(item("a"))),
                EngineEvent::PlaybackState(EngineState::Playing),
                EngineEvent::PlaybackState(EngineState::None),
                EngineEvent::ActiveTrackChanged(None),
            ]
        );
    }

    #[tokio::test]
    async fn play_without_item_is_ignored() {
        let engine = NullEngine::new();
        engine.play().await.unwrap();
        assert_eq!(engine.playback_state().await.unwrap(), EngineState::None);
    }
}
