use crate::bridge::SyncBridge;
use crate::MessageSink;
use anyhow::Result;
use cadence_core::Track;
use cadence_gateway::GatewayEvent;
use cadence_player::{EngineEvent, EngineState, PlaybackController, RemoteEvent};
use tracing::{debug, error, info, warn};

pub struct Session<S> {
    player: PlaybackController,
    bridge: SyncBridge<S>,
    recents: Vec<Track>,
}

impl<S: MessageSink> Session<S> {
    pub fn new(player: PlaybackController, sink: S) -> Self {
        Self {
            player,
            bridge: SyncBridge::new(sink),
            recents: Vec::new(),
        }
    }

    pub fn player(&self) -> &PlaybackController {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut PlaybackController {
        &mut self.player
    }

    pub fn bridge(&self) -> &SyncBridge<S> {
        &self.bridge
    }

    pub fn recents(&self) -> &[Track] {
        &self.recents
    }

    pub async fn handle_engine_event(&mut self, event: EngineEvent) -> Result<()> {
        let report = match &event {
            EngineEvent::PlaybackState(
                EngineState::Loading | EngineState::Buffering | EngineState::Ready,
            ) => None,
            EngineEvent::PlaybackState(_) | EngineEvent::ActiveTrackChanged(_) => Some(false),
            EngineEvent::Remote(RemoteEvent::Seek(_)) => Some(true),
            EngineEvent::Remote(_) => None,
        };

        self.player.handle_event(event).await?;

        if let Some(seek_only) = report {
            self.bridge.report_state(&self.player, seek_only).await?;
        }
        Ok(())
    }

    pub async fn handle_gateway_event(&mut self, event: GatewayEvent) {
        let (kind, result) = match event {
            GatewayEvent::Connected => {
                info!("gateway connected");
                let result = if self.player.current().is_some() {
                    self.bridge.report_state(&self.player, false).await.map(drop)
                } else {
                    Ok(())
                };
                ("connected", result)
            }
            GatewayEvent::Disconnected => {
                warn!("gateway connection lost; updates are buffered until it returns");
                ("disconnected", Ok(()))
            }
            GatewayEvent::Sync(cmd) => (
                "sync",
                self.bridge.apply_sync(&mut self.player, cmd).await,
            ),
            GatewayEvent::Recents(recents) => {
                debug!(count = recents.len(), "recents replaced");
                self.recents = recents;
                ("recents", Ok(()))
            }
        };

        if let Err(err) = result {
            error!(error = %err, kind, "gateway message handler failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Session;
    use crate::tests::{controller, track, RecordingSink};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use cadence_core::{PlayableItem, RepeatMode, SourceResolver};
    use cadence_gateway::{GatewayEvent, Outbound, SyncCommand};
    use cadence_player::{
        AudioEngine, EngineEvent, EngineState, NullEngine, PlayOptions, PlaybackController,
        RemoteEvent,
    };

    struct BrokenEngine;

    #[async_trait]
    impl AudioEngine for BrokenEngine {
        fn name(&self) -> &'static str {
            "broken"
        }
        async fn add(&self, _item: PlayableItem) -> Result<()> {
            Err(anyhow!("engine offline"))
        }
        async fn play(&self) -> Result<()> {
            Err(anyhow!("engine offline"))
        }
        async fn pause(&self) -> Result<()> {
            Err(anyhow!("engine offline"))
        }
        async fn stop(&self) -> Result<()> {
            Err(anyhow!("engine offline"))
        }
        async fn reset(&self) -> Result<()> {
            Err(anyhow!("engine offline"))
        }
        async fn retry(&self) -> Result<()> {
            Err(anyhow!("engine offline"))
        }
        async fn seek_to(&self, _position: f64) -> Result<()> {
            Err(anyhow!("engine offline"))
        }
        async fn skip_to_next(&self) -> Result<()> {
            Err(anyhow!("engine offline"))
        }
        async fn skip_to_previous(&self) -> Result<()> {
            Err(anyhow!("engine offline"))
        }
        async fn get_queue(&self) -> Result<Vec<PlayableItem>> {
            Err(anyhow!("engine offline"))
        }
        async fn active_track(&self) -> Result<Option<PlayableItem>> {
            Err(anyhow!("engine offline"))
        }
        async fn playback_state(&self) -> Result<EngineState> {
            Err(anyhow!("engine offline"))
        }
        async fn position(&self) -> Result<f64> {
            Err(anyhow!("engine offline"))
        }
        async fn set_repeat_mode(&self, _mode: RepeatMode) -> Result<()> {
            Err(anyhow!("engine offline"))
        }
        async fn repeat_mode(&self) -> Result<RepeatMode> {
            Err(anyhow!("engine offline"))
        }
    }

    fn session() -> Session<RecordingSink> {
        let (player, _engine) = controller();
        Session::new(player, RecordingSink::default())
    }

    #[tokio::test]
    async fn queue_advances_on_end_and_reports_new_track() {
        let mut session = session();
        session
            .player_mut()
            .play(vec![track("a"), track("b")], PlayOptions::default())
            .await
            .unwrap();
        assert_eq!(session.player().current().map(|t| t.id.as_str()), Some("a"));
        assert_eq!(session.player().queue().size(), 1);

        session
            .handle_engine_event(EngineEvent::PlaybackState(EngineState::Ended))
            .await
            .unwrap();

        let player = session.player();
        assert_eq!(player.current().map(|t| t.id.as_str()), Some("b"));
        assert!(player.queue().is_empty());
        let history: Vec<_> = player.back_queue().iter().map(|t| t.id.clone()).collect();
        assert_eq!(history, vec!["a"]);

        match session.bridge().sink().messages().last() {
            Some(Outbound::Player { track, update, .. }) => {
                assert_eq!(track.as_ref().map(|t| t.id.as_str()), Some("b"));
                assert!(*update);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn remote_seek_reports_position_only() {
        let mut session = session();
        session
            .player_mut()
            .play(vec![track("a")], PlayOptions::default())
            .await
            .unwrap();

        session
            .handle_engine_event(EngineEvent::Remote(RemoteEvent::Seek(64.0)))
            .await
            .unwrap();

        assert_eq!(
            session.bridge().sink().messages(),
            vec![Outbound::Seek { seek: 64.0 }]
        );
    }

    #[tokio::test]
    async fn sync_and_recents_are_dispatched() {
        let mut session = session();

        session
            .handle_gateway_event(GatewayEvent::Sync(SyncCommand {
                track: Some(track("t")),
                paused: true,
                ..SyncCommand::default()
            }))
            .await;
        session
            .handle_gateway_event(GatewayEvent::Recents(vec![track("r1"), track("r2")]))
            .await;

        assert_eq!(session.player().current().map(|t| t.id.as_str()), Some("t"));
        assert!(session.player().force_pause());
        let recents: Vec<_> = session.recents().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(recents, vec!["r1", "r2"]);
    }

    #[tokio::test]
    async fn connect_reports_current_state() {
        let mut session = session();
        session.handle_gateway_event(GatewayEvent::Connected).await;
        assert!(session.bridge().sink().messages().is_empty());

        session
            .player_mut()
            .play(vec![track("a")], PlayOptions::default())
            .await
            .unwrap();
        session.handle_gateway_event(GatewayEvent::Connected).await;
        assert_eq!(session.bridge().sink().messages().len(), 1);
    }

    #[tokio::test]
    async fn failing_handler_does_not_affect_other_messages() {
        let resolver = SourceResolver::new("https://music.example.com/", "/media").unwrap();
        let player = PlaybackController::new(Box::new(BrokenEngine), resolver);
        let mut session = Session::new(player, RecordingSink::default());

        session
            .handle_gateway_event(GatewayEvent::Sync(SyncCommand {
                track: Some(track("t")),
                ..SyncCommand::default()
            }))
            .await;
        session
            .handle_gateway_event(GatewayEvent::Recents(vec![track("r1")]))
            .await;

        assert_eq!(session.recents().len(), 1);
        assert!(session.player().current().is_none());
    }

    #[tokio::test]
    async fn later_sync_wins_over_trailing_engine_events() {
        let (engine, mut engine_events) = NullEngine::with_events();
        let resolver = SourceResolver::new("https://music.example.com/", "/media").unwrap();
        let player = PlaybackController::new(Box::new(engine), resolver);
        let mut session = Session::new(player, RecordingSink::default());

        for id in ["a", "b"] {
            session
                .handle_gateway_event(GatewayEvent::Sync(SyncCommand {
                    track: Some(track(id)),
                    ..SyncCommand::default()
                }))
                .await;
        }

        let mut drained = 0;
        while let Ok(event) = engine_events.try_recv() {
            session.handle_engine_event(event).await.unwrap();
            assert_eq!(session.player().current().map(|t| t.id.as_str()), Some("b"));
            drained += 1;
        }
        assert!(drained > 0);

        let sent = session.bridge().sink().messages();
        assert!(!sent.is_empty());
        for message in sent {
            match message {
                Outbound::Player { track, .. } => {
                    assert_eq!(track.map(|t| t.id), Some("b".to_string()));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}
