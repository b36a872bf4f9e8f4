use crate::MessageSink;
use anyhow::{Context, Result};
use cadence_gateway::{Outbound, SyncCommand};
use cadence_player::PlaybackController;
use tracing::{debug, info};

pub struct SyncBridge<S> {
    sink: S,
    last_reported: Option<String>,
}

impl<S: MessageSink> SyncBridge<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            last_reported: None,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub async fn report_state(&mut self, player: &PlaybackController, seek_only: bool) -> Result<bool> {
        let snapshot = player.snapshot().await.context("failed to read playback state")?;

        if snapshot.track.as_ref().is_some_and(|t| t.is_local()) {
            debug!("local track playing; state not broadcast");
            return Ok(false);
        }

        let message = if seek_only {
            Outbound::Seek {
                seek: snapshot.position,
            }
        } else {
            let id = snapshot.track.as_ref().map(|t| t.id.clone());
            let update = id != self.last_reported;
            self.last_reported = id;
            Outbound::Player {
                track: snapshot.track,
                seek: snapshot.position,
                paused: snapshot.paused,
                update,
            }
        };

        self.sink.send_message(message)?;
        Ok(true)
    }

    pub async fn apply_sync(&mut self, player: &mut PlaybackController, cmd: SyncCommand) -> Result<()> {
        let Some(track) = cmd.track else {
            info!("remote session ended; resetting player");
            player.set_force_pause(false);
            return player.reset().await;
        };

        player.set_force_pause(cmd.paused);

        let active = player.engine().active_track().await?;
        if active.and_then(|item| item.id).as_deref() != Some(track.id.as_str()) {
            info!(track_id = %track.id, "loading synced track");
            player.force_load(track).await?;
        }

        if cmd.seek {
            player.seek_to(cmd.progress).await?;
        }

        if cmd.paused {
            player.pause().await
        } else {
            player.resume().await
        }
    }
}
