//! Transport-level facade over the engine, scheduler and output device.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{Receiver, unbounded};

use crate::config::PlaybackConfig;
use crate::error::PlayerError;
use crate::media::MediaEngine;
use crate::output::OutputDevice;
use crate::scheduler::Scheduler;
use crate::status::PlayerStatus;
use crate::stream::StreamDescriptor;

/// Notifications emitted by the playback core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Every buffer of the session has played. Emitted once per session run.
    PlaybackCompleted { session: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// The file currently loaded.
#[derive(Clone, Debug)]
pub struct PlaybackSession {
    pub id: u64,
    pub path: PathBuf,
    pub descriptor: StreamDescriptor,
}

pub struct Player {
    engine: Box<dyn MediaEngine>,
    output: Arc<dyn OutputDevice>,
    scheduler: Scheduler,
    session: Option<PlaybackSession>,
    state: PlaybackState,
    next_session_id: u64,
    events: Receiver<PlayerEvent>,
}

impl Player {
    pub fn new(
        engine: Box<dyn MediaEngine>,
        output: Arc<dyn OutputDevice>,
        config: PlaybackConfig,
    ) -> Result<Self, PlayerError> {
        let (tx, rx) = unbounded();
        let scheduler = Scheduler::new(output.clone(), config, tx)?;
        Ok(Self {
            engine,
            output,
            scheduler,
            session: None,
            state: PlaybackState::Stopped,
            next_session_id: 0,
            events: rx,
        })
    }

    pub fn play(&mut self, path: &Path) -> Result<(), PlayerError> {
        self.play_from(path, None)
    }

    /// Stop whatever is playing, open `path` and start playback, optionally at `start` seconds.
    pub fn play_from(&mut self, path: &Path, start: Option<f64>) -> Result<(), PlayerError> {
        self.stop();

        let session = self.engine.open(path)?;
        let descriptor = session.descriptor().clone();
        self.next_session_id += 1;
        let id = self.next_session_id;
        self.scheduler.initialize(session, id)?;

        let start = start.filter(|s| *s > 0.0);
        self.output.seek_to(start.unwrap_or(0.0));
        self.session = Some(PlaybackSession {
            id,
            path: path.to_path_buf(),
            descriptor,
        });
        if let Err(e) = self.scheduler.initiate_scheduling(start) {
            tracing::error!(path = %path.display(), "could not start playback: {e}");
            self.stop();
            return Err(e);
        }
        self.output.play();
        self.state = PlaybackState::Playing;
        tracing::info!(
            session = id,
            path = %path.display(),
            start_s = start.unwrap_or(0.0),
            "playback started"
        );
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.output.pause();
            self.state = PlaybackState::Paused;
            tracing::info!("paused");
        }
    }

    pub fn resume(&mut self) {
        if self.state == PlaybackState::Paused {
            self.output.play();
            self.state = PlaybackState::Playing;
            tracing::info!("resumed");
        }
    }

    pub fn toggle_pause(&mut self) {
        match self.state {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Paused => self.resume(),
            PlaybackState::Stopped => {}
        }
    }

    /// Tear down the current session. Safe to call when nothing is loaded.
    pub fn stop(&mut self) {
        // Background decodes must be gone before the device queue is cleared.
        self.scheduler.end_session();
        self.output.stop();
        if let Some(session) = self.session.take() {
            tracing::info!(session = session.id, "playback stopped");
        }
        self.state = PlaybackState::Stopped;
    }

    /// Jump to `seconds` within the current file. The pause state is preserved.
    pub fn seek(&mut self, seconds: f64) -> Result<(), PlayerError> {
        if self.session.is_none() {
            return Err(PlayerError::NoSession);
        }
        let seconds = seconds.max(0.0);
        let was_playing = self.state == PlaybackState::Playing;
        let previous = self.output.position_seconds();

        self.output.pause();
        self.scheduler.stop();
        self.output.stop();
        self.output.seek_to(seconds);
        tracing::info!(target_s = seconds, "seek");
        if let Err(e) = self.scheduler.initiate_scheduling(Some(seconds)) {
            tracing::warn!(target_s = seconds, "seek failed: {e}");
            self.restore_position(previous, was_playing);
            return Err(e);
        }
        if was_playing {
            self.output.play();
        }
        Ok(())
    }

    /// Resume from `previous` after a failed seek. Stops the session if that fails as well.
    fn restore_position(&mut self, previous: f64, was_playing: bool) {
        self.scheduler.stop();
        self.output.stop();
        self.output.seek_to(previous);
        match self.scheduler.initiate_scheduling(Some(previous)) {
            Ok(()) => {
                if was_playing {
                    self.output.play();
                }
                tracing::info!(position_s = previous, "restored position after failed seek");
            }
            Err(e) => {
                tracing::error!(position_s = previous, "could not restore position: {e}");
                self.stop();
            }
        }
    }

    pub fn position(&self) -> f64 {
        if self.session.is_none() {
            return 0.0;
        }
        self.output.position_seconds()
    }

    /// Volume is clamped to `[0, 1]`.
    pub fn set_volume(&self, volume: f32) {
        self.output.set_volume(volume.clamp(0.0, 1.0));
    }

    pub fn volume(&self) -> f32 {
        self.output.volume()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    pub fn status(&self) -> PlayerStatus {
        PlayerStatus::capture(
            self.state,
            self.session.as_ref(),
            self.position(),
            self.volume(),
            self.output.stats(),
        )
    }

    /// Completion notifications. Feed received events back through [`Player::handle_event`].
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events.clone()
    }

    /// Apply an event to the player. Returns `true` if it ended the current session.
    pub fn handle_event(&mut self, event: PlayerEvent) -> bool {
        match event {
            PlayerEvent::PlaybackCompleted { session } => {
                let current = self.session.as_ref().map(|s| s.id);
                if current != Some(session) {
                    tracing::debug!(session, ?current, "ignoring completion of old session");
                    return false;
                }
                self.stop();
                true
            }
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}
