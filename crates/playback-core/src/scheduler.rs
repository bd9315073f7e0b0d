//! Keeps the output device fed.
//!
//! Playback of a session starts with one buffer decoded synchronously on the caller's thread
//! ("immediate" size), followed by one background decode ("deferred" size). From then on
//! every completed buffer schedules exactly one more background decode until EOF. Once EOF is
//! reached and every scheduled buffer has played, a single
//! [`PlayerEvent::PlaybackCompleted`] is emitted.
//!
//! Background decodes run on a [`DecodeWorker`] with a single slot, so the [`Decoder`] only
//! ever sees one caller. Each scheduling run is tagged with a generation number; `stop()` bumps
//! it, so jobs and completion handlers from an earlier run turn into no-ops.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::Sender;

use crate::buffer::PlaybackBuffer;
use crate::config::{BufferTargets, PlaybackConfig};
use crate::decoder::Decoder;
use crate::error::PlayerError;
use crate::media::MediaSession;
use crate::output::OutputDevice;
use crate::player::PlayerEvent;
use crate::stream::StreamDescriptor;
use crate::worker::DecodeWorker;

pub struct Scheduler {
    shared: Arc<Shared>,
}

struct Shared {
    decoder: Mutex<Decoder>,
    output: Arc<dyn OutputDevice>,
    worker: DecodeWorker,
    config: PlaybackConfig,
    targets: Mutex<BufferTargets>,
    /// Buffers submitted to the output device and not yet completed.
    scheduled: AtomicUsize,
    generation: AtomicU64,
    session_id: AtomicU64,
    active: AtomicBool,
    stopped: AtomicBool,
    eof: AtomicBool,
    completed: AtomicBool,
    events: Sender<PlayerEvent>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scheduler {
    pub fn new(
        output: Arc<dyn OutputDevice>,
        config: PlaybackConfig,
        events: Sender<PlayerEvent>,
    ) -> Result<Self, PlayerError> {
        let worker = DecodeWorker::spawn("decode-worker").map_err(PlayerError::Worker)?;
        Ok(Self {
            shared: Arc::new(Shared {
                decoder: Mutex::new(Decoder::new(&config)),
                output,
                worker,
                config,
                targets: Mutex::new(BufferTargets::default()),
                scheduled: AtomicUsize::new(0),
                generation: AtomicU64::new(0),
                session_id: AtomicU64::new(0),
                active: AtomicBool::new(false),
                stopped: AtomicBool::new(true),
                eof: AtomicBool::new(false),
                completed: AtomicBool::new(false),
                events,
            }),
        })
    }

    /// Hand a freshly opened session to the decoder and size buffers for its stream.
    ///
    /// Must follow a completed [`Scheduler::stop`] when a previous session was playing.
    pub fn initialize(
        &self,
        session: Box<dyn MediaSession>,
        session_id: u64,
    ) -> Result<BufferTargets, PlayerError> {
        let shared = &self.shared;
        let descriptor = session.descriptor().clone();
        lock(&shared.decoder).initialize(session)?;

        let targets = BufferTargets::for_stream(&descriptor, &shared.config);
        *lock(&shared.targets) = targets;
        shared.session_id.store(session_id, Ordering::SeqCst);
        shared.scheduled.store(0, Ordering::SeqCst);
        shared.eof.store(false, Ordering::SeqCst);
        shared.completed.store(false, Ordering::SeqCst);
        shared.active.store(false, Ordering::SeqCst);

        if let Err(e) = shared.output.prepare(&descriptor) {
            lock(&shared.decoder).playback_completed();
            return Err(e.into());
        }

        tracing::info!(
            session = session_id,
            effective_rate = descriptor.effective_rate(),
            immediate_samples = targets.immediate,
            deferred_samples = targets.deferred,
            "scheduler initialized"
        );
        Ok(targets)
    }

    /// Start feeding the output device, optionally from `seek_position` seconds.
    ///
    /// Decodes the first buffer on the calling thread. A seek past the end completes playback
    /// instead of failing.
    pub fn initiate_scheduling(&self, seek_position: Option<f64>) -> Result<(), PlayerError> {
        let shared = &self.shared;
        let generation = shared.generation.load(Ordering::SeqCst);
        shared.stopped.store(false, Ordering::SeqCst);
        shared.completed.store(false, Ordering::SeqCst);
        shared.eof.store(false, Ordering::SeqCst);
        shared.active.store(true, Ordering::SeqCst);

        if let Some(seconds) = seek_position {
            let mut decoder = lock(&shared.decoder);
            if let Err(e) = decoder.seek(seconds) {
                shared.active.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
            if decoder.eof() {
                drop(decoder);
                shared.eof.store(true, Ordering::SeqCst);
                shared.finish(generation);
                return Ok(());
            }
        }

        let immediate = lock(&shared.targets).immediate;
        if shared.decode_and_submit(generation, immediate) {
            shared.schedule_deferred(generation);
        }
        Ok(())
    }

    /// Cancel queued background decodes, wait for the running one, then drop queued frames.
    ///
    /// The session stays open so scheduling can resume (e.g. after a seek).
    pub fn stop(&self) {
        let shared = &self.shared;
        shared.stopped.store(true, Ordering::SeqCst);
        shared.generation.fetch_add(1, Ordering::SeqCst);
        shared.worker.cancel_and_wait();
        shared.scheduled.store(0, Ordering::SeqCst);
        shared.active.store(false, Ordering::SeqCst);
        shared.eof.store(false, Ordering::SeqCst);
        lock(&shared.decoder).stop();
        tracing::debug!("scheduler stopped");
    }

    /// Stop and close the current session.
    pub fn end_session(&self) {
        self.stop();
        lock(&self.shared.decoder).playback_completed();
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn scheduled_buffers(&self) -> usize {
        self.shared.scheduled.load(Ordering::SeqCst)
    }

    pub fn reached_eof(&self) -> bool {
        self.shared.eof.load(Ordering::SeqCst)
    }

    pub fn descriptor(&self) -> Option<StreamDescriptor> {
        lock(&self.shared.decoder).descriptor().cloned()
    }

    /// Block until background decodes submitted so far have run.
    #[cfg(test)]
    pub(crate) fn wait_idle(&self) {
        self.shared.worker.wait_idle();
    }
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation.load(Ordering::SeqCst)
            && !self.stopped.load(Ordering::SeqCst)
    }

    /// Decode one buffer and submit it. Returns whether more buffers should follow.
    fn decode_and_submit(self: &Arc<Self>, generation: u64, max_samples: usize) -> bool {
        let (buffer, eof) = {
            let mut decoder = lock(&self.decoder);
            if !self.is_current(generation) {
                return false;
            }
            match decoder.decode(max_samples) {
                Ok(buffer) => (Some(buffer), decoder.eof()),
                Err(e) => {
                    tracing::warn!("decode failed: {e}");
                    (None, true)
                }
            }
        };
        // The buffer is counted before EOF is published, so a completion that observes EOF
        // also observes the buffer still to be played.
        let pcm = buffer.and_then(PlaybackBuffer::to_output_format);
        if pcm.is_some() {
            self.scheduled.fetch_add(1, Ordering::SeqCst);
        }
        if eof {
            self.eof.store(true, Ordering::SeqCst);
        }

        match pcm {
            Some(pcm) => {
                tracing::debug!(
                    frames = pcm.frames,
                    seconds = pcm.duration_seconds(),
                    terminal = pcm.terminal,
                    "scheduled buffer"
                );
                let shared = Arc::clone(self);
                self.output.submit(
                    pcm,
                    Box::new(move || shared.buffer_completed(generation)),
                );
            }
            None if eof && self.scheduled.load(Ordering::SeqCst) == 0 => {
                self.finish(generation);
            }
            None => {}
        }
        !eof
    }

    fn schedule_deferred(self: &Arc<Self>, generation: u64) {
        let shared = Arc::clone(self);
        let queued = self.worker.submit(move || {
            if !shared.is_current(generation) {
                return;
            }
            let deferred = lock(&shared.targets).deferred;
            shared.decode_and_submit(generation, deferred);
        });
        if !queued {
            tracing::error!("decode worker is gone; playback cannot continue");
        }
    }

    fn buffer_completed(self: &Arc<Self>, generation: u64) {
        if generation != self.generation.load(Ordering::SeqCst) {
            return;
        }
        let remaining = self
            .scheduled
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0)
            .saturating_sub(1);
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        if !self.eof.load(Ordering::SeqCst) {
            self.schedule_deferred(generation);
        } else if remaining == 0 {
            self.finish(generation);
        }
    }

    /// One-shot per run: release the session and announce completion.
    fn finish(&self, generation: u64) {
        if generation != self.generation.load(Ordering::SeqCst) {
            return;
        }
        if self
            .completed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.active.store(false, Ordering::SeqCst);
        lock(&self.decoder).playback_completed();
        let session = self.session_id.load(Ordering::SeqCst);
        tracing::info!(session, "playback completed");
        if self
            .events
            .send(PlayerEvent::PlaybackCompleted { session })
            .is_err()
        {
            tracing::debug!(session, "no listener for playback completion");
        }
    }
}
