//! Packet-to-buffer decode stage.
//!
//! The [`Decoder`] pulls packets from the active [`MediaSession`], queues the decoded frames and
//! packs them into size-bounded [`PlaybackBuffer`]s. It also turns the media engine's coarse,
//! packet-granular seek into a sample-accurate one.
//!
//! A decoder is driven by exactly one decode at a time (see [`crate::scheduler`]), so it carries
//! no internal locking.

use std::time::Instant;

use crate::buffer::PlaybackBuffer;
use crate::config::PlaybackConfig;
use crate::error::{DecoderError, DecoderInitializationError};
use crate::frame::DecodedFrame;
use crate::frame_queue::FrameQueue;
use crate::media::{MediaSession, Packet};
use crate::stream::StreamDescriptor;

pub struct Decoder {
    session: Option<Box<dyn MediaSession>>,
    frame_queue: FrameQueue,
    eof: bool,
    /// Terminal frames were already handed out for the current EOF.
    drained: bool,
    seek_tolerance_seconds: f64,
    max_correction_packets: usize,
    max_consecutive_read_errors: usize,
}

impl Decoder {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            session: None,
            frame_queue: FrameQueue::new(),
            eof: false,
            drained: false,
            seek_tolerance_seconds: config.seek_tolerance_seconds,
            max_correction_packets: config.max_correction_packets.max(1),
            max_consecutive_read_errors: config.max_consecutive_read_errors.max(1),
        }
    }

    /// Take ownership of `session` and open its codec.
    ///
    /// Any previous session is closed first. Queued frames and the EOF flag are reset.
    pub fn initialize(
        &mut self,
        mut session: Box<dyn MediaSession>,
    ) -> Result<(), DecoderInitializationError> {
        self.release_session();
        self.frame_queue.clear();
        self.eof = false;
        self.drained = false;

        if let Err(e) = session.open_codec() {
            session.close();
            return Err(e);
        }

        let d = session.descriptor();
        tracing::info!(
            sample_rate = d.sample_rate,
            channels = d.channels,
            channel_layout = format_args!("{:#x}", d.channel_layout),
            sample_format = %d.sample_format,
            time_base = format_args!("{}/{}", d.time_base.numer, d.time_base.denom),
            duration_s = d.duration_seconds.unwrap_or(0.0),
            total_frames = d.total_frames.unwrap_or(0),
            codec = d.codec.as_deref().unwrap_or("unknown"),
            raw = session.is_raw(),
            "decoder initialized"
        );
        self.session = Some(session);
        Ok(())
    }

    pub fn descriptor(&self) -> Option<&StreamDescriptor> {
        self.session.as_ref().map(|s| s.descriptor())
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Frames decoded but not yet packed into a buffer.
    pub fn queued_frames(&self) -> usize {
        self.frame_queue.len()
    }

    /// Decode up to `max_sample_count` samples per channel into a new buffer.
    ///
    /// The buffer comes back short at EOF. The terminal buffer additionally carries every
    /// leftover queued frame plus the codec flush, so it may exceed `max_sample_count`.
    pub fn decode(&mut self, max_sample_count: usize) -> Result<PlaybackBuffer, DecoderError> {
        let descriptor = self
            .descriptor()
            .ok_or(DecoderError::NotInitialized)?
            .clone();
        let mut buffer = PlaybackBuffer::new(&descriptor, max_sample_count);
        let started = Instant::now();

        while !self.eof {
            if !self.fill_queue() {
                break;
            }
            let Some(frame) = self.frame_queue.peek() else {
                break;
            };
            if buffer.append_frame(frame) {
                self.frame_queue.dequeue();
                continue;
            }
            if buffer.is_empty() {
                // A single frame larger than the whole buffer: hand out its head now.
                self.split_front_into(&mut buffer);
            }
            break;
        }

        if self.eof && !self.drained {
            self.drained = true;
            let mut terminal = self.frame_queue.dequeue_all();
            if let Some(session) = self.session.as_mut() {
                match session.drain() {
                    Ok(frames) => terminal.extend(frames),
                    Err(e) => tracing::warn!("codec drain failed: {e}"),
                }
            }
            buffer.append_terminal_frames(&terminal);
        }

        tracing::debug!(
            requested = max_sample_count,
            samples = buffer.sample_count(),
            frames = buffer.frame_count(),
            terminal = buffer.is_terminal(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "decoded buffer"
        );
        Ok(buffer)
    }

    /// Read and decode packets until at least one frame is queued.
    ///
    /// Returns `false` once EOF is reached with nothing queued. Non-EOF failures skip the
    /// offending packet; too many consecutive read failures are treated as EOF.
    fn fill_queue(&mut self) -> bool {
        let mut consecutive_read_errors = 0usize;
        while self.frame_queue.is_empty() {
            let Some(session) = self.session.as_mut() else {
                self.eof = true;
                return false;
            };
            match session.read_packet() {
                Ok(Some(packet)) => {
                    consecutive_read_errors = 0;
                    match session.decode(&packet) {
                        Ok(frames) => {
                            for frame in frames {
                                self.frame_queue.enqueue(frame);
                            }
                        }
                        Err(e) if e.is_eof() => {
                            self.eof = true;
                            return false;
                        }
                        Err(e) => {
                            tracing::warn!(pts = packet.pts, "skipping undecodable packet: {e}");
                        }
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_eof() => {
                    self.eof = true;
                    return false;
                }
                Err(e) => {
                    consecutive_read_errors += 1;
                    tracing::warn!(consecutive = consecutive_read_errors, "{e}");
                    if consecutive_read_errors >= self.max_consecutive_read_errors {
                        tracing::error!(
                            consecutive = consecutive_read_errors,
                            "giving up on stream after repeated read failures"
                        );
                        self.eof = true;
                        return false;
                    }
                }
            }
        }
        true
    }

    fn split_front_into(&mut self, buffer: &mut PlaybackBuffer) {
        let room = buffer.max_sample_count().saturating_sub(buffer.sample_count());
        let Some(front) = self.frame_queue.peek_mut() else {
            return;
        };
        if room == 0 {
            return;
        }
        let mut head = front.clone();
        head.keep_first(room);
        front.skip_head(room);
        buffer.append_frame(&head);
    }

    /// Seek to `seconds`.
    ///
    /// A seek past the end sets EOF and is not an error. Other media-engine seek failures
    /// propagate. Unless the stream is raw PCM, the coarse seek is followed by a forward read
    /// that drops audio before the target so playback starts within the seek tolerance.
    pub fn seek(&mut self, seconds: f64) -> Result<(), DecoderError> {
        let target = seconds.max(0.0);
        let session = self.session.as_mut().ok_or(DecoderError::NotInitialized)?;
        self.frame_queue.clear();
        self.drained = false;

        match session.seek(target) {
            Ok(()) => {}
            Err(e) if e.is_eof() => {
                tracing::info!(target_s = target, "seek reached end of stream");
                self.eof = true;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        self.eof = false;

        if session.is_raw() {
            tracing::info!(target_s = target, "seek (sample accurate)");
            return Ok(());
        }
        self.correct_seek(target)
    }

    fn correct_seek(&mut self, target: f64) -> Result<(), DecoderError> {
        let session = self.session.as_mut().ok_or(DecoderError::NotInitialized)?;
        let time_base = session.time_base();
        let sample_rate = session.descriptor().sample_rate;

        let mut packets: Vec<(Packet, f64)> = Vec::new();
        let mut last_ts = f64::NEG_INFINITY;
        let mut reads = 0usize;
        let mut consecutive_read_errors = 0usize;
        let mut hit_eof = false;

        while last_ts <= target {
            if reads >= self.max_correction_packets {
                return Err(DecoderError::CorrectionOverrun { packets: reads });
            }
            reads += 1;
            match session.read_packet() {
                Ok(Some(packet)) => {
                    consecutive_read_errors = 0;
                    let ts = time_base.to_seconds(packet.pts);
                    if ts < last_ts {
                        return Err(DecoderError::NonMonotonicTimestamps {
                            previous: last_ts,
                            current: ts,
                        });
                    }
                    last_ts = ts;
                    packets.push((packet, ts));
                }
                Ok(None) => {}
                Err(e) if e.is_eof() => {
                    hit_eof = true;
                    break;
                }
                Err(e) => {
                    consecutive_read_errors += 1;
                    tracing::warn!("packet read failed while correcting seek: {e}");
                    if consecutive_read_errors >= self.max_consecutive_read_errors {
                        hit_eof = true;
                        break;
                    }
                }
            }
        }

        if packets.is_empty() {
            tracing::info!(target_s = target, "seek landed at end of stream");
            self.eof = hit_eof;
            return Ok(());
        }

        // Last packet starting at or before the target. Falls back to the first packet
        // when the coarse seek already overshot.
        let first_after = packets
            .iter()
            .position(|(_, ts)| *ts > target)
            .unwrap_or(packets.len());
        let usable = first_after.saturating_sub(1);

        for (packet, _) in &packets[..usable] {
            session.decode_and_drop(packet);
        }

        let usable_ts = packets[usable].1;
        let gap = target - usable_ts;
        let mut skip = if gap > self.seek_tolerance_seconds {
            (gap * f64::from(sample_rate)).round() as usize
        } else {
            0
        };
        let skipped = skip;

        let mut frames: Vec<DecodedFrame> = Vec::new();
        for (packet, _) in &packets[usable..] {
            match session.decode(packet) {
                Ok(decoded) => frames.extend(decoded),
                Err(e) if e.is_eof() => break,
                Err(e) => tracing::warn!(pts = packet.pts, "skipping undecodable packet: {e}"),
            }
        }
        for mut frame in frames {
            if skip > 0 {
                let n = skip.min(frame.sample_count());
                frame.skip_head(n);
                skip -= n;
            }
            if frame.sample_count() > 0 {
                self.frame_queue.enqueue(frame);
            }
        }

        tracing::info!(
            target_s = target,
            landed_s = usable_ts,
            dropped_packets = usable,
            read_packets = packets.len(),
            skipped_samples = skipped - skip,
            "seek corrected"
        );
        Ok(())
    }

    /// Drop queued frames, leaving codec state and the session untouched.
    pub fn stop(&mut self) {
        self.frame_queue.clear();
    }

    /// Release the session after its file finished playing.
    pub fn playback_completed(&mut self) {
        self.frame_queue.clear();
        self.release_session();
    }

    fn release_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.release_session();
    }
}
