//! Scripted media session and recording output device used by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::PcmBuffer;
use crate::error::{
    DecoderError, DecoderInitializationError, OpenError, PacketReadError, SeekError,
};
use crate::frame::DecodedFrame;
use crate::media::{MediaEngine, MediaSession, Packet};
use crate::output::{CompletionHandler, OutputDevice, OutputStats};
use crate::stream::StreamDescriptor;

/// Observations shared between a [`ScriptedSession`] and the test that created it.
#[derive(Debug, Default)]
pub struct SessionProbe {
    pub closed: AtomicBool,
    pub close_calls: AtomicUsize,
    pub dropped_packets: AtomicUsize,
    pub seeks: AtomicUsize,
}

/// Synthetic stream of `total_frames` samples split into fixed-size packets.
///
/// Timestamps use a one-tick-per-sample time base. Every sample's value is its absolute
/// index in the stream (identical on all channels), so tests can check continuity.
pub struct ScriptedSession {
    descriptor: StreamDescriptor,
    packet_frames: usize,
    frames_per_packet: usize,
    total_frames: usize,
    cursor: usize,
    raw: bool,
    seek_slack_packets: usize,
    drain_frames: usize,
    drained: bool,
    bad_reads: HashSet<usize>,
    bad_decodes: HashSet<usize>,
    pts_overrides: HashMap<usize, i64>,
    fail_open: bool,
    fail_seek: bool,
    probe: Arc<SessionProbe>,
}

impl ScriptedSession {
    pub fn new(
        sample_rate: u32,
        channels: usize,
        total_frames: usize,
        packet_frames: usize,
    ) -> Self {
        let descriptor =
            StreamDescriptor::new(sample_rate, channels).with_total_frames(total_frames as u64);
        Self {
            descriptor,
            packet_frames: packet_frames.max(1),
            frames_per_packet: 1,
            total_frames,
            cursor: 0,
            raw: false,
            seek_slack_packets: 0,
            drain_frames: 0,
            drained: false,
            bad_reads: HashSet::new(),
            bad_decodes: HashSet::new(),
            pts_overrides: HashMap::new(),
            fail_open: false,
            fail_seek: false,
            probe: Arc::new(SessionProbe::default()),
        }
    }

    pub fn probe(&self) -> Arc<SessionProbe> {
        self.probe.clone()
    }

    /// Split every packet into `n` frames.
    pub fn frames_per_packet(mut self, n: usize) -> Self {
        self.frames_per_packet = n.max(1);
        self
    }

    /// Coarse seeks land this many packets before the packet containing the target.
    pub fn seek_slack(mut self, packets: usize) -> Self {
        self.seek_slack_packets = packets;
        self
    }

    /// Extra samples returned by the codec flush at EOF.
    pub fn drain_frames(mut self, frames: usize) -> Self {
        self.drain_frames = frames;
        self
    }

    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    /// Reading the packet at `index` fails once and the packet is lost.
    pub fn bad_read(mut self, index: usize) -> Self {
        self.bad_reads.insert(index);
        self
    }

    pub fn bad_decode(mut self, index: usize) -> Self {
        self.bad_decodes.insert(index);
        self
    }

    pub fn override_pts(mut self, index: usize, pts: i64) -> Self {
        self.pts_overrides.insert(index, pts);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_seek(mut self) -> Self {
        self.fail_seek = true;
        self
    }

    pub fn packet_count(&self) -> usize {
        self.total_frames.div_ceil(self.packet_frames)
    }

    fn packet_span(&self, index: usize) -> (usize, usize) {
        let start = index * self.packet_frames;
        let end = (start + self.packet_frames).min(self.total_frames);
        (start, end)
    }

    fn frames_for_range(&self, start: usize, end: usize, pts: i64) -> Vec<DecodedFrame> {
        let len = end - start;
        let per_frame = len.div_ceil(self.frames_per_packet).max(1);
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < len {
            let n = per_frame.min(len - offset);
            let first = start + offset;
            let mut data = Vec::with_capacity(n * self.descriptor.channels);
            for _ in 0..self.descriptor.channels {
                data.extend((first..first + n).map(|i| i as f32));
            }
            out.push(DecodedFrame::new(
                self.descriptor.channels,
                data,
                pts + offset as i64,
            ));
            offset += n;
        }
        out
    }
}

impl MediaSession for ScriptedSession {
    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    fn is_raw(&self) -> bool {
        self.raw
    }

    fn open_codec(&mut self) -> Result<(), DecoderInitializationError> {
        if self.fail_open {
            return Err(DecoderInitializationError::new("scripted failure"));
        }
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, PacketReadError> {
        if self.probe.closed.load(Ordering::SeqCst) {
            return Err(PacketReadError::Failed("closed".into()));
        }
        let index = self.cursor;
        if index >= self.packet_count() {
            return Err(PacketReadError::EndOfStream);
        }
        self.cursor += 1;
        if self.bad_reads.remove(&index) {
            return Err(PacketReadError::Failed(format!("corrupt packet {index}")));
        }
        let (start, end) = self.packet_span(index);
        let pts = self
            .pts_overrides
            .get(&index)
            .copied()
            .unwrap_or(start as i64);
        Ok(Some(Packet {
            stream_index: 0,
            pts,
            duration: (end - start) as u64,
            data: (index as u32).to_le_bytes().to_vec().into_boxed_slice(),
        }))
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<DecodedFrame>, DecoderError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&packet.data[..4]);
        let index = u32::from_le_bytes(raw) as usize;
        if self.bad_decodes.contains(&index) {
            return Err(DecoderError::Codec(format!("bad packet {index}")));
        }
        let (start, end) = self.packet_span(index);
        Ok(self.frames_for_range(start, end, packet.pts))
    }

    fn decode_and_drop(&mut self, _packet: &Packet) {
        self.probe.dropped_packets.fetch_add(1, Ordering::SeqCst);
    }

    fn drain(&mut self) -> Result<Vec<DecodedFrame>, DecoderError> {
        if self.drained || self.drain_frames == 0 {
            return Ok(Vec::new());
        }
        self.drained = true;
        let start = self.total_frames;
        Ok(self.frames_for_range(start, start + self.drain_frames, start as i64))
    }

    fn seek(&mut self, seconds: f64) -> Result<(), SeekError> {
        self.probe.seeks.fetch_add(1, Ordering::SeqCst);
        if self.fail_seek {
            return Err(SeekError::Failed("scripted failure".into()));
        }
        let target = (seconds * f64::from(self.descriptor.sample_rate)).round() as usize;
        if target >= self.total_frames {
            return Err(SeekError::EndOfStream);
        }
        let packet = target / self.packet_frames;
        self.cursor = if self.raw {
            packet
        } else {
            packet.saturating_sub(self.seek_slack_packets)
        };
        self.drained = false;
        Ok(())
    }

    fn close(&mut self) {
        self.probe.close_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.closed.store(true, Ordering::SeqCst);
    }
}

/// Output device that records submitted buffers; tests fire completions explicitly.
#[derive(Default)]
pub struct RecordingOutput {
    state: Mutex<RecordingState>,
}

#[derive(Default)]
struct RecordingState {
    prepared: Option<StreamDescriptor>,
    submitted: Vec<PcmBuffer>,
    pending: VecDeque<CompletionHandler>,
    playing: bool,
    position: f64,
    volume: f32,
}

impl RecordingOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn submitted(&self) -> Vec<PcmBuffer> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn submitted_frames(&self) -> Vec<usize> {
        self.state
            .lock()
            .unwrap()
            .submitted
            .iter()
            .map(|b| b.frames)
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn prepared(&self) -> Option<StreamDescriptor> {
        self.state.lock().unwrap().prepared.clone()
    }

    /// Finish the oldest queued buffer. Returns `false` when nothing is queued.
    pub fn complete_next(&self) -> bool {
        let handler = self.state.lock().unwrap().pending.pop_front();
        match handler {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }

    /// Take the oldest completion handler without running it.
    pub fn take_next(&self) -> Option<CompletionHandler> {
        self.state.lock().unwrap().pending.pop_front()
    }
}

impl OutputDevice for RecordingOutput {
    fn prepare(&self, descriptor: &StreamDescriptor) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.prepared = Some(descriptor.clone());
        state.pending.clear();
        state.position = 0.0;
        Ok(())
    }

    fn submit(&self, buffer: PcmBuffer, on_complete: CompletionHandler) {
        let mut state = self.state.lock().unwrap();
        state.submitted.push(buffer);
        state.pending.push_back(on_complete);
    }

    fn play(&self) {
        self.state.lock().unwrap().playing = true;
    }

    fn pause(&self) {
        self.state.lock().unwrap().playing = false;
    }

    fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.playing = false;
        state.pending.clear();
    }

    fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    fn seek_to(&self, seconds: f64) {
        self.state.lock().unwrap().position = seconds;
    }

    fn position_seconds(&self) -> f64 {
        self.state.lock().unwrap().position
    }

    fn set_volume(&self, volume: f32) {
        self.state.lock().unwrap().volume = volume;
    }

    fn volume(&self) -> f32 {
        self.state.lock().unwrap().volume
    }

    fn stats(&self) -> OutputStats {
        let state = self.state.lock().unwrap();
        OutputStats {
            queued_buffers: state.pending.len(),
            ..OutputStats::default()
        }
    }
}

/// Media engine that builds a [`ScriptedSession`] per opened path.
pub struct ScriptedEngine {
    make: Box<dyn Fn(&Path) -> Result<ScriptedSession, OpenError> + Send + Sync>,
}

impl ScriptedEngine {
    pub fn new(
        make: impl Fn(&Path) -> Result<ScriptedSession, OpenError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            make: Box::new(make),
        }
    }
}

impl MediaEngine for ScriptedEngine {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSession>, OpenError> {
        Ok(Box::new((self.make)(path)?))
    }
}
