//! CPAL-backed [`OutputDevice`].
//!
//! The `cpal::Stream` lives on a dedicated thread (it is not `Send` on every host) and is
//! driven through a command channel. The real-time callback:
//! - plays submitted buffers back to back from a shared queue
//! - applies basic channel mapping (mono↔stereo, best-effort otherwise) and volume
//! - converts `f32` samples to the device sample format
//! - outputs silence without draining the queue while paused
//!
//! Completion handlers are forwarded to a separate completion thread, never run on the audio
//! thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::buffer::PcmBuffer;
use crate::output::device::{pick_buffer_size, pick_device, pick_output_config};
use crate::output::resample::BufferResampler;
use crate::output::{CompletionHandler, OutputDevice, OutputStats};
use crate::stream::StreamDescriptor;

/// Configuration for the CPAL output.
#[derive(Clone, Debug, Default)]
pub struct CpalOutputConfig {
    /// Case-insensitive substring of the device name; `None` uses the host default.
    pub device: Option<String>,
    /// Resampler chunk size in frames (only used when the device rate differs).
    pub resample_chunk_frames: usize,
}

/// What the stream thread actually opened.
#[derive(Clone, Debug)]
struct StreamInfo {
    device: String,
    sample_rate: u32,
    channels: u16,
    sample_format: cpal::SampleFormat,
    requested: (u32, u16),
}

enum Command {
    Open {
        sample_rate: u32,
        channels: u16,
        reply: Sender<Result<StreamInfo>>,
    },
    Shutdown,
}

enum Completion {
    Run { epoch: u64, handler: CompletionHandler },
    Shutdown,
}

struct QueuedBuffer {
    /// Interleaved, already at the device rate.
    samples: Vec<f32>,
    channels: usize,
    pos: usize,
    terminal: bool,
    on_complete: Option<CompletionHandler>,
}

#[derive(Default)]
struct OutputQueue {
    buffers: VecDeque<QueuedBuffer>,
    /// Audio is expected: set on submit, cleared once the terminal buffer finished.
    active: bool,
}

impl OutputQueue {
    /// Retire finished buffers until the head has samples left. Returns `false` when empty.
    fn advance(&mut self, done: &Sender<Completion>, epoch: u64) -> bool {
        while let Some(front) = self.buffers.front() {
            if front.pos < front.samples.len() {
                return true;
            }
            if let Some(finished) = self.buffers.pop_front() {
                if finished.terminal {
                    self.active = false;
                }
                if let Some(handler) = finished.on_complete {
                    let _ = done.send(Completion::Run { epoch, handler });
                }
            }
        }
        false
    }
}

struct Shared {
    queue: Mutex<OutputQueue>,
    paused: AtomicBool,
    /// Bumped whenever queued audio is discarded; older completions are dropped.
    epoch: AtomicU64,
    volume_bits: AtomicU32,
    played_frames: AtomicU64,
    underrun_frames: AtomicU64,
    underrun_events: AtomicU64,
    base_position: Mutex<f64>,
    info: Mutex<Option<StreamInfo>>,
    resampler: Mutex<Option<BufferResampler>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct CpalOutput {
    shared: Arc<Shared>,
    config: CpalOutputConfig,
    commands: Sender<Command>,
    completions: Sender<Completion>,
    completion_thread: ThreadId,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl CpalOutput {
    pub fn new(config: CpalOutputConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(OutputQueue::default()),
            paused: AtomicBool::new(true),
            epoch: AtomicU64::new(0),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            played_frames: AtomicU64::new(0),
            underrun_frames: AtomicU64::new(0),
            underrun_events: AtomicU64::new(0),
            base_position: Mutex::new(0.0),
            info: Mutex::new(None),
            resampler: Mutex::new(None),
        });

        let (completions, completion_rx) = unbounded::<Completion>();
        let completion_shared = shared.clone();
        let completion_handle = thread::Builder::new()
            .name("output-completions".to_string())
            .spawn(move || run_completions(completion_rx, completion_shared))
            .context("spawn completion thread")?;
        let completion_thread = completion_handle.thread().id();

        let (commands, command_rx) = unbounded::<Command>();
        let stream_shared = shared.clone();
        let stream_done = completions.clone();
        let device = config.device.clone();
        let stream_handle = thread::Builder::new()
            .name("output-stream".to_string())
            .spawn(move || run_stream_owner(command_rx, device, stream_shared, stream_done))
            .context("spawn output stream thread")?;

        Ok(Self {
            shared,
            config,
            commands,
            completions,
            completion_thread,
            threads: Mutex::new(vec![stream_handle, completion_handle]),
        })
    }

    fn open_stream(&self, sample_rate: u32, channels: u16) -> Result<StreamInfo> {
        let (reply, reply_rx) = bounded(1);
        self.commands
            .send(Command::Open {
                sample_rate,
                channels,
                reply,
            })
            .map_err(|_| anyhow!("output stream thread is gone"))?;
        reply_rx
            .recv()
            .context("output stream thread exited while opening")?
    }

    fn discard_queued(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        let mut queue = lock(&self.shared.queue);
        queue.buffers.clear();
        queue.active = false;
    }
}

impl OutputDevice for CpalOutput {
    fn prepare(&self, descriptor: &StreamDescriptor) -> Result<()> {
        self.discard_queued();
        self.shared.paused.store(true, Ordering::SeqCst);

        let channels = u16::try_from(descriptor.channels).unwrap_or(u16::MAX);
        let requested = (descriptor.sample_rate, channels);
        let reuse = lock(&self.shared.info)
            .as_ref()
            .is_some_and(|info| info.requested == requested);
        let info = if reuse {
            lock(&self.shared.info)
                .clone()
                .ok_or_else(|| anyhow!("output stream vanished"))?
        } else {
            let info = self.open_stream(descriptor.sample_rate, channels)?;
            *lock(&self.shared.info) = Some(info.clone());
            info
        };

        let resampler = if info.sample_rate != descriptor.sample_rate {
            Some(BufferResampler::new(
                descriptor.sample_rate,
                info.sample_rate,
                descriptor.channels,
                self.config.resample_chunk_frames,
            )?)
        } else {
            None
        };
        tracing::info!(
            device = %info.device,
            device_rate = info.sample_rate,
            device_channels = info.channels,
            sample_format = ?info.sample_format,
            source_rate = descriptor.sample_rate,
            source_channels = descriptor.channels,
            resampling = resampler.is_some(),
            "output prepared"
        );
        *lock(&self.shared.resampler) = resampler;
        self.shared.played_frames.store(0, Ordering::SeqCst);
        *lock(&self.shared.base_position) = 0.0;
        Ok(())
    }

    fn submit(&self, buffer: PcmBuffer, on_complete: CompletionHandler) {
        let mut samples = buffer.to_interleaved();
        if let Some(resampler) = lock(&self.shared.resampler).as_mut() {
            match resampler.process(&samples, buffer.terminal) {
                Ok(resampled) => samples = resampled,
                Err(e) => tracing::warn!("resampling failed, playing at source rate: {e:#}"),
            }
        }
        let mut queue = lock(&self.shared.queue);
        queue.active = true;
        queue.buffers.push_back(QueuedBuffer {
            samples,
            channels: buffer.channels.max(1),
            pos: 0,
            terminal: buffer.terminal,
            on_complete: Some(on_complete),
        });
    }

    fn play(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        self.discard_queued();
        if let Some(resampler) = lock(&self.shared.resampler).as_mut() {
            resampler.reset();
        }
    }

    fn is_playing(&self) -> bool {
        !self.shared.paused.load(Ordering::SeqCst) && lock(&self.shared.info).is_some()
    }

    fn seek_to(&self, seconds: f64) {
        *lock(&self.shared.base_position) = seconds.max(0.0);
        self.shared.played_frames.store(0, Ordering::SeqCst);
    }

    fn position_seconds(&self) -> f64 {
        let base = *lock(&self.shared.base_position);
        let rate = lock(&self.shared.info)
            .as_ref()
            .map(|i| i.sample_rate)
            .unwrap_or(0);
        if rate == 0 {
            return base;
        }
        base + self.shared.played_frames.load(Ordering::Relaxed) as f64 / f64::from(rate)
    }

    fn set_volume(&self, volume: f32) {
        self.shared
            .volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.shared.volume_bits.load(Ordering::Relaxed))
    }

    fn stats(&self) -> OutputStats {
        let info = lock(&self.shared.info).clone();
        OutputStats {
            device: info.as_ref().map(|i| i.device.clone()),
            device_sample_rate: info.as_ref().map(|i| i.sample_rate),
            device_channels: info.as_ref().map(|i| i.channels),
            sample_format: info.as_ref().map(|i| format!("{:?}", i.sample_format)),
            resampling: lock(&self.shared.resampler).is_some(),
            played_frames: self.shared.played_frames.load(Ordering::Relaxed),
            queued_buffers: lock(&self.shared.queue).buffers.len(),
            underrun_frames: self.shared.underrun_frames.load(Ordering::Relaxed),
            underrun_events: self.shared.underrun_events.load(Ordering::Relaxed),
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.discard_queued();
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.completions.send(Completion::Shutdown);
        if thread::current().id() == self.completion_thread {
            return;
        }
        let threads =
            std::mem::take(self.threads.get_mut().unwrap_or_else(PoisonError::into_inner));
        for handle in threads {
            if handle.join().is_err() {
                tracing::error!("output thread panicked");
            }
        }
    }
}

fn run_completions(rx: Receiver<Completion>, shared: Arc<Shared>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            Completion::Run { epoch, handler } => {
                if epoch == shared.epoch.load(Ordering::SeqCst) {
                    handler();
                }
            }
            Completion::Shutdown => break,
        }
    }
}

fn run_stream_owner(
    rx: Receiver<Command>,
    device_name: Option<String>,
    shared: Arc<Shared>,
    done: Sender<Completion>,
) {
    let host = cpal::default_host();
    let mut stream: Option<cpal::Stream> = None;
    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Open {
                sample_rate,
                channels,
                reply,
            } => {
                stream = None;
                let result = open_output_stream(
                    &host,
                    device_name.as_deref(),
                    sample_rate,
                    channels,
                    &shared,
                    &done,
                )
                .map(|(s, info)| {
                    stream = Some(s);
                    info
                });
                if let Err(e) = &result {
                    tracing::error!("could not open output stream: {e:#}");
                }
                let _ = reply.send(result);
            }
            Command::Shutdown => break,
        }
    }
    drop(stream);
    tracing::debug!("output stream thread exiting");
}

fn open_output_stream(
    host: &cpal::Host,
    device_name: Option<&str>,
    sample_rate: u32,
    channels: u16,
    shared: &Arc<Shared>,
    done: &Sender<Completion>,
) -> Result<(cpal::Stream, StreamInfo)> {
    let device = pick_device(host, device_name)?;
    let name = device
        .description()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let supported = pick_output_config(&device, sample_rate, channels)?;
    let sample_format = supported.sample_format();
    let mut config: cpal::StreamConfig = supported.config();
    if let Some(buffer_size) = pick_buffer_size(&supported) {
        config.buffer_size = buffer_size;
    }

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, shared, done),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, shared, done),
        cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, shared, done),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, shared, done),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }?;
    stream.play().context("start output stream")?;

    let info = StreamInfo {
        device: name,
        sample_rate: config.sample_rate,
        channels: config.channels,
        sample_format,
        requested: (sample_rate, channels),
    };
    Ok((stream, info))
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: &Arc<Shared>,
    done: &Sender<Completion>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = usize::from(config.channels).max(1);
    let shared = shared.clone();
    let done = done.clone();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
            if shared.paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }
            let volume = f32::from_bits(shared.volume_bits.load(Ordering::Relaxed));
            let epoch = shared.epoch.load(Ordering::SeqCst);
            let mut queue = lock(&shared.queue);

            let frames = data.len() / channels_out;
            let mut filled_frames = 0usize;
            for frame in 0..frames {
                if !queue.advance(&done, epoch) {
                    if queue.active {
                        shared.underrun_events.fetch_add(1, Ordering::Relaxed);
                        shared
                            .underrun_frames
                            .fetch_add((frames - frame) as u64, Ordering::Relaxed);
                    }
                    data[frame * channels_out..].fill(silence);
                    break;
                }
                let Some(buf) = queue.buffers.front_mut() else {
                    break;
                };
                let src = &buf.samples[buf.pos..(buf.pos + buf.channels).min(buf.samples.len())];
                for ch in 0..channels_out {
                    let s = map_channel(src, channels_out, ch) * volume;
                    data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<f32>(s);
                }
                buf.pos += buf.channels;
                filled_frames += 1;
            }
            queue.advance(&done, epoch);

            if filled_frames > 0 {
                shared
                    .played_frames
                    .fetch_add(filled_frames as u64, Ordering::Relaxed);
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Output sample for `dst_ch` from one source frame.
///
/// - mono → anything: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: clamp to the available channels
fn map_channel(src: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    match (src.len(), dst_channels) {
        (0, _) => 0.0,
        (1, _) => src[0],
        (2, 1) => 0.5 * (src[0] + src[1]),
        (n, _) => src[dst_ch.min(n - 1)],
    }
}
