//! Sample-rate conversion for submitted buffers.
//!
//! Uses Rubato to convert interleaved `f32` audio from the stream rate to the device rate.
//! The resampler consumes fixed-size input chunks, so input frames that do not fill a chunk are
//! carried over to the next buffer. The terminal buffer flushes the remainder.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

pub struct BufferResampler {
    resampler: Async<f32>,
    channels: usize,
    chunk_frames: usize,
    src_rate: u32,
    dst_rate: u32,
    /// Interleaved input frames waiting for a full chunk.
    carry: Vec<f32>,
    out_interleaved: Vec<f32>,
}

impl BufferResampler {
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        if src_rate == 0 || dst_rate == 0 || channels == 0 {
            return Err(anyhow!(
                "invalid resampler shape: {src_rate} Hz -> {dst_rate} Hz, {channels} ch"
            ));
        }
        let chunk_frames = chunk_frames.max(1);
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init error: {e}"))?;
        let out_frames = resampler.output_frames_max();

        tracing::debug!(src_rate, dst_rate, channels, chunk_frames, "resampler ready");
        Ok(Self {
            resampler,
            channels,
            chunk_frames,
            src_rate,
            dst_rate,
            carry: Vec::new(),
            out_interleaved: vec![0.0; out_frames * channels],
        })
    }

    pub fn src_rate(&self) -> u32 {
        self.src_rate
    }

    pub fn dst_rate(&self) -> u32 {
        self.dst_rate
    }

    /// Input frames held back for the next call.
    pub fn carried_frames(&self) -> usize {
        self.carry.len() / self.channels
    }

    /// Resample interleaved `input`. With `flush`, the carried remainder is processed too.
    pub fn process(&mut self, input: &[f32], flush: bool) -> Result<Vec<f32>> {
        self.carry.extend_from_slice(input);
        let chunk_samples = self.chunk_frames * self.channels;
        let mut out = Vec::new();

        let mut consumed = 0;
        while self.carry.len() - consumed >= chunk_samples {
            let chunk = &self.carry[consumed..consumed + chunk_samples];
            let produced = run_chunk(
                &mut self.resampler,
                &mut self.out_interleaved,
                chunk,
                self.channels,
                None,
            )?;
            out.extend_from_slice(&self.out_interleaved[..produced]);
            consumed += chunk_samples;
        }
        self.carry.drain(..consumed);

        if flush && !self.carry.is_empty() {
            let tail_frames = self.carry.len() / self.channels;
            // The resampler still expects a full chunk; the tail is zero padded.
            let mut padded = std::mem::take(&mut self.carry);
            padded.resize(chunk_samples, 0.0);
            let produced = run_chunk(
                &mut self.resampler,
                &mut self.out_interleaved,
                &padded,
                self.channels,
                Some(tail_frames),
            )?;
            out.extend_from_slice(&self.out_interleaved[..produced]);
        }
        Ok(out)
    }

    /// Forget carried input and filter history (e.g. after a seek).
    pub fn reset(&mut self) {
        self.carry.clear();
        self.resampler.reset();
    }
}

fn run_chunk(
    resampler: &mut Async<f32>,
    out_interleaved: &mut [f32],
    chunk: &[f32],
    channels: usize,
    partial_len: Option<usize>,
) -> Result<usize> {
    let frames = chunk.len() / channels;
    let input_adapter = InterleavedSlice::new(chunk, channels, frames)
        .map_err(|e| anyhow!("interleaved slice (input) error: {e}"))?;
    let out_capacity_frames = out_interleaved.len() / channels;
    let mut output_adapter =
        InterleavedSlice::new_mut(out_interleaved, channels, out_capacity_frames)
            .map_err(|e| anyhow!("interleaved slice (output) error: {e}"))?;

    let indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len,
    };
    let (_nbr_in, nbr_out) = resampler
        .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
        .map_err(|e| anyhow!("resampler process error: {e}"))?;
    Ok(nbr_out * channels)
}
