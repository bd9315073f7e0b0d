//! Output device contract and the CPAL implementation.
//!
//! The scheduler hands every assembled [`PcmBuffer`] to an [`OutputDevice`] together with a
//! completion handler. Devices play buffers strictly in submission order and invoke each
//! handler once its buffer has been fully played.

pub mod cpal_output;
pub mod device;
pub mod resample;

use anyhow::Result;

use crate::buffer::PcmBuffer;
use crate::stream::StreamDescriptor;

pub use self::cpal_output::{CpalOutput, CpalOutputConfig};

/// Invoked once the associated buffer has finished playing. Never called on the audio thread.
pub type CompletionHandler = Box<dyn FnOnce() + Send + 'static>;

/// Counters reported by an output device.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OutputStats {
    pub device: Option<String>,
    /// Rate the device actually runs at.
    pub device_sample_rate: Option<u32>,
    pub device_channels: Option<u16>,
    pub sample_format: Option<String>,
    pub resampling: bool,
    /// Frames handed to the device since the last `seek_to`/`prepare`.
    pub played_frames: u64,
    pub queued_buffers: usize,
    /// Frames emitted as silence because no audio was ready.
    pub underrun_frames: u64,
    /// Number of underrun incidents.
    pub underrun_events: u64,
}

/// Sink for scheduled PCM buffers.
pub trait OutputDevice: Send + Sync {
    /// Configure the device for a new stream. Drops anything still queued.
    fn prepare(&self, descriptor: &StreamDescriptor) -> Result<()>;

    /// Queue `buffer` after everything already submitted.
    fn submit(&self, buffer: PcmBuffer, on_complete: CompletionHandler);

    fn play(&self);

    fn pause(&self);

    /// Drop queued buffers. Their completion handlers are never invoked.
    fn stop(&self);

    fn is_playing(&self) -> bool;

    /// Rebase the reported position, e.g. after a seek.
    fn seek_to(&self, seconds: f64);

    /// Stream position of the audio currently heard, in seconds.
    fn position_seconds(&self) -> f64;

    fn set_volume(&self, volume: f32);

    fn volume(&self) -> f32;

    fn stats(&self) -> OutputStats;
}
