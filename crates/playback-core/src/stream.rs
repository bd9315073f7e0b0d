//! Immutable facts about the selected audio stream.

use std::fmt;

/// Speaker position bits used in [`StreamDescriptor::channel_layout`].
///
/// The bit assignment follows the WAVE_FORMAT_EXTENSIBLE channel mask, which is also what
/// Symphonia's `Channels` bitflags use.
pub mod speaker {
    pub const FRONT_LEFT: u32 = 0x0000_0001;
    pub const FRONT_RIGHT: u32 = 0x0000_0002;
    pub const FRONT_CENTRE: u32 = 0x0000_0004;
    pub const LFE1: u32 = 0x0000_0008;
    pub const REAR_LEFT: u32 = 0x0000_0010;
    pub const REAR_RIGHT: u32 = 0x0000_0020;
    pub const REAR_CENTRE: u32 = 0x0000_0100;
    pub const SIDE_LEFT: u32 = 0x0000_0200;
    pub const SIDE_RIGHT: u32 = 0x0000_0400;
}

/// Default channel layout for a channel count, used when the container reports none.
pub fn default_channel_layout(channels: usize) -> u32 {
    use speaker::*;
    match channels {
        0 => 0,
        1 => FRONT_CENTRE,
        2 => FRONT_LEFT | FRONT_RIGHT,
        3 => FRONT_LEFT | FRONT_RIGHT | FRONT_CENTRE,
        4 => FRONT_LEFT | FRONT_RIGHT | REAR_LEFT | REAR_RIGHT,
        5 => FRONT_LEFT | FRONT_RIGHT | FRONT_CENTRE | REAR_LEFT | REAR_RIGHT,
        6 => FRONT_LEFT | FRONT_RIGHT | FRONT_CENTRE | LFE1 | REAR_LEFT | REAR_RIGHT,
        7 => {
            FRONT_LEFT | FRONT_RIGHT | FRONT_CENTRE | LFE1 | REAR_CENTRE | SIDE_LEFT | SIDE_RIGHT
        }
        8 => {
            FRONT_LEFT
                | FRONT_RIGHT
                | FRONT_CENTRE
                | LFE1
                | REAR_LEFT
                | REAR_RIGHT
                | SIDE_LEFT
                | SIDE_RIGHT
        }
        n if n >= 32 => u32::MAX,
        n => (1u32 << n) - 1,
    }
}

/// Numeric representation of a sample in the source stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleKind {
    Unsigned,
    Signed,
    Float,
}

/// Source sample format: kind, byte width and whether channels are stored planar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleFormat {
    pub kind: SampleKind,
    pub bytes: u8,
    pub planar: bool,
}

impl SampleFormat {
    pub const F32_PLANAR: SampleFormat = SampleFormat {
        kind: SampleKind::Float,
        bytes: 4,
        planar: true,
    };

    pub fn is_interleaved(&self) -> bool {
        !self.planar
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self::F32_PLANAR
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            SampleKind::Unsigned => "u",
            SampleKind::Signed => "s",
            SampleKind::Float => "f",
        };
        let layout = if self.planar { "planar" } else { "interleaved" };
        write!(f, "{kind}{} ({layout})", u32::from(self.bytes) * 8)
    }
}

/// Rational unit in which a stream's timestamps are expressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeBase {
    pub numer: u32,
    pub denom: u32,
}

impl TimeBase {
    pub fn new(numer: u32, denom: u32) -> Self {
        Self { numer, denom }
    }

    /// One tick per sample.
    pub fn per_sample(sample_rate: u32) -> Self {
        Self::new(1, sample_rate.max(1))
    }

    pub fn ratio(&self) -> f64 {
        if self.denom == 0 {
            return 0.0;
        }
        f64::from(self.numer) / f64::from(self.denom)
    }

    pub fn to_seconds(&self, ts: i64) -> f64 {
        ts as f64 * self.ratio()
    }

    pub fn from_seconds(&self, seconds: f64) -> i64 {
        let ratio = self.ratio();
        if ratio == 0.0 {
            return 0;
        }
        (seconds / ratio).round() as i64
    }
}

/// Facts about the audio stream of one playback session.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamDescriptor {
    /// Sample rate in Hz, always > 0.
    pub sample_rate: u32,
    /// Channel count, always >= 1.
    pub channels: usize,
    /// Speaker bitmask; never zero once constructed through [`StreamDescriptor::new`].
    pub channel_layout: u32,
    pub sample_format: SampleFormat,
    pub time_base: TimeBase,
    /// Duration in seconds, when the container reports one.
    pub duration_seconds: Option<f64>,
    /// Total frame count (samples per channel), when known.
    pub total_frames: Option<u64>,
    pub codec: Option<String>,
    pub bit_depth: Option<u16>,
}

impl StreamDescriptor {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        let channels = channels.max(1);
        Self {
            sample_rate: sample_rate.max(1),
            channels,
            channel_layout: default_channel_layout(channels),
            sample_format: SampleFormat::default(),
            time_base: TimeBase::per_sample(sample_rate),
            duration_seconds: None,
            total_frames: None,
            codec: None,
            bit_depth: None,
        }
    }

    /// Replace a zero layout (as reported by e.g. some WAV files) with the default one.
    pub fn with_channel_layout(mut self, layout: u32) -> Self {
        self.channel_layout = if layout == 0 {
            default_channel_layout(self.channels)
        } else {
            layout
        };
        self
    }

    pub fn with_time_base(mut self, time_base: TimeBase) -> Self {
        self.time_base = time_base;
        self
    }

    /// Stream duration expressed in time-base units.
    pub fn with_duration_ts(mut self, duration_ts: u64) -> Self {
        self.duration_seconds = Some(self.time_base.to_seconds(duration_ts as i64));
        self
    }

    /// Record the frame count; derives the duration when the container gave none.
    pub fn with_total_frames(mut self, frames: u64) -> Self {
        self.total_frames = Some(frames);
        if self.duration_seconds.is_none() {
            self.duration_seconds = Some(frames as f64 / f64::from(self.sample_rate));
        }
        self
    }

    /// Samples per second across all channels; drives buffer sizing.
    pub fn effective_rate(&self) -> u64 {
        u64::from(self.sample_rate) * self.channels as u64
    }

    pub fn seconds_to_samples(&self, seconds: f64) -> usize {
        if !seconds.is_finite() || seconds <= 0.0 {
            return 0;
        }
        (seconds * f64::from(self.sample_rate)).round() as usize
    }

    pub fn samples_to_seconds(&self, samples: usize) -> f64 {
        samples as f64 / f64::from(self.sample_rate)
    }
}
