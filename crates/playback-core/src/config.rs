use crate::stream::StreamDescriptor;

/// Buffer durations for streams whose effective rate (sample rate × channels) is below
/// `max_effective_rate`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferTier {
    /// Exclusive upper bound; `None` for the last tier.
    pub max_effective_rate: Option<u64>,
    /// Seconds decoded synchronously before playback starts.
    pub immediate_seconds: f64,
    /// Seconds decoded per background buffer.
    pub deferred_seconds: f64,
}

/// Playback tuning parameters shared by the decoder, scheduler and output stages.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Ordered by `max_effective_rate`; the first matching tier wins.
    pub tiers: Vec<BufferTier>,
    /// Largest tolerated gap between a seek target and where playback actually begins.
    pub seek_tolerance_seconds: f64,
    /// Upper bound on packets read forward while correcting a coarse seek.
    pub max_correction_packets: usize,
    /// Consecutive non-EOF packet read failures after which the stream is treated as ended.
    pub max_consecutive_read_errors: usize,
    /// Resampler chunk size in frames (only used when the device rate differs).
    pub resample_chunk_frames: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                // 44.1 / 48 kHz stereo
                BufferTier {
                    max_effective_rate: Some(100_000),
                    immediate_seconds: 5.0,
                    deferred_seconds: 10.0,
                },
                // 96 / 192 kHz stereo
                BufferTier {
                    max_effective_rate: Some(500_000),
                    immediate_seconds: 3.0,
                    deferred_seconds: 10.0,
                },
                // high-rate surround
                BufferTier {
                    max_effective_rate: None,
                    immediate_seconds: 2.0,
                    deferred_seconds: 7.0,
                },
            ],
            seek_tolerance_seconds: 0.01,
            max_correction_packets: 4096,
            max_consecutive_read_errors: 32,
            resample_chunk_frames: 1024,
        }
    }
}

/// Buffer sizes, in samples per channel, for one playback session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferTargets {
    pub immediate: usize,
    pub deferred: usize,
}

impl BufferTargets {
    /// Pick the tier for the stream's effective rate and convert its durations to samples.
    ///
    /// Denser streams take longer to decode per second of audio, so they front-load less.
    pub fn for_stream(descriptor: &StreamDescriptor, config: &PlaybackConfig) -> Self {
        let rate = descriptor.effective_rate();
        let tier = config
            .tiers
            .iter()
            .find(|t| t.max_effective_rate.is_none_or(|max| rate < max))
            .or(config.tiers.last());
        let Some(tier) = tier else {
            let one_second = descriptor.seconds_to_samples(1.0);
            return Self {
                immediate: one_second,
                deferred: one_second,
            };
        };
        Self {
            immediate: descriptor.seconds_to_samples(tier.immediate_seconds).max(1),
            deferred: descriptor.seconds_to_samples(tier.deferred_seconds).max(1),
        }
    }
}
