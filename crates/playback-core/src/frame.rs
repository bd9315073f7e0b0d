//! Decoded PCM frames.

use crate::stream::TimeBase;

/// Portion of a frame that survives seek correction.
///
/// Only `[first_sample_index, first_sample_index + truncated_sample_count)` is played.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TruncationWindow {
    pub first_sample_index: usize,
    pub truncated_sample_count: usize,
}

/// One unit of raw PCM produced by the codec.
///
/// Samples are stored channel-major as `f32`: all samples of channel 0, then channel 1, ...
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    data: Vec<f32>,
    channels: usize,
    frames: usize,
    pts: i64,
    window: Option<TruncationWindow>,
}

impl DecodedFrame {
    /// Build a frame from channel-major samples. A trailing partial channel is ignored.
    pub fn new(channels: usize, data: Vec<f32>, pts: i64) -> Self {
        let channels = channels.max(1);
        let frames = data.len() / channels;
        let mut data = data;
        data.truncate(frames * channels);
        Self {
            data,
            channels,
            frames,
            pts,
            window: None,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Presentation timestamp of the first (untruncated) sample, in time-base units.
    pub fn pts(&self) -> i64 {
        self.pts
    }

    /// Samples per channel as produced by the codec.
    pub fn actual_sample_count(&self) -> usize {
        self.frames
    }

    /// Samples per channel that will be played.
    pub fn sample_count(&self) -> usize {
        self.window
            .map(|w| w.truncated_sample_count)
            .unwrap_or(self.frames)
    }

    pub fn first_sample_index(&self) -> usize {
        self.window.map(|w| w.first_sample_index).unwrap_or(0)
    }

    pub fn window(&self) -> Option<TruncationWindow> {
        self.window
    }

    /// Keep only the first `count` playable samples.
    pub fn keep_first(&mut self, count: usize) {
        if count < self.sample_count() {
            self.window = Some(TruncationWindow {
                first_sample_index: self.first_sample_index(),
                truncated_sample_count: count,
            });
        }
    }

    /// Keep only the last `count` playable samples.
    pub fn keep_last(&mut self, count: usize) {
        let current = self.sample_count();
        if count < current {
            self.window = Some(TruncationWindow {
                first_sample_index: self.first_sample_index() + (current - count),
                truncated_sample_count: count,
            });
        }
    }

    /// Drop `count` samples from the head of the playable window.
    pub fn skip_head(&mut self, count: usize) {
        let keep = self.sample_count().saturating_sub(count);
        self.keep_last(keep);
    }

    /// Playable samples of one channel.
    pub fn channel(&self, ch: usize) -> &[f32] {
        if ch >= self.channels {
            return &[];
        }
        let base = ch * self.frames;
        let start = base + self.first_sample_index();
        &self.data[start..start + self.sample_count()]
    }

    /// Timestamp, in seconds, of the first playable sample.
    pub fn start_seconds(&self, time_base: TimeBase, sample_rate: u32) -> f64 {
        let offset = self.first_sample_index() as f64 / f64::from(sample_rate.max(1));
        time_base.to_seconds(self.pts) + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(channels: usize, frames: usize) -> DecodedFrame {
        let data = (0..channels * frames).map(|i| i as f32).collect();
        DecodedFrame::new(channels, data, 0)
    }

    #[test]
    fn untruncated_frame_exposes_every_sample() {
        let f = ramp(2, 4);
        assert_eq!(f.sample_count(), 4);
        assert_eq!(f.channel(0), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(f.channel(1), &[4.0, 5.0, 6.0, 7.0]);
        assert!(f.channel(2).is_empty());
        assert!(f.window().is_none());
    }

    #[test]
    fn keep_last_trims_head_per_channel() {
        let mut f = ramp(2, 4);
        f.keep_last(3);
        assert_eq!(f.sample_count(), 3);
        assert_eq!(f.first_sample_index(), 1);
        assert_eq!(f.channel(0), &[1.0, 2.0, 3.0]);
        assert_eq!(f.channel(1), &[5.0, 6.0, 7.0]);
        assert!(f.sample_count() <= f.actual_sample_count());
    }

    #[test]
    fn truncations_compose() {
        let mut f = ramp(1, 10);
        f.skip_head(2);
        f.keep_first(5);
        f.skip_head(1);
        assert_eq!(f.channel(0), &[3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn keep_more_than_available_is_a_no_op() {
        let mut f = ramp(1, 4);
        f.keep_last(10);
        f.keep_first(4);
        assert!(f.window().is_none());
        f.skip_head(10);
        assert_eq!(f.sample_count(), 0);
    }

    #[test]
    fn start_seconds_accounts_for_window() {
        let mut f = DecodedFrame::new(1, vec![0.0; 1000], 44_100);
        f.skip_head(441);
        let start = f.start_seconds(TimeBase::per_sample(44_100), 44_100);
        assert!((start - 1.01).abs() < 1e-9);
    }
}
