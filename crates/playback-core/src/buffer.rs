//! Assembly of decoded frames into buffers for the output device.

use crate::frame::DecodedFrame;
use crate::stream::StreamDescriptor;

/// PCM handed to an [`crate::output::OutputDevice`]: channel-major `f32` samples.
#[derive(Clone, Debug, PartialEq)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: usize,
    /// Samples per channel.
    pub frames: usize,
    /// `channels * frames` samples, channel 0 first.
    pub data: Vec<f32>,
    /// Last buffer of the file.
    pub terminal: bool,
}

impl PcmBuffer {
    pub fn channel(&self, ch: usize) -> &[f32] {
        if ch >= self.channels {
            return &[];
        }
        &self.data[ch * self.frames..(ch + 1) * self.frames]
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames as f64 / f64::from(self.sample_rate.max(1))
    }

    /// Interleave into `frame0[ch0], frame0[ch1], ...` order.
    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.data.len());
        for i in 0..self.frames {
            for ch in 0..self.channels {
                out.push(self.data[ch * self.frames + i]);
            }
        }
        out
    }
}

/// Accumulates frames up to a target sample count.
///
/// Samples are copied out of each accepted frame (honoring its truncation window) so the frame
/// can be released right away.
#[derive(Debug)]
pub struct PlaybackBuffer {
    descriptor: StreamDescriptor,
    max_sample_count: usize,
    sample_count: usize,
    frame_count: usize,
    channels: Vec<Vec<f32>>,
    first_frame_start: Option<f64>,
    terminal: bool,
}

impl PlaybackBuffer {
    pub fn new(descriptor: &StreamDescriptor, max_sample_count: usize) -> Self {
        Self {
            descriptor: descriptor.clone(),
            max_sample_count,
            sample_count: 0,
            frame_count: 0,
            channels: vec![Vec::new(); descriptor.channels],
            first_frame_start: None,
            terminal: false,
        }
    }

    pub fn max_sample_count(&self) -> usize {
        self.max_sample_count
    }

    /// Accumulated samples per channel.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn is_full(&self) -> bool {
        self.sample_count >= self.max_sample_count
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Whether `frame` fits without exceeding the cap.
    pub fn has_room_for(&self, frame: &DecodedFrame) -> bool {
        self.sample_count + frame.sample_count() <= self.max_sample_count
    }

    /// Append `frame` unless it would push the buffer past its cap.
    ///
    /// Returns `false` and leaves the buffer untouched when the frame is rejected.
    pub fn append_frame(&mut self, frame: &DecodedFrame) -> bool {
        if !self.has_room_for(frame) {
            return false;
        }
        self.copy_in(frame);
        true
    }

    /// Append end-of-stream frames regardless of the cap and mark the buffer terminal.
    pub fn append_terminal_frames(&mut self, frames: &[DecodedFrame]) {
        for frame in frames {
            self.copy_in(frame);
        }
        self.terminal = true;
    }

    /// Seconds timestamp of the first accumulated sample.
    pub fn start_seconds(&self) -> Option<f64> {
        self.first_frame_start
    }

    /// Lay the accumulated samples out for the output device. `None` when nothing was accepted.
    pub fn to_output_format(self) -> Option<PcmBuffer> {
        if self.sample_count == 0 {
            return None;
        }
        let channels = self.channels.len();
        let mut data = Vec::with_capacity(self.sample_count * channels);
        for ch in self.channels {
            data.extend_from_slice(&ch);
        }
        Some(PcmBuffer {
            sample_rate: self.descriptor.sample_rate,
            channels,
            frames: self.sample_count,
            data,
            terminal: self.terminal,
        })
    }

    fn copy_in(&mut self, frame: &DecodedFrame) {
        let count = frame.sample_count();
        if count == 0 {
            return;
        }
        if self.first_frame_start.is_none() {
            self.first_frame_start = Some(
                frame.start_seconds(self.descriptor.time_base, self.descriptor.sample_rate),
            );
        }
        for (ch, dst) in self.channels.iter_mut().enumerate() {
            let src = frame.channel(ch);
            if src.len() == count {
                dst.extend_from_slice(src);
            } else {
                // Codec emitted fewer channels than the stream declares; keep lengths aligned.
                dst.resize(dst.len() + count, 0.0);
            }
        }
        self.sample_count += count;
        self.frame_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> StreamDescriptor {
        StreamDescriptor::new(1000, 2)
    }

    fn frame(pts: i64, samples: usize, value: f32) -> DecodedFrame {
        let mut data = vec![value; samples];
        data.extend(std::iter::repeat_n(-value, samples));
        DecodedFrame::new(2, data, pts)
    }

    #[test]
    fn append_never_exceeds_capacity() {
        let mut buf = PlaybackBuffer::new(&descriptor(), 100);
        let sizes = [30, 50, 25, 10, 20, 5, 5, 1];
        for (i, n) in sizes.iter().enumerate() {
            let before = buf.sample_count();
            let accepted = buf.append_frame(&frame(i as i64, *n, 1.0));
            assert!(buf.sample_count() <= buf.max_sample_count());
            if !accepted {
                assert_eq!(buf.sample_count(), before);
            }
        }
        assert_eq!(buf.sample_count(), 100);
        assert!(buf.is_full());
    }

    #[test]
    fn terminal_frames_ignore_capacity() {
        let mut buf = PlaybackBuffer::new(&descriptor(), 10);
        assert!(buf.append_frame(&frame(0, 8, 1.0)));
        buf.append_terminal_frames(&[frame(8, 8, 1.0), frame(16, 3, 1.0)]);
        assert_eq!(buf.sample_count(), 19);
        assert!(buf.is_terminal());
        let pcm = buf.to_output_format().unwrap();
        assert!(pcm.terminal);
        assert_eq!(pcm.frames, 19);
    }

    #[test]
    fn output_is_channel_major_in_arrival_order() {
        let mut buf = PlaybackBuffer::new(&descriptor(), 100);
        assert!(buf.append_frame(&frame(0, 2, 1.0)));
        assert!(buf.append_frame(&frame(2, 1, 2.0)));
        let pcm = buf.to_output_format().unwrap();
        assert_eq!(pcm.channel(0), &[1.0, 1.0, 2.0]);
        assert_eq!(pcm.channel(1), &[-1.0, -1.0, -2.0]);
        assert_eq!(pcm.to_interleaved(), vec![1.0, -1.0, 1.0, -1.0, 2.0, -2.0]);
    }

    #[test]
    fn truncation_window_is_honored() {
        let data: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let mut f = DecodedFrame::new(2, data, 0);
        f.skip_head(1);
        f.keep_first(2);
        let mut buf = PlaybackBuffer::new(&descriptor(), 100);
        assert!(buf.append_frame(&f));
        let pcm = buf.to_output_format().unwrap();
        assert_eq!(pcm.channel(0), &[1.0, 2.0]);
        assert_eq!(pcm.channel(1), &[5.0, 6.0]);
    }

    #[test]
    fn empty_buffer_has_no_output() {
        let buf = PlaybackBuffer::new(&descriptor(), 100);
        assert!(buf.is_empty());
        assert!(buf.to_output_format().is_none());
    }

    #[test]
    fn start_seconds_comes_from_first_frame() {
        let mut buf = PlaybackBuffer::new(&descriptor(), 100);
        let mut f = frame(500, 10, 1.0);
        f.skip_head(5);
        assert!(buf.append_frame(&f));
        assert!(buf.append_frame(&frame(510, 10, 1.0)));
        assert_eq!(buf.start_seconds(), Some(0.505));
    }
}
