use std::path::PathBuf;

use crate::output::OutputStats;
use crate::player::{PlaybackSession, PlaybackState};

/// Point-in-time view of the player for status displays.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerStatus {
    pub state: PlaybackState,
    /// File currently loaded.
    pub path: Option<PathBuf>,
    /// Position of the audio currently heard, in seconds.
    pub position_seconds: f64,
    /// Total duration in seconds when known.
    pub duration_seconds: Option<f64>,
    /// Source sample rate in Hz.
    pub sample_rate: Option<u32>,
    pub channels: Option<usize>,
    /// Source codec name (for example, FLAC/MP3).
    pub codec: Option<String>,
    /// Source bit depth when available.
    pub bit_depth: Option<u16>,
    /// Source sample format, e.g. `s16 (planar)`.
    pub sample_format: Option<String>,
    pub volume: f32,
    /// Device-side counters (rate, underruns, queue depth).
    pub output: OutputStats,
}

impl PlayerStatus {
    pub fn capture(
        state: PlaybackState,
        session: Option<&PlaybackSession>,
        position_seconds: f64,
        volume: f32,
        output: OutputStats,
    ) -> Self {
        let d = session.map(|s| &s.descriptor);
        Self {
            state,
            path: session.map(|s| s.path.clone()),
            position_seconds,
            duration_seconds: d.and_then(|d| d.duration_seconds),
            sample_rate: d.map(|d| d.sample_rate),
            channels: d.map(|d| d.channels),
            codec: d.and_then(|d| d.codec.clone()),
            bit_depth: d.and_then(|d| d.bit_depth),
            sample_format: d.map(|d| d.sample_format.to_string()),
            volume,
            output,
        }
    }

    /// Elapsed position in milliseconds, clamped to the duration when known.
    pub fn elapsed_ms(&self) -> u64 {
        let mut position = self.position_seconds.max(0.0);
        if let Some(duration) = self.duration_seconds {
            position = position.min(duration);
        }
        (position * 1000.0).round() as u64
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_seconds.map(|d| (d.max(0.0) * 1000.0).round() as u64)
    }

    /// One-line human readable summary for CLI output.
    pub fn summary(&self) -> String {
        let state = match self.state {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        let mut out = format!("[{state}] {}", format_clock(self.elapsed_ms()));
        if let Some(total) = self.duration_ms() {
            out.push_str(&format!(" / {}", format_clock(total)));
        }
        if let Some(path) = &self.path {
            out.push_str(&format!("  {}", path.display()));
        }
        if let (Some(rate), Some(ch)) = (self.sample_rate, self.channels) {
            out.push_str(&format!(
                "  ({} {} Hz, {} ch)",
                self.codec.as_deref().unwrap_or("?"),
                rate,
                ch
            ));
        }
        out.push_str(&format!("  vol {:.0}%", self.volume * 100.0));
        if self.output.underrun_events > 0 {
            out.push_str(&format!("  underruns {}", self.output.underrun_events));
        }
        out
    }
}

fn format_clock(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamDescriptor;

    fn session() -> PlaybackSession {
        let mut descriptor = StreamDescriptor::new(48_000, 2).with_total_frames(9_600_000);
        descriptor.codec = Some("FLAC".to_string());
        descriptor.bit_depth = Some(24);
        PlaybackSession {
            id: 1,
            path: PathBuf::from("/music/track.flac"),
            descriptor,
        }
    }

    #[test]
    fn capture_reports_stream_facts() {
        let s = session();
        let status = PlayerStatus::capture(
            PlaybackState::Playing,
            Some(&s),
            12.5,
            0.8,
            OutputStats::default(),
        );
        assert_eq!(status.elapsed_ms(), 12_500);
        assert_eq!(status.duration_ms(), Some(200_000));
        assert_eq!(status.codec.as_deref(), Some("FLAC"));
        assert_eq!(status.bit_depth, Some(24));
        assert_eq!(status.sample_format.as_deref(), Some("f32 (planar)"));
    }

    #[test]
    fn elapsed_is_clamped_to_duration() {
        let s = session();
        let status = PlayerStatus::capture(
            PlaybackState::Paused,
            Some(&s),
            250.0,
            1.0,
            OutputStats::default(),
        );
        assert_eq!(status.elapsed_ms(), 200_000);
    }

    #[test]
    fn summary_without_session() {
        let status = PlayerStatus::capture(
            PlaybackState::Stopped,
            None,
            0.0,
            0.5,
            OutputStats {
                underrun_events: 3,
                ..OutputStats::default()
            },
        );
        assert_eq!(status.summary(), "[stopped] 0:00  vol 50%  underruns 3");
    }

    #[test]
    fn summary_with_session() {
        let s = session();
        let status = PlayerStatus::capture(
            PlaybackState::Playing,
            Some(&s),
            65.0,
            1.0,
            OutputStats::default(),
        );
        assert_eq!(
            status.summary(),
            "[playing] 1:05 / 3:20  /music/track.flac  (FLAC 48000 Hz, 2 ch)  vol 100%"
        );
    }
}
