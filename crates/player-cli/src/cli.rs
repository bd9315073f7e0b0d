//! Command-line interface definitions and the stdin command grammar.

use std::path::PathBuf;

use clap::Parser;
use playback_core::PlaybackConfig;

#[derive(Parser, Debug)]
#[command(name = "player", about = "Decode and play audio files through CPAL")]
pub struct Args {
    /// Audio files to play in order
    #[arg(required_unless_present = "list_devices")]
    pub files: Vec<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Start the first file at this position (seconds)
    #[arg(long)]
    pub start: Option<f64>,

    /// Initial volume in percent (0-100)
    #[arg(long, default_value_t = 100)]
    pub volume: u8,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Largest accepted gap between a seek target and the audio actually played (ms)
    #[arg(long, default_value_t = 10.0)]
    pub seek_tolerance_ms: f64,

    /// Packets read forward at most while refining a seek
    #[arg(long, default_value_t = 4096)]
    pub max_correction_packets: usize,
}

impl Args {
    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            seek_tolerance_seconds: self.seek_tolerance_ms.max(0.0) / 1000.0,
            max_correction_packets: self.max_correction_packets.max(1),
            resample_chunk_frames: self.chunk_frames.max(1),
            ..PlaybackConfig::default()
        }
    }
}

/// One line typed on stdin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    TogglePause,
    Seek(f64),
    Volume(u8),
    Info,
    Next,
    Quit,
}

pub const HELP: &str =
    "commands: p (pause/resume), s SECS (seek), v PCT (volume), i (info), n (next), q (quit)";

pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Err(HELP.to_string());
    };
    let arg = parts.next();
    if parts.next().is_some() {
        return Err(format!("too many arguments for '{verb}'"));
    }
    match (verb, arg) {
        ("p", None) => Ok(Command::TogglePause),
        ("i", None) => Ok(Command::Info),
        ("n", None) => Ok(Command::Next),
        ("q", None) => Ok(Command::Quit),
        ("s", Some(secs)) => secs
            .parse::<f64>()
            .ok()
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Command::Seek)
            .ok_or_else(|| format!("invalid seek position: {secs}")),
        ("v", Some(pct)) => pct
            .parse::<u8>()
            .ok()
            .filter(|p| *p <= 100)
            .map(Command::Volume)
            .ok_or_else(|| format!("invalid volume: {pct}")),
        _ => Err(HELP.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transport_commands() {
        assert_eq!(parse_command("p"), Ok(Command::TogglePause));
        assert_eq!(parse_command("  q  "), Ok(Command::Quit));
        assert_eq!(parse_command("s 42.5"), Ok(Command::Seek(42.5)));
        assert_eq!(parse_command("v 30"), Ok(Command::Volume(30)));
        assert_eq!(parse_command("n"), Ok(Command::Next));
        assert_eq!(parse_command("i"), Ok(Command::Info));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_command("s -1").is_err());
        assert!(parse_command("s abc").is_err());
        assert!(parse_command("v 101").is_err());
        assert!(parse_command("p now").is_err());
        assert!(parse_command("s").is_err());
        assert_eq!(parse_command(""), Err(HELP.to_string()));
    }

    #[test]
    fn args_map_to_playback_config() {
        let args = Args::parse_from([
            "player",
            "--seek-tolerance-ms",
            "25",
            "--chunk-frames",
            "512",
            "a.flac",
        ]);
        let cfg = args.playback_config();
        assert_eq!(cfg.seek_tolerance_seconds, 0.025);
        assert_eq!(cfg.resample_chunk_frames, 512);
        assert_eq!(args.files, vec![PathBuf::from("a.flac")]);
        assert_eq!(args.volume, 100);
    }

    #[test]
    fn list_devices_needs_no_files() {
        let args = Args::parse_from(["player", "--list-devices"]);
        assert!(args.list_devices);
        assert!(args.files.is_empty());
    }
}
