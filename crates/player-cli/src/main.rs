//! `player`: decode audio files with Symphonia and play them through CPAL.
//!
//! Files play in order. Transport commands are read from stdin (see [`cli::HELP`]) and the
//! current position is logged once per second while playing.

mod cli;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, never, select, tick, unbounded};
use playback_core::media::SymphoniaEngine;
use playback_core::output::device;
use playback_core::output::{CpalOutput, CpalOutputConfig};
use playback_core::{PlaybackState, Player};
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, Command};

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,playback_core=info,player_cli=info")
        }))
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        for d in device::list_devices(&host)? {
            let marker = if d.is_default { " (default)" } else { "" };
            println!(
                "- {}{marker}  {}-{} Hz, up to {} ch",
                d.name, d.min_rate, d.max_rate, d.max_channels
            );
        }
        return Ok(());
    }

    let config = args.playback_config();
    let output = CpalOutput::new(CpalOutputConfig {
        device: args.device.clone(),
        resample_chunk_frames: config.resample_chunk_frames,
    })
    .context("create output")?;
    let mut player = Player::new(Box::new(SymphoniaEngine::new()), Arc::new(output), config)
        .context("create player")?;
    player.set_volume(f32::from(args.volume) / 100.0);

    let (interrupt_tx, interrupt) = unbounded::<()>();
    let _ = ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    });

    eprintln!("{}", cli::HELP);
    let mut commands = spawn_stdin_reader();
    let events = player.events();
    let ticker = tick(Duration::from_secs(1));

    let mut playlist = Playlist::new(args.files.clone());
    if !playlist.start_next(&mut player, args.start) {
        tracing::info!("nothing playable");
        return Ok(());
    }

    let mut stdin_closed = false;
    loop {
        if stdin_closed {
            commands = never();
            stdin_closed = false;
        }
        select! {
            recv(events) -> event => {
                let Ok(event) = event else { break };
                if player.handle_event(event) {
                    tracing::info!("playback completed");
                    if !playlist.start_next(&mut player, None) {
                        break;
                    }
                }
            }
            recv(commands) -> cmd => {
                let Ok(cmd) = cmd else {
                    tracing::debug!("stdin closed");
                    stdin_closed = true;
                    continue;
                };
                match cmd {
                    Command::TogglePause => player.toggle_pause(),
                    Command::Seek(secs) => {
                        if let Err(e) = player.seek(secs) {
                            tracing::warn!("seek failed: {e}");
                        }
                    }
                    Command::Volume(pct) => {
                        player.set_volume(f32::from(pct) / 100.0);
                        tracing::info!(volume = pct, "volume");
                    }
                    Command::Info => println!("{}", player.status().summary()),
                    Command::Next => {
                        player.stop();
                        if !playlist.start_next(&mut player, None) {
                            break;
                        }
                    }
                    Command::Quit => break,
                }
            }
            recv(ticker) -> _ => {
                if player.state() == PlaybackState::Playing {
                    let status = player.status();
                    tracing::info!(
                        position_ms = status.elapsed_ms(),
                        duration_ms = ?status.duration_ms(),
                        underruns = status.output.underrun_events,
                        "position"
                    );
                }
            }
            recv(interrupt) -> _ => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    player.stop();
    Ok(())
}

struct Playlist {
    files: Vec<PathBuf>,
    next: usize,
}

impl Playlist {
    fn new(files: Vec<PathBuf>) -> Self {
        Self { files, next: 0 }
    }

    /// Start the next playable file. Returns `false` once the list is exhausted.
    fn start_next(&mut self, player: &mut Player, start: Option<f64>) -> bool {
        while let Some(path) = self.files.get(self.next) {
            self.next += 1;
            match player.play_from(path, start) {
                Ok(()) => return true,
                Err(e) => tracing::error!(path = %path.display(), "skipping: {e}"),
            }
        }
        false
    }
}

fn spawn_stdin_reader() -> Receiver<Command> {
    let (tx, rx) = unbounded();
    let spawned = thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match cli::parse_command(&line) {
                    Ok(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Err(msg) => eprintln!("{msg}"),
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("stdin commands unavailable: {e}");
    }
    rx
}
