//! Output device discovery and stream config selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing the stream config that best matches a source stream

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle` (case-insensitive), or the host
/// default device when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    let devices = host.output_devices().context("No output devices")?;
    for device in devices {
        let Ok(description) = device.description() else {
            continue;
        };
        if matches_device_name(&description.name(), needle) {
            return Ok(device);
        }
    }
    Err(anyhow!("No output device matched: {needle}"))
}

/// Choose the output config for a stream of `target_rate` Hz with `target_channels` channels.
///
/// Preference order: a range containing `target_rate` (no resampling), then the lowest rate
/// above it, then the highest rate below it. Ties go to the matching channel count and then to
/// the better sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
    target_channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(RateFit, u8, u8, cpal::SupportedStreamConfig)> = None;

    for range in device.supported_output_configs()? {
        let (fit, rate) = fit_rate(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let ch_rank = channel_rank(range.channels(), target_channels);
        let fmt_rank = sample_format_rank(range.sample_format());
        let better = match &best {
            None => true,
            Some((b_fit, b_ch, b_fmt, _)) => (fit, ch_rank, fmt_rank) < (*b_fit, *b_ch, *b_fmt),
        };
        if better {
            best = Some((fit, ch_rank, fmt_rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(.., cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Pick a stream buffer size, preferring larger values to reduce underruns.
///
/// Returns `None` when the device only reports the default buffer size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(clamp_buffer_frames(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Output device metadata for `--list-devices`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub min_rate: u32,
    pub max_rate: u32,
    pub max_channels: u16,
    pub is_default: bool,
}

pub fn list_devices(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|d| d.name().to_string());

    let mut out = Vec::new();
    for device in host.output_devices().context("No output devices")? {
        let name = match device.description() {
            Ok(d) => d.name().to_string(),
            Err(e) => {
                tracing::warn!("skipping output device without a description: {e}");
                continue;
            }
        };
        let mut min_rate = u32::MAX;
        let mut max_rate = 0u32;
        let mut max_channels = 0u16;
        if let Ok(ranges) = device.supported_output_configs() {
            for r in ranges {
                min_rate = min_rate.min(r.min_sample_rate());
                max_rate = max_rate.max(r.max_sample_rate());
                max_channels = max_channels.max(r.channels());
            }
        }
        if max_rate == 0 {
            if let Ok(cfg) = device.default_output_config() {
                min_rate = cfg.sample_rate();
                max_rate = cfg.sample_rate();
                max_channels = cfg.channels();
            } else {
                min_rate = 0;
            }
        }
        let is_default = default_name.as_deref() == Some(name.as_str());
        out.push(DeviceInfo {
            name,
            min_rate,
            max_rate,
            max_channels,
            is_default,
        });
    }
    Ok(out)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum RateFit {
    Exact,
    Above(u32),
    /// Stored as distance below the target so that smaller is better.
    Below(u32),
}

fn fit_rate(min: u32, max: u32, target: u32) -> (RateFit, u32) {
    if (min..=max).contains(&target) {
        (RateFit::Exact, target)
    } else if min > target {
        (RateFit::Above(min - target), min)
    } else {
        (RateFit::Below(target - max), max)
    }
}

fn channel_rank(channels: u16, target: u16) -> u8 {
    if channels == target {
        0
    } else if channels == 2 {
        1
    } else if channels > target {
        2
    } else {
        3
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn clamp_buffer_frames(min: u32, max: u32) -> u32 {
    const MAX_FRAMES: u32 = 16_384;
    max.min(MAX_FRAMES).max(min)
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
