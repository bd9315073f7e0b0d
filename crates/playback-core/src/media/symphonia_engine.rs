//! Media engine backed by Symphonia.
//!
//! Uses Symphonia to:
//! - probe the input container and pick the audio track
//! - read packets and decode them into channel-major `f32` frames
//! - perform coarse seeks (sample-accurate for raw PCM)

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, CodecType, DecoderOptions};
use symphonia::core::errors::{Error as SymphoniaError, SeekErrorKind};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::error::{DecoderError, DecoderInitializationError, OpenError, PacketReadError, SeekError};
use crate::frame::DecodedFrame;
use crate::media::{MediaEngine, MediaSession, Packet};
use crate::stream::{SampleFormat, SampleKind, StreamDescriptor, TimeBase};

/// Opens local files with Symphonia's default probe and codec registry.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaEngine;

impl SymphoniaEngine {
    pub fn new() -> Self {
        Self
    }
}

impl MediaEngine for SymphoniaEngine {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSession>, OpenError> {
        Ok(Box::new(SymphoniaSession::open(path)?))
    }
}

/// One opened file: container reader plus (once opened) the codec for its audio track.
///
/// Field order matters: the codec is dropped before the container it reads from.
pub struct SymphoniaSession {
    decoder: Option<Box<dyn symphonia::core::codecs::Decoder>>,
    format: Option<Box<dyn FormatReader>>,
    codec_params: CodecParameters,
    track_id: u32,
    descriptor: StreamDescriptor,
    raw: bool,
    closed: bool,
}

impl SymphoniaSession {
    pub fn open(path: &Path) -> Result<Self, OpenError> {
        let file = File::open(path).map_err(|source| OpenError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| OpenError::Unsupported(e.to_string()))?;

        let format = probed.format;
        let track = format
            .default_track()
            .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .or_else(|| {
                format
                    .tracks()
                    .iter()
                    .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            })
            .ok_or(OpenError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let descriptor = descriptor_from_params(&codec_params)?;
        let raw = is_raw_pcm(codec_params.codec);

        tracing::info!(
            path = %path.display(),
            track_id,
            codec = descriptor.codec.as_deref().unwrap_or("unknown"),
            sample_rate = descriptor.sample_rate,
            channels = descriptor.channels,
            sample_format = %descriptor.sample_format,
            duration_s = descriptor.duration_seconds.unwrap_or(0.0),
            raw,
            "opened media"
        );

        Ok(Self {
            decoder: None,
            format: Some(format),
            codec_params,
            track_id,
            descriptor,
            raw,
            closed: false,
        })
    }

    fn to_symphonia_packet(&self, packet: &Packet) -> symphonia::core::formats::Packet {
        symphonia::core::formats::Packet::new_from_boxed_slice(
            packet.stream_index,
            packet.pts.max(0) as u64,
            packet.duration,
            packet.data.clone(),
        )
    }
}

impl MediaSession for SymphoniaSession {
    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    fn is_raw(&self) -> bool {
        self.raw
    }

    fn open_codec(&mut self) -> Result<(), DecoderInitializationError> {
        if self.closed {
            return Err(DecoderInitializationError::new("session already closed"));
        }
        let decoder = symphonia::default::get_codecs()
            .make(&self.codec_params, &DecoderOptions::default())
            .map_err(|e| DecoderInitializationError::new(e.to_string()))?;
        self.decoder = Some(decoder);
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, PacketReadError> {
        let format = self
            .format
            .as_mut()
            .ok_or_else(|| PacketReadError::Failed("session closed".into()))?;
        match format.next_packet() {
            Ok(packet) if packet.track_id() != self.track_id => Ok(None),
            Ok(packet) => Ok(Some(Packet {
                stream_index: packet.track_id(),
                pts: packet.ts() as i64,
                duration: packet.dur(),
                data: packet.data,
            })),
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(PacketReadError::EndOfStream)
            }
            Err(e) => Err(PacketReadError::Failed(e.to_string())),
        }
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<DecodedFrame>, DecoderError> {
        let pkt = self.to_symphonia_packet(packet);
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| DecoderError::Codec("codec not open".into()))?;
        match decoder.decode(&pkt) {
            Ok(decoded) => {
                if decoded.frames() == 0 {
                    return Ok(Vec::new());
                }
                let spec = *decoded.spec();
                let channels = spec.channels.count();
                let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                samples.copy_planar_ref(decoded);
                Ok(vec![DecodedFrame::new(
                    channels,
                    samples.samples().to_vec(),
                    packet.pts,
                )])
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(DecoderError::EndOfStream)
            }
            Err(e) => Err(DecoderError::Codec(e.to_string())),
        }
    }

    fn decode_and_drop(&mut self, packet: &Packet) {
        let pkt = self.to_symphonia_packet(packet);
        if let Some(decoder) = self.decoder.as_mut() {
            if let Err(e) = decoder.decode(&pkt) {
                tracing::debug!(pts = packet.pts, "dropped packet failed to decode: {e}");
            }
        }
    }

    fn drain(&mut self) -> Result<Vec<DecodedFrame>, DecoderError> {
        // Symphonia decoders emit everything per packet; only the verification result remains.
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| DecoderError::Codec("codec not open".into()))?;
        let result = decoder.finalize();
        if result.verify_ok == Some(false) {
            tracing::warn!("decoded stream failed verification");
        }
        Ok(Vec::new())
    }

    fn seek(&mut self, seconds: f64) -> Result<(), SeekError> {
        if let Some(duration) = self.descriptor.duration_seconds {
            if seconds >= duration {
                return Err(SeekError::EndOfStream);
            }
        }
        let seconds = seconds.max(0.0);
        let mode = if self.raw {
            SeekMode::Accurate
        } else {
            SeekMode::Coarse
        };
        let format = self
            .format
            .as_mut()
            .ok_or_else(|| SeekError::Failed("session closed".into()))?;
        let time = Time::new(seconds.trunc() as u64, seconds.fract());
        match format.seek(
            mode,
            SeekTo::Time {
                time,
                track_id: Some(self.track_id),
            },
        ) {
            Ok(seeked) => {
                tracing::debug!(
                    required_ts = seeked.required_ts,
                    actual_ts = seeked.actual_ts,
                    "coarse seek done"
                );
                if let Some(decoder) = self.decoder.as_mut() {
                    decoder.reset();
                }
                Ok(())
            }
            Err(SymphoniaError::SeekError(SeekErrorKind::OutOfRange)) => {
                Err(SeekError::EndOfStream)
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(SeekError::EndOfStream)
            }
            Err(e) => Err(SeekError::Failed(e.to_string())),
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.decoder = None;
        self.format = None;
        self.closed = true;
        tracing::debug!(track_id = self.track_id, "media session closed");
    }
}

impl Drop for SymphoniaSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn descriptor_from_params(params: &CodecParameters) -> Result<StreamDescriptor, OpenError> {
    let sample_rate = params
        .sample_rate
        .filter(|r| *r > 0)
        .ok_or(OpenError::MissingStreamInfo("sample rate"))?;
    let channels = params
        .channels
        .map(|c| c.count())
        .filter(|c| *c > 0)
        .ok_or(OpenError::MissingStreamInfo("channel count"))?;

    let time_base = params
        .time_base
        .filter(|tb| tb.denom > 0)
        .map(|tb| TimeBase::new(tb.numer, tb.denom))
        .unwrap_or_else(|| TimeBase::per_sample(sample_rate));

    let mut descriptor = StreamDescriptor::new(sample_rate, channels)
        .with_channel_layout(params.channels.map(|c| c.bits()).unwrap_or(0))
        .with_time_base(time_base);
    if let Some(frames) = params.n_frames {
        descriptor = descriptor.with_duration_ts(frames).with_total_frames(frames);
    }
    descriptor.sample_format = sample_format_from_params(params);
    descriptor.codec = codec_name_from_params(params);
    descriptor.bit_depth = params
        .bits_per_sample
        .or(params.bits_per_coded_sample)
        .and_then(|v| u16::try_from(v).ok());
    Ok(descriptor)
}

/// Source sample format as declared by the codec parameters. Decoded output is always planar.
fn sample_format_from_params(params: &CodecParameters) -> SampleFormat {
    use symphonia::core::sample::SampleFormat as S;
    let (kind, bytes) = match params.sample_format {
        Some(S::U8) => (SampleKind::Unsigned, 1),
        Some(S::U16) => (SampleKind::Unsigned, 2),
        Some(S::U24) => (SampleKind::Unsigned, 3),
        Some(S::U32) => (SampleKind::Unsigned, 4),
        Some(S::S8) => (SampleKind::Signed, 1),
        Some(S::S16) => (SampleKind::Signed, 2),
        Some(S::S24) => (SampleKind::Signed, 3),
        Some(S::S32) => (SampleKind::Signed, 4),
        Some(S::F32) => (SampleKind::Float, 4),
        Some(S::F64) => (SampleKind::Float, 8),
        None => match params.bits_per_sample {
            Some(bits) if bits > 0 => (SampleKind::Signed, bits.div_ceil(8).min(8) as u8),
            _ => return SampleFormat::F32_PLANAR,
        },
    };
    SampleFormat {
        kind,
        bytes,
        planar: true,
    }
}

/// PCM streams seek to the exact sample, so no packet-level correction is required.
fn is_raw_pcm(codec: CodecType) -> bool {
    use symphonia::core::codecs::*;
    matches!(
        codec,
        CODEC_TYPE_PCM_U8
            | CODEC_TYPE_PCM_S16LE
            | CODEC_TYPE_PCM_S16BE
            | CODEC_TYPE_PCM_S24LE
            | CODEC_TYPE_PCM_S24BE
            | CODEC_TYPE_PCM_S32LE
            | CODEC_TYPE_PCM_S32BE
            | CODEC_TYPE_PCM_F32LE
            | CODEC_TYPE_PCM_F32BE
            | CODEC_TYPE_PCM_F64LE
            | CODEC_TYPE_PCM_F64BE
            | CODEC_TYPE_PCM_ALAW
            | CODEC_TYPE_PCM_MULAW
    )
}

/// Best-effort codec label.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::audio::Channels;
    use symphonia::core::codecs::*;

    fn write_wav(path: &Path, rate: u32, seconds: u32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..rate * seconds {
            let v = ((i % 100) as i16 - 50) * 100;
            writer.write_sample(v).unwrap();
            writer.write_sample(-v).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn decode_everything(session: &mut dyn MediaSession) -> usize {
        let mut total = 0;
        loop {
            match session.read_packet() {
                Ok(Some(packet)) => {
                    for frame in session.decode(&packet).unwrap() {
                        total += frame.sample_count();
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    assert!(e.is_eof(), "unexpected read error: {e}");
                    break;
                }
            }
        }
        total
    }

    #[test]
    fn descriptor_from_params_requires_rate_and_channels() {
        let mut params = CodecParameters::new();
        assert!(matches!(
            descriptor_from_params(&params),
            Err(OpenError::MissingStreamInfo("sample rate"))
        ));
        params.sample_rate = Some(48_000);
        assert!(matches!(
            descriptor_from_params(&params),
            Err(OpenError::MissingStreamInfo("channel count"))
        ));
        params.channels = Some(Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        params.n_frames = Some(96_000);
        let d = descriptor_from_params(&params).unwrap();
        assert_eq!(d.channels, 2);
        assert_eq!(d.duration_seconds, Some(2.0));
        assert_eq!(d.total_frames, Some(96_000));
    }

    #[test]
    fn codec_name_from_params_maps_known_codecs() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_FLAC;
        assert_eq!(codec_name_from_params(&params), Some("FLAC".to_string()));
        params.codec = CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S16".to_string()));
        assert!(is_raw_pcm(params.codec));
        assert!(!is_raw_pcm(CODEC_TYPE_FLAC));
        assert!(codec_name_from_params(&CodecParameters::new()).is_none());
    }

    #[test]
    fn sample_format_falls_back_to_bit_depth() {
        let mut params = CodecParameters::new();
        assert_eq!(sample_format_from_params(&params), SampleFormat::F32_PLANAR);
        params.bits_per_sample = Some(24);
        let f = sample_format_from_params(&params);
        assert_eq!((f.kind, f.bytes), (SampleKind::Signed, 3));
    }

    #[test]
    fn wav_round_trip_decodes_every_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 8_000, 2);

        let mut session = SymphoniaEngine::new().open(&path).unwrap();
        let d = session.descriptor().clone();
        assert_eq!(d.sample_rate, 8_000);
        assert_eq!(d.channels, 2);
        assert_eq!(d.total_frames, Some(16_000));
        assert_eq!(d.codec.as_deref(), Some("PCM_S16"));
        assert!(session.is_raw());

        session.open_codec().unwrap();
        assert_eq!(decode_everything(session.as_mut()), 16_000);
        assert!(session.drain().unwrap().is_empty());
    }

    #[test]
    fn wav_seek_lands_near_target_and_past_end_is_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 8_000, 2);

        let mut session = SymphoniaEngine::new().open(&path).unwrap();
        session.open_codec().unwrap();
        session.seek(1.0).unwrap();
        let packet = loop {
            if let Some(p) = session.read_packet().unwrap() {
                break p;
            }
        };
        let at = session.time_base().to_seconds(packet.pts);
        assert!((at - 1.0).abs() < 0.05, "landed at {at}");

        assert!(session.seek(5.0).unwrap_err().is_eof());
    }

    #[test]
    fn close_is_idempotent_and_disables_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 8_000, 1);

        let mut session = SymphoniaSession::open(&path).unwrap();
        session.open_codec().unwrap();
        session.close();
        session.close();
        assert!(matches!(session.read_packet(), Err(PacketReadError::Failed(_))));
        assert!(session.open_codec().is_err());
    }

    #[test]
    fn open_reports_missing_and_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.flac");
        assert!(matches!(
            SymphoniaEngine::new().open(&missing),
            Err(OpenError::Io { .. })
        ));

        let junk = dir.path().join("junk.mp3");
        std::fs::write(&junk, b"definitely not audio").unwrap();
        assert!(SymphoniaEngine::new().open(&junk).is_err());
    }
}
