//! Error taxonomy for the decode-and-schedule pipeline.
//!
//! Packet and frame level failures are recovered locally by the decoder (skip and continue).
//! Initialization failures and unrecoverable seek failures propagate to the caller.

use std::path::PathBuf;

use thiserror::Error;

/// The media engine could not open or probe a file.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("open {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported or unreadable container: {0}")]
    Unsupported(String),
    #[error("no decodable audio track")]
    NoAudioTrack,
    #[error("stream is missing {0}")]
    MissingStreamInfo(&'static str),
}

/// The codec for the session's audio stream could not be opened.
#[derive(Debug, Error)]
#[error("could not open codec: {reason}")]
pub struct DecoderInitializationError {
    pub reason: String,
}

impl DecoderInitializationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failure reading the next encoded packet.
#[derive(Debug, Error)]
pub enum PacketReadError {
    #[error("end of stream")]
    EndOfStream,
    #[error("packet read failed: {0}")]
    Failed(String),
}

impl PacketReadError {
    pub fn is_eof(&self) -> bool {
        matches!(self, PacketReadError::EndOfStream)
    }
}

/// Raw result of a media-engine seek.
#[derive(Debug, Error)]
pub enum SeekError {
    #[error("seek reached end of stream")]
    EndOfStream,
    #[error("seek failed: {0}")]
    Failed(String),
}

impl SeekError {
    pub fn is_eof(&self) -> bool {
        matches!(self, SeekError::EndOfStream)
    }
}

/// Decode failures, including seek failures surfaced by the decoder.
#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("end of stream")]
    EndOfStream,
    #[error("decoder has no open session")]
    NotInitialized,
    #[error("decode failed: {0}")]
    Codec(String),
    #[error("seek failed: {0}")]
    Seek(String),
    #[error("packet timestamps went backwards ({previous:.4}s -> {current:.4}s) while correcting seek")]
    NonMonotonicTimestamps { previous: f64, current: f64 },
    #[error("seek correction read {packets} packets without reaching the target")]
    CorrectionOverrun { packets: usize },
}

impl DecoderError {
    pub fn is_eof(&self) -> bool {
        matches!(self, DecoderError::EndOfStream)
    }
}

impl From<SeekError> for DecoderError {
    fn from(err: SeekError) -> Self {
        match err {
            SeekError::EndOfStream => DecoderError::EndOfStream,
            SeekError::Failed(msg) => DecoderError::Seek(msg),
        }
    }
}

/// Errors surfaced by [`crate::player::Player`] and the scheduler.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    Initialization(#[from] DecoderInitializationError),
    #[error(transparent)]
    Decoder(#[from] DecoderError),
    #[error("output device: {0}")]
    Output(String),
    #[error("no file is loaded")]
    NoSession,
    #[error("could not start decode worker: {0}")]
    Worker(#[source] std::io::Error),
}

impl From<anyhow::Error> for PlayerError {
    fn from(err: anyhow::Error) -> Self {
        PlayerError::Output(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_eof_maps_to_decoder_eof() {
        let err: DecoderError = SeekError::EndOfStream.into();
        assert!(err.is_eof());
        let err: DecoderError = SeekError::Failed("bad index".into()).into();
        assert!(!err.is_eof());
        assert_eq!(err.to_string(), "seek failed: bad index");
    }

    #[test]
    fn anyhow_errors_become_output_errors() {
        let err: PlayerError = anyhow::anyhow!("no default output device").into();
        assert!(matches!(err, PlayerError::Output(ref m) if m.contains("no default output")));
    }
}
