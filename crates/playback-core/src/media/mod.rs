//! Media-engine contracts consumed by the decoder.
//!
//! The engine owns container parsing and the codec. The core only pulls packets, asks for
//! them to be decoded, and requests coarse seeks.

pub mod symphonia_engine;

use std::path::Path;

use crate::error::{DecoderError, DecoderInitializationError, OpenError, PacketReadError, SeekError};
use crate::frame::DecodedFrame;
use crate::stream::{StreamDescriptor, TimeBase};

pub use self::symphonia_engine::{SymphoniaEngine, SymphoniaSession};

/// One unit of still-encoded data read from the container.
#[derive(Clone, Debug)]
pub struct Packet {
    pub stream_index: u32,
    /// Presentation timestamp in stream time-base units.
    pub pts: i64,
    /// Duration in time-base units (0 when unknown).
    pub duration: u64,
    pub data: Box<[u8]>,
}

/// Opens files into decodable sessions.
pub trait MediaEngine: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSession>, OpenError>;
}

/// The selected audio stream of one opened file, plus its codec.
pub trait MediaSession: Send {
    fn descriptor(&self) -> &StreamDescriptor;

    fn time_base(&self) -> TimeBase {
        self.descriptor().time_base
    }

    /// Whether seeking is already sample-accurate (raw PCM), so no correction is needed.
    fn is_raw(&self) -> bool;

    /// Create/open the codec. Must succeed before any decode call.
    fn open_codec(&mut self) -> Result<(), DecoderInitializationError>;

    /// Next packet of the container. `Ok(None)` when it belongs to another stream.
    fn read_packet(&mut self) -> Result<Option<Packet>, PacketReadError>;

    /// Decode one packet into zero or more frames.
    fn decode(&mut self, packet: &Packet) -> Result<Vec<DecodedFrame>, DecoderError>;

    /// Advance codec state with `packet`, discarding the output.
    fn decode_and_drop(&mut self, packet: &Packet);

    /// Flush frames the codec still buffers internally. Called once EOF is reached.
    fn drain(&mut self) -> Result<Vec<DecodedFrame>, DecoderError>;

    /// Coarse seek, accurate to a packet boundary at best.
    fn seek(&mut self, seconds: f64) -> Result<(), SeekError>;

    /// Release codec then container. Safe to call more than once.
    fn close(&mut self);
}
