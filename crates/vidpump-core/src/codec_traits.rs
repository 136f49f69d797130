//! Shared codec traits used across crate boundaries.
//!
//! Engines, parsers, sources and sinks meet here so that `vidpump-codec`,
//! `vidpump-io` and `vidpump-pipeline` depend on a neutral home rather than
//! on each other.

use serde::Serialize;

use crate::context::HwConfig;
use crate::error::{PumpError, Result};
use crate::types::{Frame, PackedImage, PixelFormat, Packet};

/// Zero bytes guaranteed after the logical end of every parser input.
///
/// Parsers may read up to this many bytes past the end without bounds
/// checks on their fast path.
pub const INPUT_PADDING: usize = 64;

// ─── Engine protocol ─────────────────────────────────────────────────────

/// Outcome of one receive call on an engine.
///
/// `Starved` and `Exhausted` are ordinary control flow, not failures:
/// the pumps stop draining on either and never report them upward.
#[derive(Debug)]
pub enum Receive<T> {
    /// One output unit is ready.
    Produced(T),
    /// The engine needs more input before it can produce again.
    Starved,
    /// The engine was flushed and has emitted everything it held.
    Exhausted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    Decoder,
    Encoder,
}

/// Static description of a codec implementation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CodecDescriptor {
    /// Short name used on the command line.
    pub name: String,
    pub long_name: String,
    pub kind: CodecKind,
    /// Hardware configurations, in preference order.
    pub hw_configs: Vec<HwConfig>,
}

/// A decoder driven through the send/receive protocol.
///
/// `send_packet(None)` enters draining mode.  After that every buffered
/// frame comes out of [`receive_frame`](Self::receive_frame) followed by
/// exactly one [`Receive::Exhausted`]; further sends are rejected.
pub trait DecodeEngine: Send {
    fn descriptor(&self) -> &CodecDescriptor;

    /// Hand one packet (or the flush request) to the engine.
    ///
    /// The engine only borrows the packet for the duration of the call.
    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()>;

    fn receive_frame(&mut self) -> Result<Receive<Frame>>;

    /// 1-based number of the most recently produced frame.
    fn frame_number(&self) -> u64;

    /// Surface tag of device-resident output, if hardware decoding is on.
    fn hw_format(&self) -> Option<PixelFormat> {
        None
    }
}

/// An encoder driven through the send/receive protocol.
pub trait EncodeEngine: Send {
    fn descriptor(&self) -> &CodecDescriptor;

    /// Hand one frame (or the flush request) to the engine.
    fn send_frame(&mut self, frame: Option<&Frame>) -> Result<()>;

    fn receive_packet(&mut self) -> Result<Receive<Packet>>;
}

// ─── Parser (raw bytes → packets) ────────────────────────────────────────

/// A byte window followed by at least [`INPUT_PADDING`] zero bytes.
#[derive(Clone, Copy, Debug)]
pub struct PaddedSlice<'a> {
    buf: &'a [u8],
    len: usize,
}

static EMPTY_PADDING: [u8; INPUT_PADDING] = [0; INPUT_PADDING];

impl<'a> PaddedSlice<'a> {
    /// View the first `len` bytes of `buf`, which must be followed by
    /// [`INPUT_PADDING`] zero bytes.
    pub fn new(buf: &'a [u8], len: usize) -> Result<Self> {
        let padded_end = len.checked_add(INPUT_PADDING).unwrap_or(usize::MAX);
        let padding = buf.get(len..padded_end).ok_or_else(|| {
            PumpError::MalformedInput(format!(
                "input of {len} bytes is not followed by {INPUT_PADDING} bytes of padding"
            ))
        })?;
        if padding.iter().any(|&b| b != 0) {
            return Err(PumpError::MalformedInput(
                "input padding must be zero-filled".into(),
            ));
        }
        Ok(Self { buf, len })
    }

    /// The end-of-input marker: zero logical bytes.
    pub fn empty() -> PaddedSlice<'static> {
        PaddedSlice {
            buf: &EMPTY_PADDING,
            len: 0,
        }
    }

    /// Logical bytes, without padding.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        &self.buf[..self.len]
    }

    /// Logical bytes followed by the padding.
    #[inline]
    pub fn padded(&self) -> &'a [u8] {
        &self.buf[..self.len + INPUT_PADDING]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop the first `n` logical bytes (clamped to the length).
    pub fn advance(&self, n: usize) -> Self {
        let n = n.min(self.len);
        Self {
            buf: &self.buf[n..],
            len: self.len - n,
        }
    }
}

/// Result of one parser step.
#[derive(Debug, Default)]
pub struct ParseStep {
    /// Input bytes taken by this step.
    pub consumed: usize,
    /// A complete unit, if one became available.
    pub packet: Option<Packet>,
}

/// Incremental splitter from arbitrary byte chunks into packets.
///
/// Bytes not yet forming a complete unit stay inside the parser and are
/// prepended, unchanged, to the next call's input.  An empty input asks the
/// parser to emit whatever it still holds.
pub trait PacketParser: Send {
    fn parse(&mut self, input: PaddedSlice<'_>) -> Result<ParseStep>;
}

// ─── Container source (demuxer → decoder) ────────────────────────────────

/// The stream a source chose to decode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub index: usize,
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
}

/// Demuxed compressed packets.
pub trait ContainerSource: Send {
    /// Pick the best video stream, or fail if there is none.
    fn find_best_stream(&mut self) -> Result<StreamInfo>;

    /// Read the next packet of any stream, or `None` at end-of-stream.
    fn read_packet(&mut self) -> Result<Option<Packet>>;
}

// ─── Sinks ───────────────────────────────────────────────────────────────

/// Receives encoded bitstream output.
pub trait BitstreamSink: Send {
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;
    /// Append bytes that close the stream; called once after the last packet.
    fn write_trailer(&mut self, trailer: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;

    /// Bytes accepted so far, trailer included.
    fn bytes_written(&self) -> u64 {
        0
    }
}

/// Receives decoded, host-packed pictures.
pub trait FrameSink: Send {
    /// `frame_number` is the engine's 1-based counter for this frame.
    fn write_frame(&mut self, image: &PackedImage, frame_number: u64) -> Result<()>;
    fn flush(&mut self) -> Result<()>;

    fn bytes_written(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_slice_requires_zero_padding() {
        let mut buf = vec![1u8, 2, 3];
        assert!(PaddedSlice::new(&buf, 3).is_err());
        buf.resize(3 + INPUT_PADDING, 0);
        let slice = PaddedSlice::new(&buf, 3).expect("padded");
        assert_eq!(slice.data(), &[1, 2, 3]);
        assert_eq!(slice.padded().len(), 3 + INPUT_PADDING);

        buf[3 + INPUT_PADDING - 1] = 9;
        let err = PaddedSlice::new(&buf, 3).expect_err("dirty padding");
        assert!(err.to_string().contains("zero-filled"));
    }

    #[test]
    fn advance_keeps_padding() {
        let mut buf = vec![7u8; 10];
        buf.resize(10 + INPUT_PADDING, 0);
        let slice = PaddedSlice::new(&buf, 10).expect("padded");
        let rest = slice.advance(4);
        assert_eq!(rest.len(), 6);
        assert_eq!(rest.padded().len(), 6 + INPUT_PADDING);
        assert!(slice.advance(100).is_empty());
    }

    #[test]
    fn empty_slice_is_flush_marker() {
        let empty = PaddedSlice::empty();
        assert!(empty.is_empty());
        assert_eq!(empty.padded(), &[0u8; INPUT_PADDING][..]);
    }
}
