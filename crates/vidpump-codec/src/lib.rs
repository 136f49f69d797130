#![doc = include_str!("../README.md")]

/// Engine configuration structs.
pub mod config;
/// libavcodec-backed engines, parser, demuxer and hardware devices.
#[cfg(feature = "ffmpeg-runtime")]
pub mod ffmpeg;
#[cfg(not(feature = "ffmpeg-runtime"))]
#[path = "ffmpeg_stub.rs"]
pub mod ffmpeg;
/// Packet cursor and start-code parser.
pub mod parser;
/// Reference `vpic` decoder and encoder engines.
pub mod reference;
/// Name-based codec, parser and device lookup.
pub mod registry;
/// `vpic` bitstream syntax.
pub mod vpic;

pub use config::{DecoderConfig, EncoderConfig};
pub use parser::{PacketCursor, StartCodeParser};
pub use registry::{create_device, list_codecs, open_decoder, open_encoder, open_parser};
