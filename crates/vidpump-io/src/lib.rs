#![doc = include_str!("../README.md")]

/// Fixed-size padded reads of raw input.
pub mod chunk_reader;
/// [`vidpump_core::codec_traits::ContainerSource`] over raw `vpic` files.
pub mod demux;
/// File-based [`vidpump_core::codec_traits::BitstreamSink`].
pub mod file_sink;
/// Per-frame and concatenated [`vidpump_core::codec_traits::FrameSink`]s.
pub mod frame_sink;

pub use chunk_reader::{DEFAULT_CHUNK_SIZE, RawChunkReader};
pub use demux::ElementaryDemuxer;
pub use file_sink::FileBitstreamSink;
pub use frame_sink::{ArtifactFormat, PerFrameFileSink, RawConcatSink};
