//! CLI/runtime bridge helpers.
//!
//! Composes readers, parsers, engines, pumps and sinks for each command so
//! callers depend on pipeline contracts without wiring codec and I/O crates
//! themselves.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use vidpump_codec::config::{DecoderConfig, EncoderConfig};
use vidpump_codec::ffmpeg::FfmpegSource;
use vidpump_codec::parser::PacketCursor;
use vidpump_codec::registry;
use vidpump_core::codec_traits::{ContainerSource, DecodeEngine, StreamInfo};
use vidpump_core::context::{DeviceContext, DeviceType};
use vidpump_core::error::{PumpError, Result};
use vidpump_io::{
    ArtifactFormat, DEFAULT_CHUNK_SIZE, ElementaryDemuxer, FileBitstreamSink, PerFrameFileSink,
    RawChunkReader, RawConcatSink,
};

use crate::decode::DecodePump;
use crate::encode::EncodePump;
use crate::metrics::PumpReport;
use crate::synthetic::pattern_frame;

/// `decode <input> <output-prefix> <codec-name>`.
#[derive(Clone, Debug)]
pub struct DecodeRunConfig {
    pub input: PathBuf,
    pub output_prefix: PathBuf,
    pub codec: String,
    pub format: ArtifactFormat,
    pub chunk_size: usize,
    pub reorder_depth: usize,
}

impl DecodeRunConfig {
    pub fn new(input: PathBuf, output_prefix: PathBuf, codec: impl Into<String>) -> Self {
        Self {
            input,
            output_prefix,
            codec: codec.into(),
            format: ArtifactFormat::Pnm,
            chunk_size: DEFAULT_CHUNK_SIZE,
            reorder_depth: 0,
        }
    }
}

/// `encode <output-file> <codec-name>`.
#[derive(Clone, Debug)]
pub struct EncodeRunConfig {
    pub output: PathBuf,
    pub codec: String,
    pub encoder: EncoderConfig,
    /// Number of pattern frames to encode.
    pub frames: u64,
}

/// `hwdecode <device-type> <input> <output-file>`.
#[derive(Clone, Debug)]
pub struct HwDecodeRunConfig {
    pub device_type: String,
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Split a raw file into packets and decode each into a per-frame artifact.
pub fn run_decode(config: &DecodeRunConfig) -> Result<PumpReport> {
    let decoder = registry::open_decoder(
        &config.codec,
        &DecoderConfig {
            reorder_depth: config.reorder_depth,
            device: None,
        },
    )?;
    let mut parser = registry::open_parser(&config.codec)?;
    let mut reader = RawChunkReader::open(&config.input, config.chunk_size)?;
    let sink = PerFrameFileSink::new(config.output_prefix.clone(), config.format);
    let mut pump = DecodePump::new(decoder, Box::new(sink));

    let mut packets = 0u64;
    while let Some(chunk) = reader.next_chunk()? {
        for packet in PacketCursor::new(parser.as_mut(), chunk) {
            pump.submit(Some(&packet?))?;
            packets += 1;
        }
    }
    for packet in PacketCursor::flush(parser.as_mut()) {
        pump.submit(Some(&packet?))?;
        packets += 1;
    }
    pump.flush()?;

    let metrics = *pump.metrics();
    info!(
        input = %config.input.display(),
        bytes_read = reader.bytes_read(),
        packets,
        frames = metrics.units_out,
        "Decode complete"
    );
    Ok(PumpReport {
        command: "decode",
        codec: config.codec.clone(),
        packets,
        frames: metrics.units_out,
        flush_outputs: metrics.flush_outputs,
        bytes_written: metrics.bytes_written,
        device: None,
        peak_device_bytes: None,
    })
}

/// Encode `frames` pattern frames into a raw elementary stream.
pub fn run_encode(config: &EncodeRunConfig) -> Result<PumpReport> {
    let encoder = registry::open_encoder(&config.codec, &config.encoder)?;
    let sink = FileBitstreamSink::new(config.output.clone())?;
    let mut pump = EncodePump::new(encoder, Box::new(sink));

    let enc = &config.encoder;
    for i in 0..config.frames {
        let frame = pattern_frame(enc.pix_fmt, enc.width, enc.height, i)?;
        pump.submit(Some(&frame))?;
    }
    let metrics = pump.finish()?;

    info!(
        output = %config.output.display(),
        frames = metrics.units_in,
        packets = metrics.units_out,
        bytes_written = metrics.bytes_written,
        "Encode complete"
    );
    Ok(PumpReport {
        command: "encode",
        codec: config.codec.clone(),
        packets: metrics.units_out,
        frames: metrics.units_in,
        flush_outputs: metrics.flush_outputs,
        bytes_written: metrics.bytes_written,
        device: None,
        peak_device_bytes: None,
    })
}

/// Demux the best video stream, decode it on a hardware device and append
/// every frame, transferred and packed, to one raw file.
///
/// A transfer failure aborts the whole stream.
pub fn run_hwdecode(config: &HwDecodeRunConfig) -> Result<PumpReport> {
    let device_type = DeviceType::from_name(&config.device_type)?;
    let device = registry::create_device(device_type)?;
    let HwSource {
        mut source,
        stream,
        decoder,
    } = open_hw_source(&config.input, &device)?;

    let sink = RawConcatSink::new(config.output.clone())?;
    let mut pump = DecodePump::new(decoder, Box::new(sink));

    let mut packets = 0u64;
    while let Some(packet) = source.read_packet()? {
        if packet.stream_index != stream.index {
            continue;
        }
        pump.submit(Some(&packet))?;
        packets += 1;
    }
    pump.flush()?;
    let metrics = *pump.metrics();
    drop(pump);

    let (current, peak) = device.memory_usage();
    info!(
        device = %device_type,
        frames = metrics.units_out,
        bytes_written = metrics.bytes_written,
        peak_device_bytes = peak,
        "Hardware decode complete"
    );
    if current != 0 {
        warn!(device = %device_type, current, "Device memory still held after decode");
    }
    Ok(PumpReport {
        command: "hwdecode",
        codec: stream.codec_name,
        packets,
        frames: metrics.units_out,
        flush_outputs: metrics.flush_outputs,
        bytes_written: metrics.bytes_written,
        device: Some(device_type.name().to_string()),
        peak_device_bytes: Some(peak),
    })
}

struct HwSource {
    source: Box<dyn ContainerSource>,
    stream: StreamInfo,
    decoder: Box<dyn DecodeEngine>,
}

/// Open `input` as a raw elementary stream, or through the container
/// demuxer when it is not one, with a decoder bound to `device`.
fn open_hw_source(input: &Path, device: &Arc<DeviceContext>) -> Result<HwSource> {
    let decoder_config = DecoderConfig {
        reorder_depth: 0,
        device: Some(Arc::clone(device)),
    };
    let mut elementary = ElementaryDemuxer::open(input)?;
    match elementary.find_best_stream() {
        Ok(stream) => {
            let decoder = registry::open_decoder(&stream.codec_name, &decoder_config)?;
            Ok(HwSource {
                source: Box::new(elementary),
                stream,
                decoder,
            })
        }
        Err(
            PumpError::Configuration(reason)
            | PumpError::MalformedInput(reason)
            | PumpError::Decode(reason),
        ) => {
            warn!(%reason, "Not an elementary stream; trying container demux");
            drop(elementary);
            let mut container = FfmpegSource::open(input)?;
            let stream = container.find_best_stream()?;
            let decoder = container.open_decoder(&decoder_config)?;
            Ok(HwSource {
                source: Box::new(container),
                stream,
                decoder: Box::new(decoder),
            })
        }
        Err(e) => Err(e),
    }
}
