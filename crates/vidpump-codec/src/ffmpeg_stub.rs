//! Stub FFmpeg backend for builds without FFmpeg runtime bindings.
//!
//! Lookups report "not found" so the registry falls through to its own
//! error; constructors that can only mean FFmpeg fail with a configuration
//! error naming the missing feature.

use std::path::Path;
use std::sync::Arc;

use vidpump_core::codec_traits::{
    CodecDescriptor, ContainerSource, DecodeEngine, EncodeEngine, PacketParser, PaddedSlice,
    ParseStep, Receive, StreamInfo,
};
use vidpump_core::context::{DeviceContext, DeviceType};
use vidpump_core::error::{PumpError, Result};
use vidpump_core::types::{Frame, Packet};

use crate::config::{DecoderConfig, EncoderConfig};

/// Whether this build links FFmpeg.
pub const AVAILABLE: bool = false;

fn unavailable(what: &str) -> PumpError {
    PumpError::Configuration(format!(
        "vidpump-codec built without `ffmpeg-runtime`; {what} is unavailable"
    ))
}

pub fn list_codecs() -> Vec<CodecDescriptor> {
    Vec::new()
}

pub fn create_device(device_type: DeviceType) -> Result<Arc<DeviceContext>> {
    Err(PumpError::Configuration(format!(
        "Failed to create specified HW device {device_type}: \
         vidpump-codec built without `ffmpeg-runtime`"
    )))
}

pub struct FfmpegDecoder {
    descriptor: CodecDescriptor,
}

impl FfmpegDecoder {
    pub fn open(name: &str, config: &DecoderConfig) -> Result<Option<Self>> {
        let _ = (name, config);
        Ok(None)
    }
}

impl DecodeEngine for FfmpegDecoder {
    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn send_packet(&mut self, _packet: Option<&Packet>) -> Result<()> {
        Err(unavailable("decoding"))
    }

    fn receive_frame(&mut self) -> Result<Receive<Frame>> {
        Err(unavailable("decoding"))
    }

    fn frame_number(&self) -> u64 {
        0
    }
}

pub struct FfmpegEncoder {
    descriptor: CodecDescriptor,
}

impl FfmpegEncoder {
    pub fn open(name: &str, config: &EncoderConfig) -> Result<Option<Self>> {
        let _ = (name, config);
        Ok(None)
    }
}

impl EncodeEngine for FfmpegEncoder {
    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn send_frame(&mut self, _frame: Option<&Frame>) -> Result<()> {
        Err(unavailable("encoding"))
    }

    fn receive_packet(&mut self) -> Result<Receive<Packet>> {
        Err(unavailable("encoding"))
    }
}

pub struct FfmpegParser(());

impl FfmpegParser {
    pub fn open(name: &str) -> Result<Option<Self>> {
        let _ = name;
        Ok(None)
    }
}

impl PacketParser for FfmpegParser {
    fn parse(&mut self, _input: PaddedSlice<'_>) -> Result<ParseStep> {
        Err(unavailable("parsing"))
    }
}

pub struct FfmpegSource(());

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self> {
        Err(unavailable(&format!(
            "container demux of {}",
            path.display()
        )))
    }

    pub fn open_decoder(&self, config: &DecoderConfig) -> Result<FfmpegDecoder> {
        let _ = config;
        Err(unavailable("container decoding"))
    }
}

impl ContainerSource for FfmpegSource {
    fn find_best_stream(&mut self) -> Result<StreamInfo> {
        Err(unavailable("container demux"))
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        Err(unavailable("container demux"))
    }
}
