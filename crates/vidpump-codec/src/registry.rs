//! Name-based codec lookup.
//!
//! The reference `vpic` codec is always available; every other name is
//! resolved through FFmpeg when the `ffmpeg-runtime` feature is on.

use std::sync::Arc;

use vidpump_core::codec_traits::{CodecDescriptor, DecodeEngine, EncodeEngine, PacketParser};
use vidpump_core::context::{DeviceContext, DeviceType};
use vidpump_core::error::{PumpError, Result};

use crate::config::{DecoderConfig, EncoderConfig};
use crate::ffmpeg;
use crate::parser::StartCodeParser;
use crate::reference::{self, VpicDecoder, VpicEncoder};

fn not_found(name: &str) -> PumpError {
    PumpError::Configuration(format!("Codec '{name}' not found"))
}

pub fn open_decoder(name: &str, config: &DecoderConfig) -> Result<Box<dyn DecodeEngine>> {
    if name == reference::CODEC_NAME {
        return Ok(Box::new(VpicDecoder::new(config)?));
    }
    match ffmpeg::FfmpegDecoder::open(name, config)? {
        Some(decoder) => Ok(Box::new(decoder)),
        None => Err(not_found(name)),
    }
}

pub fn open_encoder(name: &str, config: &EncoderConfig) -> Result<Box<dyn EncodeEngine>> {
    if name == reference::CODEC_NAME {
        return Ok(Box::new(VpicEncoder::new(config)?));
    }
    match ffmpeg::FfmpegEncoder::open(name, config)? {
        Some(encoder) => Ok(Box::new(encoder)),
        None => Err(not_found(name)),
    }
}

/// Parser matching the decoder `name`.
pub fn open_parser(name: &str) -> Result<Box<dyn PacketParser>> {
    if name == reference::CODEC_NAME {
        return Ok(Box::new(StartCodeParser::new()));
    }
    match ffmpeg::FfmpegParser::open(name)? {
        Some(parser) => Ok(Box::new(parser)),
        None => Err(not_found(name)),
    }
}

/// Create a device context of `device_type`.
pub fn create_device(device_type: DeviceType) -> Result<Arc<DeviceContext>> {
    match device_type {
        DeviceType::Emulated => DeviceContext::create(device_type),
        other => ffmpeg::create_device(other),
    }
}

/// Every codec this build can open.
pub fn list_codecs() -> Vec<CodecDescriptor> {
    let mut codecs = vec![reference::decoder_descriptor(), reference::encoder_descriptor()];
    codecs.extend(ffmpeg::list_codecs());
    codecs
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidpump_core::codec_traits::CodecKind;

    #[test]
    fn reference_codec_is_always_registered() {
        let codecs = list_codecs();
        assert!(codecs.iter().any(|c| c.name == "vpic" && c.kind == CodecKind::Decoder));
        assert!(codecs.iter().any(|c| c.name == "vpic" && c.kind == CodecKind::Encoder));
        assert!(open_decoder("vpic", &DecoderConfig::default()).is_ok());
        assert!(open_encoder("vpic", &EncoderConfig::default()).is_ok());
        assert!(open_parser("vpic").is_ok());
    }

    #[test]
    fn unknown_codec_is_configuration_error() {
        let err = open_decoder("no-such-codec", &DecoderConfig::default())
            .err()
            .expect("unknown codec");
        assert!(err.is_startup());
        assert_eq!(err.to_string(), "Configuration error: Codec 'no-such-codec' not found");
    }

    #[test]
    fn emulated_device_needs_no_backend() {
        let ctx = create_device(DeviceType::Emulated).expect("emulated");
        assert_eq!(ctx.device_type(), DeviceType::Emulated);
    }
}
