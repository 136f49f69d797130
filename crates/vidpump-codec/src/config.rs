//! Engine configuration shared by the reference and FFmpeg backends.

use std::sync::Arc;

use vidpump_core::context::DeviceContext;
use vidpump_core::error::{PumpError, Result};
use vidpump_core::types::PixelFormat;

/// Decoder configuration.
#[derive(Clone, Debug, Default)]
pub struct DecoderConfig {
    /// Packets the decoder holds back before emitting the oldest picture.
    ///
    /// Models the reorder delay of real decoders.  Ignored by FFmpeg
    /// decoders, which decide this themselves.
    pub reorder_depth: usize,
    /// Decode into surfaces on this device instead of host memory.
    pub device: Option<Arc<DeviceContext>>,
}

/// Encoder configuration parameters.
///
/// Defaults match one second of 352x288 CIF video at 25 fps.
#[derive(Clone, Debug)]
pub struct EncoderConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second; the stream time base is `1/fps`.
    pub fps: u32,
    /// Frames between keyframes.
    pub gop_size: u32,
    /// Maximum consecutive B-frames (`0` = none).
    ///
    /// The reference encoder has no B-frames but holds back this many
    /// frames, like an encoder with lookahead would.
    pub max_b_frames: u32,
    /// Target bitrate in bits/sec.
    pub bit_rate: u64,
    pub pix_fmt: PixelFormat,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 352,
            height: 288,
            fps: 25,
            gop_size: 10,
            max_b_frames: 0,
            bit_rate: 400_000,
            pix_fmt: PixelFormat::Yuv420p,
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PumpError::Configuration(format!(
                "invalid encoder size {}x{}",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(PumpError::Configuration("fps must be positive".into()));
        }
        if self.gop_size == 0 {
            return Err(PumpError::Configuration("gop size must be positive".into()));
        }
        if self.pix_fmt.is_hardware() {
            return Err(PumpError::Configuration(format!(
                "encoder input format must be a software format, got {}",
                self.pix_fmt
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_encoder_config_is_cif() {
        let config = EncoderConfig::default();
        assert_eq!((config.width, config.height), (352, 288));
        assert_eq!(config.fps, 25);
        assert_eq!(config.gop_size, 10);
        assert_eq!(config.bit_rate, 400_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let zero_gop = EncoderConfig {
            gop_size: 0,
            ..EncoderConfig::default()
        };
        assert!(zero_gop.validate().is_err());

        let hw = EncoderConfig {
            pix_fmt: PixelFormat::Cuda,
            ..EncoderConfig::default()
        };
        let err = hw.validate().expect_err("hardware input");
        assert!(err.is_startup());
    }
}
