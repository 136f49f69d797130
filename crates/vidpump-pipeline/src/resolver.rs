//! Hardware surface resolver.
//!
//! Decoders hand back frames that are either host planes or opaque device
//! surfaces.  The resolver turns both into the same stride-1 packed buffer,
//! so sinks never see where a frame was decoded.

use tracing::trace;
use vidpump_core::error::{PumpError, Result};
use vidpump_core::types::{Frame, FrameData, PackedImage, PixelFormat};

/// Converts decoded frames into packed host images.
#[derive(Clone, Copy, Debug, Default)]
pub struct HwSurfaceResolver {
    hw_format: Option<PixelFormat>,
}

impl HwSurfaceResolver {
    /// `hw_format` is the surface tag negotiated for the decoder, if any.
    pub fn new(hw_format: Option<PixelFormat>) -> Self {
        Self { hw_format }
    }

    /// Transfer `frame` to host memory if it carries the negotiated hardware
    /// format, then pack it.
    ///
    /// Any failure to obtain host samples is [`PumpError::TransferFailure`].
    pub fn resolve(&self, frame: Frame) -> Result<PackedImage> {
        let host = if Some(frame.format) == self.hw_format {
            let FrameData::Device(surface) = &frame.data else {
                return Err(PumpError::TransferFailure(format!(
                    "{} frame carries no device surface",
                    frame.format
                )));
            };
            let mut host = surface.transfer_to_host()?;
            host.pts = frame.pts;
            trace!(
                hw_format = %frame.format,
                sw_format = %host.format,
                "Surface transferred to host"
            );
            host
        } else if frame.format.is_hardware() || frame.is_device_resident() {
            return Err(PumpError::TransferFailure(format!(
                "{} frame does not match negotiated format {}",
                frame.format,
                self.hw_format.map_or("none", PixelFormat::name)
            )));
        } else {
            frame
        };
        pack_frame(&host)
    }
}

/// Copy a host frame's rows into a buffer of exactly
/// [`PixelFormat::packed_size`] bytes, dropping stride padding.
pub fn pack_frame(frame: &Frame) -> Result<PackedImage> {
    let planes = frame.planes().ok_or_else(|| {
        PumpError::TransferFailure("cannot pack a device-resident frame".into())
    })?;
    PackedImage::from_planes(frame.format, frame.width, frame.height, frame.pts, planes)
}
