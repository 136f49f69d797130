//! Packet, frame and pixel format contracts.
//!
//! # Ownership model
//!
//! A [`Packet`] owns its compressed bytes.  It is created by a parser or a
//! demuxer, moved into a pump, and only *borrowed* by the engine for the
//! duration of a single send call.
//!
//! A [`Frame`] is either host-resident (planes are plain byte vectors) or
//! device-resident (an opaque [`DeviceSurface`] that keeps its
//! [`DeviceContext`](crate::context::DeviceContext) alive).  The two shapes
//! share logical width, height and format; only the hardware surface
//! resolver branches on which one it holds.

use serde::Serialize;

use crate::context::DeviceSurface;
use crate::error::{PumpError, Result};

// ─── Pixel format ────────────────────────────────────────────────────────────

/// Picture sample layout, or the tag of a hardware surface.
///
/// Software variants document their plane geometry so that packed buffer
/// sizes are deterministic.  Hardware variants carry no geometry: their
/// samples live in device memory and only become addressable after a
/// transfer into one of the software layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// One 8-bit luma plane.
    Gray8,
    /// Planar Y, Cb, Cr; chroma sub-sampled 2×2 (rounded up).
    Yuv420p,
    /// Y plane followed by one interleaved CbCr plane sub-sampled 2×2.
    Nv12,
    /// Interleaved 8-bit RGB, 3 bytes per pixel.
    Rgb24,

    // Hardware surface tags.
    Cuda,
    Vaapi,
    Vdpau,
    Qsv,
    VideoToolbox,
    D3d11,
    Dxva2,
    DrmPrime,
    Vulkan,
    /// In-process emulated device memory.
    Emulated,
}

impl PixelFormat {
    /// Every software format, in stable order.
    pub const SOFTWARE: [PixelFormat; 4] = [Self::Gray8, Self::Yuv420p, Self::Nv12, Self::Rgb24];

    /// Canonical lowercase name (FFmpeg spelling where one exists).
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gray8 => "gray",
            Self::Yuv420p => "yuv420p",
            Self::Nv12 => "nv12",
            Self::Rgb24 => "rgb24",
            Self::Cuda => "cuda",
            Self::Vaapi => "vaapi",
            Self::Vdpau => "vdpau",
            Self::Qsv => "qsv",
            Self::VideoToolbox => "videotoolbox_vld",
            Self::D3d11 => "d3d11",
            Self::Dxva2 => "dxva2_vld",
            Self::DrmPrime => "drm_prime",
            Self::Vulkan => "vulkan",
            Self::Emulated => "emulated",
        }
    }

    /// Look up a software format by name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::SOFTWARE.into_iter().find(|f| f.name() == name)
    }

    /// One-byte wire code used by the `vpic` bitstream.
    pub const fn code(self) -> u8 {
        match self {
            Self::Gray8 => 0,
            Self::Yuv420p => 1,
            Self::Nv12 => 2,
            Self::Rgb24 => 3,
            _ => 0xFF,
        }
    }

    /// Inverse of [`code`](Self::code) for software formats.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::SOFTWARE.into_iter().find(|f| f.code() == code)
    }

    /// Whether this tag names a device-resident surface.
    pub const fn is_hardware(self) -> bool {
        !matches!(self, Self::Gray8 | Self::Yuv420p | Self::Nv12 | Self::Rgb24)
    }

    /// Number of planes (`0` for hardware tags).
    pub const fn plane_count(self) -> usize {
        match self {
            Self::Gray8 | Self::Rgb24 => 1,
            Self::Nv12 => 2,
            Self::Yuv420p => 3,
            _ => 0,
        }
    }

    /// Meaningful bytes in one row of `plane` (no alignment padding).
    pub const fn plane_row_bytes(self, plane: usize, width: u32) -> usize {
        let w = width as usize;
        let half = w.div_ceil(2);
        match (self, plane) {
            (Self::Gray8, 0) | (Self::Yuv420p, 0) | (Self::Nv12, 0) => w,
            (Self::Yuv420p, 1) | (Self::Yuv420p, 2) => half,
            (Self::Nv12, 1) => half * 2,
            (Self::Rgb24, 0) => w * 3,
            _ => 0,
        }
    }

    /// Number of rows in `plane`.
    pub const fn plane_rows(self, plane: usize, height: u32) -> usize {
        let h = height as usize;
        match (self, plane) {
            (Self::Gray8, 0) | (Self::Yuv420p, 0) | (Self::Nv12, 0) | (Self::Rgb24, 0) => h,
            (Self::Yuv420p, 1) | (Self::Yuv420p, 2) | (Self::Nv12, 1) => h.div_ceil(2),
            _ => 0,
        }
    }

    /// Minimal stride-1 buffer size implied by the logical dimensions.
    ///
    /// Independent of any frame's actual stride.  Returns `0` for hardware
    /// tags, which have no host layout.
    pub const fn packed_size(self, width: u32, height: u32) -> usize {
        let mut total = 0;
        let mut plane = 0;
        while plane < self.plane_count() {
            total += self.plane_row_bytes(plane, width) * self.plane_rows(plane, height);
            plane += 1;
        }
        total
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Packet ──────────────────────────────────────────────────────────────────

/// One discrete unit of compressed data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    /// Compressed payload.
    pub data: Vec<u8>,
    /// Presentation timestamp in stream time base, if known.
    pub pts: Option<i64>,
    /// Decode timestamp in stream time base, if known.
    pub dts: Option<i64>,
    /// Index of the container stream the packet belongs to.
    pub stream_index: usize,
    /// Whether the packet starts an independently decodable picture.
    pub is_keyframe: bool,
}

impl Packet {
    /// Wrap payload bytes with no timing information on stream 0.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ─── Frame ───────────────────────────────────────────────────────────────────

/// One host-resident plane: `stride` bytes per row, possibly padded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
}

/// Where a frame's samples live.
#[derive(Debug)]
pub enum FrameData {
    /// Planes addressable directly from the CPU.
    Host(Vec<Plane>),
    /// Samples in accelerator memory; must be transferred before reading.
    Device(DeviceSurface),
}

/// One uncompressed picture.
#[derive(Debug)]
pub struct Frame {
    /// Sample layout, or the hardware surface tag for device frames.
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp, if known.
    pub pts: Option<i64>,
    pub data: FrameData,
}

impl Frame {
    /// Allocate a zeroed host frame with each stride rounded up to `align`
    /// bytes (`align` of `0` or `1` means tightly packed).
    pub fn alloc_host(format: PixelFormat, width: u32, height: u32, align: usize) -> Result<Self> {
        if format.is_hardware() {
            return Err(PumpError::Configuration(format!(
                "cannot allocate host planes for hardware format {format}"
            )));
        }
        if width == 0 || height == 0 {
            return Err(PumpError::Configuration(format!(
                "invalid frame dimensions {width}x{height}"
            )));
        }
        let align = align.max(1);
        let mut planes = Vec::with_capacity(format.plane_count());
        for plane in 0..format.plane_count() {
            let stride = format.plane_row_bytes(plane, width).next_multiple_of(align);
            let size = stride
                .checked_mul(format.plane_rows(plane, height))
                .ok_or_else(|| {
                    PumpError::ResourceExhaustion(format!(
                        "plane {plane} of {width}x{height} {format} overflows"
                    ))
                })?;
            planes.push(Plane {
                data: vec![0; size],
                stride,
            });
        }
        Ok(Self {
            format,
            width,
            height,
            pts: None,
            data: FrameData::Host(planes),
        })
    }

    /// Whether the samples live in device memory.
    #[inline]
    pub fn is_device_resident(&self) -> bool {
        matches!(self.data, FrameData::Device(_))
    }

    /// Host planes, or `None` for device-resident frames.
    pub fn planes(&self) -> Option<&[Plane]> {
        match &self.data {
            FrameData::Host(planes) => Some(planes),
            FrameData::Device(_) => None,
        }
    }

    pub fn planes_mut(&mut self) -> Option<&mut [Plane]> {
        match &mut self.data {
            FrameData::Host(planes) => Some(planes),
            FrameData::Device(_) => None,
        }
    }
}

// ─── Packed image ────────────────────────────────────────────────────────────

/// A stride-1 raster: planes back to back with no inter-row padding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedImage {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub pts: Option<i64>,
    pub data: Vec<u8>,
}

impl PackedImage {
    /// Copy host planes into a stride-1 buffer of exactly
    /// [`PixelFormat::packed_size`] bytes, dropping row padding.
    ///
    /// A plane whose stride is shorter than its row width, or whose buffer
    /// ends before its last row, is malformed.
    pub fn from_planes(
        format: PixelFormat,
        width: u32,
        height: u32,
        pts: Option<i64>,
        planes: &[Plane],
    ) -> Result<Self> {
        if format.is_hardware() {
            return Err(PumpError::TransferFailure(format!(
                "cannot pack {format} surface without a transfer"
            )));
        }
        if planes.len() < format.plane_count() {
            return Err(PumpError::MalformedInput(format!(
                "{format} needs {} planes, frame has {}",
                format.plane_count(),
                planes.len()
            )));
        }
        let mut data = Vec::with_capacity(format.packed_size(width, height));
        for (p, plane) in planes.iter().enumerate().take(format.plane_count()) {
            let row_bytes = format.plane_row_bytes(p, width);
            if plane.stride < row_bytes {
                return Err(PumpError::MalformedInput(format!(
                    "plane {p} stride {} is shorter than its {row_bytes}-byte rows",
                    plane.stride
                )));
            }
            for row in 0..format.plane_rows(p, height) {
                let start = row * plane.stride;
                let src = plane.data.get(start..start + row_bytes).ok_or_else(|| {
                    PumpError::MalformedInput(format!(
                        "plane {p} ends before row {row} ({} bytes)",
                        plane.data.len()
                    ))
                })?;
                data.extend_from_slice(src);
            }
        }
        Ok(Self {
            format,
            width,
            height,
            pts,
            data,
        })
    }

    /// Bytes of `plane` within the packed buffer.
    pub fn plane(&self, plane: usize) -> &[u8] {
        let mut offset = 0;
        for p in 0..plane.min(self.format.plane_count()) {
            offset +=
                self.format.plane_row_bytes(p, self.width) * self.format.plane_rows(p, self.height);
        }
        let len = self.format.plane_row_bytes(plane, self.width)
            * self.format.plane_rows(plane, self.height);
        self.data.get(offset..offset + len).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_size_matches_plane_geometry() {
        assert_eq!(PixelFormat::Gray8.packed_size(352, 288), 352 * 288);
        assert_eq!(
            PixelFormat::Yuv420p.packed_size(352, 288),
            352 * 288 + 2 * (176 * 144)
        );
        assert_eq!(PixelFormat::Nv12.packed_size(4, 2), 8 + 4);
        assert_eq!(PixelFormat::Rgb24.packed_size(2, 2), 12);
        assert_eq!(PixelFormat::Cuda.packed_size(1920, 1080), 0);
    }

    #[test]
    fn odd_dimensions_round_chroma_up() {
        // 5x3: luma 15, chroma 3x2 each.
        assert_eq!(PixelFormat::Yuv420p.packed_size(5, 3), 15 + 6 + 6);
        assert_eq!(PixelFormat::Nv12.plane_row_bytes(1, 5), 6);
    }

    #[test]
    fn alloc_host_aligns_strides() {
        let frame = Frame::alloc_host(PixelFormat::Yuv420p, 10, 4, 32).expect("alloc");
        let planes = frame.planes().expect("host frame");
        assert_eq!(planes.len(), 3);
        assert_eq!(planes[0].stride, 32);
        assert_eq!(planes[0].data.len(), 32 * 4);
        assert_eq!(planes[1].stride, 32);
        assert_eq!(planes[1].data.len(), 32 * 2);
    }

    #[test]
    fn alloc_host_rejects_hardware_tags() {
        let err = Frame::alloc_host(PixelFormat::Vaapi, 4, 4, 1).expect_err("hw tag");
        assert!(matches!(err, PumpError::Configuration(_)));
    }

    #[test]
    fn software_codes_round_trip() {
        for format in PixelFormat::SOFTWARE {
            assert_eq!(PixelFormat::from_code(format.code()), Some(format));
            assert_eq!(PixelFormat::from_name(format.name()), Some(format));
        }
        assert_eq!(PixelFormat::from_code(0xFF), None);
    }

    #[test]
    fn from_planes_strips_stride_padding() {
        let mut frame = Frame::alloc_host(PixelFormat::Gray8, 3, 2, 16).expect("alloc");
        let plane = &mut frame.planes_mut().expect("host")[0];
        plane.data[..3].copy_from_slice(&[1, 2, 3]);
        plane.data[16..19].copy_from_slice(&[4, 5, 6]);
        plane.data[3] = 0xEE;
        let image = PackedImage::from_planes(
            frame.format,
            frame.width,
            frame.height,
            Some(7),
            frame.planes().expect("host"),
        )
        .expect("pack");
        assert_eq!(image.data, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(image.pts, Some(7));
    }

    #[test]
    fn from_planes_rejects_short_stride() {
        let planes = [Plane {
            data: vec![0; 8],
            stride: 2,
        }];
        let err = PackedImage::from_planes(PixelFormat::Gray8, 4, 2, None, &planes)
            .expect_err("short stride");
        assert!(matches!(err, PumpError::MalformedInput(_)));
    }

    #[test]
    fn packed_image_plane_slices() {
        let image = PackedImage {
            format: PixelFormat::Yuv420p,
            width: 2,
            height: 2,
            pts: None,
            data: vec![1, 2, 3, 4, 5, 6],
        };
        assert_eq!(image.plane(0), &[1, 2, 3, 4]);
        assert_eq!(image.plane(1), &[5]);
        assert_eq!(image.plane(2), &[6]);
    }
}
