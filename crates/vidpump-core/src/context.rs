//! Shared device context: accelerator identity, device memory accounting,
//! surface lifetime and hardware configuration negotiation.
//!
//! # Ownership
//!
//! A [`DeviceContext`] is created once per run and handed out as
//! `Arc<DeviceContext>`.  Every engine that decodes into device memory holds
//! one reference, and every [`DeviceSurface`] it produces holds another, so
//! the context is destroyed only after the last engine is closed *and* the
//! last surface has been transferred or dropped.
//!
//! # Device memory
//!
//! The built-in [`DeviceType::Emulated`] device keeps surfaces in an
//! in-process arena with 256-byte row pitch, mirroring the alignment real
//! decoders apply.  Native devices (behind a codec backend) attach their own
//! handle through [`NativeDevice`] and provide their own [`SurfaceMemory`].

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info};

use crate::codec_traits::CodecDescriptor;
use crate::error::{PumpError, Result};
use crate::types::{Frame, FrameData, PixelFormat, Plane};

/// Row pitch alignment applied by the emulated device.
pub const EMULATED_PITCH_ALIGN: usize = 256;

// ─── Device types ────────────────────────────────────────────────────────────

/// Hardware accelerator families, named as on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Vdpau,
    Cuda,
    Vaapi,
    Dxva2,
    Qsv,
    VideoToolbox,
    D3d11va,
    Drm,
    Vulkan,
    Emulated,
}

impl DeviceType {
    /// Every known device type, in enumeration order.
    pub const ALL: [DeviceType; 10] = [
        Self::Vdpau,
        Self::Cuda,
        Self::Vaapi,
        Self::Dxva2,
        Self::Qsv,
        Self::VideoToolbox,
        Self::D3d11va,
        Self::Drm,
        Self::Vulkan,
        Self::Emulated,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Vdpau => "vdpau",
            Self::Cuda => "cuda",
            Self::Vaapi => "vaapi",
            Self::Dxva2 => "dxva2",
            Self::Qsv => "qsv",
            Self::VideoToolbox => "videotoolbox",
            Self::D3d11va => "d3d11va",
            Self::Drm => "drm",
            Self::Vulkan => "vulkan",
            Self::Emulated => "emulated",
        }
    }

    /// Resolve a device type by name.
    ///
    /// Unknown names are a configuration error whose message lists every
    /// available type.
    pub fn from_name(name: &str) -> Result<Self> {
        let wanted = name.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.name() == wanted)
            .ok_or_else(|| {
                let available: Vec<&str> = Self::ALL.iter().map(|t| t.name()).collect();
                PumpError::Configuration(format!(
                    "Device type {name} is not supported. Available device types: {}",
                    available.join(" ")
                ))
            })
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Hardware configurations ────────────────────────────────────────────────

/// Bit set of the ways a codec can be attached to a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize)]
pub struct HwConfigMethods(u8);

impl HwConfigMethods {
    /// The codec accepts a device context and allocates surfaces itself.
    pub const DEVICE_CONTEXT: Self = Self(0x01);
    /// The caller must supply a surface pool.
    pub const FRAMES_CONTEXT: Self = Self(0x02);
    /// Acceleration is internal to the codec; no device is needed.
    pub const INTERNAL: Self = Self(0x04);
    /// Legacy per-codec setup.
    pub const AD_HOC: Self = Self(0x08);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for HwConfigMethods {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One hardware configuration a codec supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct HwConfig {
    /// Surface tag decoded frames carry under this configuration.
    pub pix_fmt: PixelFormat,
    pub methods: HwConfigMethods,
    pub device_type: DeviceType,
}

/// Discover the hardware pixel format for `device_type`.
///
/// Walks the codec's configurations in order and picks the first one that
/// can be driven through a device context of the requested type.  Done once
/// per decoder instance, at startup; failing here is a configuration error,
/// never a per-frame one.
pub fn negotiate_hw_format(
    codec: &CodecDescriptor,
    device_type: DeviceType,
) -> Result<PixelFormat> {
    codec
        .hw_configs
        .iter()
        .find(|config| {
            config.methods.contains(HwConfigMethods::DEVICE_CONTEXT)
                && config.device_type == device_type
        })
        .map(|config| {
            info!(
                codec = %codec.name,
                device = %device_type,
                hw_format = %config.pix_fmt,
                "Hardware surface format negotiated"
            );
            config.pix_fmt
        })
        .ok_or_else(|| {
            PumpError::Configuration(format!(
                "Decoder {} does not support device type {}",
                codec.name, device_type
            ))
        })
}

// ─── Device context ─────────────────────────────────────────────────────────

/// Backend-specific device handle attached to a [`DeviceContext`].
pub trait NativeDevice: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Reference-counted accelerator handle shared by engines and surfaces.
pub struct DeviceContext {
    device_type: DeviceType,
    arena: Mutex<Arena>,
    current_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    native: Option<Box<dyn NativeDevice>>,
}

#[derive(Default)]
struct Arena {
    next_id: u64,
    blocks: HashMap<u64, Vec<u8>>,
}

impl DeviceContext {
    /// Create a context for a device type with a built-in implementation.
    ///
    /// Only [`DeviceType::Emulated`] is built in; every other type needs a
    /// codec backend that supplies a [`NativeDevice`] through
    /// [`with_native`](Self::with_native).
    pub fn create(device_type: DeviceType) -> Result<Arc<Self>> {
        if device_type != DeviceType::Emulated {
            return Err(PumpError::Configuration(format!(
                "Failed to create specified HW device: \
                 {device_type} requires a native codec backend"
            )));
        }
        info!(device = %device_type, "Device context created");
        Ok(Arc::new(Self::bare(device_type, None)))
    }

    /// Wrap a backend-created device.
    pub fn with_native(device_type: DeviceType, native: Box<dyn NativeDevice>) -> Arc<Self> {
        info!(device = %device_type, "Native device context attached");
        Arc::new(Self::bare(device_type, Some(native)))
    }

    fn bare(device_type: DeviceType, native: Option<Box<dyn NativeDevice>>) -> Self {
        Self {
            device_type,
            arena: Mutex::new(Arena::default()),
            current_bytes: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
            native,
        }
    }

    #[inline]
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Downcast the native handle, if one of type `T` is attached.
    pub fn native<T: 'static>(&self) -> Option<&T> {
        self.native.as_ref()?.as_any().downcast_ref::<T>()
    }

    /// `(current, peak)` bytes held in device memory.
    pub fn memory_usage(&self) -> (usize, usize) {
        (
            self.current_bytes.load(Ordering::Acquire),
            self.peak_bytes.load(Ordering::Acquire),
        )
    }

    /// Account for `bytes` of backend-managed device memory.
    pub fn track_alloc(&self, bytes: usize) {
        let now = self.current_bytes.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.peak_bytes.fetch_max(now, Ordering::AcqRel);
    }

    /// Release accounting for `bytes` of backend-managed device memory.
    pub fn track_free(&self, bytes: usize) {
        let _ = self
            .current_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(bytes))
            });
    }

    /// Copy a host frame into emulated device memory.
    ///
    /// Rows are re-laid at a pitch aligned to [`EMULATED_PITCH_ALIGN`], so
    /// the resulting surface's stride differs from the source's.
    pub fn upload(self: &Arc<Self>, frame: &Frame) -> Result<DeviceSurface> {
        if self.device_type != DeviceType::Emulated {
            return Err(PumpError::Configuration(format!(
                "upload is only available on the emulated device, not {}",
                self.device_type
            )));
        }
        let planes = frame.planes().ok_or_else(|| {
            PumpError::TransferFailure("frame is already device-resident".into())
        })?;
        let format = frame.format;
        let pitch = (0..format.plane_count())
            .map(|p| format.plane_row_bytes(p, frame.width))
            .max()
            .unwrap_or(0)
            .next_multiple_of(EMULATED_PITCH_ALIGN);
        let total_rows: usize = (0..format.plane_count())
            .map(|p| format.plane_rows(p, frame.height))
            .sum();
        let size = pitch.checked_mul(total_rows).ok_or_else(|| {
            PumpError::ResourceExhaustion(format!(
                "device surface for {}x{} {format} overflows",
                frame.width, frame.height
            ))
        })?;

        let mut block = vec![0u8; size];
        let mut row_base = 0;
        for (p, plane) in planes.iter().enumerate().take(format.plane_count()) {
            let row_bytes = format.plane_row_bytes(p, frame.width);
            for row in 0..format.plane_rows(p, frame.height) {
                let src = plane
                    .data
                    .get(row * plane.stride..row * plane.stride + row_bytes)
                    .ok_or_else(|| {
                        PumpError::TransferFailure(format!(
                            "plane {p} row {row} lies outside the host buffer"
                        ))
                    })?;
                let dst = (row_base + row) * pitch;
                block[dst..dst + row_bytes].copy_from_slice(src);
            }
            row_base += format.plane_rows(p, frame.height);
        }

        let id = {
            let mut arena = self
                .arena
                .lock()
                .map_err(|_| PumpError::TransferFailure("device arena lock poisoned".into()))?;
            arena.next_id += 1;
            let id = arena.next_id;
            arena.blocks.insert(id, block);
            id
        };
        self.track_alloc(size);
        debug!(id, size, pitch, "Emulated surface allocated");

        Ok(DeviceSurface {
            context: Arc::clone(self),
            sw_format: format,
            width: frame.width,
            height: frame.height,
            memory: Box::new(EmulatedSurface { id, pitch, size }),
        })
    }

    fn arena_read(&self, id: u64) -> Result<Vec<u8>> {
        let arena = self
            .arena
            .lock()
            .map_err(|_| PumpError::TransferFailure("device arena lock poisoned".into()))?;
        arena
            .blocks
            .get(&id)
            .cloned()
            .ok_or_else(|| PumpError::TransferFailure(format!("surface {id} is not mapped")))
    }

    fn arena_free(&self, id: u64) {
        if let Ok(mut arena) = self.arena.lock() {
            arena.blocks.remove(&id);
        }
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (current, peak) = self.memory_usage();
        f.debug_struct("DeviceContext")
            .field("device_type", &self.device_type)
            .field("current_bytes", &current)
            .field("peak_bytes", &peak)
            .field("native", &self.native.is_some())
            .finish()
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        let (_, peak) = self.memory_usage();
        debug!(device = %self.device_type, peak_bytes = peak, "Device context destroyed");
    }
}

// ─── Device surfaces ────────────────────────────────────────────────────────

/// Backend-specific storage behind a [`DeviceSurface`].
pub trait SurfaceMemory: Send {
    /// Copy the surface into host planes laid out as `format`.
    fn download(
        &self,
        context: &DeviceContext,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Vec<Plane>>;

    /// Return the storage to the device.  Called exactly once, on drop.
    fn release(&mut self, context: &DeviceContext) {
        let _ = context;
    }
}

/// A picture whose samples live in device memory.
pub struct DeviceSurface {
    context: Arc<DeviceContext>,
    sw_format: PixelFormat,
    width: u32,
    height: u32,
    memory: Box<dyn SurfaceMemory>,
}

impl DeviceSurface {
    /// Wrap backend storage; keeps `context` alive for the surface lifetime.
    pub fn new(
        context: Arc<DeviceContext>,
        sw_format: PixelFormat,
        width: u32,
        height: u32,
        memory: Box<dyn SurfaceMemory>,
    ) -> Self {
        Self {
            context,
            sw_format,
            width,
            height,
            memory,
        }
    }

    #[inline]
    pub fn context(&self) -> &Arc<DeviceContext> {
        &self.context
    }

    /// Host layout the surface downloads into.
    #[inline]
    pub fn sw_format(&self) -> PixelFormat {
        self.sw_format
    }

    /// Copy device memory into a freshly allocated host frame.
    ///
    /// Any failure is reported as [`PumpError::TransferFailure`].
    pub fn transfer_to_host(&self) -> Result<Frame> {
        let planes = self
            .memory
            .download(&self.context, self.sw_format, self.width, self.height)
            .map_err(|e| match e {
                PumpError::TransferFailure(_) => e,
                other => PumpError::TransferFailure(other.to_string()),
            })?;
        Ok(Frame {
            format: self.sw_format,
            width: self.width,
            height: self.height,
            pts: None,
            data: FrameData::Host(planes),
        })
    }
}

impl std::fmt::Debug for DeviceSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSurface")
            .field("device", &self.context.device_type)
            .field("sw_format", &self.sw_format)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl Drop for DeviceSurface {
    fn drop(&mut self) {
        self.memory.release(&self.context);
    }
}

struct EmulatedSurface {
    id: u64,
    pitch: usize,
    size: usize,
}

impl SurfaceMemory for EmulatedSurface {
    fn download(
        &self,
        context: &DeviceContext,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Vec<Plane>> {
        let block = context.arena_read(self.id)?;
        let mut planes = Vec::with_capacity(format.plane_count());
        let mut offset = 0;
        for p in 0..format.plane_count() {
            let len = self.pitch * format.plane_rows(p, height);
            let data = block.get(offset..offset + len).ok_or_else(|| {
                PumpError::TransferFailure(format!(
                    "surface {} too small for plane {p} of {width}x{height} {format}",
                    self.id
                ))
            })?;
            planes.push(Plane {
                data: data.to_vec(),
                stride: self.pitch,
            });
            offset += len;
        }
        Ok(planes)
    }

    fn release(&mut self, context: &DeviceContext) {
        context.arena_free(self.id);
        context.track_free(self.size);
    }
}
