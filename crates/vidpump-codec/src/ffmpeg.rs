//! libavcodec-backed engines, parser, demuxer and hardware devices.
//!
//! Every raw FFmpeg pointer is owned by exactly one wrapper and released in
//! that wrapper's `Drop`.  All calls happen on the thread that owns the
//! wrapper; the `Send` impls only allow moving them, never sharing.

use std::ffi::{CStr, CString, c_char};
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use ffmpeg_sys_next::*;
use libc::EAGAIN;
use tracing::{debug, info};
use vidpump_core::codec_traits::{
    CodecDescriptor, CodecKind, ContainerSource, DecodeEngine, EncodeEngine, PacketParser,
    PaddedSlice, ParseStep, Receive, StreamInfo,
};
use vidpump_core::context::{
    DeviceContext, DeviceSurface, DeviceType, HwConfig, HwConfigMethods, NativeDevice,
    SurfaceMemory, negotiate_hw_format,
};
use vidpump_core::error::{PumpError, Result};
use vidpump_core::types::{Frame, FrameData, Packet, PixelFormat, Plane};

use crate::config::{DecoderConfig, EncoderConfig};

/// Whether this build links FFmpeg.
pub const AVAILABLE: bool = true;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn check(ret: i32, context: &str) -> Result<()> {
    if ret >= 0 {
        return Ok(());
    }
    let mut buf = [0 as c_char; 256];
    // SAFETY: buf is a valid mutable buffer of known length.
    unsafe {
        av_strerror(ret, buf.as_mut_ptr(), buf.len());
    }
    // SAFETY: av_strerror always NUL-terminates within the buffer.
    let message = unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned();
    Err(PumpError::Ffmpeg {
        context: context.to_string(),
        code: ret,
        message,
    })
}

/// The two non-error returns of `avcodec_receive_*`.
fn receive_outcome<T>(ret: i32) -> Option<Receive<T>> {
    if ret == AVERROR(EAGAIN) {
        Some(Receive::Starved)
    } else if ret == AVERROR_EOF {
        Some(Receive::Exhausted)
    } else {
        None
    }
}

fn to_cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|e| PumpError::Configuration(format!("invalid string {s:?}: {e}")))
}

/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn c_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: caller guarantees a valid C string.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

fn av_device_type(device: DeviceType) -> Option<AVHWDeviceType> {
    Some(match device {
        DeviceType::Vdpau => AVHWDeviceType::AV_HWDEVICE_TYPE_VDPAU,
        DeviceType::Cuda => AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
        DeviceType::Vaapi => AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
        DeviceType::Dxva2 => AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2,
        DeviceType::Qsv => AVHWDeviceType::AV_HWDEVICE_TYPE_QSV,
        DeviceType::VideoToolbox => AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX,
        DeviceType::D3d11va => AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA,
        DeviceType::Drm => AVHWDeviceType::AV_HWDEVICE_TYPE_DRM,
        DeviceType::Vulkan => AVHWDeviceType::AV_HWDEVICE_TYPE_VULKAN,
        DeviceType::Emulated => return None,
    })
}

fn device_type_from_av(av: AVHWDeviceType) -> Option<DeviceType> {
    DeviceType::ALL
        .into_iter()
        .find(|&t| av_device_type(t) == Some(av))
}

fn pixel_format_from_av(av: i32) -> Option<PixelFormat> {
    use AVPixelFormat::*;
    let table = [
        (AV_PIX_FMT_GRAY8, PixelFormat::Gray8),
        (AV_PIX_FMT_YUV420P, PixelFormat::Yuv420p),
        (AV_PIX_FMT_YUVJ420P, PixelFormat::Yuv420p),
        (AV_PIX_FMT_NV12, PixelFormat::Nv12),
        (AV_PIX_FMT_RGB24, PixelFormat::Rgb24),
        (AV_PIX_FMT_CUDA, PixelFormat::Cuda),
        (AV_PIX_FMT_VAAPI, PixelFormat::Vaapi),
        (AV_PIX_FMT_VDPAU, PixelFormat::Vdpau),
        (AV_PIX_FMT_QSV, PixelFormat::Qsv),
        (AV_PIX_FMT_VIDEOTOOLBOX, PixelFormat::VideoToolbox),
        (AV_PIX_FMT_D3D11, PixelFormat::D3d11),
        (AV_PIX_FMT_DXVA2_VLD, PixelFormat::Dxva2),
        (AV_PIX_FMT_DRM_PRIME, PixelFormat::DrmPrime),
        (AV_PIX_FMT_VULKAN, PixelFormat::Vulkan),
    ];
    table
        .into_iter()
        .find(|(fmt, _)| *fmt as i32 == av)
        .map(|(_, format)| format)
}

fn av_pixel_format(format: PixelFormat) -> Result<AVPixelFormat> {
    Ok(match format {
        PixelFormat::Gray8 => AVPixelFormat::AV_PIX_FMT_GRAY8,
        PixelFormat::Yuv420p => AVPixelFormat::AV_PIX_FMT_YUV420P,
        PixelFormat::Nv12 => AVPixelFormat::AV_PIX_FMT_NV12,
        PixelFormat::Rgb24 => AVPixelFormat::AV_PIX_FMT_RGB24,
        other => {
            return Err(PumpError::Configuration(format!(
                "{other} has no FFmpeg software equivalent"
            )));
        }
    })
}

fn opt_ts(ts: i64) -> Option<i64> {
    (ts != AV_NOPTS_VALUE).then_some(ts)
}

/// # Safety
/// `codec` must point to a registered `AVCodec`.
unsafe fn describe(codec: *const AVCodec) -> CodecDescriptor {
    // SAFETY: caller guarantees `codec` is valid for the process lifetime.
    let (name, long_name, is_decoder) = unsafe {
        (
            c_str((*codec).name),
            c_str((*codec).long_name),
            av_codec_is_decoder(codec) != 0,
        )
    };
    let mut hw_configs = Vec::new();
    for i in 0.. {
        // SAFETY: index past the end returns null.
        let config = unsafe { avcodec_get_hw_config(codec, i) };
        if config.is_null() {
            break;
        }
        // SAFETY: non-null configs point into static codec tables.
        let config = unsafe { &*config };
        let (Some(device_type), Some(pix_fmt)) = (
            device_type_from_av(config.device_type),
            pixel_format_from_av(config.pix_fmt as i32),
        ) else {
            continue;
        };
        hw_configs.push(HwConfig {
            pix_fmt,
            methods: HwConfigMethods::from_bits(config.methods as u8),
            device_type,
        });
    }
    CodecDescriptor {
        name,
        long_name,
        kind: if is_decoder {
            CodecKind::Decoder
        } else {
            CodecKind::Encoder
        },
        hw_configs,
    }
}

/// Every video codec FFmpeg was built with.
pub fn list_codecs() -> Vec<CodecDescriptor> {
    let mut codecs = Vec::new();
    let mut opaque: *mut std::ffi::c_void = ptr::null_mut();
    loop {
        // SAFETY: opaque is the iteration cookie FFmpeg expects.
        let codec = unsafe { av_codec_iterate(&mut opaque) };
        if codec.is_null() {
            break;
        }
        // SAFETY: iterated codecs are valid static tables.
        if unsafe { (*codec).type_ } == AVMediaType::AVMEDIA_TYPE_VIDEO {
            codecs.push(unsafe { describe(codec) });
        }
    }
    codecs
}

// ── Hardware device ──────────────────────────────────────────────────────────

/// Owned reference to an `AVHWDeviceContext`.
pub struct FfmpegDevice {
    buf: *mut AVBufferRef,
}

// SAFETY: AVHWDeviceContext is reference counted and thread-safe to share.
unsafe impl Send for FfmpegDevice {}
unsafe impl Sync for FfmpegDevice {}

impl NativeDevice for FfmpegDevice {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for FfmpegDevice {
    fn drop(&mut self) {
        // SAFETY: buf was produced by av_hwdevice_ctx_create.
        unsafe { av_buffer_unref(&mut self.buf) };
    }
}

pub fn create_device(device_type: DeviceType) -> Result<Arc<DeviceContext>> {
    let av_type = av_device_type(device_type).ok_or_else(|| {
        PumpError::Configuration(format!("{device_type} is not an FFmpeg device type"))
    })?;
    let mut buf: *mut AVBufferRef = ptr::null_mut();
    // SAFETY: out-pointer is valid; null device/options select defaults.
    let ret = unsafe { av_hwdevice_ctx_create(&mut buf, av_type, ptr::null(), ptr::null_mut(), 0) };
    check(ret, "Failed to create specified HW device").map_err(|e| {
        PumpError::Configuration(e.to_string())
    })?;
    Ok(DeviceContext::with_native(
        device_type,
        Box::new(FfmpegDevice { buf }),
    ))
}

/// A decoded frame still on the device.
struct FfmpegSurface {
    frame: *mut AVFrame,
}

// SAFETY: the frame is only touched by the owner of the surface.
unsafe impl Send for FfmpegSurface {}

impl SurfaceMemory for FfmpegSurface {
    fn download(
        &self,
        _context: &DeviceContext,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Vec<Plane>> {
        // SAFETY: sw frame is owned locally and freed on every path.
        unsafe {
            let mut sw = av_frame_alloc();
            if sw.is_null() {
                return Err(PumpError::ResourceExhaustion("av_frame_alloc failed".into()));
            }
            let ret = av_hwframe_transfer_data(sw, self.frame, 0);
            let result = check(ret, "Error transferring the data to system memory")
                .map_err(|e| PumpError::TransferFailure(e.to_string()))
                .and_then(|()| copy_planes(sw, format, width, height));
            av_frame_free(&mut sw);
            result
        }
    }

    fn release(&mut self, _context: &DeviceContext) {
        // SAFETY: frame was produced by av_frame_clone.
        unsafe { av_frame_free(&mut self.frame) };
    }
}

/// # Safety
/// `frame` must be a valid host-resident frame of `format`.
unsafe fn copy_planes(
    frame: *const AVFrame,
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<Vec<Plane>> {
    // SAFETY: caller guarantees a valid frame.
    let frame = unsafe { &*frame };
    if pixel_format_from_av(frame.format) != Some(format) {
        return Err(PumpError::TransferFailure(format!(
            "frame format {} does not match expected {format}",
            frame.format
        )));
    }
    let mut planes = Vec::with_capacity(format.plane_count());
    for p in 0..format.plane_count() {
        let stride = usize::try_from(frame.linesize[p]).map_err(|_| {
            PumpError::TransferFailure(format!("negative linesize on plane {p}"))
        })?;
        let rows = format.plane_rows(p, height);
        let len = stride * rows.saturating_sub(1) + format.plane_row_bytes(p, width);
        if frame.data[p].is_null() {
            return Err(PumpError::TransferFailure(format!("plane {p} has no data")));
        }
        // SAFETY: FFmpeg guarantees `linesize * rows` readable bytes per plane.
        let data = unsafe { std::slice::from_raw_parts(frame.data[p], len) }.to_vec();
        planes.push(Plane { data, stride });
    }
    Ok(planes)
}

// ── Decoder ──────────────────────────────────────────────────────────────────

pub struct FfmpegDecoder {
    ctx: *mut AVCodecContext,
    frame: *mut AVFrame,
    pkt: *mut AVPacket,
    descriptor: CodecDescriptor,
    device: Option<(Arc<DeviceContext>, PixelFormat)>,
}

// SAFETY: FFmpeg contexts are used from one thread at a time.
unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    /// Open a decoder by name; `Ok(None)` if FFmpeg has no such decoder.
    pub fn open(name: &str, config: &DecoderConfig) -> Result<Option<Self>> {
        let c_name = to_cstring(name)?;
        // SAFETY: c_name is NUL-terminated.
        let codec = unsafe { avcodec_find_decoder_by_name(c_name.as_ptr()) };
        if codec.is_null() {
            return Ok(None);
        }
        // SAFETY: codec is a valid registered decoder.
        unsafe { Self::with_codec(codec, ptr::null(), config) }.map(Some)
    }

    /// # Safety
    /// `codec` must be valid; `params` null or valid for the call.
    unsafe fn with_codec(
        codec: *const AVCodec,
        params: *const AVCodecParameters,
        config: &DecoderConfig,
    ) -> Result<Self> {
        // SAFETY: forwarded from the caller.
        let descriptor = unsafe { describe(codec) };
        let device = match &config.device {
            Some(ctx) => {
                let hw = negotiate_hw_format(&descriptor, ctx.device_type())?;
                Some((Arc::clone(ctx), hw))
            }
            None => None,
        };

        // SAFETY: every allocation is checked and freed by Drop on failure.
        unsafe {
            let ctx = avcodec_alloc_context3(codec);
            if ctx.is_null() {
                return Err(PumpError::ResourceExhaustion(
                    "Could not allocate video codec context".into(),
                ));
            }
            let mut decoder = Self {
                ctx,
                frame: av_frame_alloc(),
                pkt: av_packet_alloc(),
                descriptor,
                device,
            };
            if decoder.frame.is_null() || decoder.pkt.is_null() {
                return Err(PumpError::ResourceExhaustion(
                    "Could not allocate frame or packet".into(),
                ));
            }
            if !params.is_null() {
                check(
                    avcodec_parameters_to_context(ctx, params),
                    "avcodec_parameters_to_context",
                )?;
            }
            if let Some((device_ctx, _)) = &decoder.device {
                let native = device_ctx.native::<FfmpegDevice>().ok_or_else(|| {
                    PumpError::Configuration(format!(
                        "{} device was not created by FFmpeg",
                        device_ctx.device_type()
                    ))
                })?;
                (*ctx).hw_device_ctx = av_buffer_ref(native.buf);
            }
            check(avcodec_open2(ctx, codec, ptr::null_mut()), "Could not open codec")
                .map_err(|e| PumpError::Configuration(e.to_string()))?;

            info!(
                codec = %decoder.descriptor.name,
                hw_format = ?decoder.device.as_ref().map(|(_, hw)| *hw),
                "FFmpeg decoder opened"
            );
            Ok(decoder)
        }
    }
}

impl DecodeEngine for FfmpegDecoder {
    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()> {
        let ret = match packet {
            None => unsafe { avcodec_send_packet(self.ctx, ptr::null()) },
            Some(packet) => {
                let size = i32::try_from(packet.size()).map_err(|_| {
                    PumpError::EngineRejected(format!(
                        "packet of {} bytes too large",
                        packet.size()
                    ))
                })?;
                // SAFETY: av_new_packet allocates size + padding bytes.
                unsafe {
                    check(av_new_packet(self.pkt, size), "av_new_packet")?;
                    ptr::copy_nonoverlapping(packet.data.as_ptr(), (*self.pkt).data, packet.size());
                    (*self.pkt).pts = packet.pts.unwrap_or(AV_NOPTS_VALUE);
                    (*self.pkt).dts = packet.dts.unwrap_or(AV_NOPTS_VALUE);
                    let ret = avcodec_send_packet(self.ctx, self.pkt);
                    av_packet_unref(self.pkt);
                    ret
                }
            }
        };
        check(ret, "Error sending a packet for decoding")
            .map_err(|e| PumpError::EngineRejected(e.to_string()))
    }

    fn receive_frame(&mut self) -> Result<Receive<Frame>> {
        // SAFETY: ctx and frame are valid for the decoder lifetime.
        let ret = unsafe { avcodec_receive_frame(self.ctx, self.frame) };
        if let Some(outcome) = receive_outcome(ret) {
            return Ok(outcome);
        }
        check(ret, "Error during decoding").map_err(|e| PumpError::Decode(e.to_string()))?;

        // SAFETY: a successful receive fills `frame`; it is unreffed below.
        let result = unsafe {
            let av = &*self.frame;
            let width = av.width as u32;
            let height = av.height as u32;
            let pts = opt_ts(av.best_effort_timestamp).or(opt_ts(av.pts));
            match &self.device {
                Some((device_ctx, hw)) if pixel_format_from_av(av.format) == Some(*hw) => {
                    let frames_ctx = av.hw_frames_ctx;
                    let sw_format = if frames_ctx.is_null() {
                        None
                    } else {
                        let frames = (*frames_ctx).data as *const AVHWFramesContext;
                        pixel_format_from_av((*frames).sw_format as i32)
                    };
                    let clone = av_frame_clone(self.frame);
                    match (sw_format, clone.is_null()) {
                        (Some(sw_format), false) => Ok(Frame {
                            format: *hw,
                            width,
                            height,
                            pts,
                            data: FrameData::Device(DeviceSurface::new(
                                Arc::clone(device_ctx),
                                sw_format,
                                width,
                                height,
                                Box::new(FfmpegSurface { frame: clone }),
                            )),
                        }),
                        (None, _) => {
                            let mut clone = clone;
                            av_frame_free(&mut clone);
                            Err(PumpError::TransferFailure(
                                "hardware frame has no supported software format".into(),
                            ))
                        }
                        (_, true) => Err(PumpError::ResourceExhaustion(
                            "av_frame_clone failed".into(),
                        )),
                    }
                }
                _ => match pixel_format_from_av(av.format) {
                    Some(format) if !format.is_hardware() => {
                        copy_planes(self.frame, format, width, height).map(|planes| Frame {
                            format,
                            width,
                            height,
                            pts,
                            data: FrameData::Host(planes),
                        })
                    }
                    _ => Err(PumpError::Decode(format!(
                        "unsupported decoded pixel format {}",
                        av.format
                    ))),
                },
            }
        };
        // SAFETY: frame is reused for the next receive.
        unsafe { av_frame_unref(self.frame) };
        result.map(Receive::Produced)
    }

    fn frame_number(&self) -> u64 {
        // SAFETY: ctx is valid for the decoder lifetime.
        let count = unsafe { (*self.ctx).frame_num };
        u64::try_from(count).unwrap_or(0)
    }

    fn hw_format(&self) -> Option<PixelFormat> {
        self.device.as_ref().map(|(_, hw)| *hw)
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        // SAFETY: pointers are owned; the free functions accept null.
        unsafe {
            av_packet_free(&mut self.pkt);
            av_frame_free(&mut self.frame);
            avcodec_free_context(&mut self.ctx);
        }
        debug!(codec = %self.descriptor.name, "FFmpeg decoder closed");
    }
}

// ── Encoder ──────────────────────────────────────────────────────────────────

pub struct FfmpegEncoder {
    ctx: *mut AVCodecContext,
    frame: *mut AVFrame,
    pkt: *mut AVPacket,
    descriptor: CodecDescriptor,
    config: EncoderConfig,
}

// SAFETY: FFmpeg contexts are used from one thread at a time.
unsafe impl Send for FfmpegEncoder {}

impl FfmpegEncoder {
    pub fn open(name: &str, config: &EncoderConfig) -> Result<Option<Self>> {
        config.validate()?;
        let c_name = to_cstring(name)?;
        // SAFETY: c_name is NUL-terminated.
        let codec = unsafe { avcodec_find_encoder_by_name(c_name.as_ptr()) };
        if codec.is_null() {
            return Ok(None);
        }
        let pix_fmt = av_pixel_format(config.pix_fmt)?;

        // SAFETY: allocations are checked and owned by the returned value.
        unsafe {
            let ctx = avcodec_alloc_context3(codec);
            if ctx.is_null() {
                return Err(PumpError::ResourceExhaustion(
                    "Could not allocate video codec context".into(),
                ));
            }
            let encoder = Self {
                ctx,
                frame: av_frame_alloc(),
                pkt: av_packet_alloc(),
                descriptor: describe(codec),
                config: config.clone(),
            };
            if encoder.frame.is_null() || encoder.pkt.is_null() {
                return Err(PumpError::ResourceExhaustion(
                    "Could not allocate frame or packet".into(),
                ));
            }
            (*ctx).bit_rate = i64::try_from(config.bit_rate).unwrap_or(i64::MAX);
            (*ctx).width = config.width as i32;
            (*ctx).height = config.height as i32;
            (*ctx).time_base = AVRational { num: 1, den: config.fps as i32 };
            (*ctx).framerate = AVRational { num: config.fps as i32, den: 1 };
            (*ctx).gop_size = config.gop_size as i32;
            (*ctx).max_b_frames = config.max_b_frames as i32;
            (*ctx).pix_fmt = pix_fmt;
            if (*codec).id == AVCodecID::AV_CODEC_ID_H264 {
                av_opt_set((*ctx).priv_data, c"preset".as_ptr(), c"slow".as_ptr(), 0);
            }
            check(avcodec_open2(ctx, codec, ptr::null_mut()), "Could not open codec")
                .map_err(|e| PumpError::Configuration(e.to_string()))?;

            (*encoder.frame).format = pix_fmt as i32;
            (*encoder.frame).width = config.width as i32;
            (*encoder.frame).height = config.height as i32;
            check(
                av_frame_get_buffer(encoder.frame, 0),
                "Could not allocate the video frame data",
            )?;

            info!(
                codec = name,
                width = config.width,
                height = config.height,
                "FFmpeg encoder opened"
            );
            Ok(Some(encoder))
        }
    }
}

impl EncodeEngine for FfmpegEncoder {
    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn send_frame(&mut self, frame: Option<&Frame>) -> Result<()> {
        let Some(frame) = frame else {
            // SAFETY: null frame enters draining mode.
            let ret = unsafe { avcodec_send_frame(self.ctx, ptr::null()) };
            return check(ret, "Error sending a frame for encoding")
                .map_err(|e| PumpError::EngineRejected(e.to_string()));
        };
        let planes = frame.planes().ok_or_else(|| {
            PumpError::EngineRejected("encoder only accepts host-resident frames".into())
        })?;
        if frame.format != self.config.pix_fmt
            || frame.width != self.config.width
            || frame.height != self.config.height
        {
            return Err(PumpError::EngineRejected(format!(
                "frame {}x{} {} does not match encoder configuration",
                frame.width, frame.height, frame.format
            )));
        }

        // SAFETY: the frame buffer was allocated for this geometry.
        unsafe {
            check(av_frame_make_writable(self.frame), "av_frame_make_writable")?;
            let av = &mut *self.frame;
            for (p, plane) in planes.iter().enumerate().take(frame.format.plane_count()) {
                let row_bytes = frame.format.plane_row_bytes(p, frame.width);
                let dst_stride = av.linesize[p] as usize;
                for row in 0..frame.format.plane_rows(p, frame.height) {
                    let start = row * plane.stride;
                    let src = plane.data.get(start..start + row_bytes).ok_or_else(|| {
                        PumpError::EngineRejected(format!("plane {p} shorter than its geometry"))
                    })?;
                    let dst = av.data[p].add(row * dst_stride);
                    ptr::copy_nonoverlapping(src.as_ptr(), dst, row_bytes);
                }
            }
            av.pts = frame.pts.unwrap_or(AV_NOPTS_VALUE);
            let ret = avcodec_send_frame(self.ctx, self.frame);
            check(ret, "Error sending a frame for encoding")
                .map_err(|e| PumpError::EngineRejected(e.to_string()))
        }
    }

    fn receive_packet(&mut self) -> Result<Receive<Packet>> {
        // SAFETY: ctx and pkt are valid for the encoder lifetime.
        let ret = unsafe { avcodec_receive_packet(self.ctx, self.pkt) };
        if let Some(outcome) = receive_outcome(ret) {
            return Ok(outcome);
        }
        check(ret, "Error during encoding").map_err(|e| PumpError::Encode(e.to_string()))?;
        // SAFETY: a successful receive fills `pkt`; it is unreffed after copying.
        unsafe {
            let pkt = &*self.pkt;
            let data = if pkt.size > 0 && !pkt.data.is_null() {
                std::slice::from_raw_parts(pkt.data, pkt.size as usize).to_vec()
            } else {
                Vec::new()
            };
            let packet = Packet {
                data,
                pts: opt_ts(pkt.pts),
                dts: opt_ts(pkt.dts),
                stream_index: 0,
                is_keyframe: pkt.flags & AV_PKT_FLAG_KEY != 0,
            };
            av_packet_unref(self.pkt);
            Ok(Receive::Produced(packet))
        }
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        // SAFETY: pointers are owned; the free functions accept null.
        unsafe {
            av_packet_free(&mut self.pkt);
            av_frame_free(&mut self.frame);
            avcodec_free_context(&mut self.ctx);
        }
        debug!(codec = %self.descriptor.name, "FFmpeg encoder closed");
    }
}

// ── Parser ───────────────────────────────────────────────────────────────────

pub struct FfmpegParser {
    parser: *mut AVCodecParserContext,
    ctx: *mut AVCodecContext,
}

// SAFETY: parser state is used from one thread at a time.
unsafe impl Send for FfmpegParser {}

impl FfmpegParser {
    /// Parser for the decoder `name`; `Ok(None)` if there is no such decoder.
    pub fn open(name: &str) -> Result<Option<Self>> {
        let c_name = to_cstring(name)?;
        // SAFETY: c_name is NUL-terminated; results are checked.
        unsafe {
            let codec = avcodec_find_decoder_by_name(c_name.as_ptr());
            if codec.is_null() {
                return Ok(None);
            }
            let parser = av_parser_init((*codec).id as i32);
            if parser.is_null() {
                return Err(PumpError::Configuration("parser not found".into()));
            }
            let ctx = avcodec_alloc_context3(codec);
            if ctx.is_null() {
                av_parser_close(parser);
                return Err(PumpError::ResourceExhaustion(
                    "Could not allocate video codec context".into(),
                ));
            }
            Ok(Some(Self { parser, ctx }))
        }
    }
}

impl PacketParser for FfmpegParser {
    fn parse(&mut self, input: PaddedSlice<'_>) -> Result<ParseStep> {
        let mut out: *mut u8 = ptr::null_mut();
        let mut out_size: i32 = 0;
        let size = i32::try_from(input.len())
            .map_err(|_| PumpError::MalformedInput("parser input too large".into()))?;
        // SAFETY: the input is followed by INPUT_PADDING zero bytes.
        let ret = unsafe {
            av_parser_parse2(
                self.parser,
                self.ctx,
                &mut out,
                &mut out_size,
                input.padded().as_ptr(),
                size,
                AV_NOPTS_VALUE,
                AV_NOPTS_VALUE,
                0,
            )
        };
        check(ret, "Error while parsing").map_err(|e| PumpError::MalformedInput(e.to_string()))?;
        let packet = (out_size > 0 && !out.is_null()).then(|| {
            // SAFETY: the parser returns a buffer valid until the next call.
            Packet::new(unsafe { std::slice::from_raw_parts(out, out_size as usize) }.to_vec())
        });
        Ok(ParseStep {
            consumed: ret as usize,
            packet,
        })
    }
}

impl Drop for FfmpegParser {
    fn drop(&mut self) {
        // SAFETY: both pointers are owned.
        unsafe {
            av_parser_close(self.parser);
            avcodec_free_context(&mut self.ctx);
        }
    }
}

// ── Container source ─────────────────────────────────────────────────────────

/// Demuxer over any container FFmpeg can open.
pub struct FfmpegSource {
    fmt_ctx: *mut AVFormatContext,
    pkt: *mut AVPacket,
    best: Option<(i32, *const AVCodec)>,
}

// SAFETY: format context is used from one thread at a time.
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| PumpError::Configuration("Non-UTF8 path".into()))?;
        let c_path = to_cstring(path_str)?;
        // SAFETY: out-pointers are valid; failure paths close what was opened.
        unsafe {
            let mut fmt_ctx: *mut AVFormatContext = ptr::null_mut();
            let ret =
                avformat_open_input(&mut fmt_ctx, c_path.as_ptr(), ptr::null(), ptr::null_mut());
            check(ret, &format!("Cannot open input file '{}'", path.display()))?;
            let ret = avformat_find_stream_info(fmt_ctx, ptr::null_mut());
            if ret < 0 {
                avformat_close_input(&mut fmt_ctx);
                check(ret, "Cannot find input stream information")?;
            }
            let pkt = av_packet_alloc();
            if pkt.is_null() {
                avformat_close_input(&mut fmt_ctx);
                return Err(PumpError::ResourceExhaustion("Failed to allocate AVPacket".into()));
            }
            info!(path = %path.display(), "FFmpeg demuxer opened");
            Ok(Self {
                fmt_ctx,
                pkt,
                best: None,
            })
        }
    }

    /// Decoder for the stream chosen by [`ContainerSource::find_best_stream`],
    /// configured from the stream's codec parameters.
    pub fn open_decoder(&self, config: &DecoderConfig) -> Result<FfmpegDecoder> {
        let (index, codec) = self.best.ok_or_else(|| {
            PumpError::Configuration("no stream selected; call find_best_stream first".into())
        })?;
        // SAFETY: index was returned by av_find_best_stream for this context.
        unsafe {
            let stream = *(*self.fmt_ctx).streams.add(index as usize);
            FfmpegDecoder::with_codec(codec, (*stream).codecpar, config)
        }
    }
}

impl ContainerSource for FfmpegSource {
    fn find_best_stream(&mut self) -> Result<StreamInfo> {
        let mut codec: *const AVCodec = ptr::null();
        // SAFETY: fmt_ctx is open; codec is an out-pointer.
        let index = unsafe {
            av_find_best_stream(
                self.fmt_ctx,
                AVMediaType::AVMEDIA_TYPE_VIDEO,
                -1,
                -1,
                &mut codec,
                0,
            )
        };
        if index < 0 || codec.is_null() {
            return Err(PumpError::Configuration(
                "Cannot find a video stream in the input file".into(),
            ));
        }
        self.best = Some((index, codec));
        // SAFETY: index and codec come from a successful lookup.
        unsafe {
            let stream = *(*self.fmt_ctx).streams.add(index as usize);
            let par = &*(*stream).codecpar;
            Ok(StreamInfo {
                index: index as usize,
                codec_name: c_str((*codec).name),
                width: par.width.max(0) as u32,
                height: par.height.max(0) as u32,
            })
        }
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        // SAFETY: fmt_ctx and pkt are owned and valid.
        unsafe {
            let ret = av_read_frame(self.fmt_ctx, self.pkt);
            if ret == AVERROR_EOF {
                return Ok(None);
            }
            check(ret, "av_read_frame")?;
            let pkt = &*self.pkt;
            let data = if pkt.size > 0 && !pkt.data.is_null() {
                std::slice::from_raw_parts(pkt.data, pkt.size as usize).to_vec()
            } else {
                Vec::new()
            };
            let packet = Packet {
                data,
                pts: opt_ts(pkt.pts),
                dts: opt_ts(pkt.dts),
                stream_index: pkt.stream_index.max(0) as usize,
                is_keyframe: pkt.flags & AV_PKT_FLAG_KEY != 0,
            };
            av_packet_unref(self.pkt);
            Ok(Some(packet))
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        // SAFETY: pointers are owned.
        unsafe {
            av_packet_free(&mut self.pkt);
            avformat_close_input(&mut self.fmt_ctx);
        }
        debug!("FFmpeg demuxer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_mapping_is_total_except_emulated() {
        for device in DeviceType::ALL {
            let mapped = av_device_type(device);
            assert_eq!(mapped.is_none(), device == DeviceType::Emulated);
            if let Some(av) = mapped {
                assert_eq!(device_type_from_av(av), Some(device));
            }
        }
    }

    #[test]
    fn try_again_is_starved_on_every_platform() {
        assert!(matches!(receive_outcome::<()>(-libc::EAGAIN), Some(Receive::Starved)));
        assert!(matches!(receive_outcome::<()>(AVERROR_EOF), Some(Receive::Exhausted)));
        assert!(receive_outcome::<()>(AVERROR(libc::EINVAL)).is_none());
    }

    #[test]
    fn decoder_frame_number_follows_codec_count() {
        let config = EncoderConfig {
            width: 64,
            height: 48,
            ..EncoderConfig::default()
        };
        let mut encoder = FfmpegEncoder::open("mpeg1video", &config)
            .expect("open encoder")
            .expect("mpeg1video encoder");
        let mut packets = Vec::new();
        for i in 0..3 {
            let mut frame = Frame::alloc_host(PixelFormat::Yuv420p, 64, 48, 32).expect("alloc");
            frame.pts = Some(i);
            for plane in frame.planes_mut().expect("host") {
                plane.data.fill(16 + i as u8 * 40);
            }
            encoder.send_frame(Some(&frame)).expect("send frame");
            while let Receive::Produced(packet) = encoder.receive_packet().expect("receive") {
                packets.push(packet);
            }
        }
        encoder.send_frame(None).expect("drain");
        while let Receive::Produced(packet) = encoder.receive_packet().expect("receive") {
            packets.push(packet);
        }

        let mut decoder = FfmpegDecoder::open("mpeg1video", &DecoderConfig::default())
            .expect("open decoder")
            .expect("mpeg1video decoder");
        assert_eq!(decoder.frame_number(), 0);
        let mut seen = Vec::new();
        for packet in packets.iter().map(Some).chain([None]) {
            decoder.send_packet(packet).expect("send packet");
            while let Receive::Produced(_) = decoder.receive_frame().expect("receive") {
                seen.push(decoder.frame_number());
            }
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn software_formats_round_trip_through_ffmpeg() {
        for format in PixelFormat::SOFTWARE {
            let av = av_pixel_format(format).expect("software format");
            assert_eq!(pixel_format_from_av(av as i32), Some(format));
        }
    }
}
