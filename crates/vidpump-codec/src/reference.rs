//! Reference `vpic` engines.
//!
//! Both engines implement the full send/receive protocol, including hidden
//! buffering: the decoder holds back `reorder_depth` units and the encoder
//! holds back `max_b_frames` frames, so callers see the same
//! starve/drain pattern real codecs produce.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info};
use vidpump_core::codec_traits::{
    CodecDescriptor, CodecKind, DecodeEngine, EncodeEngine, Receive,
};
use vidpump_core::context::{
    DeviceContext, DeviceType, HwConfig, HwConfigMethods, negotiate_hw_format,
};
use vidpump_core::error::{PumpError, Result};
use vidpump_core::types::{Frame, FrameData, PackedImage, Packet, PixelFormat, Plane};

use crate::config::{DecoderConfig, EncoderConfig};
use crate::vpic::{self, PictureHeader, Unit};

pub const CODEC_NAME: &str = "vpic";

/// Stride alignment of decoded host frames.
const FRAME_ALIGN: usize = 32;

pub fn decoder_descriptor() -> CodecDescriptor {
    CodecDescriptor {
        name: CODEC_NAME.into(),
        long_name: "vidpump reference start-coded pictures".into(),
        kind: CodecKind::Decoder,
        hw_configs: vec![HwConfig {
            pix_fmt: PixelFormat::Emulated,
            methods: HwConfigMethods::DEVICE_CONTEXT,
            device_type: DeviceType::Emulated,
        }],
    }
}

pub fn encoder_descriptor() -> CodecDescriptor {
    CodecDescriptor {
        name: CODEC_NAME.into(),
        long_name: "vidpump reference start-coded pictures".into(),
        kind: CodecKind::Encoder,
        hw_configs: Vec::new(),
    }
}

// ─── Decoder ────────────────────────────────────────────────────────────

pub struct VpicDecoder {
    descriptor: CodecDescriptor,
    reorder_depth: usize,
    device: Option<(Arc<DeviceContext>, PixelFormat)>,
    pending: VecDeque<Packet>,
    draining: bool,
    frame_number: u64,
}

impl VpicDecoder {
    pub fn new(config: &DecoderConfig) -> Result<Self> {
        let descriptor = decoder_descriptor();
        let device = match &config.device {
            Some(ctx) => {
                let hw = negotiate_hw_format(&descriptor, ctx.device_type())?;
                Some((Arc::clone(ctx), hw))
            }
            None => None,
        };
        info!(
            codec = CODEC_NAME,
            reorder_depth = config.reorder_depth,
            device = ?device.as_ref().map(|(ctx, _)| ctx.device_type()),
            "Decoder opened"
        );
        Ok(Self {
            descriptor,
            reorder_depth: config.reorder_depth,
            device,
            pending: VecDeque::new(),
            draining: false,
            frame_number: 0,
        })
    }

    fn decode_unit(&self, packet: &Packet) -> Result<Option<Frame>> {
        let (header, payload) = match vpic::parse_unit(&packet.data)? {
            Unit::Picture { header, payload } => (header, payload),
            Unit::SequenceEnd => {
                debug!("Sequence end code");
                return Ok(None);
            }
            Unit::Other(kind) => {
                debug!(unit_type = kind, "Skipping unknown unit");
                return Ok(None);
            }
        };

        let mut frame = Frame::alloc_host(header.format, header.width, header.height, FRAME_ALIGN)
            .map_err(|e| PumpError::Decode(e.to_string()))?;
        frame.pts = header.pts.or(packet.pts);
        let planes = frame
            .planes_mut()
            .ok_or_else(|| PumpError::Decode("decoder frame is not host-resident".into()))?;
        scatter_rows(header.format, header.width, header.height, &payload, planes);

        match &self.device {
            Some((ctx, hw_format)) => {
                let surface = ctx.upload(&frame)?;
                Ok(Some(Frame {
                    format: *hw_format,
                    width: frame.width,
                    height: frame.height,
                    pts: frame.pts,
                    data: FrameData::Device(surface),
                }))
            }
            None => Ok(Some(frame)),
        }
    }
}

fn scatter_rows(format: PixelFormat, width: u32, height: u32, packed: &[u8], planes: &mut [Plane]) {
    let mut offset = 0;
    for (p, plane) in planes.iter_mut().enumerate() {
        let row_bytes = format.plane_row_bytes(p, width);
        for row in 0..format.plane_rows(p, height) {
            let dst = row * plane.stride;
            plane.data[dst..dst + row_bytes].copy_from_slice(&packed[offset..offset + row_bytes]);
            offset += row_bytes;
        }
    }
}

impl DecodeEngine for VpicDecoder {
    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn send_packet(&mut self, packet: Option<&Packet>) -> Result<()> {
        if self.draining {
            return Err(PumpError::EngineRejected(
                "decoder is draining; no further input accepted".into(),
            ));
        }
        match packet {
            None => {
                debug!(pending = self.pending.len(), "Decoder entering drain mode");
                self.draining = true;
            }
            Some(packet) if packet.is_empty() => {}
            Some(packet) => {
                if !packet.data.starts_with(&[0, 0]) {
                    return Err(PumpError::EngineRejected(format!(
                        "packet of {} bytes does not start with a start code",
                        packet.size()
                    )));
                }
                self.pending.push_back(packet.clone());
            }
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Receive<Frame>> {
        loop {
            let ready = self.pending.len() > self.reorder_depth
                || (self.draining && !self.pending.is_empty());
            if !ready {
                return Ok(if self.draining {
                    Receive::Exhausted
                } else {
                    Receive::Starved
                });
            }
            let Some(packet) = self.pending.pop_front() else {
                continue;
            };
            if let Some(frame) = self.decode_unit(&packet)? {
                self.frame_number += 1;
                return Ok(Receive::Produced(frame));
            }
        }
    }

    fn frame_number(&self) -> u64 {
        self.frame_number
    }

    fn hw_format(&self) -> Option<PixelFormat> {
        self.device.as_ref().map(|(_, hw)| *hw)
    }
}

// ─── Encoder ────────────────────────────────────────────────────────────

pub struct VpicEncoder {
    descriptor: CodecDescriptor,
    config: EncoderConfig,
    lookahead: usize,
    ready: VecDeque<Packet>,
    draining: bool,
    frames_in: u64,
}

impl VpicEncoder {
    pub fn new(config: &EncoderConfig) -> Result<Self> {
        config.validate()?;
        info!(
            codec = CODEC_NAME,
            width = config.width,
            height = config.height,
            fps = config.fps,
            gop = config.gop_size,
            max_b_frames = config.max_b_frames,
            bit_rate = config.bit_rate,
            pix_fmt = %config.pix_fmt,
            "Encoder opened"
        );
        Ok(Self {
            descriptor: encoder_descriptor(),
            config: config.clone(),
            lookahead: config.max_b_frames as usize,
            ready: VecDeque::new(),
            draining: false,
            frames_in: 0,
        })
    }
}

impl EncodeEngine for VpicEncoder {
    fn descriptor(&self) -> &CodecDescriptor {
        &self.descriptor
    }

    fn send_frame(&mut self, frame: Option<&Frame>) -> Result<()> {
        if self.draining {
            return Err(PumpError::EngineRejected(
                "encoder is draining; no further input accepted".into(),
            ));
        }
        let Some(frame) = frame else {
            debug!(pending = self.ready.len(), "Encoder entering drain mode");
            self.draining = true;
            return Ok(());
        };

        let planes = frame.planes().ok_or_else(|| {
            PumpError::EngineRejected("encoder only accepts host-resident frames".into())
        })?;
        if frame.format != self.config.pix_fmt
            || frame.width != self.config.width
            || frame.height != self.config.height
        {
            return Err(PumpError::EngineRejected(format!(
                "frame {}x{} {} does not match encoder {}x{} {}",
                frame.width,
                frame.height,
                frame.format,
                self.config.width,
                self.config.height,
                self.config.pix_fmt
            )));
        }

        let image =
            PackedImage::from_planes(frame.format, frame.width, frame.height, frame.pts, planes)?;
        let header = PictureHeader {
            width: image.width,
            height: image.height,
            format: image.format,
            pts: image.pts,
        };
        let data = vpic::write_picture(&header, &image.data)?;
        let is_keyframe = self.frames_in % u64::from(self.config.gop_size) == 0;
        self.frames_in += 1;
        self.ready.push_back(Packet {
            data,
            pts: frame.pts,
            dts: frame.pts,
            stream_index: 0,
            is_keyframe,
        });
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Receive<Packet>> {
        if self.ready.len() > self.lookahead || (self.draining && !self.ready.is_empty()) {
            if let Some(packet) = self.ready.pop_front() {
                return Ok(Receive::Produced(packet));
            }
        }
        Ok(if self.draining {
            Receive::Exhausted
        } else {
            Receive::Starved
        })
    }
}
