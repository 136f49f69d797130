//! Decode pump.
//!
//! Every submission is one send followed by a drain: the pump pulls frames
//! until the engine reports it is starved (more input needed) or exhausted
//! (flush complete).  Each frame is resolved to host memory and written to
//! the sink before the next one is requested, so nothing is buffered
//! outside the engine.

use tracing::{debug, info};
use vidpump_core::codec_traits::{DecodeEngine, FrameSink, Receive};
use vidpump_core::error::{PumpError, Result};
use vidpump_core::types::Packet;

use crate::metrics::PumpMetrics;
use crate::resolver::HwSurfaceResolver;

pub struct DecodePump {
    engine: Box<dyn DecodeEngine>,
    resolver: HwSurfaceResolver,
    sink: Box<dyn FrameSink>,
    metrics: PumpMetrics,
    flushing: bool,
    finished: bool,
}

impl DecodePump {
    /// The resolver is configured from the engine's negotiated hardware
    /// format.
    pub fn new(engine: Box<dyn DecodeEngine>, sink: Box<dyn FrameSink>) -> Self {
        let resolver = HwSurfaceResolver::new(engine.hw_format());
        Self {
            engine,
            resolver,
            sink,
            metrics: PumpMetrics::default(),
            flushing: false,
            finished: false,
        }
    }

    pub fn metrics(&self) -> &PumpMetrics {
        &self.metrics
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Send one packet (or `None` to flush) and drain what it produced.
    ///
    /// Returns the number of frames written to the sink.
    pub fn submit(&mut self, packet: Option<&Packet>) -> Result<u64> {
        if self.finished || self.flushing {
            return Err(PumpError::EngineRejected("decode pump already flushed".into()));
        }
        match packet {
            Some(packet) => {
                debug!(size = packet.size(), pts = ?packet.pts, "Send packet");
                self.metrics.units_in += 1;
            }
            None => {
                debug!("Send flush");
                self.flushing = true;
            }
        }
        self.engine.send_packet(packet)?;
        self.drain()
    }

    /// Flush the engine and drain it completely.
    pub fn flush(&mut self) -> Result<u64> {
        let frames = self.submit(None)?;
        self.sink.flush()?;
        self.metrics.bytes_written = self.sink.bytes_written();
        self.metrics.report("decode");
        Ok(frames)
    }

    fn drain(&mut self) -> Result<u64> {
        let mut frames = 0;
        loop {
            match self.engine.receive_frame()? {
                Receive::Produced(frame) => {
                    let frame_number = self.engine.frame_number();
                    let image = self.resolver.resolve(frame)?;
                    self.sink.write_frame(&image, frame_number)?;
                    frames += 1;
                    self.metrics.units_out += 1;
                    if self.flushing {
                        self.metrics.flush_outputs += 1;
                    }
                }
                Receive::Starved if self.flushing => {
                    return Err(PumpError::EngineRejected(
                        "engine asked for input while draining".into(),
                    ));
                }
                Receive::Starved => {
                    self.metrics.starved += 1;
                    return Ok(frames);
                }
                Receive::Exhausted => {
                    if self.flushing {
                        self.finished = true;
                        info!(frames = self.metrics.units_out, "Decoder drained");
                    }
                    return Ok(frames);
                }
            }
        }
    }
}
