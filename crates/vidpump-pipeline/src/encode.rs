//! Encode pump: frames in, packets out, sequence end code last.

use tracing::{debug, info};
use vidpump_codec::vpic::SEQUENCE_END_CODE;
use vidpump_core::codec_traits::{BitstreamSink, EncodeEngine, Receive};
use vidpump_core::error::{PumpError, Result};
use vidpump_core::types::Frame;

use crate::metrics::PumpMetrics;

pub struct EncodePump {
    engine: Box<dyn EncodeEngine>,
    sink: Box<dyn BitstreamSink>,
    metrics: PumpMetrics,
    flushing: bool,
    finished: bool,
}

impl EncodePump {
    pub fn new(engine: Box<dyn EncodeEngine>, sink: Box<dyn BitstreamSink>) -> Self {
        Self {
            engine,
            sink,
            metrics: PumpMetrics::default(),
            flushing: false,
            finished: false,
        }
    }

    pub fn metrics(&self) -> &PumpMetrics {
        &self.metrics
    }

    /// Send one frame (or `None` to flush) and write every packet it
    /// released, in the order the engine returned them.
    pub fn submit(&mut self, frame: Option<&Frame>) -> Result<u64> {
        if self.finished || self.flushing {
            return Err(PumpError::EngineRejected(
                "encode pump already flushed".into(),
            ));
        }
        match frame {
            Some(frame) => {
                debug!(pts = ?frame.pts, "Send frame");
                self.metrics.units_in += 1;
            }
            None => self.flushing = true,
        }
        self.engine.send_frame(frame)?;
        self.drain()
    }

    /// Drain the encoder, append the sequence end code and flush the sink.
    pub fn finish(&mut self) -> Result<PumpMetrics> {
        self.submit(None)?;
        self.sink.write_trailer(&SEQUENCE_END_CODE)?;
        self.sink.flush()?;
        self.metrics.bytes_written = self.sink.bytes_written();
        self.metrics.report("encode");
        Ok(self.metrics)
    }

    fn drain(&mut self) -> Result<u64> {
        let mut packets = 0;
        loop {
            match self.engine.receive_packet()? {
                Receive::Produced(packet) => {
                    debug!(pts = ?packet.pts, size = packet.size(), "Write packet");
                    self.sink.write_packet(&packet)?;
                    packets += 1;
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
                    return Ok(packets);
                }
                Receive::Exhausted => {
                    if self.flushing {
                        self.finished = true;
                        info!(packets = self.metrics.units_out, "Encoder drained");
                    }
                    return Ok(packets);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use vidpump_codec::config::EncoderConfig;
    use vidpump_codec::reference::VpicEncoder;
    use vidpump_core::types::{Packet, PixelFormat};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>, Arc<Mutex<Vec<Option<i64>>>>);

    impl BitstreamSink for Capture {
        fn write_packet(&mut self, packet: &Packet) -> Result<()> {
            self.0.lock().expect("lock").extend_from_slice(&packet.data);
            self.1.lock().expect("lock").push(packet.pts);
            Ok(())
        }

        fn write_trailer(&mut self, trailer: &[u8]) -> Result<()> {
            self.0.lock().expect("lock").extend_from_slice(trailer);
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn config() -> EncoderConfig {
        EncoderConfig {
            width: 4,
            height: 4,
            max_b_frames: 2,
            pix_fmt: PixelFormat::Gray8,
            ..EncoderConfig::default()
        }
    }

    #[test]
    fn stream_ends_with_sequence_end_code_after_all_packets() {
        let capture = Capture::default();
        let engine = VpicEncoder::new(&config()).expect("encoder");
        let mut pump = EncodePump::new(Box::new(engine), Box::new(capture.clone()));
        for i in 0..5 {
            let mut frame = Frame::alloc_host(PixelFormat::Gray8, 4, 4, 1).expect("alloc");
            frame.pts = Some(i);
            pump.submit(Some(&frame)).expect("submit");
        }
        let metrics = pump.finish().expect("finish");
        assert_eq!(metrics.units_in, 5);
        assert_eq!(metrics.units_out, 5);
        assert_eq!(metrics.flush_outputs, 2);

        let bytes = capture.0.lock().expect("lock").clone();
        assert!(bytes.ends_with(&SEQUENCE_END_CODE));
        assert_eq!(
            bytes.windows(4).filter(|w| *w == SEQUENCE_END_CODE).count(),
            1
        );
        let pts = capture.1.lock().expect("lock").clone();
        assert_eq!(pts, (0..5).map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn finish_twice_is_rejected() {
        let engine = VpicEncoder::new(&config()).expect("encoder");
        let mut pump = EncodePump::new(Box::new(engine), Box::new(Capture::default()));
        pump.finish().expect("finish");
        assert!(matches!(pump.finish(), Err(PumpError::EngineRejected(_))));
    }
}
