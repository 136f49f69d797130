//! File-based [`BitstreamSink`]: writes encoded packets back to back.
//!
//! The output is a raw elementary stream.  The encode pump appends the
//! sequence end code through [`BitstreamSink::write_trailer`] once the
//! encoder is drained.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use vidpump_core::codec_traits::BitstreamSink;
use vidpump_core::error::{PumpError, Result};
use vidpump_core::types::Packet;

/// Writes encoded packets to a file.
pub struct FileBitstreamSink {
    writer: BufWriter<File>,
    bytes_written: u64,
    packets_written: u64,
    path: PathBuf,
}

impl FileBitstreamSink {
    pub fn new(path: PathBuf) -> Result<Self> {
        let file = File::create(&path)
            .map_err(|e| PumpError::io(format!("Could not open {}", path.display()), e))?;

        tracing::info!(path = %path.display(), "Output bitstream sink opened");

        Ok(Self {
            writer: BufWriter::with_capacity(4 * 1024 * 1024, file), // 4 MiB buffer
            bytes_written: 0,
            packets_written: 0,
            path,
        })
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data).map_err(|e| {
            PumpError::io(format!("Failed to write to {}", self.path.display()), e)
        })?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }
}

impl BitstreamSink for FileBitstreamSink {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.write_bytes(&packet.data)?;
        self.packets_written += 1;

        if self.packets_written.is_multiple_of(100) {
            tracing::debug!(
                packets = self.packets_written,
                bytes = self.bytes_written,
                "Sink progress"
            );
        }

        Ok(())
    }

    fn write_trailer(&mut self, trailer: &[u8]) -> Result<()> {
        self.write_bytes(trailer)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| {
            PumpError::io(format!("Failed to flush {}", self.path.display()), e)
        })?;

        tracing::info!(
            path = %self.path.display(),
            packets = self.packets_written,
            bytes = self.bytes_written,
            "Sink flushed"
        );

        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}
