//! Elementary-stream demuxer for raw `vpic` files.
//!
//! A raw start-coded file has exactly one stream.  The demuxer identifies it
//! by parsing the first picture unit and then hands out one packet per unit.
//! Identification only looks at the first [`SNIFF_LIMIT`] bytes; anything
//! without a picture there is reported as not an elementary stream so the
//! caller can try a container demuxer instead.

use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::{debug, info};
use vidpump_codec::parser::{PacketCursor, StartCodeParser};
use vidpump_codec::reference::CODEC_NAME;
use vidpump_codec::vpic::{self, Unit};
use vidpump_core::codec_traits::{ContainerSource, StreamInfo};
use vidpump_core::error::{PumpError, Result};
use vidpump_core::types::Packet;

use crate::chunk_reader::{DEFAULT_CHUNK_SIZE, RawChunkReader};

/// Bytes read while looking for the first picture.
pub const SNIFF_LIMIT: u64 = 1024 * 1024;

pub struct ElementaryDemuxer<R> {
    reader: RawChunkReader<R>,
    parser: StartCodeParser,
    queue: VecDeque<Packet>,
    eof: bool,
    packets_read: u64,
}

impl ElementaryDemuxer<File> {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(RawChunkReader::open(path, DEFAULT_CHUNK_SIZE)?))
    }
}

impl<R: Read> ElementaryDemuxer<R> {
    pub fn new(reader: RawChunkReader<R>) -> Self {
        Self {
            reader,
            parser: StartCodeParser::new(),
            queue: VecDeque::new(),
            eof: false,
            packets_read: 0,
        }
    }

    /// Parse one more chunk (or the final flush) into the queue; `false`
    /// once the input is exhausted.
    fn read_more(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        match self.reader.next_chunk()? {
            Some(chunk) => {
                for packet in PacketCursor::new(&mut self.parser, chunk) {
                    self.queue.push_back(packet?);
                }
            }
            None => {
                for packet in PacketCursor::flush(&mut self.parser) {
                    self.queue.push_back(packet?);
                }
                self.eof = true;
            }
        }
        Ok(true)
    }
}

impl<R: Read + Send> ContainerSource for ElementaryDemuxer<R> {
    fn find_best_stream(&mut self) -> Result<StreamInfo> {
        let mut index = 0;
        loop {
            while index >= self.queue.len() {
                if self.reader.bytes_read() >= SNIFF_LIMIT {
                    return Err(PumpError::Configuration(format!(
                        "no picture unit in the first {SNIFF_LIMIT} bytes"
                    )));
                }
                match self.read_more() {
                    Ok(true) => {}
                    Ok(false) => {
                        return Err(PumpError::Configuration(
                            "Cannot find a video stream in the input file".into(),
                        ));
                    }
                    Err(PumpError::MalformedInput(reason)) => {
                        return Err(PumpError::Configuration(format!(
                            "not an elementary stream: {reason}"
                        )));
                    }
                    Err(e) => return Err(e),
                }
            }
            if let Ok(Unit::Picture { header, .. }) = vpic::parse_unit(&self.queue[index].data) {
                info!(
                    codec = CODEC_NAME,
                    width = header.width,
                    height = header.height,
                    format = %header.format,
                    "Elementary stream identified"
                );
                return Ok(StreamInfo {
                    index: 0,
                    codec_name: CODEC_NAME.into(),
                    width: header.width,
                    height: header.height,
                });
            }
            index += 1;
        }
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        while self.queue.is_empty() {
            if !self.read_more()? {
                debug!(packets = self.packets_read, "Elementary stream exhausted");
                return Ok(None);
            }
        }
        self.packets_read += 1;
        Ok(self.queue.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use vidpump_codec::vpic::PictureHeader;
    use vidpump_core::types::PixelFormat;

    fn stream(pictures: usize) -> Vec<u8> {
        let mut out = vec![0, 0, 1, 0x42, 1, 2];
        for i in 0..pictures {
            let header = PictureHeader {
                width: 2,
                height: 2,
                format: PixelFormat::Gray8,
                pts: Some(i as i64),
            };
            out.extend(vpic::write_picture(&header, &[i as u8; 4]).expect("write"));
        }
        out.extend_from_slice(&vpic::SEQUENCE_END_CODE);
        out
    }

    fn demuxer(data: Vec<u8>, chunk: usize) -> ElementaryDemuxer<Cursor<Vec<u8>>> {
        ElementaryDemuxer::new(RawChunkReader::new(Cursor::new(data), chunk).expect("reader"))
    }

    #[test]
    fn identifies_stream_then_yields_every_unit() {
        let mut demux = demuxer(stream(3), 5);
        let info = demux.find_best_stream().expect("stream");
        assert_eq!((info.index, info.width, info.height), (0, 2, 2));
        assert_eq!(info.codec_name, "vpic");

        let mut packets = Vec::new();
        while let Some(packet) = demux.read_packet().expect("read") {
            packets.push(packet);
        }
        // Unknown unit, three pictures and the end code.
        assert_eq!(packets.len(), 5);
        assert_eq!(packets[4].data, vpic::SEQUENCE_END_CODE);
    }

    #[test]
    fn input_without_pictures_has_no_stream() {
        let mut demux = demuxer(vec![0, 0, 1, 0xB7], 4096);
        let err = demux.find_best_stream().expect_err("no pictures");
        assert!(err.is_startup());
    }

    #[test]
    fn long_garbage_prefix_stops_sniffing_early() {
        let mut data = b"ftypisom\0\0\x01\x42".to_vec();
        data.resize(9 * 1024 * 1024, 0xAA);
        let mut demux = demuxer(data, 4096);
        let err = demux.find_best_stream().expect_err("not elementary");
        assert!(matches!(err, PumpError::Configuration(_)), "{err}");
        assert!(demux.reader.bytes_read() <= SNIFF_LIMIT + 4096);
        assert!(demux.queue.len() <= 2);
    }

    #[test]
    fn oversized_unit_during_sniff_is_not_elementary() {
        let mut data = vec![0, 0, 1, 0x42];
        data.resize(64 * 1024, 0xAA);
        let reader = RawChunkReader::new(Cursor::new(data), 4096).expect("reader");
        let mut demux = ElementaryDemuxer {
            parser: StartCodeParser::with_max_unit_size(1024),
            ..ElementaryDemuxer::new(reader)
        };
        let err = demux.find_best_stream().expect_err("unit cap");
        assert!(matches!(err, PumpError::Configuration(_)), "{err}");
        assert!(err.to_string().contains("not an elementary stream"));
    }
}
