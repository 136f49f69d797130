//! Fixed-size raw reads with parser padding.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use vidpump_core::codec_traits::{INPUT_PADDING, PaddedSlice};
use vidpump_core::error::{PumpError, Result};

/// Default read size.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Reads a byte stream in chunks of `chunk_size` into one reused buffer of
/// `chunk_size + INPUT_PADDING` bytes.
///
/// Every chunk is followed by [`INPUT_PADDING`] zero bytes, including the
/// short last one.
pub struct RawChunkReader<R> {
    reader: R,
    buf: Vec<u8>,
    chunk_size: usize,
    bytes_read: u64,
    eof: bool,
}

impl RawChunkReader<File> {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| PumpError::io(format!("Could not open {}", path.display()), e))?;
        tracing::info!(path = %path.display(), chunk_size, "Input opened");
        Self::new(file, chunk_size)
    }
}

impl<R: Read> RawChunkReader<R> {
    pub fn new(reader: R, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(PumpError::Configuration("chunk size must be positive".into()));
        }
        Ok(Self {
            reader,
            buf: vec![0; chunk_size + INPUT_PADDING],
            chunk_size,
            bytes_read: 0,
            eof: false,
        })
    }

    /// Total bytes returned so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Next chunk, or `None` once the stream is exhausted.
    ///
    /// A chunk is shorter than `chunk_size` only at end of stream.
    pub fn next_chunk(&mut self) -> Result<Option<PaddedSlice<'_>>> {
        if self.eof {
            return Ok(None);
        }
        let mut filled = 0;
        while filled < self.chunk_size {
            match self.reader.read(&mut self.buf[filled..self.chunk_size]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(PumpError::io("read input", e)),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        self.buf[filled..filled + INPUT_PADDING].fill(0);
        self.bytes_read += filled as u64;
        PaddedSlice::new(&self.buf, filled).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn chunks_cover_stream_and_short_tail_is_padded() {
        let data: Vec<u8> = (1..=10).collect();
        let mut reader = RawChunkReader::new(Cursor::new(data), 4).expect("reader");
        let mut seen = Vec::new();
        while let Some(chunk) = reader.next_chunk().expect("read") {
            assert!(chunk.len() <= 4);
            assert!(chunk.padded()[chunk.len()..].iter().all(|&b| b == 0));
            seen.extend_from_slice(chunk.data());
        }
        assert_eq!(seen, (1..=10).collect::<Vec<u8>>());
        assert_eq!(reader.bytes_read(), 10);
        assert!(reader.next_chunk().expect("eof").is_none());
    }

    #[test]
    fn empty_stream_has_no_chunks() {
        let mut reader = RawChunkReader::new(Cursor::new(Vec::new()), 4096).expect("reader");
        assert!(reader.next_chunk().expect("read").is_none());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(RawChunkReader::new(Cursor::new(vec![1]), 0).is_err());
    }
}
