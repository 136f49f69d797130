//! Decoded picture sinks.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use vidpump_core::codec_traits::FrameSink;
use vidpump_core::error::{PumpError, Result};
use vidpump_core::types::{PackedImage, PixelFormat};

/// On-disk layout of a per-frame artifact.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// Binary PGM of the luma plane (`P5`), or PPM (`P6`) for RGB.
    #[default]
    Pnm,
    /// The packed buffer exactly as the resolver produced it.
    Raw,
}

/// Writes one file per frame, named `<prefix>-<frame_number>`.
pub struct PerFrameFileSink {
    prefix: PathBuf,
    format: ArtifactFormat,
    frames_written: u64,
    bytes_written: u64,
}

impl PerFrameFileSink {
    pub fn new(prefix: impl Into<PathBuf>, format: ArtifactFormat) -> Self {
        Self {
            prefix: prefix.into(),
            format,
            frames_written: 0,
            bytes_written: 0,
        }
    }

    /// Path of the artifact for `frame_number`.
    pub fn artifact_path(&self, frame_number: u64) -> PathBuf {
        let mut name = self.prefix.clone().into_os_string();
        name.push(format!("-{frame_number}"));
        PathBuf::from(name)
    }
}

fn write_file(path: &Path, parts: &[&[u8]]) -> Result<u64> {
    let file = File::create(path)
        .map_err(|e| PumpError::io(format!("Could not open {}", path.display()), e))?;
    let mut writer = BufWriter::new(file);
    let mut total = 0;
    for part in parts {
        writer
            .write_all(part)
            .map_err(|e| PumpError::io(format!("Failed to write {}", path.display()), e))?;
        total += part.len() as u64;
    }
    writer
        .flush()
        .map_err(|e| PumpError::io(format!("Failed to flush {}", path.display()), e))?;
    Ok(total)
}

/// `P5` of the first plane, or `P6` for interleaved RGB.
fn pnm_parts(image: &PackedImage) -> (String, &[u8]) {
    let magic = match image.format {
        PixelFormat::Rgb24 => "P6",
        _ => "P5",
    };
    (
        format!("{magic}\n{} {}\n255\n", image.width, image.height),
        image.plane(0),
    )
}

impl FrameSink for PerFrameFileSink {
    fn write_frame(&mut self, image: &PackedImage, frame_number: u64) -> Result<()> {
        let path = self.artifact_path(frame_number);
        let written = match self.format {
            ArtifactFormat::Pnm => {
                let (header, samples) = pnm_parts(image);
                write_file(&path, &[header.as_bytes(), samples])?
            }
            ArtifactFormat::Raw => write_file(&path, &[&image.data])?,
        };
        self.frames_written += 1;
        self.bytes_written += written;
        tracing::info!(
            frame = frame_number,
            path = %path.display(),
            "saving frame {frame_number:3}"
        );
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        tracing::debug!(
            frames = self.frames_written,
            bytes = self.bytes_written,
            "Per-frame sink finished"
        );
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// Appends every packed frame to one file.
pub struct RawConcatSink {
    writer: BufWriter<File>,
    path: PathBuf,
    frames_written: u64,
    bytes_written: u64,
}

impl RawConcatSink {
    pub fn new(path: PathBuf) -> Result<Self> {
        let file = File::create(&path)
            .map_err(|e| PumpError::io(format!("Could not open {}", path.display()), e))?;
        tracing::info!(path = %path.display(), "Raw frame sink opened");
        Ok(Self {
            writer: BufWriter::with_capacity(4 * 1024 * 1024, file),
            path,
            frames_written: 0,
            bytes_written: 0,
        })
    }
}

impl FrameSink for RawConcatSink {
    fn write_frame(&mut self, image: &PackedImage, frame_number: u64) -> Result<()> {
        self.writer.write_all(&image.data).map_err(|e| {
            PumpError::io(format!("Failed to dump raw data to {}", self.path.display()), e)
        })?;
        self.frames_written += 1;
        self.bytes_written += image.data.len() as u64;
        tracing::debug!(frame = frame_number, bytes = image.data.len(), "Raw frame written");
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| {
            PumpError::io(format!("Failed to flush {}", self.path.display()), e)
        })?;
        tracing::info!(
            path = %self.path.display(),
            frames = self.frames_written,
            bytes = self.bytes_written,
            "Raw frame sink flushed"
        );
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::unique_temp_dir;

    fn image(format: PixelFormat, width: u32, height: u32) -> PackedImage {
        let size = format.packed_size(width, height);
        PackedImage {
            format,
            width,
            height,
            pts: None,
            data: (0..size).map(|i| i as u8).collect(),
        }
    }

    #[test]
    fn pnm_sink_writes_luma_as_pgm() {
        let dir = unique_temp_dir("frame-sink-pnm");
        let mut sink = PerFrameFileSink::new(dir.join("out"), ArtifactFormat::Pnm);
        sink.write_frame(&image(PixelFormat::Yuv420p, 4, 2), 3).expect("write");
        sink.flush().expect("flush");

        let bytes = std::fs::read(dir.join("out-3")).expect("artifact");
        let header = b"P5\n4 2\n255\n";
        assert_eq!(&bytes[..header.len()], header);
        assert_eq!(&bytes[header.len()..], &[0, 1, 2, 3, 4, 5, 6, 7]);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn rgb_frames_become_ppm() {
        let dir = unique_temp_dir("frame-sink-ppm");
        let mut sink = PerFrameFileSink::new(dir.join("out"), ArtifactFormat::Pnm);
        sink.write_frame(&image(PixelFormat::Rgb24, 1, 1), 1).expect("write");
        let bytes = std::fs::read(dir.join("out-1")).expect("artifact");
        assert!(bytes.starts_with(b"P6\n1 1\n255\n"));
        assert_eq!(bytes.len(), 11 + 3);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn raw_sinks_keep_packed_bytes() {
        let dir = unique_temp_dir("frame-sink-raw");
        let frame = image(PixelFormat::Nv12, 2, 2);

        let mut per_frame = PerFrameFileSink::new(dir.join("f"), ArtifactFormat::Raw);
        per_frame.write_frame(&frame, 1).expect("write");
        assert_eq!(std::fs::read(dir.join("f-1")).expect("artifact"), frame.data);

        let mut concat = RawConcatSink::new(dir.join("all.raw")).expect("create");
        concat.write_frame(&frame, 1).expect("write");
        concat.write_frame(&frame, 2).expect("write");
        concat.flush().expect("flush");
        let all = std::fs::read(dir.join("all.raw")).expect("concat");
        assert_eq!(all.len(), 2 * frame.data.len());
        assert_eq!(concat.bytes_written(), all.len() as u64);
        let _ = std::fs::remove_dir_all(dir);
    }
}
