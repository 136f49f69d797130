//! Moving-gradient test pattern.
//!
//! Frame `i` has luma `x + y + 3i`, blue-difference chroma `128 + y + 2i`
//! and red-difference chroma `64 + x + 5i`, all wrapping at 256.  Chroma
//! coordinates are in chroma-plane samples.

use vidpump_core::error::Result;
use vidpump_core::types::{Frame, PixelFormat, Plane};

/// Row alignment of generated frames, matching typical encoder buffers.
const PATTERN_ALIGN: usize = 32;

fn luma(x: usize, y: usize, i: u64) -> u8 {
    (x as u64 + y as u64 + i * 3) as u8
}

fn cb(y: usize, i: u64) -> u8 {
    (128 + y as u64 + i * 2) as u8
}

fn cr(x: usize, i: u64) -> u8 {
    (64 + x as u64 + i * 5) as u8
}

/// Generate frame `index` of the pattern with `pts = index`.
pub fn pattern_frame(format: PixelFormat, width: u32, height: u32, index: u64) -> Result<Frame> {
    let mut frame = Frame::alloc_host(format, width, height, PATTERN_ALIGN)?;
    frame.pts = Some(index as i64);
    if let Some(planes) = frame.planes_mut() {
        fill(format, width, height, index, planes);
    }
    Ok(frame)
}

fn fill(format: PixelFormat, width: u32, height: u32, index: u64, planes: &mut [Plane]) {
    for (p, plane) in planes.iter_mut().enumerate() {
        let rows = format.plane_rows(p, height);
        let row_bytes = format.plane_row_bytes(p, width);
        for y in 0..rows {
            let row = &mut plane.data[y * plane.stride..y * plane.stride + row_bytes];
            match (format, p) {
                (PixelFormat::Gray8 | PixelFormat::Yuv420p | PixelFormat::Nv12, 0) => {
                    for (x, sample) in row.iter_mut().enumerate() {
                        *sample = luma(x, y, index);
                    }
                }
                (PixelFormat::Yuv420p, 1) => row.fill(cb(y, index)),
                (PixelFormat::Yuv420p, 2) => {
                    for (x, sample) in row.iter_mut().enumerate() {
                        *sample = cr(x, index);
                    }
                }
                (PixelFormat::Nv12, 1) => {
                    for (x, pair) in row.chunks_exact_mut(2).enumerate() {
                        pair[0] = cb(y, index);
                        pair[1] = cr(x, index);
                    }
                }
                (PixelFormat::Rgb24, 0) => {
                    for (x, pixel) in row.chunks_exact_mut(3).enumerate() {
                        pixel[0] = luma(x, y, index);
                        pixel[1] = cb(y, index);
                        pixel[2] = cr(x, index);
                    }
                }
                _ => {}
            }
        }
    }
}
