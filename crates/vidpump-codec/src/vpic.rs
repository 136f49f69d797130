//! `vpic` bitstream: start-coded, uncompressed planar pictures.
//!
//! ```text
//! 00 00 01 | escaped( type:u8 | header | payload )
//!
//! type 0x00  picture    header = width:u16be height:u16be format:u8 pts:i64be
//! type 0xB7  sequence end (no body)
//! ```
//!
//! The body is escaped so that `00 00 0x` (x <= 3) never appears inside a
//! unit: an `03` is inserted after every pair of zero bytes that would be
//! followed by such a byte, and a body ending in `00` gets a final `03`.
//! `pts == i64::MIN` means "no timestamp".

use vidpump_core::error::{PumpError, Result};
use vidpump_core::types::PixelFormat;

pub const START_CODE: [u8; 3] = [0, 0, 1];
pub const PICTURE_UNIT: u8 = 0x00;
pub const SEQUENCE_END_UNIT: u8 = 0xB7;
/// Sequence end code written after the last packet of an encoded stream.
pub const SEQUENCE_END_CODE: [u8; 4] = [0, 0, 1, SEQUENCE_END_UNIT];

const HEADER_LEN: usize = 2 + 2 + 1 + 8;
const NO_PTS: i64 = i64::MIN;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PictureHeader {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pts: Option<i64>,
}

impl PictureHeader {
    fn validate(&self) -> Result<()> {
        if self.format.is_hardware() {
            return Err(PumpError::Encode(format!(
                "vpic cannot carry {} pictures",
                self.format
            )));
        }
        if self.width == 0
            || self.height == 0
            || self.width > u32::from(u16::MAX)
            || self.height > u32::from(u16::MAX)
        {
            return Err(PumpError::Encode(format!(
                "vpic picture size {}x{} out of range",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// One parsed unit.
#[derive(Debug, PartialEq, Eq)]
pub enum Unit {
    Picture {
        header: PictureHeader,
        payload: Vec<u8>,
    },
    SequenceEnd,
    /// A unit type this codec does not know; skipped by the decoder.
    Other(u8),
}

/// Serialize one picture unit; `payload` must be the packed planes.
pub fn write_picture(header: &PictureHeader, payload: &[u8]) -> Result<Vec<u8>> {
    header.validate()?;
    let expected = header.format.packed_size(header.width, header.height);
    if payload.len() != expected {
        return Err(PumpError::Encode(format!(
            "payload is {} bytes, {}x{} {} needs {expected}",
            payload.len(),
            header.width,
            header.height,
            header.format
        )));
    }

    let mut body = Vec::with_capacity(1 + HEADER_LEN + payload.len());
    body.push(PICTURE_UNIT);
    body.extend_from_slice(&(header.width as u16).to_be_bytes());
    body.extend_from_slice(&(header.height as u16).to_be_bytes());
    body.push(header.format.code());
    body.extend_from_slice(&header.pts.unwrap_or(NO_PTS).to_be_bytes());
    body.extend_from_slice(payload);

    let mut unit = Vec::with_capacity(START_CODE.len() + body.len() + body.len() / 64);
    unit.extend_from_slice(&START_CODE);
    escape_into(&body, &mut unit);
    Ok(unit)
}

/// Parse one unit as produced by the start-code parser.
///
/// Leading zero bytes (from a four-byte start code) are tolerated.  Bytes
/// after the expected payload are ignored.
pub fn parse_unit(data: &[u8]) -> Result<Unit> {
    let zeros = data.iter().take_while(|&&b| b == 0).count();
    if zeros < 2 || data.get(zeros) != Some(&1) {
        return Err(PumpError::Decode("unit does not begin with a start code".into()));
    }
    let body = unescape(&data[zeros + 1..]);
    let Some((&unit_type, rest)) = body.split_first() else {
        return Ok(Unit::Other(0xFF));
    };
    match unit_type {
        PICTURE_UNIT => parse_picture(rest),
        SEQUENCE_END_UNIT => Ok(Unit::SequenceEnd),
        other => Ok(Unit::Other(other)),
    }
}

fn parse_picture(rest: &[u8]) -> Result<Unit> {
    let header_bytes = rest.get(..HEADER_LEN).ok_or_else(|| {
        PumpError::Decode(format!(
            "picture header truncated ({} of {HEADER_LEN} bytes)",
            rest.len()
        ))
    })?;
    let width = u32::from(u16::from_be_bytes([header_bytes[0], header_bytes[1]]));
    let height = u32::from(u16::from_be_bytes([header_bytes[2], header_bytes[3]]));
    let format = PixelFormat::from_code(header_bytes[4]).ok_or_else(|| {
        PumpError::Decode(format!("unknown pixel format code {}", header_bytes[4]))
    })?;
    let mut pts_bytes = [0u8; 8];
    pts_bytes.copy_from_slice(&header_bytes[5..HEADER_LEN]);
    let pts = match i64::from_be_bytes(pts_bytes) {
        NO_PTS => None,
        pts => Some(pts),
    };
    if width == 0 || height == 0 {
        return Err(PumpError::Decode(format!(
            "invalid picture size {width}x{height}"
        )));
    }

    let expected = format.packed_size(width, height);
    let payload = rest
        .get(HEADER_LEN..HEADER_LEN + expected)
        .ok_or_else(|| {
            PumpError::Decode(format!(
                "picture payload truncated ({} of {expected} bytes)",
                rest.len() - HEADER_LEN
            ))
        })?
        .to_vec();

    Ok(Unit::Picture {
        header: PictureHeader {
            width,
            height,
            format,
            pts,
        },
        payload,
    })
}

fn escape_into(body: &[u8], out: &mut Vec<u8>) {
    let mut zeros = 0usize;
    for &byte in body {
        if zeros >= 2 && byte <= 3 {
            out.push(3);
            zeros = 0;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
    if body.last() == Some(&0) {
        out.push(3);
    }
}

fn unescape(escaped: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut zeros = 0usize;
    for &byte in escaped {
        if zeros >= 2 && byte == 3 {
            zeros = 0;
            continue;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
    out
}
