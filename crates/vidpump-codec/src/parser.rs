//! Packet cursor and the start-code parser.
//!
//! A [`PacketCursor`] walks one padded chunk through a [`PacketParser`],
//! yielding every packet the chunk completes.  Bytes that do not yet form a
//! full unit stay inside the parser until the next chunk (or the
//! end-of-input flush) arrives, so the packets produced are the same no
//! matter how the stream is cut into chunks.

use tracing::{debug, warn};
use vidpump_core::codec_traits::{PacketParser, PaddedSlice, ParseStep};
use vidpump_core::error::{PumpError, Result};
use vidpump_core::types::Packet;

/// Largest unit a [`StartCodeParser`] accepts by default.
pub const DEFAULT_MAX_UNIT_SIZE: usize = 8 * 1024 * 1024;

/// Iterator over the packets one chunk completes.
///
/// Stops at the first error; the parser is left in an unspecified state
/// after that and must not be fed again.
pub struct PacketCursor<'p, 'i, P: PacketParser + ?Sized> {
    parser: &'p mut P,
    remaining: PaddedSlice<'i>,
    flushing: bool,
    done: bool,
}

impl<'p, 'i, P: PacketParser + ?Sized> PacketCursor<'p, 'i, P> {
    /// Cursor over one chunk of input.
    ///
    /// An empty chunk is treated as the end-of-input flush.
    pub fn new(parser: &'p mut P, input: PaddedSlice<'i>) -> Self {
        let flushing = input.is_empty();
        Self {
            parser,
            remaining: input,
            flushing,
            done: false,
        }
    }
}

impl<'p, P: PacketParser + ?Sized> PacketCursor<'p, 'static, P> {
    /// Cursor that drains whatever the parser still buffers.
    pub fn flush(parser: &'p mut P) -> Self {
        Self::new(parser, PaddedSlice::empty())
    }
}

impl<P: PacketParser + ?Sized> Iterator for PacketCursor<'_, '_, P> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.flushing {
            return match self.parser.parse(PaddedSlice::empty()) {
                Ok(ParseStep {
                    packet: Some(packet),
                    ..
                }) => Some(Ok(packet)),
                Ok(_) => {
                    self.done = true;
                    None
                }
                Err(e) => {
                    self.done = true;
                    Some(Err(e))
                }
            };
        }

        while !self.remaining.is_empty() {
            let step = match self.parser.parse(self.remaining) {
                Ok(step) => step,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            if step.consumed > self.remaining.len() {
                self.done = true;
                return Some(Err(PumpError::MalformedInput(format!(
                    "parser consumed {} bytes of a {}-byte window",
                    step.consumed,
                    self.remaining.len()
                ))));
            }
            if step.consumed == 0 && step.packet.is_none() {
                self.done = true;
                return Some(Err(PumpError::MalformedInput(
                    "parser made no progress".into(),
                )));
            }
            self.remaining = self.remaining.advance(step.consumed);
            if let Some(packet) = step.packet {
                return Some(Ok(packet));
            }
        }

        self.done = true;
        None
    }
}

/// Splits a byte stream into units that each begin with `00 00 01`.
///
/// Each emitted packet holds one start code and everything up to (not
/// including) the next one.  A rolling history of the last bytes seen lets a
/// start code straddle any number of chunk boundaries.
pub struct StartCodeParser {
    max_unit_size: usize,
    /// Last bytes seen, most recent in the low byte.
    history: u32,
    /// Current unit; before the first start code only the last two bytes.
    pending: Vec<u8>,
    started: bool,
    discarded: usize,
    units: u64,
}

impl StartCodeParser {
    pub fn new() -> Self {
        Self::with_max_unit_size(DEFAULT_MAX_UNIT_SIZE)
    }

    pub fn with_max_unit_size(max_unit_size: usize) -> Self {
        Self {
            max_unit_size,
            history: u32::MAX,
            pending: Vec::new(),
            started: false,
            discarded: 0,
            units: 0,
        }
    }

    fn reset(&mut self) {
        self.history = u32::MAX;
        self.pending.clear();
        self.started = false;
        self.discarded = 0;
    }

    fn emit(&mut self, data: Vec<u8>) -> Packet {
        self.units += 1;
        debug!(unit = self.units, size = data.len(), "Start-code unit parsed");
        Packet::new(data)
    }
}

impl Default for StartCodeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketParser for StartCodeParser {
    fn parse(&mut self, input: PaddedSlice<'_>) -> Result<ParseStep> {
        if input.is_empty() {
            let step = if self.started && !self.pending.is_empty() {
                let unit = std::mem::take(&mut self.pending);
                ParseStep {
                    consumed: 0,
                    packet: Some(self.emit(unit)),
                }
            } else {
                if !self.started {
                    let dropped = self.discarded + self.pending.len();
                    if dropped > 0 {
                        warn!(bytes = dropped, "No start code found; input discarded");
                    }
                }
                ParseStep::default()
            };
            self.reset();
            return Ok(step);
        }

        for (i, &byte) in input.data().iter().enumerate() {
            self.history = (self.history << 8) | u32::from(byte);
            let start_code = self.history & 0x00FF_FFFF == 0x0000_0001;

            if start_code {
                // The two zero bytes of the prefix are already buffered.
                let body = self.pending.len().saturating_sub(2);
                self.pending.truncate(body);
                let finished = std::mem::replace(&mut self.pending, vec![0, 0, 1]);
                if self.started {
                    return Ok(ParseStep {
                        consumed: i + 1,
                        packet: Some(self.emit(finished)),
                    });
                }
                let dropped = self.discarded + finished.len();
                if dropped > 0 {
                    warn!(bytes = dropped, "Discarded bytes before the first start code");
                }
                self.started = true;
                self.discarded = 0;
                continue;
            }

            self.pending.push(byte);
            if !self.started && self.pending.len() > 2 {
                self.pending.remove(0);
                self.discarded += 1;
            }
            if self.pending.len() > self.max_unit_size {
                return Err(PumpError::MalformedInput(format!(
                    "unit exceeds {} bytes without a start code",
                    self.max_unit_size
                )));
            }
        }

        Ok(ParseStep {
            consumed: input.len(),
            packet: None,
        })
    }
}
