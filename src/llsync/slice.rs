//! MTU-bounded slicing and reassembly.
//!
//! A logical message larger than one notification is cut into slices that
//! each repeat the type byte and the fixed header:
//!
//! ```text
//! Slice 1: [type][Head | len][hdr] payload part 1
//! Slice 2: [type][Body | len][hdr] payload part 2
//! Slice N: [type][Tail | len][hdr] payload part N (final)
//! ```
//!
//! A message that fits goes out as a single `NoSlice` slice. The receiver
//! keeps exactly one in-flight [`SliceAssembly`]; every terminal outcome
//! (complete or failed) clears it.

use core::fmt;
use heapless::Vec;
use log::{debug, warn};

use super::msg::{BASE_HEADER_LEN, CharId, Direction, MAX_FIXED_HEADER, SliceState, header_len};
use crate::app::ports::TransportError;

/// Largest reassembled payload accepted from the peer.
pub const MAX_MESSAGE: usize = 1024;

/// Largest single slice (ATT MTU 515 minus the 3-byte ATT header).
pub const MAX_SLICE: usize = 512;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Body or Tail arrived with no assembly in progress.
    MissingHead,
    /// Body or Tail carried a different type than the Head.
    TypeMismatch,
    /// Appending would exceed the reassembly capacity.
    Overflow,
    /// The slice is shorter than its declared header and length.
    Truncated,
    /// The MTU leaves no room for payload after the header.
    MtuTooSmall,
    /// Outbound fixed header does not fit the message type.
    BadHeader,
    /// A slice could not be delivered; the rest of the message was dropped.
    Send(TransportError),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHead => write!(f, "continuation slice without head"),
            Self::TypeMismatch => write!(f, "slice type changed mid-message"),
            Self::Overflow => write!(f, "message exceeds {MAX_MESSAGE} bytes"),
            Self::Truncated => write!(f, "slice shorter than declared length"),
            Self::MtuTooSmall => write!(f, "MTU too small for header"),
            Self::BadHeader => write!(f, "fixed header length does not match type"),
            Self::Send(e) => write!(f, "slice send failed: {e}"),
        }
    }
}

// ── Outbound ─────────────────────────────────────────────────

/// Cut `payload` into slices of at most `mtu` bytes and hand each one to
/// `send`. The first failing send aborts the message.
///
/// Returns the number of slices sent.
pub fn encode_slices<F>(
    mtu: u16,
    type_byte: u8,
    header: &[u8],
    payload: &[u8],
    mut send: F,
) -> Result<usize, FrameError>
where
    F: FnMut(&[u8]) -> Result<(), TransportError>,
{
    if header.len() > MAX_FIXED_HEADER {
        return Err(FrameError::BadHeader);
    }
    let mtu = usize::from(mtu).min(MAX_SLICE);
    let prefix = BASE_HEADER_LEN + header.len();
    let budget = mtu.saturating_sub(prefix);
    if budget == 0 {
        return Err(FrameError::MtuTooSmall);
    }

    let mut buf = [0u8; MAX_SLICE];
    let mut emit = |state: SliceState, chunk: &[u8]| {
        buf[0] = type_byte;
        buf[1..3].copy_from_slice(&state.pack(chunk.len()).to_be_bytes());
        buf[BASE_HEADER_LEN..prefix].copy_from_slice(header);
        buf[prefix..prefix + chunk.len()].copy_from_slice(chunk);
        send(&buf[..prefix + chunk.len()]).map_err(FrameError::Send)
    };

    if payload.len() <= budget {
        emit(SliceState::NoSlice, payload)?;
        return Ok(1);
    }

    let total = payload.len().div_ceil(budget);
    for (i, chunk) in payload.chunks(budget).enumerate() {
        let state = match i {
            0 => SliceState::Head,
            n if n + 1 == total => SliceState::Tail,
            _ => SliceState::Body,
        };
        emit(state, chunk)?;
    }
    debug!("slice: type {type_byte:#04x} sent as {total} slices");
    Ok(total)
}

// ── Inbound ──────────────────────────────────────────────────

/// A fully reassembled inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub char: CharId,
    pub type_byte: u8,
    pub header: Vec<u8, MAX_FIXED_HEADER>,
    pub payload: Vec<u8, MAX_MESSAGE>,
}

/// The single in-flight reassembly.
#[derive(Debug, Default)]
pub struct SliceAssembly {
    active: Option<(CharId, u8)>,
    header: Vec<u8, MAX_FIXED_HEADER>,
    buf: Vec<u8, MAX_MESSAGE>,
}

impl SliceAssembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one slice written to `char`.
    ///
    /// Returns `Ok(Some(message))` when a `NoSlice` or `Tail` slice
    /// completes a message, `Ok(None)` while more slices are expected.
    pub fn feed(&mut self, char: CharId, data: &[u8]) -> Result<Option<Message>, FrameError> {
        let parsed = parse(char, data);
        let (type_byte, state, header, chunk) = match parsed {
            Ok(p) => p,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };

        match state {
            // A single-slice message never disturbs an assembly in flight.
            SliceState::NoSlice => Ok(Some(Message {
                char,
                type_byte,
                header: Vec::from_slice(header).map_err(|_| FrameError::Overflow)?,
                payload: Vec::from_slice(chunk).map_err(|_| FrameError::Overflow)?,
            })),
            SliceState::Head => {
                if let Some((_, prev)) = self.active {
                    warn!("slice: head for {type_byte:#04x} discards partial {prev:#04x}");
                }
                self.reset();
                self.active = Some((char, type_byte));
                self.append(header, chunk)?;
                Ok(None)
            }
            SliceState::Body | SliceState::Tail => {
                let Some(active) = self.active else {
                    return Err(FrameError::MissingHead);
                };
                if active != (char, type_byte) {
                    self.reset();
                    return Err(FrameError::TypeMismatch);
                }
                self.append(header, chunk)?;
                if state == SliceState::Body {
                    return Ok(None);
                }
                self.active = None;
                Ok(Some(Message {
                    char,
                    type_byte,
                    header: core::mem::take(&mut self.header),
                    payload: core::mem::take(&mut self.buf),
                }))
            }
        }
    }

    /// Discard any partial message.
    pub fn reset(&mut self) {
        self.active = None;
        self.header.clear();
        self.buf.clear();
    }

    /// Whether a Head has been seen without its Tail.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Bytes collected so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn append(&mut self, header: &[u8], chunk: &[u8]) -> Result<(), FrameError> {
        if self.header.is_empty() {
            // header is repeated in every slice; keep the first copy
            let _ = self.header.extend_from_slice(header);
        }
        if self.buf.extend_from_slice(chunk).is_err() {
            self.reset();
            return Err(FrameError::Overflow);
        }
        Ok(())
    }
}

type Parsed<'a> = (u8, SliceState, &'a [u8], &'a [u8]);

fn parse(char: CharId, data: &[u8]) -> Result<Parsed<'_>, FrameError> {
    if data.len() < BASE_HEADER_LEN {
        return Err(FrameError::Truncated);
    }
    let type_byte = data[0];
    let (state, len) = SliceState::unpack(u16::from_be_bytes([data[1], data[2]]));
    let prefix = header_len(Direction::Downlink, char, type_byte);
    let end = prefix + len;
    if data.len() < end {
        return Err(FrameError::Truncated);
    }
    Ok((type_byte, state, &data[BASE_HEADER_LEN..prefix], &data[prefix..end]))
}

// ── Tests ────────────────────────────────────────────────────
