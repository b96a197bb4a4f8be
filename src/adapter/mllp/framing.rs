//! MLLP frame state machine: `<VT> payload <FS><CR>`.
//!
//! Bytes outside a frame are discarded rather than erroring, since a
//! connection can legitimately sit idle between frames or receive stray
//! bytes before the first `VT`. This runtime's ACK is always a full HL7
//! MSH/MSA message, not the single-byte ACK/NAK some MLLP profiles use.

use thiserror::Error;

/// Start of block.
pub const VT: u8 = 0x0B;
/// End of block.
pub const FS: u8 = 0x1C;
/// Segment/frame terminator.
pub const CR: u8 = 0x0D;

/// Errors raised while framing/unframing an MLLP byte stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// An `FS` byte was seen that was not immediately followed by `CR`.
    #[error("FS not followed by CR")]
    UnterminatedFrame,
    /// The payload to frame contains a reserved delimiter byte.
    #[error("payload contains a reserved MLLP delimiter byte")]
    ReservedByteInPayload,
}

/// Wraps `payload` in `<VT> payload <FS><CR>`.
///
/// # Errors
///
/// Returns [`FramingError::ReservedByteInPayload`] if `payload` contains a
/// literal `VT`, `FS` or `CR` byte, which would corrupt the frame boundary.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    if payload.iter().any(|&b| b == VT || b == FS || b == CR) {
        return Err(FramingError::ReservedByteInPayload);
    }
    let mut out = Vec::with_capacity(payload.len() + 3);
    out.push(VT);
    out.extend_from_slice(payload);
    out.push(FS);
    out.push(CR);
    Ok(out)
}

/// Unwraps a complete `<VT> payload <FS><CR>` frame, returning `payload`.
///
/// # Errors
///
/// Returns [`FramingError::UnterminatedFrame`] if `bytes` is not exactly one
/// well-formed frame.
pub fn unframe(bytes: &[u8]) -> Result<Vec<u8>, FramingError> {
    let Some(&first) = bytes.first() else {
        return Err(FramingError::UnterminatedFrame);
    };
    if first != VT {
        return Err(FramingError::UnterminatedFrame);
    }
    if bytes.len() < 3 || bytes[bytes.len() - 2] != FS || bytes[bytes.len() - 1] != CR {
        return Err(FramingError::UnterminatedFrame);
    }
    Ok(bytes[1..bytes.len() - 2].to_vec())
}

/// The framing state machine's current position in one connection's byte
/// stream: `AwaitVt → Reading(until FS) → AwaitCr → Emit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitVt,
    Reading,
    AwaitCr,
}

/// Incremental MLLP frame decoder for one connection's byte stream.
///
/// Bytes outside a frame (before the first `VT`, or stray bytes between
/// frames) are discarded. An `FS` not immediately followed by `CR` is a
/// framing error: the caller should close the connection and write a trace
/// error row for whatever partial envelope was in progress.
pub struct Framer {
    state: State,
    buffer: Vec<u8>,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    /// Builds a decoder starting in `AwaitVt`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::AwaitVt,
            buffer: Vec::new(),
        }
    }

    /// Feeds one newly-read byte into the state machine.
    ///
    /// Returns `Ok(Some(payload))` when a complete frame has just been
    /// emitted, `Ok(None)` if more bytes are needed, or
    /// [`FramingError::UnterminatedFrame`] if `FS` was seen without a
    /// following `CR` — the caller must close the connection on this error.
    pub fn feed(&mut self, byte: u8) -> Result<Option<Vec<u8>>, FramingError> {
        match self.state {
            State::AwaitVt => {
                if byte == VT {
                    self.buffer.clear();
                    self.state = State::Reading;
                }
                Ok(None)
            }
            State::Reading => {
                if byte == FS {
                    self.state = State::AwaitCr;
                } else {
                    self.buffer.push(byte);
                }
                Ok(None)
            }
            State::AwaitCr => {
                self.state = State::AwaitVt;
                if byte == CR {
                    Ok(Some(std::mem::take(&mut self.buffer)))
                } else {
                    self.buffer.clear();
                    Err(FramingError::UnterminatedFrame)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_then_unframe_round_trips() {
        let payload = b"MSH|^~\\&|A|B|C|D|20260101||ADT^A01|MSG1|P|2.4";
        let framed = frame(payload).unwrap();
        assert_eq!(unframe(&framed).unwrap(), payload);
    }

    #[test]
    fn frame_rejects_reserved_bytes() {
        assert_eq!(frame(&[VT]).unwrap_err(), FramingError::ReservedByteInPayload);
        assert_eq!(frame(&[FS]).unwrap_err(), FramingError::ReservedByteInPayload);
        assert_eq!(frame(&[CR]).unwrap_err(), FramingError::ReservedByteInPayload);
    }

    #[test]
    fn unframe_rejects_missing_terminator() {
        assert!(unframe(&[VT, b'x']).is_err());
    }

    #[test]
    fn framer_emits_bytes_outside_frame_are_discarded() {
        let mut framer = Framer::new();
        for b in b"junk" {
            assert_eq!(framer.feed(*b).unwrap(), None);
        }
        for b in b"MSH|1" {
            assert_eq!(framer.feed(*b).unwrap(), None);
        }
        // Still outside a frame: junk bytes never started one.
    }

    #[test]
    fn framer_emits_complete_frame() {
        let mut framer = Framer::new();
        let framed = frame(b"hello").unwrap();
        let mut result = None;
        for b in &framed {
            result = framer.feed(*b).unwrap();
        }
        assert_eq!(result, Some(b"hello".to_vec()));
    }

    #[test]
    fn framer_errors_on_fs_without_cr() {
        let mut framer = Framer::new();
        framer.feed(VT).unwrap();
        framer.feed(b'x').unwrap();
        framer.feed(FS).unwrap();
        assert_eq!(framer.feed(b'y').unwrap_err(), FramingError::UnterminatedFrame);
    }

    #[test]
    fn framer_recovers_after_error_for_next_frame() {
        let mut framer = Framer::new();
        framer.feed(VT).unwrap();
        framer.feed(FS).unwrap();
        assert!(framer.feed(b'y').is_err());
        let framed = frame(b"next").unwrap();
        let mut result = None;
        for b in &framed {
            result = framer.feed(*b).unwrap();
        }
        assert_eq!(result, Some(b"next".to_vec()));
    }
}
