//! Binary wire encodings for full and delta frames.
//!
//! Both encodings are transport-agnostic: the same bytes travel as an
//! HTTP POST body or a raw UDP datagram payload.
//!
//! ## Wire format
//!
//! **Full frame** (3072 bytes):
//! ```text
//! pixels: [u8; 32 * 32 * 3]   row-major RGB triplets
//! ```
//!
//! **Delta frame** (2 + 5·N bytes):
//! ```text
//! count:   u16le              number of changed pixels (N ≤ 1024)
//! entries: N × {
//!     index: u16le            y * 32 + x
//!     r, g, b: u8
//! }
//! ```

use crate::error::GridcastError;
use crate::frame::{DeltaEntry, DeltaUpdate, Frame, MAX_DELTA_ENTRIES, FRAME_SIZE, Rgb};

/// Bytes per delta entry on the wire.
pub const DELTA_ENTRY_SIZE: usize = 5;
/// Size of the delta count prefix.
pub const DELTA_HEADER_SIZE: usize = 2;

// ── Encoding ─────────────────────────────────────────────────────

/// Serialize a delta update: `u16le count` followed by 5-byte entries.
pub fn encode_delta(update: &DeltaUpdate) -> Vec<u8> {
    let mut out = Vec::with_capacity(DELTA_HEADER_SIZE + update.entries.len() * DELTA_ENTRY_SIZE);
    out.extend_from_slice(&(update.entries.len() as u16).to_le_bytes());
    for entry in &update.entries {
        out.extend_from_slice(&entry.index.to_le_bytes());
        out.push(entry.rgb.r);
        out.push(entry.rgb.g);
        out.push(entry.rgb.b);
    }
    out
}

/// A full frame is its own encoding; exposed for symmetry with
/// [`encode_delta`].
pub fn encode_full(frame: &Frame) -> Vec<u8> {
    frame.as_bytes().to_vec()
}

// ── Decoding ─────────────────────────────────────────────────────

/// Decode a full-frame body. The length must match exactly.
pub fn decode_full(payload: &[u8]) -> Result<Frame, GridcastError> {
    Frame::from_bytes(payload).ok_or(GridcastError::InvalidFrameLength {
        expected: FRAME_SIZE,
        actual: payload.len(),
    })
}

/// Decode a delta body.
///
/// Validates `len ≥ 2 + 5·count` and `count ≤ 1024`. Trailing bytes
/// beyond the declared entries are tolerated (HTTP clients may pad);
/// a short payload is an error. Per-entry index validation happens at
/// application time, not here — a bad index drops that entry only.
pub fn decode_delta(payload: &[u8]) -> Result<DeltaUpdate, GridcastError> {
    if payload.len() < DELTA_HEADER_SIZE {
        return Err(GridcastError::TruncatedPayload {
            expected: DELTA_HEADER_SIZE,
            actual: payload.len(),
        });
    }

    let count = u16::from_le_bytes([payload[0], payload[1]]) as usize;
    if count > MAX_DELTA_ENTRIES {
        return Err(GridcastError::DeltaCountTooLarge {
            count,
            max: MAX_DELTA_ENTRIES,
        });
    }

    let needed = DELTA_HEADER_SIZE + count * DELTA_ENTRY_SIZE;
    if payload.len() < needed {
        return Err(GridcastError::TruncatedPayload {
            expected: needed,
            actual: payload.len(),
        });
    }

    let mut entries = Vec::with_capacity(count);
    let mut off = DELTA_HEADER_SIZE;
    for _ in 0..count {
        entries.push(DeltaEntry {
            index: u16::from_le_bytes([payload[off], payload[off + 1]]),
            rgb: Rgb {
                r: payload[off + 2],
                g: payload[off + 3],
                b: payload[off + 4],
            },
        });
        off += DELTA_ENTRY_SIZE;
    }

    Ok(DeltaUpdate { entries })
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PIXEL_COUNT;

    fn sample_update() -> DeltaUpdate {
        DeltaUpdate {
            entries: vec![
                DeltaEntry {
                    index: 0,
                    rgb: Rgb { r: 255, g: 0, b: 0 },
                },
                DeltaEntry {
                    index: 33,
                    rgb: Rgb { r: 0, g: 255, b: 0 },
                },
                DeltaEntry {
                    index: 1023,
                    rgb: Rgb { r: 0, g: 0, b: 255 },
                },
            ],
        }
    }

    #[test]
    fn delta_roundtrip() {
        let update = sample_update();
        let bytes = encode_delta(&update);
        assert_eq!(bytes.len(), 2 + 3 * 5);
        assert_eq!(&bytes[0..2], &3u16.to_le_bytes());

        let decoded = decode_delta(&bytes).unwrap();
        assert_eq!(decoded, update);
    }

    #[test]
    fn delta_truncated_rejected() {
        let mut bytes = encode_delta(&sample_update());
        bytes.truncate(bytes.len() - 1);
        let err = decode_delta(&bytes).unwrap_err();
        assert!(matches!(err, GridcastError::TruncatedPayload { .. }));
    }

    #[test]
    fn delta_count_over_limit_rejected() {
        let mut bytes = vec![0u8; 2 + 5];
        bytes[0..2].copy_from_slice(&((PIXEL_COUNT + 1) as u16).to_le_bytes());
        let err = decode_delta(&bytes).unwrap_err();
        assert!(matches!(err, GridcastError::DeltaCountTooLarge { .. }));
    }

    #[test]
    fn delta_empty_payload_rejected() {
        assert!(decode_delta(&[]).is_err());
        assert!(decode_delta(&[1]).is_err());
    }

    #[test]
    fn delta_trailing_bytes_tolerated() {
        let mut bytes = encode_delta(&sample_update());
        bytes.extend_from_slice(&[0xFF; 4]);
        let decoded = decode_delta(&bytes).unwrap();
        assert_eq!(decoded.entries.len(), 3);
    }

    #[test]
    fn full_frame_roundtrip() {
        let mut frame = Frame::black();
        frame.set_pixel(17, Rgb { r: 1, g: 2, b: 3 });
        let bytes = encode_full(&frame);
        assert_eq!(bytes.len(), FRAME_SIZE);
        let decoded = decode_full(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn full_frame_wrong_size_rejected() {
        let err = decode_full(&[0u8; 100]).unwrap_err();
        assert!(matches!(err, GridcastError::InvalidFrameLength { .. }));
        assert!(decode_full(&[0u8; FRAME_SIZE + 1]).is_err());
    }
}
