//! Differential frame encoder.
//!
//! Decides, per captured frame, what (if anything) goes on the wire:
//! nothing when the frame matches the last transmitted one, a sparse
//! delta when few pixels moved, a full frame when the delta would not
//! pay for itself.

use blake3::Hash;
use tracing::trace;

use crate::frame::{DeltaEntry, DeltaUpdate, Frame, PIXEL_COUNT};

/// Changes at or below this count are held back and allowed to
/// accumulate; sending them would cost more in per-request overhead
/// than the pixels are worth.
pub const MIN_DELTA_PIXELS: usize = 5;

/// Above this count a full frame (3072 bytes) is smaller than the
/// delta encoding (2 + 5·N bytes) and simpler to apply.
pub const MAX_DELTA_PIXELS: usize = 600;

/// What the sender should put on the wire for one captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Nothing changed (or too little to bother); send nothing.
    Unchanged,
    Delta(DeltaUpdate),
    Full(Frame),
}

/// Tracks the last frame actually transmitted and diffs new captures
/// against it.
#[derive(Debug, Default)]
pub struct FrameEncoder {
    last_sent: Option<Frame>,
    last_hash: Option<Hash>,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `frame` against the last transmitted one.
    ///
    /// The baseline advances only when something is actually sent;
    /// sub-threshold changes accumulate across frames until they
    /// clear the bar.
    pub fn encode(&mut self, frame: &Frame) -> Outgoing {
        let hash = blake3::hash(frame.as_bytes());
        if self.last_hash == Some(hash) {
            return Outgoing::Unchanged;
        }

        let Some(last) = &self.last_sent else {
            // Nothing ever sent; the receiver needs a full baseline.
            self.remember(frame, hash);
            return Outgoing::Full(frame.clone());
        };

        let mut entries = Vec::new();
        for i in 0..PIXEL_COUNT {
            let (old, new) = (last.pixel(i), frame.pixel(i));
            if old != new {
                if let Some(rgb) = new {
                    entries.push(DeltaEntry {
                        index: i as u16,
                        rgb,
                    });
                }
                if entries.len() > MAX_DELTA_PIXELS {
                    // Past the break-even point; stop diffing.
                    self.remember(frame, hash);
                    return Outgoing::Full(frame.clone());
                }
            }
        }

        if entries.len() <= MIN_DELTA_PIXELS {
            trace!(changed = entries.len(), "change below send threshold");
            return Outgoing::Unchanged;
        }

        self.remember(frame, hash);
        Outgoing::Delta(DeltaUpdate { entries })
    }

    /// Forget the baseline so the next capture goes out as a full
    /// frame (used after a reconnect — the panel's state is unknown).
    pub fn reset(&mut self) {
        self.last_sent = None;
        self.last_hash = None;
    }

    fn remember(&mut self, frame: &Frame, hash: Hash) {
        self.last_sent = Some(frame.clone());
        self.last_hash = Some(hash);
    }
}

// ── Tests ────────────────────────────────────────────────────────
