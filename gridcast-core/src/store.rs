//! Shared frame store bridging the network and render contexts.
//!
//! The store holds the authoritative last-displayed frame plus, at most,
//! one undelivered update. The network side stages bytes privately and
//! only copies into the shared slot under the lock; the render side
//! reads the slot out under the same lock and clears the pending flag.
//!
//! # Critical-section contract
//!
//! The internal mutex is held only for the duration of a memory copy,
//! never across I/O or allocation-heavy work. Any context may take it
//! without risking an unbounded stall of the render loop.
//!
//! # Backpressure
//!
//! A new write while an unconsumed update is pending is refused with
//! [`Offer::Busy`]. This is the HTTP-side policy — the caller can report
//! "busy" synchronously. UDP and producer-side slots use different
//! policies on purpose; see the server and producer modules.

use std::sync::Mutex;

use crate::frame::{DeltaUpdate, Frame};

// ── Offer ────────────────────────────────────────────────────────

/// Outcome of offering an update to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    /// The update was staged; `sequence` identifies it.
    Accepted { sequence: u64 },
    /// The previous update has not been consumed yet; nothing changed.
    Busy,
}

impl Offer {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Offer::Accepted { .. })
    }
}

// ── FrameUpdate ──────────────────────────────────────────────────

/// A consumed update handed to the render context.
#[derive(Debug, Clone)]
pub struct FrameUpdate {
    /// Complete post-update raster.
    pub pixels: Frame,
    /// For deltas, the indices that actually changed (render may
    /// repaint only these). `None` means the whole frame was replaced.
    pub changed: Option<Vec<u16>>,
    /// Strictly increasing per accepted update.
    pub sequence: u64,
}

// ── FrameStore ───────────────────────────────────────────────────

#[derive(Debug)]
struct StoreInner {
    /// The frame most recently handed to the render context, kept so
    /// deltas have a base to patch. Deltas are only ever applied to
    /// this exact frame.
    ready: Frame,
    /// Changed indices of the pending update (`None` = full frame).
    changed: Option<Vec<u16>>,
    pending: bool,
    sequence: u64,
    /// True once any frame has been accepted; before that a delta has
    /// no valid base and patches black.
    has_frame: bool,
}

/// Double-buffered pixel store shared between the network and render
/// contexts. Exactly one writer (network) and one reader (render).
#[derive(Debug)]
pub struct FrameStore {
    inner: Mutex<StoreInner>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                ready: Frame::black(),
                changed: None,
                pending: false,
                sequence: 0,
                has_frame: false,
            }),
        }
    }

    /// Stage a complete frame.
    ///
    /// `frame` was decoded into a private buffer by the caller; only
    /// the copy into the shared slot happens under the lock.
    pub fn offer_full(&self, frame: &Frame) -> Offer {
        let mut inner = self.inner.lock().expect("frame store poisoned");
        if inner.pending {
            return Offer::Busy;
        }
        inner.ready = frame.clone();
        inner.changed = None;
        inner.sequence += 1;
        inner.pending = true;
        inner.has_frame = true;
        Offer::Accepted {
            sequence: inner.sequence,
        }
    }

    /// Stage a delta update by patching the ready frame in place.
    ///
    /// Out-of-range indices are dropped entry-by-entry; the rest still
    /// apply. Returns [`Offer::Busy`] without touching the slot when a
    /// prior update is unconsumed.
    pub fn offer_delta(&self, update: &DeltaUpdate) -> Offer {
        let mut inner = self.inner.lock().expect("frame store poisoned");
        if inner.pending {
            return Offer::Busy;
        }
        let applied = update.apply(&mut inner.ready);
        inner.changed = Some(applied);
        inner.sequence += 1;
        inner.pending = true;
        inner.has_frame = true;
        Offer::Accepted {
            sequence: inner.sequence,
        }
    }

    /// Render-side read: take the pending update, if any, clearing the
    /// pending flag. Copies out under the lock and returns immediately.
    pub fn take_pending(&self) -> Option<FrameUpdate> {
        let mut inner = self.inner.lock().expect("frame store poisoned");
        if !inner.pending {
            return None;
        }
        inner.pending = false;
        Some(FrameUpdate {
            pixels: inner.ready.clone(),
            changed: inner.changed.take(),
            sequence: inner.sequence,
        })
    }

    /// Whether an undelivered update is waiting.
    pub fn has_pending(&self) -> bool {
        self.inner.lock().expect("frame store poisoned").pending
    }

    /// Sequence number of the most recently accepted update.
    pub fn sequence(&self) -> u64 {
        self.inner.lock().expect("frame store poisoned").sequence
    }

    /// True once at least one frame has ever been accepted.
    pub fn has_frame(&self) -> bool {
        self.inner.lock().expect("frame store poisoned").has_frame
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
