//! Protocol-terminating ingestion server for the LED panel.
//!
//! The server decodes inbound HTTP and UDP traffic into [`FrameStore`]
//! updates. The HTTP side is a sans-I/O state machine ([`http`]) driven
//! by per-connection events; [`driver`] feeds it from real sockets.
//! Control operations (brightness, reboot) do not touch hardware from
//! network context — they set one-shot cells on [`PanelContext`] that
//! the render loop consumes.

pub mod driver;
pub mod gate;
pub mod http;
pub mod routes;
pub mod udp;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};

use crate::store::FrameStore;

// ── BrightnessCell ───────────────────────────────────────────────

/// Single-writer, consume-once cell carrying a pending brightness
/// change from network to render context.
///
/// Safe without a lock: the network side is the only writer, the
/// render side the only consumer, and the payload is a single word
/// (f32 bits) published before the pending flag.
#[derive(Debug)]
pub struct BrightnessCell {
    bits: AtomicU32,
    pending: AtomicBool,
}

impl BrightnessCell {
    pub fn new(initial: f32) -> Self {
        Self {
            bits: AtomicU32::new(initial.to_bits()),
            pending: AtomicBool::new(false),
        }
    }

    /// Network side: stage a new brightness value.
    pub fn set(&self, value: f32) {
        let clamped = value.clamp(0.0, 1.0);
        self.bits.store(clamped.to_bits(), Ordering::Release);
        self.pending.store(true, Ordering::Release);
    }

    /// Render side: consume the pending value, if any.
    pub fn take_pending(&self) -> Option<f32> {
        if self.pending.swap(false, Ordering::AcqRel) {
            Some(f32::from_bits(self.bits.load(Ordering::Acquire)))
        } else {
            None
        }
    }

    /// Current value, pending or not (used by `GET /api/brightness`).
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }
}

// ── RebootCell ───────────────────────────────────────────────────

/// Kind of reboot requested over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootKind {
    /// Plain device restart.
    Restart,
    /// Restart into the firmware-update bootloader.
    Bootloader,
}

/// One-shot reboot request flag, written once by the network side and
/// consumed exactly once by the render loop, which performs the
/// orderly two-stage shutdown.
#[derive(Debug, Default)]
pub struct RebootCell {
    // 0 = none, 1 = restart, 2 = bootloader
    state: AtomicU8,
}

impl RebootCell {
    pub fn request(&self, kind: RebootKind) {
        let v = match kind {
            RebootKind::Restart => 1,
            RebootKind::Bootloader => 2,
        };
        self.state.store(v, Ordering::Release);
    }

    pub fn pending(&self) -> bool {
        self.state.load(Ordering::Acquire) != 0
    }

    pub fn take(&self) -> Option<RebootKind> {
        match self.state.swap(0, Ordering::AcqRel) {
            1 => Some(RebootKind::Restart),
            2 => Some(RebootKind::Bootloader),
            _ => None,
        }
    }
}

// ── PanelContext ─────────────────────────────────────────────────

/// Shared state for one panel instance.
///
/// Owns everything the network and render contexts exchange. Passed by
/// reference into every server operation so multiple independent
/// instances can coexist (and tests stay deterministic).
#[derive(Debug)]
pub struct PanelContext {
    /// The one lock-guarded structure shared across contexts.
    pub store: FrameStore,
    pub brightness: BrightnessCell,
    pub reboot: RebootCell,
    /// IP allow-list for `/api/reboot-bootloader`.
    pub gate: gate::BootloaderGate,
    /// Transport precondition for bootloader reboots (USB mounted on
    /// real hardware; host-supplied here).
    pub bootloader_armed: AtomicBool,
    /// Open TCP connections, for status reporting.
    pub active_connections: AtomicUsize,
}

impl PanelContext {
    pub fn new(gate: gate::BootloaderGate) -> Self {
        Self {
            store: FrameStore::new(),
            brightness: BrightnessCell::new(0.5),
            reboot: RebootCell::default(),
            gate,
            bootloader_armed: AtomicBool::new(false),
            active_connections: AtomicUsize::new(0),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
