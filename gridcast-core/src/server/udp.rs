//! UDP ingestion path.
//!
//! Datagrams share the HTTP port number. A datagram is either a
//! complete 3072-byte full frame or it is nothing: no reply, no
//! error, no partial acceptance. Senders that care about delivery use
//! the HTTP path; this one trades acknowledgement for latency.

use std::net::SocketAddr;

use tracing::trace;

use crate::frame::FRAME_SIZE;
use crate::server::PanelContext;
use crate::store::Offer;
use crate::wire;

/// Process one datagram. Returns whether a frame was accepted.
///
/// Undersized, oversized and busy-refused datagrams are dropped
/// silently — the next full frame supersedes anything lost.
pub fn handle_datagram(ctx: &PanelContext, payload: &[u8], from: SocketAddr) -> bool {
    if payload.len() != FRAME_SIZE {
        trace!(%from, len = payload.len(), "dropping datagram with bad size");
        return false;
    }
    let Ok(frame) = wire::decode_full(payload) else {
        return false;
    };
    match ctx.store.offer_full(&frame) {
        Offer::Accepted { sequence } => {
            trace!(%from, sequence, "datagram frame accepted");
            true
        }
        Offer::Busy => {
            trace!(%from, "datagram dropped, store busy");
            false
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::gate::BootloaderGate;

    fn ctx() -> PanelContext {
        PanelContext::new(BootloaderGate::localhost_only())
    }

    fn from() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    #[test]
    fn exact_size_accepted() {
        let ctx = ctx();
        assert!(handle_datagram(&ctx, &[3u8; FRAME_SIZE], from()));
        let pending = ctx.store.take_pending().unwrap();
        assert_eq!(pending.pixels.as_bytes()[0], 3);
        assert!(pending.changed.is_none());
    }

    #[test]
    fn wrong_size_dropped_silently() {
        let ctx = ctx();
        assert!(!handle_datagram(&ctx, &[0u8; FRAME_SIZE - 1], from()));
        assert!(!handle_datagram(&ctx, &[0u8; FRAME_SIZE + 1], from()));
        assert!(!handle_datagram(&ctx, &[], from()));
        assert!(!ctx.store.has_pending());
    }

    #[test]
    fn busy_store_drops_without_error() {
        let ctx = ctx();
        assert!(handle_datagram(&ctx, &[1u8; FRAME_SIZE], from()));
        // Pending unconsumed: drop, keep the staged frame.
        assert!(!handle_datagram(&ctx, &[2u8; FRAME_SIZE], from()));
        let pending = ctx.store.take_pending().unwrap();
        assert_eq!(pending.pixels.as_bytes()[0], 1);
    }
}
