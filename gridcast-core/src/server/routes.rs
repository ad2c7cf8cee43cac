//! Route handlers for the panel's HTTP API.
//!
//! Dispatch is an exact (method, path) match. Handlers never perform
//! I/O or touch hardware: they decode the body, poke the
//! [`PanelContext`](super::PanelContext) and hand a [`Reply`] back to
//! the connection state machine, which owns response formatting.

use std::net::IpAddr;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::frame::FRAME_SIZE;
use crate::server::{PanelContext, RebootKind};
use crate::store::Offer;
use crate::wire;

/// Landing page served at `GET /`. Large enough that the connection
/// machine streams it in bounded chunks rather than one write.
pub const LANDING_HTML: &[u8] = include_bytes!("landing.html");

// ── Request / Reply ──────────────────────────────────────────────

/// A fully-accumulated HTTP request, as seen by a handler.
#[derive(Debug)]
pub struct Request<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub body: &'a [u8],
    pub peer: IpAddr,
}

/// Handler outcome, rendered into wire bytes by the connection
/// state machine.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    /// 200 with a JSON body; keep-alive honored.
    Json { body: String },
    /// 200 with a large fixed body, streamed in chunks; the
    /// connection closes when fully sent.
    Static {
        content_type: &'static str,
        body: &'static [u8],
    },
    /// 404; connection closes.
    NotFound,
}

impl Reply {
    fn json(value: serde_json::Value) -> Self {
        Reply::Json {
            body: value.to_string(),
        }
    }

    fn ok() -> Self {
        Reply::json(json!({"status": "ok"}))
    }

    fn busy() -> Self {
        Reply::json(json!({"status": "busy"}))
    }

    fn error(message: &str) -> Self {
        Reply::json(json!({"status": "error", "message": message}))
    }
}

#[derive(Debug, Deserialize)]
struct BrightnessBody {
    value: f32,
}

// ── Dispatch ─────────────────────────────────────────────────────

/// Route a complete request to its handler.
pub fn dispatch(ctx: &PanelContext, req: &Request<'_>) -> Reply {
    match (req.method, req.path) {
        ("GET", "/") => Reply::Static {
            content_type: "text/html; charset=utf-8",
            body: LANDING_HTML,
        },
        ("GET", "/api/status") => status(ctx),
        ("POST", "/api/frame") => post_frame(ctx, req.body),
        ("POST", "/api/delta") => post_delta(ctx, req.body),
        ("GET", "/api/brightness") => get_brightness(ctx),
        ("POST", "/api/brightness") => post_brightness(ctx, req.body),
        ("POST", "/api/reboot") => post_reboot(ctx),
        ("POST", "/api/reboot-bootloader") => post_reboot_bootloader(ctx, req.peer),
        _ => Reply::NotFound,
    }
}

// ── Handlers ─────────────────────────────────────────────────────

fn status(ctx: &PanelContext) -> Reply {
    Reply::json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "frames": ctx.store.sequence(),
        "connections": ctx.active_connections.load(Ordering::Relaxed),
    }))
}

/// `POST /api/frame` — full-frame ingestion with the reject-busy
/// backpressure contract: an unconsumed pending frame refuses the new
/// one so the caller can retry, instead of silently losing either.
fn post_frame(ctx: &PanelContext, body: &[u8]) -> Reply {
    if ctx.store.has_pending() {
        return Reply::busy();
    }
    if body.is_empty() {
        return Reply::error("no data");
    }
    if body.len() < FRAME_SIZE {
        return Reply::error("short frame");
    }
    // Clients may pad; only the frame-sized prefix counts.
    match wire::decode_full(&body[..FRAME_SIZE]) {
        Ok(frame) => match ctx.store.offer_full(&frame) {
            Offer::Accepted { sequence } => {
                debug!(sequence, "full frame accepted");
                Reply::ok()
            }
            Offer::Busy => Reply::busy(),
        },
        Err(_) => Reply::error("invalid frame"),
    }
}

/// `POST /api/delta` — sparse update, same backpressure contract.
fn post_delta(ctx: &PanelContext, body: &[u8]) -> Reply {
    if ctx.store.has_pending() {
        return Reply::busy();
    }
    if body.is_empty() {
        return Reply::error("no data");
    }
    match wire::decode_delta(body) {
        Ok(update) => match ctx.store.offer_delta(&update) {
            Offer::Accepted { sequence } => {
                debug!(sequence, pixels = update.entries.len(), "delta accepted");
                Reply::ok()
            }
            Offer::Busy => Reply::busy(),
        },
        Err(_) => Reply::error("invalid delta"),
    }
}

fn get_brightness(ctx: &PanelContext) -> Reply {
    // Two decimal places, matching what the panel reports on-device.
    let value = (ctx.brightness.get() * 100.0).round() / 100.0;
    Reply::json(json!({"brightness": value}))
}

fn post_brightness(ctx: &PanelContext, body: &[u8]) -> Reply {
    match serde_json::from_slice::<BrightnessBody>(body) {
        Ok(req) => {
            ctx.brightness.set(req.value);
            Reply::ok()
        }
        Err(_) => Reply::error("missing value"),
    }
}

fn post_reboot(ctx: &PanelContext) -> Reply {
    ctx.reboot.request(RebootKind::Restart);
    Reply::json(json!({"status": "rebooting"}))
}

/// `POST /api/reboot-bootloader` — gated twice: the flashing transport
/// must be armed, and the caller IP must pass the startup-resolved
/// allow-list.
fn post_reboot_bootloader(ctx: &PanelContext, peer: IpAddr) -> Reply {
    if !ctx.bootloader_armed.load(Ordering::Acquire) {
        return Reply::error("flash transport not connected");
    }
    if !ctx.gate.is_allowed(peer) {
        return Reply::error("IP not authorized");
    }
    ctx.reboot.request(RebootKind::Bootloader);
    Reply::json(json!({"status": "rebooting to bootloader"}))
}

// ── Tests ────────────────────────────────────────────────────────
