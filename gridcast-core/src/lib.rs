//! # gridcast-core
//!
//! Shared library for streaming frames to 32×32 LED matrix panels.
//!
//! This crate contains:
//! - **Frame types**: `Frame`, `Rgb`, `DeltaUpdate` — the panel raster
//!   and sparse updates against it
//! - **Wire**: binary full/delta encodings shared by HTTP and UDP
//! - **Store**: `FrameStore` — the backpressure-aware slot between
//!   network and render contexts
//! - **Server**: sans-I/O HTTP connection machine, route handlers,
//!   UDP ingestion, and the tokio socket driver
//! - **Render**: `RenderLoop` over the `DisplaySink` / `FrameSource` /
//!   `Watchdog` seams
//! - **Producer**: capture downsampling, differential encoding, and
//!   the streaming client with UDP-preferred transport
//! - **Error**: `GridcastError` — typed, `thiserror`-based error
//!   hierarchy

pub mod error;
pub mod frame;
pub mod producer;
pub mod render;
pub mod server;
pub mod store;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use error::GridcastError;
pub use frame::{DeltaEntry, DeltaUpdate, Frame, Rgb, FRAME_SIZE, HEIGHT, PIXEL_COUNT, WIDTH};
pub use render::{DisplaySink, FrameSource, RenderExit, RenderLoop, Watchdog};
pub use server::driver::IngestServer;
pub use server::{BrightnessCell, PanelContext, RebootCell, RebootKind};
pub use store::{FrameStore, FrameUpdate, Offer};
