//! # gridcast-panel — LED panel receiver
//!
//! Hosts one panel: the ingest server (HTTP + UDP on one port) and
//! the render loop that paints accepted frames.
//!
//! ## Output backends
//!
//! - **Log**: sequence numbers only, for headless operation.
//! - **Terminal preview**: ANSI truecolor rendering, two pixels per
//!   character cell (`--preview`).

pub mod config;
pub mod display;
