//! # gridcast-cast — panel streaming client
//!
//! Generates (or will one day capture) source frames, downsamples
//! them to the panel raster, and streams full or delta updates over
//! UDP and HTTP via `gridcast-core`'s producer pipeline.

pub mod config;
pub mod pattern;
