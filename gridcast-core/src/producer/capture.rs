//! Capture intake: pixel-format conversion, downsampling, frame-rate
//! throttling and the hand-off slot between the capture callback and
//! the sender task.
//!
//! The capture side is latency-sensitive and must never block on the
//! network. It converts and downsamples into a private buffer, then
//! offers the result to a single-slot buffer. If the sender has not
//! consumed the previous frame the new one is dropped — the display
//! only ever wants the most recent state, and the frame after next
//! carries it.

use std::sync::Mutex;

use tracing::trace;

use crate::error::GridcastError;
use crate::frame::{Frame, Rgb, HEIGHT, WIDTH};

// ── Source frames ────────────────────────────────────────────────

/// Pixel layout of a captured surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 4 bytes per pixel, blue first (common for desktop capture).
    Bgra8,
    /// 3 bytes per pixel, red first.
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// A raw captured surface at native resolution.
#[derive(Debug, Clone)]
pub struct SourceFrame {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    /// Pixel data; rows (or columns, when `rotated`) may carry
    /// `stride` bytes each when the source pads scanlines.
    pub data: Vec<u8>,
    pub stride: usize,
    /// Column-major storage rotated 90°, as handheld framebuffers
    /// ship it: one column of the image per `stride`-sized run,
    /// bottom of the column first.
    pub rotated: bool,
}

impl SourceFrame {
    pub fn packed(width: usize, height: usize, format: PixelFormat, data: Vec<u8>) -> Self {
        let stride = width * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            data,
            stride,
            rotated: false,
        }
    }

    /// A rotated column-major surface; `stride` spans one column.
    pub fn packed_rotated(width: usize, height: usize, format: PixelFormat, data: Vec<u8>) -> Self {
        let stride = height * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            data,
            stride,
            rotated: true,
        }
    }

    fn pixel(&self, x: usize, y: usize) -> Option<Rgb> {
        let off = if self.rotated {
            x * self.stride + (self.height - 1 - y) * self.format.bytes_per_pixel()
        } else {
            y * self.stride + x * self.format.bytes_per_pixel()
        };
        let bytes = self.data.get(off..off + self.format.bytes_per_pixel())?;
        Some(match self.format {
            PixelFormat::Bgra8 => Rgb {
                r: bytes[2],
                g: bytes[1],
                b: bytes[0],
            },
            PixelFormat::Rgb8 => Rgb {
                r: bytes[0],
                g: bytes[1],
                b: bytes[2],
            },
        })
    }
}

/// Nearest-neighbor downsample to the panel raster.
///
/// Sampling points sit at cell centers so a source that is an integer
/// multiple of the panel picks stable representatives instead of cell
/// edges.
pub fn downsample(source: &SourceFrame) -> Result<Frame, GridcastError> {
    if source.width == 0 || source.height == 0 {
        return Err(GridcastError::Other("empty capture surface".into()));
    }
    let min_len = if source.rotated {
        (source.width - 1) * source.stride + source.height * source.format.bytes_per_pixel()
    } else {
        (source.height - 1) * source.stride + source.width * source.format.bytes_per_pixel()
    };
    if source.data.len() < min_len {
        return Err(GridcastError::TruncatedPayload {
            expected: min_len,
            actual: source.data.len(),
        });
    }

    let mut frame = Frame::black();
    for py in 0..HEIGHT {
        let sy = (py * source.height + source.height / 2) / HEIGHT;
        for px in 0..WIDTH {
            let sx = (px * source.width + source.width / 2) / WIDTH;
            if let Some(rgb) = source.pixel(sx.min(source.width - 1), sy.min(source.height - 1)) {
                frame.set_pixel(py * WIDTH + px, rgb);
            }
        }
    }
    Ok(frame)
}

// ── Throttle ─────────────────────────────────────────────────────

/// Skips source frames so a fast capture clock lands on the panel's
/// target rate. A 60 Hz source streamed at 15 Hz passes one frame and
/// skips three.
#[derive(Debug)]
pub struct CaptureThrottle {
    skip_per_pass: u32,
    remaining: u32,
}

impl CaptureThrottle {
    pub fn new(host_fps: u32, target_fps: u32) -> Self {
        let skip_per_pass = if target_fps == 0 || target_fps >= host_fps {
            0
        } else {
            host_fps / target_fps - 1
        };
        Self {
            skip_per_pass,
            remaining: 0,
        }
    }

    /// Whether this capture tick should be processed.
    pub fn admit(&mut self) -> bool {
        if self.remaining > 0 {
            self.remaining -= 1;
            return false;
        }
        self.remaining = self.skip_per_pass;
        true
    }
}

// ── Hand-off slot ────────────────────────────────────────────────

/// Single-frame mailbox between the capture side and the sender task.
///
/// Overload policy: drop the incoming frame when the slot is full.
/// This differs deliberately from the receiving panel's reject-busy
/// store — the capture side has no one to report "busy" to, and the
/// next capture will be fresher anyway.
#[derive(Debug, Default)]
pub struct CaptureSlot {
    inner: Mutex<Option<Frame>>,
}

impl CaptureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a frame. Returns false when the slot was full and the
    /// frame was dropped.
    pub fn offer(&self, frame: Frame) -> bool {
        let mut slot = self.inner.lock().expect("capture slot poisoned");
        if slot.is_some() {
            trace!("capture slot full, dropping frame");
            return false;
        }
        *slot = Some(frame);
        true
    }

    /// Sender side: take the waiting frame, if any.
    pub fn take(&self) -> Option<Frame> {
        self.inner.lock().expect("capture slot poisoned").take()
    }
}

// ── Tests ────────────────────────────────────────────────────────
