//! Output backends for hosts without matrix hardware.

use std::io::Write;
use std::time::Duration;

use tracing::{debug, info};

use gridcast_core::frame::{Frame, Rgb, HEIGHT, WIDTH};
use gridcast_core::render::{DisplaySink, FrameSource};
use gridcast_core::GridcastError;

// ── LogDisplay ───────────────────────────────────────────────────

/// Headless sink: counts frames and logs occasionally.
#[derive(Debug, Default)]
pub struct LogDisplay {
    frames: u64,
    brightness: f32,
}

impl DisplaySink for LogDisplay {
    fn draw(&mut self, _frame: &Frame, changed: Option<&[u16]>) -> Result<(), GridcastError> {
        self.frames += 1;
        if self.frames == 1 || self.frames % 100 == 0 {
            info!(
                frames = self.frames,
                changed = changed.map(|c| c.len()),
                "frame drawn"
            );
        }
        Ok(())
    }

    fn set_brightness(&mut self, value: f32) {
        self.brightness = value;
        debug!(value, "brightness set");
    }
}

// ── TerminalPreview ──────────────────────────────────────────────

/// ANSI truecolor preview, two panel rows per character row using the
/// upper-half-block glyph.
pub struct TerminalPreview {
    brightness: f32,
    out: std::io::Stdout,
}

impl TerminalPreview {
    pub fn new(brightness: f32) -> Self {
        let out = std::io::stdout();
        // Clear once; frames repaint in place from the home position.
        print!("\x1b[2J");
        Self { brightness, out }
    }

    fn scale(&self, c: u8) -> u8 {
        (c as f32 * self.brightness) as u8
    }
}

impl DisplaySink for TerminalPreview {
    fn draw(&mut self, frame: &Frame, _changed: Option<&[u16]>) -> Result<(), GridcastError> {
        let mut text = String::with_capacity(WIDTH * HEIGHT * 20);
        text.push_str("\x1b[H");
        for y in (0..HEIGHT).step_by(2) {
            for x in 0..WIDTH {
                let top = frame.pixel(y * WIDTH + x).unwrap_or_default();
                let bottom = frame.pixel((y + 1) * WIDTH + x).unwrap_or_default();
                text.push_str(&format!(
                    "\x1b[38;2;{};{};{}m\x1b[48;2;{};{};{}m\u{2580}",
                    self.scale(top.r),
                    self.scale(top.g),
                    self.scale(top.b),
                    self.scale(bottom.r),
                    self.scale(bottom.g),
                    self.scale(bottom.b),
                ));
            }
            text.push_str("\x1b[0m\n");
        }
        self.out.write_all(text.as_bytes())?;
        self.out.flush()?;
        Ok(())
    }

    fn set_brightness(&mut self, value: f32) {
        self.brightness = value;
    }
}

// ── BootGlow ─────────────────────────────────────────────────────

/// Fallback animation shown until the first streamed frame: a slow
/// diagonal color sweep so a freshly powered panel is visibly alive.
pub struct BootGlow;

impl FrameSource for BootGlow {
    fn next_frame(&mut self, elapsed: Duration) -> Option<Frame> {
        let t = elapsed.as_millis() as usize / 40;
        let mut frame = Frame::black();
        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                let phase = (x + y + t) % 64;
                let ramp = if phase < 32 { phase * 4 } else { (63 - phase) * 4 };
                let v = ramp as u8;
                frame.set_pixel(
                    y * WIDTH + x,
                    Rgb {
                        r: v / 4,
                        g: v / 8,
                        b: v,
                    },
                );
            }
        }
        Some(frame)
    }
}

// ── Tests ────────────────────────────────────────────────────────
