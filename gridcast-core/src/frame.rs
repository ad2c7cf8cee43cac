//! Fixed-geometry pixel frame types for the LED panel.
//!
//! The panel is a fixed 32×32 RGB888 grid. Pixel identity is positional:
//! `index = y * WIDTH + x`, three bytes per pixel, row-major.

/// Panel width in pixels.
pub const WIDTH: usize = 32;
/// Panel height in pixels.
pub const HEIGHT: usize = 32;
/// Total pixel count.
pub const PIXEL_COUNT: usize = WIDTH * HEIGHT;
/// Size of a full frame on the wire and in memory (RGB888).
pub const FRAME_SIZE: usize = PIXEL_COUNT * 3;

/// Hard protocol limit on entries in a single delta update.
pub const MAX_DELTA_ENTRIES: usize = PIXEL_COUNT;

// ── Frame ────────────────────────────────────────────────────────

/// A complete 32×32 RGB888 raster.
///
/// Boxed so the type stays cheap to move between contexts; the pixel
/// data itself is always exactly [`FRAME_SIZE`] bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Box<[u8; FRAME_SIZE]>,
}

impl Frame {
    /// An all-black frame.
    pub fn black() -> Self {
        Self {
            data: Box::new([0u8; FRAME_SIZE]),
        }
    }

    /// Build a frame from exactly [`FRAME_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != FRAME_SIZE {
            return None;
        }
        let mut frame = Self::black();
        frame.data.copy_from_slice(bytes);
        Some(frame)
    }

    /// Raw pixel bytes, row-major RGB triplets.
    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.data
    }

    /// Mutable raw pixel bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; FRAME_SIZE] {
        &mut self.data
    }

    /// Read the pixel at positional index `idx`.
    ///
    /// Returns `None` when `idx` is outside the grid.
    pub fn pixel(&self, idx: usize) -> Option<Rgb> {
        if idx >= PIXEL_COUNT {
            return None;
        }
        let off = idx * 3;
        Some(Rgb {
            r: self.data[off],
            g: self.data[off + 1],
            b: self.data[off + 2],
        })
    }

    /// Write the pixel at positional index `idx`.
    ///
    /// Out-of-range indices are ignored, matching the protocol rule
    /// that bad indices are dropped rather than fatal.
    pub fn set_pixel(&mut self, idx: usize, rgb: Rgb) {
        if idx >= PIXEL_COUNT {
            return;
        }
        let off = idx * 3;
        self.data[off] = rgb.r;
        self.data[off + 1] = rgb.g;
        self.data[off + 2] = rgb.b;
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::black()
    }
}

// ── Rgb ──────────────────────────────────────────────────────────

/// One RGB888 pixel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

// ── DeltaUpdate ──────────────────────────────────────────────────

/// One changed pixel inside a [`DeltaUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaEntry {
    /// Positional pixel index (`y * WIDTH + x`).
    pub index: u16,
    /// New pixel value.
    pub rgb: Rgb,
}

/// A sparse update naming only changed pixels relative to the frame
/// the receiver last produced.
///
/// Each index appears at most once, so application order does not
/// matter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeltaUpdate {
    pub entries: Vec<DeltaEntry>,
}

impl DeltaUpdate {
    /// Apply every in-range entry to `frame`, returning the indices
    /// actually written. Out-of-range indices are skipped without
    /// aborting the remaining entries.
    pub fn apply(&self, frame: &mut Frame) -> Vec<u16> {
        let mut applied = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            if (entry.index as usize) < PIXEL_COUNT {
                frame.set_pixel(entry.index as usize, entry.rgb);
                applied.push(entry.index);
            }
        }
        applied
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn black_frame_is_all_zero() {
        let frame = Frame::black();
        assert!(frame.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert!(Frame::from_bytes(&[0u8; 100]).is_none());
        assert!(Frame::from_bytes(&[0u8; FRAME_SIZE + 1]).is_none());
        assert!(Frame::from_bytes(&[0u8; FRAME_SIZE]).is_some());
    }

    #[test]
    fn pixel_roundtrip() {
        let mut frame = Frame::black();
        let red = Rgb { r: 255, g: 0, b: 0 };
        frame.set_pixel(5, red);
        assert_eq!(frame.pixel(5), Some(red));
        assert_eq!(frame.pixel(6), Some(Rgb::default()));
    }

    #[test]
    fn out_of_range_pixel_ignored() {
        let mut frame = Frame::black();
        frame.set_pixel(PIXEL_COUNT, Rgb { r: 1, g: 2, b: 3 });
        assert!(frame.as_bytes().iter().all(|&b| b == 0));
        assert!(frame.pixel(PIXEL_COUNT).is_none());
    }

    #[test]
    fn delta_apply_skips_bad_indices() {
        let mut frame = Frame::black();
        let update = DeltaUpdate {
            entries: vec![
                DeltaEntry {
                    index: 0,
                    rgb: Rgb { r: 10, g: 0, b: 0 },
                },
                DeltaEntry {
                    index: PIXEL_COUNT as u16, // out of range
                    rgb: Rgb { r: 99, g: 99, b: 99 },
                },
                DeltaEntry {
                    index: 3,
                    rgb: Rgb { r: 0, g: 20, b: 0 },
                },
            ],
        };

        let applied = update.apply(&mut frame);
        assert_eq!(applied, vec![0, 3]);
        assert_eq!(frame.pixel(0).unwrap().r, 10);
        assert_eq!(frame.pixel(3).unwrap().g, 20);
    }
}
