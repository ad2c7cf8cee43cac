//! Synthetic source surfaces for testing a panel without a real
//! capture backend.

use std::str::FromStr;

use gridcast_core::producer::{PixelFormat, SourceFrame};

/// Built-in test patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Smooth pseudo-plasma; changes everywhere every frame.
    Plasma,
    /// Vertical color bars scrolling one column per frame; a good
    /// delta-encoding workout.
    Bars,
    /// A single bright pixel sweeping the raster; minimal deltas.
    Sweep,
}

impl FromStr for Pattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plasma" => Ok(Pattern::Plasma),
            "bars" => Ok(Pattern::Bars),
            "sweep" => Ok(Pattern::Sweep),
            other => Err(format!("unknown pattern '{other}'")),
        }
    }
}

/// Stateful generator producing one [`SourceFrame`] per tick.
pub struct PatternSource {
    pattern: Pattern,
    width: usize,
    height: usize,
    tick: u64,
}

impl PatternSource {
    pub fn new(pattern: Pattern, width: usize, height: usize) -> Self {
        Self {
            pattern,
            width: width.max(1),
            height: height.max(1),
            tick: 0,
        }
    }

    pub fn next(&mut self) -> SourceFrame {
        let t = self.tick;
        self.tick += 1;
        let mut data = vec![0u8; self.width * self.height * 3];
        for y in 0..self.height {
            for x in 0..self.width {
                let [r, g, b] = self.color(x, y, t);
                let off = (y * self.width + x) * 3;
                data[off] = r;
                data[off + 1] = g;
                data[off + 2] = b;
            }
        }
        SourceFrame::packed(self.width, self.height, PixelFormat::Rgb8, data)
    }

    fn color(&self, x: usize, y: usize, t: u64) -> [u8; 3] {
        match self.pattern {
            Pattern::Plasma => {
                let fx = x as f32 / self.width as f32;
                let fy = y as f32 / self.height as f32;
                let ft = t as f32 * 0.05;
                let v = ((fx * 10.0 + ft).sin() + (fy * 10.0 - ft).cos()
                    + ((fx + fy) * 10.0 + ft).sin())
                    / 3.0;
                let c = ((v + 1.0) * 127.5) as u8;
                [c, 255 - c, (c / 2).wrapping_add(64)]
            }
            Pattern::Bars => {
                const BARS: [[u8; 3]; 6] = [
                    [255, 0, 0],
                    [255, 255, 0],
                    [0, 255, 0],
                    [0, 255, 255],
                    [0, 0, 255],
                    [255, 0, 255],
                ];
                let bar_width = (self.width / BARS.len()).max(1);
                let shifted = (x + t as usize) % self.width;
                BARS[(shifted / bar_width) % BARS.len()]
            }
            Pattern::Sweep => {
                let active = (t as usize) % (self.width * self.height);
                if y * self.width + x == active {
                    [255, 255, 255]
                } else {
                    [0, 0, 16]
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use gridcast_core::producer::downsample;

    #[test]
    fn pattern_parses() {
        assert_eq!("plasma".parse::<Pattern>().unwrap(), Pattern::Plasma);
        assert_eq!("bars".parse::<Pattern>().unwrap(), Pattern::Bars);
        assert!("disco".parse::<Pattern>().is_err());
    }

    #[test]
    fn frames_animate() {
        let mut src = PatternSource::new(Pattern::Bars, 64, 64);
        let a = src.next();
        let b = src.next();
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn frames_downsample_cleanly() {
        let mut src = PatternSource::new(Pattern::Plasma, 128, 96);
        let frame = downsample(&src.next()).unwrap();
        // Plasma never produces an all-black raster.
        assert!(frame.as_bytes().iter().any(|&b| b != 0));
    }

    #[test]
    fn sweep_lights_one_pixel() {
        let mut src = PatternSource::new(Pattern::Sweep, 32, 32);
        let frame = src.next();
        let bright = frame
            .data
            .chunks_exact(3)
            .filter(|px| px[0] == 255)
            .count();
        assert_eq!(bright, 1);
    }
}
