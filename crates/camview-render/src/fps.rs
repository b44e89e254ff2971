//! Frame-rate tracking and overlay rendering
//!
//! The counter rolls over a one-second window, matching the original
//! behavior of updating the on-screen figure once per second. The
//! overlay is rasterized from a built-in 5x7 glyph set since there is no
//! platform text API at this layer.

use image::{Rgba, RgbaImage};
use std::time::{Duration, Instant};

/// Rolling frames-per-second counter
pub struct FpsCounter {
    window_start: Instant,
    frames: u32,
    current: Option<u32>,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
            current: None,
        }
    }

    /// Record one rendered frame; returns the new figure when the
    /// one-second window rolls over
    pub fn tick(&mut self) -> Option<u32> {
        self.frames += 1;
        if self.window_start.elapsed() >= Duration::from_secs(1) {
            self.current = Some(self.frames);
            self.frames = 0;
            self.window_start = Instant::now();
            return self.current;
        }
        None
    }

    /// Most recently completed window's figure
    pub fn current(&self) -> Option<u32> {
        self.current
    }
}

/// 5x7 glyphs for the characters the overlay needs; each row is a 5-bit
/// mask, most significant bit leftmost
fn glyph(c: char) -> [u8; 7] {
    match c {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'f' => [0x06, 0x08, 0x08, 0x1C, 0x08, 0x08, 0x08],
        'p' => [0x00, 0x00, 0x1E, 0x11, 0x1E, 0x10, 0x10],
        's' => [0x00, 0x00, 0x0F, 0x10, 0x0E, 0x01, 0x1E],
        _ => [0; 7],
    }
}

/// Renders the "<n>fps" badge with configurable colors
pub struct FpsOverlay {
    pub text_color: [u8; 4],
    pub background_color: [u8; 4],
}

impl Default for FpsOverlay {
    fn default() -> Self {
        Self {
            text_color: [255, 255, 255, 255],
            background_color: [0, 0, 0, 255],
        }
    }
}

impl FpsOverlay {
    /// Rasterize the badge for the given figure
    pub fn render(&self, fps: u32) -> RgbaImage {
        let text = format!("{}fps", fps);
        let cols = text.chars().count() as u32;
        let width = cols * 6 + 2;
        let height = 7 + 2;
        let mut img = RgbaImage::from_pixel(width, height, Rgba(self.background_color));

        for (i, c) in text.chars().enumerate() {
            let rows = glyph(c);
            let x0 = 1 + i as u32 * 6;
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..5u32 {
                    if bits & (0x10 >> col) != 0 {
                        img.put_pixel(x0 + col, 1 + row as u32, Rgba(self.text_color));
                    }
                }
            }
        }
        img
    }
}
