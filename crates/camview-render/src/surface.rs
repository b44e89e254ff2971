//! Drawable surface abstraction
//!
//! The renderer is generic over [`DrawSurface`] so the same pipeline can
//! target a windowing backend, a framebuffer, or the in-memory
//! [`BufferSurface`] used by the CLI and tests. Surface validity is not
//! the surface's concern: the hosting shell reports lifecycle events to
//! the renderer, which gates every write on them.

use image::{Rgba, RgbaImage};

/// A target the renderer can write pixels to
pub trait DrawSurface: Send {
    /// Fill the whole surface with a solid color
    fn clear(&mut self, color: [u8; 4]);

    /// Copy an image onto the surface at the given position, clipped to
    /// the surface bounds
    fn blit(&mut self, x: i64, y: i64, pixels: &RgbaImage);
}

/// In-memory RGBA surface
pub struct BufferSurface {
    canvas: RgbaImage,
}

impl BufferSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255])),
        }
    }

    pub fn width(&self) -> u32 {
        self.canvas.width()
    }

    pub fn height(&self) -> u32 {
        self.canvas.height()
    }

    /// Copy of the current canvas, for inspection
    pub fn snapshot(&self) -> RgbaImage {
        self.canvas.clone()
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.canvas.get_pixel(x, y).0
    }
}

impl DrawSurface for BufferSurface {
    fn clear(&mut self, color: [u8; 4]) {
        for pixel in self.canvas.pixels_mut() {
            *pixel = Rgba(color);
        }
    }

    fn blit(&mut self, x: i64, y: i64, pixels: &RgbaImage) {
        image::imageops::overlay(&mut self.canvas, pixels, x, y);
    }
}
