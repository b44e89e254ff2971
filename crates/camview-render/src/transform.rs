//! Geometric transforms and destination-rectangle math

use camview_core::DisplayMode;
use image::{imageops, Rgba, RgbaImage};

/// Per-frame transform configuration, snapshotted by the render loop at
/// the start of each frame so mutations never tear mid-frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransformState {
    /// Mirror left-right
    pub flip_horizontal: bool,
    /// Mirror top-bottom
    pub flip_vertical: bool,
    /// Rotation in degrees, any angle
    pub rotate_degrees: f32,
    /// Camera mounted upside down: flip both axes before the user
    /// transforms (equivalent to a 180 degree turn)
    pub source_flip: bool,
}

impl TransformState {
    pub fn is_identity(&self) -> bool {
        !self.flip_horizontal
            && !self.flip_vertical
            && !self.source_flip
            && normalize_degrees(self.rotate_degrees) == 0.0
    }

    /// Apply the active transforms to a decoded frame
    pub fn apply(&self, mut img: RgbaImage) -> RgbaImage {
        if self.source_flip {
            imageops::rotate180_in_place(&mut img);
        }
        if self.flip_horizontal {
            imageops::flip_horizontal_in_place(&mut img);
        }
        if self.flip_vertical {
            imageops::flip_vertical_in_place(&mut img);
        }
        let degrees = normalize_degrees(self.rotate_degrees);
        if degrees == 0.0 {
            img
        } else if degrees == 90.0 {
            imageops::rotate90(&img)
        } else if degrees == 180.0 {
            imageops::rotate180_in_place(&mut img);
            img
        } else if degrees == 270.0 {
            imageops::rotate270(&img)
        } else {
            rotate_any(&img, degrees)
        }
    }
}

/// Map degrees into [0, 360)
fn normalize_degrees(degrees: f32) -> f32 {
    let d = degrees % 360.0;
    if d < 0.0 {
        d + 360.0
    } else {
        d
    }
}

/// Rotate by an arbitrary angle into the rotated bounding box.
/// Inverse mapping with nearest-neighbor sampling; uncovered corners
/// stay transparent.
fn rotate_any(src: &RgbaImage, degrees: f32) -> RgbaImage {
    let radians = degrees.to_radians();
    let (sin, cos) = radians.sin_cos();
    let (w, h) = (src.width() as f32, src.height() as f32);

    let dst_w = (w * cos.abs() + h * sin.abs()).ceil() as u32;
    let dst_h = (w * sin.abs() + h * cos.abs()).ceil() as u32;
    let mut dst = RgbaImage::from_pixel(dst_w, dst_h, Rgba([0, 0, 0, 0]));

    let (cx, cy) = (w / 2.0, h / 2.0);
    let (dcx, dcy) = (dst_w as f32 / 2.0, dst_h as f32 / 2.0);

    for y in 0..dst_h {
        for x in 0..dst_w {
            let dx = x as f32 + 0.5 - dcx;
            let dy = y as f32 + 0.5 - dcy;
            // rotate backwards into source space
            let sx = dx * cos + dy * sin + cx;
            let sy = -dx * sin + dy * cos + cy;
            if sx >= 0.0 && sx < w && sy >= 0.0 && sy < h {
                dst.put_pixel(x, y, *src.get_pixel(sx as u32, sy as u32));
            }
        }
    }
    dst
}

/// Where a frame lands on the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

/// Compute the destination rectangle for a frame on a surface.
///
/// FULLSCREEN stretches to the surface bounds; BEST_FIT scales by
/// `min(surface_w/frame_w, surface_h/frame_h)` preserving aspect ratio
/// and centers the result.
pub fn dest_rect(
    mode: DisplayMode,
    frame_w: u32,
    frame_h: u32,
    surface_w: u32,
    surface_h: u32,
) -> DestRect {
    match mode {
        DisplayMode::Fullscreen => DestRect {
            x: 0,
            y: 0,
            width: surface_w,
            height: surface_h,
        },
        DisplayMode::BestFit => {
            if frame_w == 0 || frame_h == 0 {
                return DestRect {
                    x: 0,
                    y: 0,
                    width: surface_w,
                    height: surface_h,
                };
            }
            let aspect = frame_w as f64 / frame_h as f64;
            let mut width = surface_w;
            let mut height = (surface_w as f64 / aspect) as u32;
            if height > surface_h {
                height = surface_h;
                width = (surface_h as f64 * aspect) as u32;
            }
            DestRect {
                x: (surface_w as i64 - width as i64) / 2,
                y: (surface_h as i64 - height as i64) / 2,
                width,
                height,
            }
        }
    }
}
