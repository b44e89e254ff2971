//! camview Render - frame consumption and surface drawing
//!
//! This crate provides the display half of the pipeline:
//! - [`DrawSurface`] is the capability seam over a drawable surface;
//!   [`BufferSurface`] is the in-memory backend.
//! - [`Renderer`] pulls frames from a stream subscription, decodes,
//!   transforms and blits them, tracking surface lifecycle and FPS.
//! - [`FrameSink`] is the recording contract for per-frame delivery.

pub mod fps;
pub mod renderer;
pub mod sink;
pub mod surface;
pub mod transform;

pub use fps::{FpsCounter, FpsOverlay};
pub use renderer::Renderer;
pub use sink::{DirRecorder, FrameSink};
pub use surface::{BufferSurface, DrawSurface};
pub use transform::{dest_rect, DestRect, TransformState};
