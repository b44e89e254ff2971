//! camview Stream - MJPEG frame extraction and HTTP stream sessions
//!
//! This crate provides the network-facing half of the pipeline:
//! - [`FrameExtractor`] parses a raw multipart byte stream into complete
//!   JPEG frames with boundary resynchronization and bounded memory use.
//! - [`StreamSession`] owns the HTTP connection and republishes extracted
//!   frames through a cancellable [`Subscription`].

pub mod extractor;
pub mod session;

pub use extractor::FrameExtractor;
pub use session::{CancelHandle, FrameSender, StreamSession, Subscription};
