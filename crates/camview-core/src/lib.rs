//! camview Core - Shared types for the MJPEG stream pipeline
//!
//! This crate provides the foundational types used across all camview components.

pub mod config;
pub mod error;
pub mod frame;

pub use config::{DisplayMode, StreamConfig, ViewerConfig};
pub use error::{Error, Result};
pub use frame::Frame;

/// Connection and playback state of a stream session.
///
/// Owned by the session; consumers observe it through a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamingState {
    Idle,
    Connecting,
    Streaming,
    Stopped,
    Failed(String),
}

impl StreamingState {
    /// True once the session has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamingState::Stopped | StreamingState::Failed(_))
    }
}
