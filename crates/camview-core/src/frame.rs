//! Frame representation for extracted MJPEG payloads
//!
//! This module provides the common Frame type handed from the stream
//! extractor to the renderer and any registered recording sink.

use bytes::Bytes;

/// One complete JPEG-encoded image pulled out of the multipart stream
#[derive(Clone)]
pub struct Frame {
    /// Raw JPEG bytes (SOI through EOI)
    data: Bytes,
    /// Frame sequence number, monotonically increasing per session
    pub sequence: u64,
    /// Timestamp in microseconds
    pub timestamp_us: u64,
}

impl Frame {
    /// Create a new frame from raw JPEG bytes
    pub fn new(data: Vec<u8>, sequence: u64) -> Self {
        let timestamp_us = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        Self {
            data: Bytes::from(data),
            sequence,
            timestamp_us,
        }
    }

    /// Get the raw JPEG bytes as a slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get total size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check for the JPEG start-of-image and end-of-image markers
    pub fn is_well_formed(&self) -> bool {
        self.data.len() >= 4
            && self.data[..2] == [0xFF, 0xD8]
            && self.data[self.data.len() - 2..] == [0xFF, 0xD9]
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("size", &self.data.len())
            .finish()
    }
}
