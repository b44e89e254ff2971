//! Recording sinks
//!
//! A registered [`FrameSink`] receives every successfully decoded
//! frame's raw JPEG bytes, independent of whether the surface was valid
//! for display. [`DirRecorder`] is the capture-to-file consumer.

use camview_core::Result;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Consumer of decoded frames, registered on the renderer
pub trait FrameSink: Send + Sync {
    /// Called with the raw JPEG bytes of each successfully decoded frame
    fn on_frame(&self, jpeg: &[u8], sequence: u64);

    /// Called with the decoded pixels; default implementations that only
    /// want the bytes can ignore this
    fn on_image(&self, _image: &RgbaImage) {}
}

/// Writes each frame's JPEG bytes to numbered files in a directory
pub struct DirRecorder {
    dir: PathBuf,
}

impl DirRecorder {
    /// Create the target directory if needed
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn frame_path(&self, sequence: u64) -> PathBuf {
        self.dir.join(format!("frame_{:06}.jpg", sequence))
    }
}

impl FrameSink for DirRecorder {
    fn on_frame(&self, jpeg: &[u8], sequence: u64) {
        let path = self.frame_path(sequence);
        if let Err(e) = std::fs::write(&path, jpeg) {
            warn!("failed to record frame {}: {}", path.display(), e);
        }
    }
}
