//! Configuration types for camview

use serde::{Deserialize, Serialize};

/// Default maximum bytes for a single JPEG frame (4 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Default number of consecutive boundary resyncs tolerated before the
/// stream is declared broken
pub const DEFAULT_RESYNC_RETRY_LIMIT: u32 = 3;

/// How a decoded frame is fitted to the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    /// Stretch to the full surface bounds, ignoring aspect ratio
    Fullscreen,
    /// Scale preserving aspect ratio, centered with letterboxing
    #[default]
    BestFit,
}

impl std::str::FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fullscreen" | "full" => Ok(DisplayMode::Fullscreen),
            "best-fit" | "fit" => Ok(DisplayMode::BestFit),
            _ => Err(format!("Invalid display mode: {}. Use: fullscreen, best-fit", s)),
        }
    }
}

/// Connection parameters for one stream session attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// MJPEG stream URL
    pub url: String,
    /// Optional HTTP Basic username
    pub username: Option<String>,
    /// Optional HTTP Basic password
    pub password: Option<String>,
    /// Connect and per-read timeout in seconds
    pub timeout_secs: u64,
    /// Upper bound on a single frame's byte size
    pub max_frame_size: usize,
    /// Consecutive resync failures tolerated before terminating
    pub resync_retry_limit: u32,
}

impl StreamConfig {
    /// Create a configuration for the given URL with default limits
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            timeout_secs: 5,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            resync_retry_limit: DEFAULT_RESYNC_RETRY_LIMIT,
        }
    }

    /// Builder pattern: set Basic credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Builder pattern: set connect/read timeout
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Builder pattern: set the maximum frame size
    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// Builder pattern: set the resync retry limit
    pub fn with_resync_retry_limit(mut self, retries: u32) -> Self {
        self.resync_retry_limit = retries;
        self
    }

    /// Validate before opening a session
    pub fn validate(&self) -> crate::Result<()> {
        if self.url.is_empty() {
            return Err(crate::Error::Config("stream URL is empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::Config("timeout must be at least 1 second".into()));
        }
        if self.max_frame_size < 1024 {
            return Err(crate::Error::Config(format!(
                "max frame size {} is too small to hold a JPEG",
                self.max_frame_size
            )));
        }
        Ok(())
    }
}

/// Presentation settings consumed from the hosting shell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Frame fitting policy
    pub display_mode: DisplayMode,
    /// Draw the frames-per-second overlay
    pub show_fps: bool,
    /// Mirror frames left-right
    pub flip_horizontal: bool,
    /// Mirror frames top-bottom
    pub flip_vertical: bool,
    /// Rotation applied to each frame, in degrees
    pub rotate_degrees: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::BestFit,
            show_fps: false,
            flip_horizontal: false,
            flip_vertical: false,
            rotate_degrees: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mode_parsing() {
        assert_eq!("fullscreen".parse::<DisplayMode>().unwrap(), DisplayMode::Fullscreen);
        assert_eq!("best-fit".parse::<DisplayMode>().unwrap(), DisplayMode::BestFit);
        assert_eq!("fit".parse::<DisplayMode>().unwrap(), DisplayMode::BestFit);
        assert!("stretch".parse::<DisplayMode>().is_err());
    }

    #[test]
    fn test_stream_config_builders() {
        let config = StreamConfig::new("http://cam.local/video")
            .with_credentials("admin", "secret")
            .with_timeout_secs(10)
            .with_max_frame_size(2 * 1024 * 1024)
            .with_resync_retry_limit(5);
        assert_eq!(config.username.as_deref(), Some("admin"));
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.max_frame_size, 2 * 1024 * 1024);
        assert_eq!(config.resync_retry_limit, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stream_config_rejects_empty_url() {
        assert!(StreamConfig::new("").validate().is_err());
    }
}
