//! Error types for camview

use thiserror::Error;

/// Main error type for camview operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("authentication rejected (HTTP {0})")]
    Auth(u16),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("frame decode error: {0}")]
    Decode(String),

    #[error("render resource unavailable: {0}")]
    Resource(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

/// Result type alias using camview's Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error terminates a subscription (per-frame decode and
    /// surface-availability errors are absorbed locally instead).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Error::Decode(_) | Error::Resource(_))
    }

    /// True when the underlying cause is a read timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Io(e) => {
                e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_errors_are_recoverable() {
        assert!(!Error::Decode("bad huffman table".into()).is_terminal());
        assert!(!Error::Resource("surface destroyed".into()).is_terminal());
        assert!(Error::Protocol("boundary not found".into()).is_terminal());
        assert!(Error::Auth(401).is_terminal());
    }

    #[test]
    fn test_timeout_detection() {
        let timeout = Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "read"));
        assert!(timeout.is_timeout());
        assert!(!Error::Connection("refused".into()).is_timeout());
    }
}
