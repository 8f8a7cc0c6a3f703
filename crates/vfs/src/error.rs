//! VFS Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Back-end library errors (FTP, SSH, HTTP) are attached
//! as children of a [`Transport`](ErrorKind::Transport) frame so the caller
//! can match on *what happened* without string matching.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A VFS error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for VFS operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which step of talking to a remote upstream went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TransportKind {
    #[display("dial")]
    Dial,
    #[display("auth")]
    Auth,
    #[display("session")]
    Session,
    #[display("protocol")]
    Protocol,
    #[display("timeout")]
    Timeout,
}

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Path did not resolve in any back-end, ISO descent included.
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// A file operation targeted a directory.
    #[display("unexpected directory: {_0}")]
    UnexpectedDir(#[error(not(source))] String),
    /// The candidate container is not an ISO-9660 image.
    #[display("not an ISO-9660 image: {_0}")]
    NotIso(#[error(not(source))] String),
    #[display("invalid whence: {_0}")]
    InvalidWhence(#[error(not(source))] i32),
    #[display("invalid offset: {_0}")]
    InvalidOffset(#[error(not(source))] i64),
    /// Network, authentication, dial or handshake failure.
    #[display("transport error ({_0})")]
    Transport(#[error(not(source))] TransportKind),
    /// Acquisition attempted after the pool was shut down.
    #[display("joint pool is closed")]
    PoolClosed,
    /// A file operation was attempted on a joint with no open file.
    #[display("no file is open on joint")]
    NotOpen,
    #[display("invalid URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed (usually with a fresh joint).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Transport(_))
    }

    /// Map a local I/O error onto the categories callers match on.
    pub(crate) fn from_io(err: IoError, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory => Self::NotFound(path.to_string()),
            std::io::ErrorKind::IsADirectory => Self::UnexpectedDir(path.to_string()),
            _ => Self::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::Transport(TransportKind::Dial), true)]
    #[case(ErrorKind::Io(IoError::other("boom")), true)]
    #[case(ErrorKind::NotFound("a".into()), false)]
    #[case(ErrorKind::PoolClosed, false)]
    #[case(ErrorKind::InvalidOffset(-1), false)]
    fn test_is_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err = IoError::from(std::io::ErrorKind::NotFound);
        assert!(matches!(ErrorKind::from_io(err, "x"), ErrorKind::NotFound(p) if p == "x"));
    }

    #[test]
    fn test_display_includes_transport_kind() {
        let kind = ErrorKind::Transport(TransportKind::Auth);
        assert_eq!(kind.to_string(), "transport error (auth)");
    }
}
