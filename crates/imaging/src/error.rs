//! Imaging Error Types

use derive_more::{Display, Error};
use hearth_vfs::{Error as VfsError, ErrorKind as VfsErrorKind};

/// An imaging error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for imaging operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Extension is not on the image whitelist.
    #[display("not an image: {_0}")]
    NotImage(#[error(not(source))] String),
    /// Source file exceeds the configured size limit.
    #[display("image too big: {_0} bytes")]
    TooBig(#[error(not(source))] u64),
    /// The decoder could not make sense of the bytes.
    #[display("undecodable image data")]
    BadMedia,
    /// A pixel buffer could not be allocated.
    #[display("image buffer allocation failed")]
    Alloc,
    #[display("WebP encoding failed")]
    Encode,
    #[display("unexpected directory: {_0}")]
    UnexpectedDir(#[error(not(source))] String),
    /// Reading the source through the VFS failed.
    #[display("storage error")]
    Storage,
    /// The blocking render task panicked or was cancelled.
    #[display("render worker failed")]
    Worker,
}

impl ErrorKind {
    /// Wrap a VFS error, keeping its frame as a child. Directories surface as
    /// [`UnexpectedDir`](ErrorKind::UnexpectedDir) so callers can skip them.
    #[track_caller]
    pub fn storage(err: VfsError, path: &str) -> Error {
        if matches!(&*err, VfsErrorKind::UnexpectedDir(_)) {
            err.raise(ErrorKind::UnexpectedDir(path.to_string()))
        } else {
            err.raise(ErrorKind::Storage)
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Alloc)
    }
}
