//! Library Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Per-file variants carry the path they failed on so a
//! scan consumer can report them without digging into the error tree.

use derive_more::{Display, Error};

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The scan as a whole could not run (for example, the root is missing).
    #[display("scan failed")]
    Scan,
    /// Listing a directory through the VFS failed.
    #[display("could not list {_0}")]
    Storage(#[error(not(source))] String),
    /// The tile engine rejected or failed on a source.
    #[display("could not render {_0}")]
    Render(#[error(not(source))] String),
    /// Reading from or writing to the tile store failed.
    #[display("tile store failed for {_0}")]
    Store(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Store(_))
    }
}
