//! The media library: scanning sources into tiles and keeping them.

pub mod error;
pub mod scan;
pub mod store;

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::scan::{ScanEvent, ScanReport, Scanner};
pub use crate::store::{DirectoryStore, MemoryStore, TileStore};
