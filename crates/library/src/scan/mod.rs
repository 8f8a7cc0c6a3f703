//! Library scanning.
//!
//! A scan walks a root through the VFS, turns every whitelisted image it
//! finds into the full tile ladder and hands the tiles to a [`TileStore`].
//! Sources whose largest tile is already stored are not rendered again.
//!
//! The primary entry point is [`Scanner::scan`], which streams
//! [`ScanEvent`]s; [`Scanner::run`] drives that stream to completion and
//! returns a [`ScanReport`].
//!
//! [`TileStore`]: crate::store::TileStore

mod file;
mod stream;

pub use self::file::convert_file;
pub use self::stream::{ScanEvent, ScanReport, Scanner};
