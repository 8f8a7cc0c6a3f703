//! Image tiles and thumbnails for media served through [`hearth_vfs`].
//!
//! [`TileEngine::render()`] reads a source through the VFS and produces the
//! fixed 4:3 tile ladder as WebP; see [`tile`] for the pipeline itself and
//! [`thumb`] for thumbnails and EXIF-embedded previews.

mod decode;
mod engine;
pub mod error;
pub mod ext;
mod orient;
pub mod thumb;
pub mod tile;

pub use crate::decode::{Decoded, decode, dimensions, megapixels};
pub use crate::engine::TileEngine;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::orient::Orientation;
pub use crate::tile::{Conversion, Render, Tile, TileKey, TileSettings};
