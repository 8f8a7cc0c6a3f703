//! Thumbnails.
//!
//! Cameras usually store a small JPEG preview in the EXIF `IFD1`. It is
//! pulled out byte for byte when present. The rendered thumbnail is the
//! upright source fitted inside the configured box and encoded as WebP.

use crate::decode::{self, Decoded};
use crate::error::Result;
use crate::ext::{JPEG_MIME, WEBP_MIME};
use crate::tile::{Tile, TileSettings, check_megapixels, encode_webp};
use exif::{In, Reader, Tag};
use image::imageops::FilterType;
use std::io::Cursor;

/// Fingerprint of the thumbnail rendered for `path`.
pub fn thumbnail_key(path: &str) -> String {
    format!("{path}?tmb")
}

/// Fingerprint of the preview embedded in `path`.
pub fn embedded_key(path: &str) -> String {
    format!("{path}?etmb")
}

/// Raw JPEG preview referenced by `JPEGInterchangeFormat` and
/// `JPEGInterchangeFormatLength` in the thumbnail IFD.
pub fn embedded_jpeg(bytes: &[u8]) -> Option<Vec<u8>> {
    let exif = Reader::new().read_from_container(&mut Cursor::new(bytes)).ok()?;
    let field = |tag: Tag| exif.get_field(tag, In::THUMBNAIL).and_then(|field| field.value.get_uint(0));
    let offset = usize::try_from(field(Tag::JPEGInterchangeFormat)?).ok()?;
    let len = usize::try_from(field(Tag::JPEGInterchangeFormatLength)?).ok()?;
    let jpeg = exif.buf().get(offset..offset.checked_add(len)?)?;
    jpeg.starts_with(&[0xFF, 0xD8]).then(|| jpeg.to_vec())
}

/// The embedded preview as a servable tile. Previews without a readable
/// JPEG header are ignored.
pub fn embedded_bytes(path: &str, bytes: &[u8]) -> Option<Tile> {
    let jpeg = embedded_jpeg(bytes)?;
    let (width, height) = match decode::dimensions(&jpeg) {
        Ok(dimensions) => dimensions,
        Err(err) => {
            tracing::trace!(path, error = ?err, "ignoring unreadable embedded preview");
            return None;
        },
    };
    Some(Tile {
        fingerprint: embedded_key(path),
        width,
        height,
        mime: JPEG_MIME,
        bytes: jpeg,
    })
}

/// Fit the upright image inside the thumbnail box, keeping its aspect
/// ratio. Small images are never enlarged.
pub(crate) fn render_thumbnail(source: &Decoded, path: &str, settings: &TileSettings) -> Result<Tile> {
    let (box_w, box_h) = match (settings.thumbnail, source.orientation.swaps_axes()) {
        ((w, h), true) => (h, w),
        ((w, h), false) => (w, h),
    };
    let image = if source.image.width() > box_w || source.image.height() > box_h {
        source.image.resize(box_w, box_h, FilterType::Triangle)
    } else {
        source.image.clone()
    };
    let image = source.orientation.apply(image);
    let (width, height) = (image.width(), image.height());
    Ok(Tile {
        fingerprint: thumbnail_key(path),
        width,
        height,
        mime: WEBP_MIME,
        bytes: encode_webp(&image, settings.webp_quality)?,
    })
}

/// Render a thumbnail for an encoded source. Returns `None` above the
/// megapixel cap.
pub fn thumbnail_bytes(path: &str, bytes: &[u8], settings: &TileSettings) -> Result<Option<Tile>> {
    if check_megapixels(bytes, settings)?.is_some() {
        return Ok(None);
    }
    let source = decode::decode(bytes)?;
    render_thumbnail(&source, path, settings).map(Some)
}

/// What to serve as the thumbnail of `path`: the embedded preview when
/// allowed and present, otherwise a rendered one.
pub fn find_thumbnail(path: &str, bytes: &[u8], settings: &TileSettings) -> Result<Option<Tile>> {
    match settings.use_embedded.then(|| embedded_bytes(path, bytes)).flatten() {
        Some(embedded) => Ok(Some(embedded)),
        None => thumbnail_bytes(path, bytes, settings),
    }
}
