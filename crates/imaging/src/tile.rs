//! Tile ladder and the synchronous render pipeline.
//!
//! Every source is cut into the same fixed set of 4:3 tiles, `(24m, 18m)`
//! for each multiplier `m` of [`LADDER`]. Tiles are cover-resized (scaled
//! to fill, then center-cropped), turned upright according to EXIF and
//! encoded as lossy WebP.

use crate::decode::{self, Decoded};
use crate::error::{ErrorKind, Result};
use crate::ext::WEBP_MIME;
use crate::thumb;
use image::DynamicImage;
use image::imageops::FilterType;
use std::fmt;

pub const LADDER: [u32; 15] = [2, 3, 4, 6, 8, 9, 10, 12, 15, 16, 18, 20, 24, 30, 36];

const UNIT_WIDTH: u32 = 24;
const UNIT_HEIGHT: u32 = 18;

/// Every `(width, height)` pair of the ladder, smallest first.
pub fn ladder() -> impl Iterator<Item = (u32, u32)> {
    LADDER.iter().map(|m| (UNIT_WIDTH * m, UNIT_HEIGHT * m))
}

/// The biggest tile; once it is stored, a source counts as done.
pub fn largest() -> (u32, u32) {
    let m = LADDER[LADDER.len() - 1];
    (UNIT_WIDTH * m, UNIT_HEIGHT * m)
}

/// Identity of a rendered tile: `<source path>?<W>x<H>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub path: String,
    pub width: u32,
    pub height: u32,
}
impl TileKey {
    pub fn new(path: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            width,
            height,
        }
    }

    /// Parse a fingerprint back into its parts. The path may itself contain
    /// `?`; only the last one separates the size.
    pub fn parse(fingerprint: &str) -> Option<Self> {
        let (path, size) = fingerprint.rsplit_once('?')?;
        let (width, height) = size.split_once('x')?;
        Some(Self::new(path, width.parse().ok()?, height.parse().ok()?))
    }
}
impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?{}x{}", self.path, self.width, self.height)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Tile {
    pub fingerprint: String,
    pub width: u32,
    pub height: u32,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}
impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("fingerprint", &self.fingerprint)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("mime", &self.mime)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Outcome of rendering one source.
#[derive(Debug)]
pub enum Render {
    Tiles(Vec<Tile>),
    /// Source is above the megapixel cap; nothing was decoded.
    Skipped { megapixels: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileSettings {
    /// Sources bigger than this many bytes are rejected as too big.
    pub max_size: u64,
    /// Sources above this many megapixels are skipped.
    pub max_mpx: f64,
    /// Lossy WebP quality, 1 to 100.
    pub webp_quality: u8,
    /// Bounding box for thumbnails.
    pub thumbnail: (u32, u32),
    /// Serve the EXIF-embedded preview as the thumbnail when there is one.
    pub use_embedded: bool,
}
impl Default for TileSettings {
    fn default() -> Self {
        Self {
            max_size: 50 * 1024 * 1024,
            max_mpx: 46.8,
            webp_quality: 60,
            thumbnail: (256, 256),
            use_embedded: true,
        }
    }
}

pub(crate) fn encode_webp(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgba = image.to_rgba8();
    let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
    let memory = encoder.encode_simple(false, f32::from(quality)).map_err(|err| {
        tracing::debug!(?err, "WebP encoder rejected image");
        exn::Exn::from(ErrorKind::Encode)
    })?;
    Ok(memory.to_vec())
}

/// `Some(megapixels)` when the source is above the cap. Otherwise makes sure
/// the full-size pixel buffer can be allocated.
pub(crate) fn check_megapixels(bytes: &[u8], settings: &TileSettings) -> Result<Option<f64>> {
    let (width, height) = decode::dimensions(bytes)?;
    let megapixels = decode::megapixels(width, height);
    if megapixels > settings.max_mpx {
        tracing::debug!(width, height, megapixels, "source above megapixel cap");
        return Ok(Some(megapixels));
    }
    decode::reserve(width, height)?;
    Ok(None)
}

fn render_tile(source: &Decoded, path: &str, (width, height): (u32, u32), quality: u8) -> Result<Tile> {
    let (target_w, target_h) = if source.orientation.swaps_axes() { (height, width) } else { (width, height) };
    decode::reserve(target_w, target_h)?;
    let resized = source.image.resize_to_fill(target_w, target_h, FilterType::Triangle);
    let upright = source.orientation.apply(resized);
    Ok(Tile {
        fingerprint: TileKey::new(path, width, height).to_string(),
        width,
        height,
        mime: WEBP_MIME,
        bytes: encode_webp(&upright, quality)?,
    })
}

/// Render the whole ladder for an encoded source. CPU bound; call from a
/// blocking context.
pub fn render_bytes(path: &str, bytes: &[u8], settings: &TileSettings) -> Result<Render> {
    if let Some(megapixels) = check_megapixels(bytes, settings)? {
        return Ok(Render::Skipped { megapixels });
    }
    let source = decode::decode(bytes)?;
    render_ladder(&source, path, settings).map(Render::Tiles)
}

fn render_ladder(source: &Decoded, path: &str, settings: &TileSettings) -> Result<Vec<Tile>> {
    let tiles = ladder()
        .map(|size| render_tile(source, path, size, settings.webp_quality))
        .collect::<Result<Vec<_>>>()?;
    tracing::trace!(path, tiles = tiles.len(), orientation = ?source.orientation, "rendered tiles");
    Ok(tiles)
}

/// Everything kept for one source: its embedded preview, a thumbnail and
/// the tile ladder.
#[derive(Debug)]
pub struct Conversion {
    /// JPEG preview found in the EXIF block, passed through as is.
    pub embedded: Option<Tile>,
    /// `None` when the source is above the megapixel cap.
    pub thumbnail: Option<Tile>,
    pub render: Render,
}

/// Decode once and produce the thumbnail and the full ladder. The embedded
/// preview is extracted even for sources above the megapixel cap. CPU
/// bound; call from a blocking context.
pub fn convert_bytes(path: &str, bytes: &[u8], settings: &TileSettings) -> Result<Conversion> {
    let embedded = thumb::embedded_bytes(path, bytes);
    if let Some(megapixels) = check_megapixels(bytes, settings)? {
        return Ok(Conversion {
            embedded,
            thumbnail: None,
            render: Render::Skipped { megapixels },
        });
    }
    let source = decode::decode(bytes)?;
    let thumbnail = thumb::render_thumbnail(&source, path, settings)?;
    let tiles = render_ladder(&source, path, settings)?;
    Ok(Conversion {
        embedded,
        thumbnail: Some(thumbnail),
        render: Render::Tiles(tiles),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orient::tests::{jpeg, with_exif_orientation};
    use image::{ImageFormat, Rgb, RgbImage};
    use rstest::rstest;
    use std::io::Cursor;

    fn tiles(render: Render) -> Vec<Tile> {
        match render {
            Render::Tiles(tiles) => tiles,
            Render::Skipped { megapixels } => panic!("unexpectedly skipped at {megapixels} MP"),
        }
    }

    #[test]
    fn test_ladder() {
        let sizes: Vec<_> = ladder().collect();
        assert_eq!(sizes.len(), 15);
        assert_eq!(sizes[0], (48, 36));
        assert_eq!(sizes.last().copied(), Some(largest()));
        assert_eq!(largest(), (864, 648));
        assert!(sizes.iter().all(|(w, h)| w * 3 == h * 4));
    }

    #[rstest]
    #[case("/m/a.jpg", 48, 36)]
    #[case("ftp://u:p@h/x?y.jpg", 864, 648)]
    fn test_tile_key(#[case] path: &str, #[case] width: u32, #[case] height: u32) {
        let key = TileKey::new(path, width, height);
        let fingerprint = key.to_string();
        assert_eq!(fingerprint, format!("{path}?{width}x{height}"));
        assert_eq!(TileKey::parse(&fingerprint), Some(key));
    }

    #[rstest]
    #[case("no-size")]
    #[case("a.jpg?12")]
    #[case("a.jpg?12xabc")]
    fn test_tile_key_rejects(#[case] fingerprint: &str) {
        assert_eq!(TileKey::parse(fingerprint), None);
    }

    #[rstest]
    fn test_ladder_dims_regardless_of_orientation(#[values(1, 3, 6, 8)] orientation: u16) {
        let bytes = with_exif_orientation(&jpeg(200, 150), orientation);
        let tiles = tiles(render_bytes("/m/a.jpg", &bytes, &TileSettings::default()).unwrap());
        assert_eq!(tiles.len(), LADDER.len());
        for (tile, (width, height)) in tiles.iter().zip(ladder()) {
            assert_eq!((tile.width, tile.height), (width, height));
            assert_eq!(tile.fingerprint, format!("/m/a.jpg?{width}x{height}"));
            assert_eq!(tile.mime, "image/webp");
            let decoded = image::load_from_memory_with_format(&tile.bytes, ImageFormat::WebP).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (width, height));
        }
    }

    #[test]
    fn test_orientation_is_applied() {
        // Stored landscape: left half red, right half blue. Orientation 6
        // displays it rotated clockwise, so red ends up on top.
        let stored = RgbImage::from_fn(120, 90, |x, _| if x < 60 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) });
        let mut jpeg = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(stored).write_to(&mut jpeg, ImageFormat::Jpeg).unwrap();
        let bytes = with_exif_orientation(jpeg.get_ref(), 6);

        let tiles = tiles(render_bytes("a.jpg", &bytes, &TileSettings::default()).unwrap());
        let tile = image::load_from_memory(&tiles[0].bytes).unwrap().to_rgb8();
        let top = tile.get_pixel(tile.width() / 2, 2);
        let bottom = tile.get_pixel(tile.width() / 2, tile.height() - 3);
        assert!(top[0] > top[2], "top should be red, got {top:?}");
        assert!(bottom[2] > bottom[0], "bottom should be blue, got {bottom:?}");
    }

    #[rstest]
    #[case(1200, 1000, 0.5)]
    #[case(1200, 1200, 1.4)]
    fn test_megapixel_cap_skips(#[case] width: u32, #[case] height: u32, #[case] max_mpx: f64) {
        let settings = TileSettings {
            max_mpx,
            ..TileSettings::default()
        };
        let bytes = jpeg(width, height);
        let Render::Skipped { megapixels } = render_bytes("big.jpg", &bytes, &settings).unwrap() else {
            panic!("expected the source to be skipped");
        };
        assert!(megapixels > max_mpx);
        let conversion = convert_bytes("big.jpg", &bytes, &settings).unwrap();
        assert!(conversion.thumbnail.is_none());
        assert!(matches!(conversion.render, Render::Skipped { .. }));
    }

    #[test]
    fn test_at_megapixel_cap_renders() {
        let settings = TileSettings {
            max_mpx: 1.44,
            ..TileSettings::default()
        };
        let tiles = tiles(render_bytes("edge.jpg", &jpeg(1200, 1200), &settings).unwrap());
        assert_eq!(tiles.len(), LADDER.len());
    }

    #[test]
    fn test_convert_bytes() {
        let bytes = with_exif_orientation(&jpeg(400, 300), 6);
        let conversion = convert_bytes("/m/a.jpg", &bytes, &TileSettings::default()).unwrap();
        assert!(conversion.embedded.is_none());
        let thumbnail = conversion.thumbnail.unwrap();
        assert_eq!(thumbnail.fingerprint, "/m/a.jpg?tmb");
        assert_eq!((thumbnail.width, thumbnail.height), (192, 256));
        assert_eq!(tiles(conversion.render).len(), LADDER.len());
    }

    #[test]
    fn test_bad_media() {
        let err = render_bytes("a.jpg", b"\xFF\xD8 definitely not a jpeg", &TileSettings::default()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::BadMedia), "{err:?}");
    }
}
