//! Pixel decoding.

use crate::error::{ErrorKind, Result};
use crate::orient::Orientation;
use exn::{OptionExt, ResultExt};
use image::{DynamicImage, GrayImage, ImageError, ImageFormat, ImageReader, RgbImage, RgbaImage};
use std::io::Cursor;
use zune_jpeg::JpegDecoder;
use zune_jpeg::zune_core::colorspace::ColorSpace;
use zune_jpeg::zune_core::options::DecoderOptions;

/// Bytes per pixel of the widest buffer we produce (RGBA8).
const BYTES_PER_PIXEL: u64 = 4;

/// A decoded source image together with how it should be displayed.
pub struct Decoded {
    pub image: DynamicImage,
    pub orientation: Orientation,
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>> {
    ImageReader::new(Cursor::new(bytes)).with_guessed_format().or_raise(|| ErrorKind::BadMedia)
}

/// Stored pixel dimensions, read from the header only.
pub fn dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    reader(bytes)?.into_dimensions().or_raise(|| ErrorKind::BadMedia)
}

/// Megapixel count as compared against the configured cap.
pub fn megapixels(width: u32, height: u32) -> f64 {
    f64::from(width) * f64::from(height) / 1e6
}

/// Make sure a `width × height` RGBA buffer can be allocated before asking
/// the decoder or resizer for one.
pub fn reserve(width: u32, height: u32) -> Result<()> {
    let bytes = u64::from(width)
        .checked_mul(u64::from(height))
        .and_then(|pixels| pixels.checked_mul(BYTES_PER_PIXEL))
        .ok_or_raise(|| ErrorKind::Alloc)?;
    let bytes = usize::try_from(bytes).or_raise(|| ErrorKind::Alloc)?;
    let mut scratch: Vec<u8> = Vec::new();
    scratch.try_reserve_exact(bytes).or_raise(|| ErrorKind::Alloc)?;
    Ok(())
}

/// Lenient JPEG decode that keeps whatever scanlines a damaged or truncated
/// entropy stream still yields. `None` when not even the frame header is
/// usable.
fn partial_jpeg(bytes: &[u8]) -> Option<DynamicImage> {
    let options = DecoderOptions::default().set_strict_mode(false).jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    let pixels = match decoder.decode() {
        Ok(pixels) => pixels,
        Err(err) => {
            tracing::trace!(error = ?err, "lenient JPEG decode failed too");
            return None;
        },
    };
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (u32::try_from(width).ok()?, u32::try_from(height).ok()?);
    match decoder.get_output_colorspace()?.num_components() {
        1 => GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8),
        _ => None,
    }
}

/// Read EXIF orientation, then decode the pixels.
///
/// A JPEG that the regular decoder gives up on is retried leniently and the
/// partial picture is used if there is one.
pub fn decode(bytes: &[u8]) -> Result<Decoded> {
    let orientation = Orientation::read(bytes);
    let image = match reader(bytes)?.decode() {
        Ok(image) => image,
        Err(err @ ImageError::Limits(_)) => return Err(err).or_raise(|| ErrorKind::Alloc),
        Err(err) => match image::guess_format(bytes) {
            Ok(ImageFormat::Jpeg) => match partial_jpeg(bytes) {
                Some(image) => {
                    tracing::debug!(error = %err, "using partially decoded JPEG");
                    image
                },
                None => return Err(err).or_raise(|| ErrorKind::BadMedia),
            },
            _ => return Err(err).or_raise(|| ErrorKind::BadMedia),
        },
    };
    Ok(Decoded { image, orientation })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orient::tests::{jpeg, with_exif_orientation};
    use rstest::rstest;

    #[test]
    fn test_decode_jpeg_with_orientation() {
        let bytes = with_exif_orientation(&jpeg(40, 30), 8);
        assert_eq!(dimensions(&bytes).unwrap(), (40, 30));
        let decoded = decode(&bytes).unwrap();
        assert_eq!((decoded.image.width(), decoded.image.height()), (40, 30));
        assert_eq!(decoded.orientation, Orientation::Rotate270);
    }

    #[rstest]
    #[case(b"".as_slice())]
    #[case(b"GIF89a truncated".as_slice())]
    #[case(b"plain text, no magic".as_slice())]
    fn test_garbage_is_bad_media(#[case] bytes: &[u8]) {
        let err = decode(bytes).map(|_| ()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::BadMedia), "{err:?}");
    }

    #[rstest]
    #[case(0, 0, 0.0)]
    #[case(1000, 499, 0.499)]
    #[case(1000, 500, 0.5)]
    #[case(1200, 1200, 1.44)]
    #[case(8000, 5850, 46.8)]
    fn test_megapixels(#[case] width: u32, #[case] height: u32, #[case] expected: f64) {
        assert!((megapixels(width, height) - expected).abs() < 1e-9);
    }

    /// Cut a baseline JPEG halfway through its entropy-coded scan.
    fn truncated(jpeg: &[u8]) -> Vec<u8> {
        let scan = jpeg.windows(2).position(|marker| marker == [0xFF, 0xDA]).unwrap();
        jpeg[..scan + (jpeg.len() - scan) / 2].to_vec()
    }

    #[test]
    fn test_truncated_jpeg_keeps_partial_pixels() {
        let bytes = with_exif_orientation(&truncated(&jpeg(96, 64)), 6);
        let decoded = decode(&bytes).unwrap();
        assert_eq!((decoded.image.width(), decoded.image.height()), (96, 64));
        assert_eq!(decoded.orientation, Orientation::Rotate90);
    }

    #[test]
    fn test_jpeg_without_frame_is_bad_media() {
        let bytes = jpeg(96, 64);
        let header_only = &bytes[..bytes.windows(2).position(|marker| marker == [0xFF, 0xC0]).unwrap()];
        let err = decode(header_only).map(|_| ()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::BadMedia), "{err:?}");
    }

    #[test]
    fn test_reserve() {
        assert!(reserve(64, 64).is_ok());
        let err = reserve(u32::MAX, u32::MAX).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Alloc));
    }
}
