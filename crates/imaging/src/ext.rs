//! Extension whitelist and MIME detection.

/// Extensions (lowercase, without the dot) the tile engine will look at.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "tga", "bmp", "dib", "rle", "dds", "tif", "tiff", "jpg", "jpe", "jpeg", "jfif", "gif", "png", "webp", "avif", "psd",
    "psb", "jp2", "jpg2", "jpx", "jpm", "jxr",
];

pub const WEBP_MIME: &str = "image/webp";
pub const JPEG_MIME: &str = "image/jpeg";

/// Lowercased extension of the final path component, if any.
pub fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

pub fn is_image(path: &str) -> bool {
    extension(path).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// MIME type by extension. Unknown image types fall back to `image/*`.
pub fn mime(path: &str) -> &'static str {
    match extension(path).as_deref() {
        Some("gif") => "image/gif",
        Some("png") => "image/png",
        Some("jpg" | "jpe" | "jpeg" | "jfif") => JPEG_MIME,
        Some("webp") => WEBP_MIME,
        _ => "image/*",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a/b/photo.JPG", true)]
    #[case("scan.tiff", true)]
    #[case("disk.iso/DCIM/IMG_0001.jfif", true)]
    #[case("notes.txt", false)]
    #[case("archive.tar.gz", false)]
    #[case("dir.d/README", false)]
    #[case(".png", false)]
    #[case("trailing.", false)]
    fn test_is_image(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(is_image(path), expected);
    }

    #[rstest]
    #[case("a.gif", "image/gif")]
    #[case("a.PNG", "image/png")]
    #[case("a.jpe", "image/jpeg")]
    #[case("a.webp", "image/webp")]
    #[case("a.psd", "image/*")]
    #[case("noext", "image/*")]
    fn test_mime(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(mime(path), expected);
    }
}
