use crate::error::{ErrorKind, Result};
use crate::ext;
use crate::thumb::find_thumbnail;
use crate::tile::{Conversion, Render, Tile, TileSettings, convert_bytes, render_bytes};
use exn::ResultExt;
use hearth_vfs::Vfs;
use std::sync::Arc;

/// Renders tiles and thumbnails for any path the VFS can open.
///
/// Reading happens on the async runtime; decoding, resizing and encoding
/// run on Tokio's blocking pool.
#[derive(Clone)]
pub struct TileEngine {
    vfs: Vfs,
    settings: Arc<TileSettings>,
}
impl TileEngine {
    pub fn new(vfs: Vfs, settings: TileSettings) -> Self {
        Self {
            vfs,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &TileSettings {
        &self.settings
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    /// Check the extension and size limit, then read the whole source.
    async fn load(&self, path: &str) -> Result<Vec<u8>> {
        if !ext::is_image(path) {
            exn::bail!(ErrorKind::NotImage(path.to_string()));
        }
        let mut file = self.vfs.open(path).await.map_err(|err| ErrorKind::storage(err, path))?;
        let size = file.size().await.map_err(|err| ErrorKind::storage(err, path))?;
        if size > self.settings.max_size {
            tracing::debug!(path, size, limit = self.settings.max_size, "source exceeds size limit");
            file.close().await.map_err(|err| ErrorKind::storage(err, path))?;
            exn::bail!(ErrorKind::TooBig(size));
        }
        let bytes = file.read_to_end(size).await.map_err(|err| ErrorKind::storage(err, path))?;
        file.close().await.map_err(|err| ErrorKind::storage(err, path))?;
        Ok(bytes)
    }

    /// Render the full tile ladder for `path`.
    pub async fn render(&self, path: &str) -> Result<Render> {
        let bytes = self.load(path).await?;
        let settings = Arc::clone(&self.settings);
        let owned = path.to_string();
        tokio::task::spawn_blocking(move || render_bytes(&owned, &bytes, &settings))
            .await
            .or_raise(|| ErrorKind::Worker)?
    }

    /// Thumbnail for `path`: the EXIF-embedded preview if enabled and
    /// present, otherwise a rendered one. `None` above the megapixel cap.
    pub async fn thumbnail(&self, path: &str) -> Result<Option<Tile>> {
        let bytes = self.load(path).await?;
        let settings = Arc::clone(&self.settings);
        let owned = path.to_string();
        tokio::task::spawn_blocking(move || find_thumbnail(&owned, &bytes, &settings))
            .await
            .or_raise(|| ErrorKind::Worker)?
    }

    /// Embedded preview, thumbnail and tile ladder for `path` from a single
    /// read and decode.
    pub async fn convert(&self, path: &str) -> Result<Conversion> {
        let bytes = self.load(path).await?;
        let settings = Arc::clone(&self.settings);
        let owned = path.to_string();
        tokio::task::spawn_blocking(move || convert_bytes(&owned, &bytes, &settings))
            .await
            .or_raise(|| ErrorKind::Worker)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orient::tests::{jpeg, with_exif_orientation};
    use crate::thumb::tests::with_embedded_preview;
    use crate::tile::LADDER;
    use hearth_vfs::VfsSettings;
    use hearth_vfs::backend::IsoImageBuilder;
    use std::path::Path;

    fn engine(settings: TileSettings) -> TileEngine {
        TileEngine::new(Vfs::new(VfsSettings::default()), settings)
    }

    fn path(dir: &Path, name: &str) -> String {
        dir.join(name).display().to_string()
    }

    #[tokio::test]
    async fn test_render_local_and_inside_iso() {
        let dir = tempfile::tempdir().unwrap();
        let photo = with_exif_orientation(&jpeg(160, 120), 6);
        std::fs::write(dir.path().join("a.jpg"), &photo).unwrap();
        let iso = IsoImageBuilder::new().file("DCIM/b.jpg", photo).build();
        std::fs::write(dir.path().join("disk.iso"), iso).unwrap();
        let engine = engine(TileSettings::default());

        for source in [path(dir.path(), "a.jpg"), path(dir.path(), "disk.iso/DCIM/b.jpg")] {
            let Render::Tiles(tiles) = engine.render(&source).await.unwrap() else {
                panic!("{source} was skipped");
            };
            assert_eq!(tiles.len(), LADDER.len());
            assert!(tiles.iter().all(|tile| tile.fingerprint.starts_with(&format!("{source}?"))));
        }
        engine.vfs().shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), jpeg(512, 256)).unwrap();
        std::fs::write(dir.path().join("b.jpg"), with_embedded_preview(&jpeg(512, 256), &jpeg(64, 32))).unwrap();
        let engine = engine(TileSettings::default());

        let tile = engine.thumbnail(&path(dir.path(), "a.jpg")).await.unwrap().unwrap();
        assert_eq!((tile.width, tile.height), (256, 128));
        assert_eq!(tile.mime, "image/webp");
        let tile = engine.thumbnail(&path(dir.path(), "b.jpg")).await.unwrap().unwrap();
        assert_eq!((tile.width, tile.height), (64, 32));
        assert_eq!(tile.mime, "image/jpeg");
    }

    #[tokio::test]
    async fn test_convert() {
        let dir = tempfile::tempdir().unwrap();
        let source = path(dir.path(), "a.jpg");
        std::fs::write(&source, with_embedded_preview(&jpeg(400, 300), &jpeg(40, 30))).unwrap();
        let conversion = engine(TileSettings::default()).convert(&source).await.unwrap();
        assert_eq!(conversion.embedded.unwrap().fingerprint, format!("{source}?etmb"));
        assert_eq!(conversion.thumbnail.unwrap().fingerprint, format!("{source}?tmb"));
        let Render::Tiles(tiles) = conversion.render else {
            panic!("{source} was skipped");
        };
        assert_eq!(tiles.len(), LADDER.len());
    }

    #[tokio::test]
    async fn test_not_image() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        let err = engine(TileSettings::default()).render(&path(dir.path(), "notes.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotImage(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_too_big() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), jpeg(64, 48)).unwrap();
        let settings = TileSettings {
            max_size: 16,
            ..TileSettings::default()
        };
        let err = engine(settings).render(&path(dir.path(), "a.jpg")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::TooBig(size) if *size > 16), "{err:?}");
    }

    #[tokio::test]
    async fn test_directory_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("album.jpg")).unwrap();
        let engine = engine(TileSettings::default());

        let err = engine.render(&path(dir.path(), "album.jpg")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnexpectedDir(_)), "{err:?}");
        let err = engine.render(&path(dir.path(), "missing.jpg")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Storage), "{err:?}");
    }
}
