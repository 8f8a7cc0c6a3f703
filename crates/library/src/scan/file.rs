use crate::error::{ErrorKind, Result};
use crate::scan::ScanEvent;
use crate::store::TileStore;
use exn::ResultExt;
use hearth_imaging::tile::largest;
use hearth_imaging::{Conversion, Render, Tile, TileEngine, TileKey};

async fn put(store: &dyn TileStore, path: &str, tile: Option<Tile>) -> Result<bool> {
    let Some(tile) = tile else {
        return Ok(false);
    };
    store.put(tile).await.or_raise(|| ErrorKind::Store(path.to_string()))?;
    Ok(true)
}

/// Convert one source and report what happened as a [`ScanEvent`].
///
/// The embedded EXIF preview and the rendered thumbnail are stored first,
/// then the tiles smallest first, so the largest tile being present means
/// everything is. That is the check used to skip sources on later scans.
pub async fn convert_file(engine: &TileEngine, store: &dyn TileStore, path: &str) -> Result<ScanEvent> {
    let (width, height) = largest();
    let marker = TileKey::new(path, width, height).to_string();
    if store.contains(&marker).await.or_raise(|| ErrorKind::Store(path.to_string()))? {
        tracing::trace!(path, "largest tile already stored");
        return Ok(ScanEvent::Cached { path: path.to_string() });
    }
    let Conversion {
        embedded,
        thumbnail,
        render,
    } = engine.convert(path).await.or_raise(|| ErrorKind::Render(path.to_string()))?;
    let embedded = put(store, path, embedded).await?;
    match render {
        Render::Skipped { megapixels } => Ok(ScanEvent::Skipped {
            path: path.to_string(),
            megapixels,
            embedded,
        }),
        Render::Tiles(tiles) => {
            let thumbnail = put(store, path, thumbnail).await?;
            let count = tiles.len();
            for tile in tiles {
                store.put(tile).await.or_raise(|| ErrorKind::Store(path.to_string()))?;
            }
            tracing::debug!(path, tiles = count, thumbnail, embedded, "converted source");
            Ok(ScanEvent::Converted {
                path: path.to_string(),
                tiles: count,
                thumbnail,
                embedded,
            })
        },
    }
}
