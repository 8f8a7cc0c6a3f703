use crate::error::{ErrorKind, Result};
use crate::scan::file::convert_file;
use crate::store::TileStore;
use async_stream::stream;
use exn::ResultExt;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use hearth_imaging::{TileEngine, ext};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Progress events emitted by [`Scanner::scan`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) exactly once.
/// 2. [`FileDiscovered`](Self::FileDiscovered) once per image found.
/// 3. [`DiscoveryComplete`](Self::DiscoveryComplete) exactly once, with the
///    total image count.
/// 4. [`Converted`](Self::Converted), [`Skipped`](Self::Skipped) or
///    [`Cached`](Self::Cached), one per image, in completion order.
/// 5. [`Complete`](Self::Complete), or [`Cancelled`](Self::Cancelled) when
///    the cancellation token fired before every image was started.
///
/// Per-file failures are `Err` items and do not end the stream. A root that
/// cannot be listed ends the stream after its error, with no terminal event.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Started,
    FileDiscovered { path: String },
    DiscoveryComplete(u64),
    /// Every tile of the source was rendered and stored, along with its
    /// thumbnail and, if the file carries one, its embedded preview.
    Converted {
        path: String,
        tiles: usize,
        thumbnail: bool,
        embedded: bool,
    },
    /// Source is above the megapixel cap. Only an embedded preview may have
    /// been stored.
    Skipped { path: String, megapixels: f64, embedded: bool },
    /// Largest tile was already in the store; nothing was rendered.
    Cached { path: String },
    Cancelled,
    Complete,
}

/// Totals of a finished [`Scanner::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub discovered: u64,
    pub converted: u64,
    /// Rendered thumbnails stored.
    pub thumbnails: u64,
    /// EXIF-embedded previews stored.
    pub embedded: u64,
    pub skipped: u64,
    pub cached: u64,
    pub failed: u64,
    pub cancelled: bool,
}

fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') { format!("{dir}{name}") } else { format!("{dir}/{name}") }
}

fn is_iso(name: &str) -> bool {
    ext::extension(name).is_some_and(|ext| ext == "iso")
}

/// Walks a library and feeds every image to the tile engine, at most
/// `threads` at a time.
pub struct Scanner {
    engine: TileEngine,
    store: Arc<dyn TileStore>,
    threads: usize,
    cancel: CancellationToken,
}
impl Scanner {
    /// `threads == 0` means one job per CPU.
    pub fn new(engine: TileEngine, store: Arc<dyn TileStore>, threads: usize, cancel: CancellationToken) -> Self {
        let threads = if threads == 0 { num_cpus::get() } else { threads };
        Self {
            engine,
            store,
            threads,
            cancel,
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stream [`ScanEvent`]s for every image below `root`.
    ///
    /// Discovery is depth-first in name order; `.iso` files are descended
    /// like directories. The cancellation token is checked before each
    /// directory listing and before each conversion is started. Conversions
    /// already running are always allowed to finish.
    pub fn scan<'a>(&'a self, root: &'a str) -> impl Stream<Item = Result<ScanEvent>> + 'a {
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            yield Ok(ScanEvent::Started);
            let vfs = self.engine.vfs();
            let mut files = VecDeque::new();
            let mut dirs = vec![root.to_string()];
            while let Some(dir) = dirs.pop() {
                if self.cancel.is_cancelled() {
                    tracing::info!(root, "scan cancelled during discovery");
                    yield Ok(ScanEvent::Cancelled);
                    return;
                }
                let mut entries = match vfs.read_dir(&dir).await.or_raise(|| ErrorKind::Storage(dir.clone())) {
                    Ok(entries) => entries,
                    Err(err) => {
                        tracing::warn!(path = %dir, error = %err, "failed to list directory");
                        let fatal = dir == root;
                        yield Err(err);
                        if fatal {
                            return;
                        }
                        continue;
                    },
                };
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                let mut subdirs = Vec::new();
                for entry in entries {
                    let path = join(&dir, &entry.name);
                    if entry.is_dir || is_iso(&entry.name) {
                        subdirs.push(path);
                    } else if ext::is_image(&path) {
                        yield Ok(ScanEvent::FileDiscovered { path: path.clone() });
                        files.push_back(path);
                    }
                }
                dirs.extend(subdirs.into_iter().rev());
            }
            // Infallible: a usize (either 32- or 64-bit) will always fit in a u64.
            yield Ok(ScanEvent::DiscoveryComplete(u64::try_from(files.len()).unwrap_or(0)));

            let engine = &self.engine;
            let store = self.store.as_ref();
            let job = |path: String| async move { convert_file(engine, store, &path).await };
            let mut processing = FuturesUnordered::new();
            let mut cancelled = false;
            loop {
                // Pop-n-push: top up to the concurrency limit, FIFO.
                while processing.len() < self.threads && !files.is_empty() {
                    if self.cancel.is_cancelled() {
                        cancelled = true;
                        break;
                    }
                    if let Some(path) = files.pop_front() {
                        processing.push(job(path));
                    }
                }
                let Some(result) = processing.next().await else {
                    break;
                };
                if let Err(err) = &result {
                    tracing::warn!(error = %err, "failed to convert source");
                }
                yield result;
            }

            if cancelled {
                tracing::info!(root, remaining = files.len(), "scan cancelled");
                yield Ok(ScanEvent::Cancelled);
                return;
            }
            yield Ok(ScanEvent::Complete);
        })
    }

    /// Drive [`scan()`](Self::scan) to the end and count the outcomes.
    ///
    /// Per-file failures are only counted. The scan itself fails when the
    /// root could not be listed.
    pub async fn run(&self, root: &str) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        let mut discovered = false;
        let mut last_error = None;
        let mut events = std::pin::pin!(self.scan(root));
        while let Some(event) = events.next().await {
            match event {
                Ok(ScanEvent::DiscoveryComplete(total)) => {
                    discovered = true;
                    report.discovered = total;
                },
                Ok(ScanEvent::Converted { thumbnail, embedded, .. }) => {
                    report.converted += 1;
                    report.thumbnails += u64::from(thumbnail);
                    report.embedded += u64::from(embedded);
                },
                Ok(ScanEvent::Skipped { embedded, .. }) => {
                    report.skipped += 1;
                    report.embedded += u64::from(embedded);
                },
                Ok(ScanEvent::Cached { .. }) => report.cached += 1,
                Ok(ScanEvent::Cancelled) => report.cancelled = true,
                Ok(ScanEvent::Started | ScanEvent::FileDiscovered { .. } | ScanEvent::Complete) => {},
                Err(err) => {
                    report.failed += 1;
                    last_error = Some(err);
                },
            }
        }
        if !discovered && !report.cancelled {
            return Err(match last_error {
                Some(err) => err.raise(ErrorKind::Scan),
                None => exn::Exn::from(ErrorKind::Scan),
            });
        }
        tracing::info!(
            root,
            discovered = report.discovered,
            converted = report.converted,
            thumbnails = report.thumbnails,
            embedded = report.embedded,
            skipped = report.skipped,
            cached = report.cached,
            failed = report.failed,
            cancelled = report.cancelled,
            "scan finished"
        );
        Ok(report)
    }
}
