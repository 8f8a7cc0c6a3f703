//! In-memory joint for testing.

use super::{Joint, JointState, needs_size, seek_target};
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::SeekFrom;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Bookkeeping shared by every [`MockJoint`] made from the same test.
///
/// Lets tests assert pool invariants from the outside: how many joints were
/// built, whether each one was torn down exactly once, and whether any two
/// callers ever had the same joint open at the same time.
#[derive(Default)]
pub struct MockStats {
    next_id: AtomicU64,
    made: AtomicUsize,
    overlaps: AtomicUsize,
    cleanups: Mutex<HashMap<u64, usize>>,
    active: Mutex<HashSet<u64>>,
}
impl MockStats {
    pub fn made(&self) -> usize {
        self.made.load(Ordering::SeqCst)
    }

    /// Number of distinct joints that have been cleaned up at least once.
    pub fn cleaned(&self) -> usize {
        self.cleanups.lock().len()
    }

    pub fn cleanup_count(&self, id: u64) -> usize {
        self.cleanups.lock().get(&id).copied().unwrap_or(0)
    }

    /// True when every joint ever made saw exactly one `cleanup()` call.
    pub fn all_cleaned_once(&self) -> bool {
        let cleanups = self.cleanups.lock();
        cleanups.len() == self.made() && cleanups.values().all(|count| *count == 1)
    }

    /// Times an `open` found its own joint already open elsewhere.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

/// In-memory joint serving files from a shared map.
///
/// Directories are implied by the file paths, the same way object stores
/// work.
///
/// # Examples
///
/// ```
/// use hearth_vfs::joint::{Joint, MockJoint, MockStats};
/// use std::collections::HashMap;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let files = Arc::new(HashMap::from([("dir/a.txt".to_string(), b"hello".to_vec())]));
/// let mut joint = MockJoint::new("mock://host", files, Arc::new(MockStats::default()));
/// joint.open("dir/a.txt").await?;
/// assert_eq!(joint.size().await?, 5);
/// joint.close_file().await?;
/// # Ok(())
/// # }
/// ```
pub struct MockJoint {
    id: u64,
    key: String,
    files: Arc<HashMap<String, Vec<u8>>>,
    stats: Arc<MockStats>,
    state: JointState,
    open: Option<(String, u64)>,
}
impl MockJoint {
    pub fn new(key: impl Into<String>, files: Arc<HashMap<String, Vec<u8>>>, stats: Arc<MockStats>) -> Self {
        let id = stats.next_id.fetch_add(1, Ordering::SeqCst);
        stats.made.fetch_add(1, Ordering::SeqCst);
        Self {
            id,
            key: key.into(),
            files,
            stats,
            state: JointState::Fresh,
            open: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn is_dir(&self, inner: &str) -> bool {
        let inner = inner.trim_matches('/');
        inner.is_empty() || self.files.keys().any(|path| path.starts_with(&format!("{inner}/")))
    }

    fn current(&self) -> Result<(&[u8], u64)> {
        let (path, pos) = self.open.as_ref().ok_or_else(|| exn::Exn::from(ErrorKind::NotOpen))?;
        let data = self.files.get(path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok((data, *pos))
    }
}

#[async_trait]
impl Joint for MockJoint {
    fn key(&self) -> &str {
        &self.key
    }

    fn state(&self) -> JointState {
        self.state
    }

    async fn open(&mut self, inner: &str) -> Result<()> {
        let inner = inner.trim_matches('/');
        if !self.files.contains_key(inner) {
            if self.is_dir(inner) {
                exn::bail!(ErrorKind::UnexpectedDir(inner.to_string()));
            }
            exn::bail!(ErrorKind::NotFound(inner.to_string()));
        }
        if !self.stats.active.lock().insert(self.id) {
            self.stats.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.open = Some((inner.to_string(), 0));
        self.state = JointState::InUse;
        // Give other tasks a chance to interleave while the file is open.
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn close_file(&mut self) -> Result<()> {
        if self.open.take().is_some() {
            self.stats.active.lock().remove(&self.id);
        }
        self.state = JointState::Idle;
        Ok(())
    }

    async fn info(&mut self, inner: &str) -> Result<FileInfo> {
        let inner = inner.trim_matches('/');
        let name = crate::models::base_name(inner);
        if let Some(data) = self.files.get(inner) {
            return Ok(FileInfo::file(name, data.len() as u64, None));
        }
        if self.is_dir(inner) {
            return Ok(FileInfo::dir(name, None));
        }
        exn::bail!(ErrorKind::NotFound(inner.to_string()))
    }

    async fn read_dir(&mut self, inner: &str) -> Result<Vec<FileInfo>> {
        let inner = inner.trim_matches('/');
        if !self.is_dir(inner) {
            exn::bail!(ErrorKind::NotFound(inner.to_string()));
        }
        let prefix = if inner.is_empty() { String::new() } else { format!("{inner}/") };
        let mut files = Vec::new();
        let mut dirs = BTreeSet::new();
        for (path, data) in self.files.iter() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                },
                None => files.push(FileInfo::file(rest, data.len() as u64, None)),
            }
        }
        files.extend(dirs.into_iter().map(|name| FileInfo::dir(name, None)));
        Ok(files)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (data, pos) = self.current()?;
        let start = usize::try_from(pos).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        if let Some((_, pos)) = self.open.as_mut() {
            *pos += n as u64;
        }
        Ok(n)
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let (data, current) = self.current()?;
        let size = if needs_size(pos) { data.len() as u64 } else { 0 };
        let target = seek_target(pos, current, size)?;
        if let Some((_, pos)) = self.open.as_mut() {
            *pos = target;
        }
        Ok(target)
    }

    async fn size(&mut self) -> Result<u64> {
        Ok(self.current()?.0.len() as u64)
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.close_file().await?;
        *self.stats.cleanups.lock().entry(self.id).or_insert(0) += 1;
        self.state = JointState::Closed;
        Ok(())
    }
}
