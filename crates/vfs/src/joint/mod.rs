//! The joint contract.
//!
//! A joint is an exclusive, single-user handle on one upstream: a TCP/SSH
//! session, an HTTP client rooted at a WebDAV share, or a parsed ISO-9660
//! directory tree. A joint serves at most one open file at a time, so
//! parallel access to the same upstream means several joints with the same
//! [`key()`](Joint::key), which is exactly what the
//! [`JointPool`](crate::pool::JointPool) hands out.
//!

#[cfg(any(test, feature = "mock"))]
mod mock;

#[cfg(any(test, feature = "mock"))]
pub use self::mock::{MockJoint, MockStats};
use crate::error::{ErrorKind, Result, TransportKind};
use crate::models::FileInfo;
use crate::settings::VfsSettings;
use async_trait::async_trait;
use encoding_rs::Encoding;
use exn::ResultExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::time::Duration;

/// A joint as handed around by the pool and the façade.
pub type BoxJoint = Box<dyn Joint>;

/// Where a joint is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointState {
    /// Upstream established, never used.
    Fresh,
    /// No file open; transport may still be alive.
    Idle,
    /// A file is open on this joint.
    InUse,
    /// Upstream torn down. Terminal.
    Closed,
}

/// Unified interface over every back-end.
///
/// All operations take `&mut self`: a joint is never shared, the pool's
/// exclusive checkout is what serializes access to it.
///
/// # Examples
///
/// ```
/// use std::io::SeekFrom;
/// use hearth_vfs::joint::Joint;
/// use hearth_vfs::error::Result;
///
/// async fn tail(joint: &mut dyn Joint, inner: &str) -> Result<Vec<u8>> {
///     joint.open(inner).await?;
///     joint.seek(SeekFrom::End(-4)).await?;
///     let mut buf = [0u8; 4];
///     let n = joint.read(&mut buf).await?;
///     joint.close_file().await?;
///     Ok(buf[..n].to_vec())
/// }
/// ```
#[async_trait]
pub trait Joint: Send {
    /// The immutable key identifying the upstream (URL or ISO file path).
    fn key(&self) -> &str;

    fn state(&self) -> JointState;

    /// True iff a file is currently open on this joint.
    fn busy(&self) -> bool {
        self.state() == JointState::InUse
    }

    /// Open a file below the joint key. Moves the joint to `InUse`.
    ///
    /// Directories are rejected with
    /// [`UnexpectedDir`](crate::error::ErrorKind::UnexpectedDir).
    async fn open(&mut self, inner: &str) -> Result<()>;

    /// Close the open file and return the joint to `Idle`.
    ///
    /// Must be called exactly once per successful [`open()`](Self::open).
    async fn close_file(&mut self) -> Result<()>;

    async fn info(&mut self, inner: &str) -> Result<FileInfo>;

    /// List children of a directory, excluding `.` and `..`.
    async fn read_dir(&mut self, inner: &str) -> Result<Vec<FileInfo>>;

    /// Read from the current position of the open file. Returns `0` at the
    /// end of the file.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Size of the open file. Looked up once then cached on the joint.
    async fn size(&mut self) -> Result<u64>;

    /// Read at an absolute offset, filling as much of `buf` as the file
    /// allows. Leaves the position just past the bytes read.
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.seek(SeekFrom::Start(offset)).await?;
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Tear the upstream down. Idempotent.
    async fn cleanup(&mut self) -> Result<()>;
}

/// Shared state every joint constructor receives.
pub struct JointContext {
    pub dial_timeout: Duration,
    pub iso_charset: &'static Encoding,
    pwd: PwdCache,
}
impl JointContext {
    pub fn new(settings: &VfsSettings) -> Self {
        Self {
            dial_timeout: settings.dial_timeout,
            iso_charset: settings.iso_charset,
            pwd: PwdCache::default(),
        }
    }

    /// Working directories of FTP/SFTP servers, keyed by authority.
    pub(crate) fn pwd(&self) -> &PwdCache {
        &self.pwd
    }
}

/// Permanent per-authority working directory cache. Servers normally keep a
/// stable home directory, so entries are never invalidated.
#[derive(Default)]
pub(crate) struct PwdCache(RwLock<HashMap<String, String>>);
impl PwdCache {
    pub(crate) fn get(&self, authority: &str) -> Option<String> {
        self.0.read().get(authority).cloned()
    }

    pub(crate) fn insert(&self, authority: &str, pwd: &str) {
        self.0.write().entry(authority.to_string()).or_insert_with(|| pwd.to_string());
    }
}

/// Join a server working directory with an inner path.
pub(crate) fn join_remote(pwd: &str, inner: &str) -> String {
    let inner = inner.trim_start_matches('/');
    if inner.is_empty() {
        return pwd.to_string();
    }
    format!("{}/{}", pwd.trim_end_matches('/'), inner)
}

/// `SeekFrom::End` is the only variant that needs the file size.
pub(crate) fn needs_size(pos: SeekFrom) -> bool {
    matches!(pos, SeekFrom::End(_))
}

/// Resolve a seek request into an absolute position.
///
/// `size` is only consulted for [`SeekFrom::End`]. A resulting negative
/// position fails with [`InvalidOffset`](ErrorKind::InvalidOffset).
pub(crate) fn seek_target(pos: SeekFrom, current: u64, size: u64) -> Result<u64> {
    let (base, offset) = match pos {
        SeekFrom::Start(offset) => return Ok(offset),
        SeekFrom::Current(offset) => (current, offset),
        SeekFrom::End(offset) => (size, offset),
    };
    let target = i128::from(base) + i128::from(offset);
    match u64::try_from(target) {
        Ok(target) => Ok(target),
        Err(_) => exn::bail!(ErrorKind::InvalidOffset(i64::try_from(target).unwrap_or(i64::MIN))),
    }
}

/// Bound one upstream round trip. Running out of time is a
/// [`Timeout`](TransportKind::Timeout) transport error.
pub(crate) async fn timed<T>(timeout: Duration, operation: impl Future<Output = T>) -> Result<T> {
    tokio::time::timeout(timeout, operation).await.or_raise(|| ErrorKind::Transport(TransportKind::Timeout))
}

/// Translate a numeric POSIX-style whence (`0` start, `1` current, `2` end)
/// into a [`SeekFrom`]. Useful for consumers speaking C-like seek APIs.
pub fn whence(offset: i64, whence: i32) -> Result<SeekFrom> {
    match whence {
        0 => match u64::try_from(offset) {
            Ok(offset) => Ok(SeekFrom::Start(offset)),
            Err(_) => exn::bail!(ErrorKind::InvalidOffset(offset)),
        },
        1 => Ok(SeekFrom::Current(offset)),
        2 => Ok(SeekFrom::End(offset)),
        other => exn::bail!(ErrorKind::InvalidWhence(other)),
    }
}
