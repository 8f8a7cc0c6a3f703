//! Open file handle returned by [`Vfs::open()`](crate::Vfs::open).

use crate::error::{ErrorKind, Result};
use crate::joint::{BoxJoint, whence};
use crate::pool::JointPool;
use std::io::SeekFrom;

const READ_CHUNK: usize = 64 * 1024;

/// An open file that owns the joint it was opened on.
///
/// [`close()`](Self::close) hands a healthy joint back to the pool. After any
/// joint error the joint is considered broken and is cleaned up instead of
/// being reused. Dropping an unclosed `File` closes it on the Tokio runtime
/// in the background.
pub struct File {
    path: String,
    joint: Option<BoxJoint>,
    pool: Option<JointPool>,
    failed: bool,
}
impl File {
    pub(crate) fn new(path: &str, joint: BoxJoint, pool: Option<JointPool>) -> Self {
        Self {
            path: path.to_string(),
            joint: Some(joint),
            pool,
            failed: false,
        }
    }

    /// The path this file was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn joint(&mut self) -> Result<&mut BoxJoint> {
        self.joint.as_mut().ok_or_else(|| exn::Exn::from(ErrorKind::NotOpen))
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let result = self.joint()?.read(buf).await;
        self.track(result)
    }

    pub async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let result = self.joint()?.read_at(buf, offset).await;
        self.track(result)
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let result = self.joint()?.seek(pos).await;
        self.track(result)
    }

    /// Seek with a numeric `whence` (0 = start, 1 = current, 2 = end).
    pub async fn seek_whence(&mut self, offset: i64, whence_code: i32) -> Result<u64> {
        let pos = whence(offset, whence_code)?;
        self.seek(pos).await
    }

    pub async fn size(&mut self) -> Result<u64> {
        let result = self.joint()?.size().await;
        self.track(result)
    }

    /// Read from the current position to the end of the file, stopping
    /// after at most `limit` bytes.
    pub async fn read_to_end(&mut self, limit: u64) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        while (out.len() as u64) < limit {
            let want = usize::try_from(limit - out.len() as u64).map_or(READ_CHUNK, |left| left.min(READ_CHUNK));
            let n = self.read(&mut chunk[..want]).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out)
    }

    /// Close the file and release its joint.
    pub async fn close(mut self) -> Result<()> {
        match self.joint.take() {
            Some(joint) => finish(joint, self.pool.take(), self.failed).await,
            None => Ok(()),
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        let Some(joint) = self.joint.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(path = %self.path, "file dropped outside a runtime; joint leaked");
            return;
        };
        let (pool, failed, path) = (self.pool.take(), self.failed, self.path.clone());
        runtime.spawn(async move {
            if let Err(err) = finish(joint, pool, failed).await {
                tracing::warn!(%path, error = %err, "failed to close dropped file");
            }
        });
    }
}

async fn finish(mut joint: BoxJoint, pool: Option<JointPool>, failed: bool) -> Result<()> {
    if failed {
        tracing::debug!(key = %joint.key(), "cleaning up joint after error");
        return joint.cleanup().await;
    }
    if let Err(err) = joint.close_file().await {
        if let Err(cleanup) = joint.cleanup().await {
            tracing::debug!(key = %joint.key(), error = %cleanup, "cleanup after failed close");
        }
        return Err(err);
    }
    match pool {
        Some(pool) => {
            pool.release(joint);
            Ok(())
        },
        None => joint.cleanup().await,
    }
}
