//! Local filesystem joint.
//!
//! Plain `tokio::fs` access. Local joints are cheap, so the façade builds one
//! per operation and never parks them in the pool.

use crate::error::{ErrorKind, Result};
use crate::joint::{Joint, JointState, needs_size, seek_target};
use crate::models::{FileInfo, base_name};
use async_trait::async_trait;
use std::io::SeekFrom;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

struct OpenFile {
    path: String,
    file: File,
    size: Option<u64>,
}

pub struct LocalJoint {
    state: JointState,
    open: Option<OpenFile>,
}
impl LocalJoint {
    pub fn new() -> Self {
        Self {
            state: JointState::Fresh,
            open: None,
        }
    }

    fn current(&mut self) -> Result<&mut OpenFile> {
        self.open.as_mut().ok_or_else(|| exn::Exn::from(ErrorKind::NotOpen))
    }
}
impl Default for LocalJoint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Joint for LocalJoint {
    fn key(&self) -> &str {
        ""
    }

    fn state(&self) -> JointState {
        self.state
    }

    async fn open(&mut self, inner: &str) -> Result<()> {
        let metadata = fs::metadata(inner).await.map_err(|e| ErrorKind::from_io(e, inner))?;
        if metadata.is_dir() {
            exn::bail!(ErrorKind::UnexpectedDir(inner.to_string()));
        }
        let file = File::open(inner).await.map_err(|e| ErrorKind::from_io(e, inner))?;
        self.open = Some(OpenFile {
            path: inner.to_string(),
            file,
            size: Some(metadata.len()),
        });
        self.state = JointState::InUse;
        Ok(())
    }

    async fn close_file(&mut self) -> Result<()> {
        // Dropping the handle closes it; tokio flushes nothing for reads.
        self.open = None;
        self.state = JointState::Idle;
        Ok(())
    }

    async fn info(&mut self, inner: &str) -> Result<FileInfo> {
        let metadata = fs::metadata(inner).await.map_err(|e| ErrorKind::from_io(e, inner))?;
        Ok(FileInfo::from_metadata(base_name(inner), &metadata))
    }

    async fn read_dir(&mut self, inner: &str) -> Result<Vec<FileInfo>> {
        let mut entries = fs::read_dir(inner).await.map_err(|e| ErrorKind::from_io(e, inner))?;
        let mut list = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| ErrorKind::from_io(e, inner))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Broken symlinks and the like are skipped rather than failing
            // the whole listing.
            match fs::metadata(entry.path()).await {
                Ok(metadata) => list.push(FileInfo::from_metadata(name, &metadata)),
                Err(err) => tracing::trace!(name, error = %err, "skipping unreadable entry"),
            }
        }
        Ok(list)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let open = self.current()?;
        Ok(open.file.read(buf).await.map_err(|e| ErrorKind::from_io(e, &open.path))?)
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let size = if needs_size(pos) { self.size().await? } else { 0 };
        let open = self.current()?;
        let current = open.file.stream_position().await.map_err(ErrorKind::Io)?;
        let target = seek_target(pos, current, size)?;
        Ok(open.file.seek(SeekFrom::Start(target)).await.map_err(ErrorKind::Io)?)
    }

    async fn size(&mut self) -> Result<u64> {
        let open = self.current()?;
        if let Some(size) = open.size {
            return Ok(size);
        }
        let size = open.file.metadata().await.map_err(ErrorKind::Io)?.len();
        open.size = Some(size);
        Ok(size)
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.open = None;
        self.state = JointState::Closed;
        Ok(())
    }
}
