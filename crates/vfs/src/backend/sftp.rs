//! SFTP joint.
//!
//! One SSH connection with one `sftp` subsystem channel per joint. Files are
//! native SFTP handles, so seeks are real.
//!
//! Host keys are accepted without pinning and a warning is logged for each
//! connection. Fine for a single-user home server, wrong for anything
//! multi-tenant.

use super::{Credentials, parse_key};
use crate::error::{ErrorKind, Result, TransportKind};
use crate::joint::{Joint, JointContext, JointState, join_remote, needs_size, seek_target, timed};
use crate::models::{FileInfo, base_name};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use russh::Disconnect;
use russh::client::{self, Config, Handle};
use russh::keys::{HashAlg, PublicKey};
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::fs::{File, Metadata};
use russh_sftp::protocol::StatusCode;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

const DEFAULT_PORT: u16 = 22;

struct TrustingHandler {
    key: String,
}

impl client::Handler for TrustingHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        tracing::warn!(
            key = %self.key,
            fingerprint = %server_public_key.fingerprint(HashAlg::Sha256),
            "accepting SSH host key without verification"
        );
        Ok(true)
    }
}

fn is_missing(err: &SftpError) -> bool {
    matches!(err, SftpError::Status(status) if matches!(status.status_code, StatusCode::NoSuchFile))
}

/// Map an SFTP result, turning "no such file" into [`ErrorKind::NotFound`].
fn check<T>(result: std::result::Result<T, SftpError>, path: &str) -> Result<T> {
    match result {
        Err(err) if is_missing(&err) => exn::bail!(ErrorKind::NotFound(path.to_string())),
        other => other.or_raise(|| ErrorKind::Transport(TransportKind::Protocol)),
    }
}

fn info_from(name: impl Into<String>, metadata: &Metadata) -> FileInfo {
    let modified = metadata.mtime.and_then(|mtime| OffsetDateTime::from_unix_timestamp(i64::from(mtime)).ok());
    if metadata.is_dir() {
        FileInfo::dir(name, modified)
    } else {
        FileInfo::file(name, metadata.size.unwrap_or(0), modified)
    }
}

struct SftpFile {
    file: File,
    pos: u64,
    size: Option<u64>,
}

pub struct SftpJoint {
    key: String,
    handle: Option<Handle<TrustingHandler>>,
    sftp: Option<SftpSession>,
    pwd: String,
    /// Upper bound for each request on the session.
    timeout: Duration,
    state: JointState,
    open: Option<SftpFile>,
}
impl SftpJoint {
    /// Connect, authenticate with the URL password and open the `sftp`
    /// subsystem.
    pub async fn make(key: &str, ctx: &JointContext) -> Result<Self> {
        let (url, Credentials { user, password }) = parse_key(key)?;
        let host = url.host_str().filter(|host| !host.is_empty()).ok_or_raise(|| ErrorKind::InvalidUrl(key.to_string()))?.to_string();
        let port = url.port().unwrap_or(DEFAULT_PORT);
        let authority = format!("{host}:{port}");

        let config = Arc::new(Config::default());
        let handler = TrustingHandler { key: key.to_string() };
        let connect = client::connect(config, (host.as_str(), port), handler);
        let timeout = ctx.dial_timeout;
        let mut handle = timed(timeout, connect).await?.or_raise(|| ErrorKind::Transport(TransportKind::Dial))?;

        let user = user.unwrap_or_else(|| "anonymous".to_string());
        let auth = timed(timeout, handle.authenticate_password(user, password.unwrap_or_default()))
            .await?
            .or_raise(|| ErrorKind::Transport(TransportKind::Auth))?;
        if !auth.success() {
            exn::bail!(ErrorKind::Transport(TransportKind::Auth));
        }

        let channel = timed(timeout, handle.channel_open_session())
            .await?
            .or_raise(|| ErrorKind::Transport(TransportKind::Session))?;
        timed(timeout, channel.request_subsystem(true, "sftp"))
            .await?
            .or_raise(|| ErrorKind::Transport(TransportKind::Session))?;
        let sftp = timed(timeout, SftpSession::new(channel.into_stream()))
            .await?
            .or_raise(|| ErrorKind::Transport(TransportKind::Session))?;

        let pwd = match ctx.pwd().get(&authority) {
            Some(pwd) => pwd,
            None => {
                let pwd = timed(timeout, sftp.canonicalize("."))
                    .await?
                    .or_raise(|| ErrorKind::Transport(TransportKind::Protocol))?;
                ctx.pwd().insert(&authority, &pwd);
                pwd
            },
        };
        tracing::debug!(%authority, %pwd, "SFTP joint connected");
        Ok(Self {
            key: key.to_string(),
            handle: Some(handle),
            sftp: Some(sftp),
            pwd,
            timeout: ctx.dial_timeout,
            state: JointState::Fresh,
            open: None,
        })
    }

    fn session(&self) -> Result<&SftpSession> {
        self.sftp.as_ref().ok_or_raise(|| ErrorKind::Transport(TransportKind::Session))
    }

    fn file(&mut self) -> Result<&mut SftpFile> {
        self.open.as_mut().ok_or_else(|| exn::Exn::from(ErrorKind::NotOpen))
    }
}

#[async_trait]
impl Joint for SftpJoint {
    fn key(&self) -> &str {
        &self.key
    }

    fn state(&self) -> JointState {
        self.state
    }

    async fn open(&mut self, inner: &str) -> Result<()> {
        let path = join_remote(&self.pwd, inner);
        let sftp = self.session()?;
        let metadata = check(timed(self.timeout, sftp.metadata(path.as_str())).await?, inner)?;
        if metadata.is_dir() {
            exn::bail!(ErrorKind::UnexpectedDir(inner.to_string()));
        }
        let file = check(timed(self.timeout, sftp.open(path.as_str())).await?, inner)?;
        self.open = Some(SftpFile {
            file,
            pos: 0,
            size: metadata.size,
        });
        self.state = JointState::InUse;
        Ok(())
    }

    async fn close_file(&mut self) -> Result<()> {
        self.state = JointState::Idle;
        let Some(mut open) = self.open.take() else {
            return Ok(());
        };
        timed(self.timeout, open.file.shutdown()).await?.or_raise(|| ErrorKind::Transport(TransportKind::Protocol))
    }

    async fn info(&mut self, inner: &str) -> Result<FileInfo> {
        let path = join_remote(&self.pwd, inner);
        let metadata = check(timed(self.timeout, self.session()?.metadata(path.as_str())).await?, inner)?;
        Ok(info_from(base_name(&path), &metadata))
    }

    async fn read_dir(&mut self, inner: &str) -> Result<Vec<FileInfo>> {
        let path = join_remote(&self.pwd, inner);
        let entries = check(timed(self.timeout, self.session()?.read_dir(path.as_str())).await?, inner)?;
        Ok(entries
            .filter(|entry| {
                let name = entry.file_name();
                name != "." && name != ".."
            })
            .map(|entry| info_from(entry.file_name(), &entry.metadata()))
            .collect())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let timeout = self.timeout;
        let open = self.file()?;
        let n = timed(timeout, open.file.read(buf)).await?.or_raise(|| ErrorKind::Transport(TransportKind::Protocol))?;
        open.pos += n as u64;
        Ok(n)
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let size = if needs_size(pos) { self.size().await? } else { 0 };
        let timeout = self.timeout;
        let open = self.file()?;
        let target = seek_target(pos, open.pos, size)?;
        timed(timeout, open.file.seek(SeekFrom::Start(target)))
            .await?
            .or_raise(|| ErrorKind::Transport(TransportKind::Protocol))?;
        open.pos = target;
        Ok(target)
    }

    async fn size(&mut self) -> Result<u64> {
        let timeout = self.timeout;
        let open = self.file()?;
        if let Some(size) = open.size {
            return Ok(size);
        }
        let metadata =
            timed(timeout, open.file.metadata()).await?.or_raise(|| ErrorKind::Transport(TransportKind::Protocol))?;
        let size = metadata.size.unwrap_or(0);
        open.size = Some(size);
        Ok(size)
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.open = None;
        self.state = JointState::Closed;
        let mut last_error = None;
        if let Some(sftp) = self.sftp.take() {
            last_error = sftp.close().await.or_raise(|| ErrorKind::Transport(TransportKind::Session)).err();
        }
        if let Some(handle) = self.handle.take() {
            tracing::debug!(key = %self.key, "closing SFTP joint");
            if let Err(err) = handle.disconnect(Disconnect::ByApplication, "", "en").await {
                tracing::trace!(key = %self.key, error = %err, "SSH disconnect failed");
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
