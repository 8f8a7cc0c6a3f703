//! FTP joint.
//!
//! `suppaftp`'s blocking client driven from `spawn_blocking`. The control
//! connection is moved into each blocking call and handed back afterwards,
//! so a joint can never be used from two threads at once.
//!
//! FTP has no server-side seek for an open transfer. Reads lazily start a
//! `RETR` (with `REST` when resuming) at the current position; a seek that
//! moves the position just drops the data stream and the next read starts a
//! new transfer there.

use super::{Credentials, parse_key};
use crate::error::{ErrorKind, Result, TransportKind};
use crate::joint::{Joint, JointContext, JointState, join_remote, needs_size, seek_target};
use crate::models::{FileInfo, base_name};
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::io::{Read, SeekFrom};
use std::net::ToSocketAddrs;
use std::str::FromStr;
use std::time::Duration;
use suppaftp::FtpStream;
use suppaftp::list::File as ListEntry;
use suppaftp::types::FileType;
use time::OffsetDateTime;

const DEFAULT_PORT: u16 = 21;

type DataStream = Box<dyn Read + Send>;

/// Escape square brackets for `LIST`, which treats them as glob syntax on
/// most servers.
pub(crate) fn escape_brackets(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '[' => escaped.push_str("[[]"),
            ']' => escaped.push_str("[]]"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn parse_listing(lines: &[String]) -> Vec<FileInfo> {
    lines
        .iter()
        .filter_map(|line| match ListEntry::from_str(line) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::trace!(line, error = %err, "skipping unparsable LIST line");
                None
            },
        })
        .filter(|entry| entry.name() != "." && entry.name() != "..")
        .map(|entry| {
            let modified = Some(OffsetDateTime::from(entry.modified()));
            if entry.is_directory() {
                FileInfo::dir(entry.name(), modified)
            } else {
                FileInfo::file(entry.name(), entry.size() as u64, modified)
            }
        })
        .collect()
}

struct FtpFile {
    path: String,
    pos: u64,
    size: Option<u64>,
    data: Option<DataStream>,
}

pub struct FtpJoint {
    key: String,
    conn: Option<FtpStream>,
    pwd: String,
    state: JointState,
    open: Option<FtpFile>,
}
impl FtpJoint {
    /// Dial, log in and switch to binary mode.
    pub async fn make(key: &str, ctx: &JointContext) -> Result<Self> {
        let (url, Credentials { user, password }) = parse_key(key)?;
        let host = url.host_str().filter(|host| !host.is_empty()).ok_or_raise(|| ErrorKind::InvalidUrl(key.to_string()))?.to_string();
        let port = url.port().unwrap_or(DEFAULT_PORT);
        let authority = format!("{host}:{port}");
        let timeout = ctx.dial_timeout;
        let cached_pwd = ctx.pwd().get(&authority);

        let (conn, pwd) = tokio::task::spawn_blocking(move || -> Result<(FtpStream, String)> {
            let addr = (host.as_str(), port)
                .to_socket_addrs()
                .or_raise(|| ErrorKind::Transport(TransportKind::Dial))?
                .next()
                .ok_or_raise(|| ErrorKind::Transport(TransportKind::Dial))?;
            let mut conn =
                FtpStream::connect_timeout(addr, timeout).or_raise(|| ErrorKind::Transport(TransportKind::Dial))?;
            set_timeouts(&conn, timeout)?;
            let user = user.unwrap_or_else(|| "anonymous".to_string());
            let password = password.unwrap_or_else(|| "anonymous".to_string());
            conn.login(user.as_str(), password.as_str()).or_raise(|| ErrorKind::Transport(TransportKind::Auth))?;
            conn.transfer_type(FileType::Binary).or_raise(|| ErrorKind::Transport(TransportKind::Protocol))?;
            let pwd = match cached_pwd {
                Some(pwd) => pwd,
                None => conn.pwd().or_raise(|| ErrorKind::Transport(TransportKind::Protocol))?,
            };
            Ok((conn, pwd))
        })
        .await
        .or_raise(|| ErrorKind::Transport(TransportKind::Session))??;

        ctx.pwd().insert(&authority, &pwd);
        tracing::debug!(%authority, %pwd, "FTP joint connected");
        Ok(Self {
            key: key.to_string(),
            conn: Some(conn),
            pwd,
            state: JointState::Fresh,
            open: None,
        })
    }

    /// Run a blocking operation on the control connection.
    async fn with_conn<T, F>(&mut self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream) -> Result<T> + Send + 'static,
    {
        let mut conn = self.conn.take().ok_or_raise(|| ErrorKind::Transport(TransportKind::Session))?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut conn);
            (conn, result)
        })
        .await
        .or_raise(|| ErrorKind::Transport(TransportKind::Session))?;
        self.conn = Some(conn);
        result
    }

    fn file(&mut self) -> Result<&mut FtpFile> {
        self.open.as_mut().ok_or_else(|| exn::Exn::from(ErrorKind::NotOpen))
    }

    /// Stat a remote path: `SIZE` for files, a `CWD` round trip for
    /// directories.
    async fn remote_size(&mut self, path: String) -> Result<Option<u64>> {
        let pwd = self.pwd.clone();
        self.with_conn(move |conn| {
            if let Ok(size) = conn.size(path.as_str()) {
                return Ok(Some(size as u64));
            }
            if conn.cwd(path.as_str()).is_ok() {
                conn.cwd(pwd.as_str()).or_raise(|| ErrorKind::Transport(TransportKind::Protocol))?;
                return Ok(None);
            }
            exn::bail!(ErrorKind::NotFound(path))
        })
        .await
    }

    /// Drop the data stream, if any, and read the transfer's final reply.
    async fn drop_stream(&mut self) -> Result<()> {
        let Some(data) = self.open.as_mut().and_then(|file| file.data.take()) else {
            return Ok(());
        };
        let key = self.key.clone();
        self.with_conn(move |conn| {
            // Aborting a transfer midway usually gets a 426 reply; the
            // control connection is still usable afterwards.
            if let Err(err) = conn.finalize_retr_stream(data) {
                tracing::trace!(%key, error = %err, "data stream closed early");
            }
            Ok(())
        })
        .await
    }
}

fn set_timeouts(conn: &FtpStream, timeout: Duration) -> Result<()> {
    let socket = conn.get_ref();
    socket.set_read_timeout(Some(timeout)).or_raise(|| ErrorKind::Transport(TransportKind::Dial))?;
    socket.set_write_timeout(Some(timeout)).or_raise(|| ErrorKind::Transport(TransportKind::Dial))?;
    Ok(())
}

#[async_trait]
impl Joint for FtpJoint {
    fn key(&self) -> &str {
        &self.key
    }

    fn state(&self) -> JointState {
        self.state
    }

    async fn open(&mut self, inner: &str) -> Result<()> {
        let path = join_remote(&self.pwd, inner);
        let Some(size) = self.remote_size(path.clone()).await? else {
            exn::bail!(ErrorKind::UnexpectedDir(inner.to_string()));
        };
        self.open = Some(FtpFile {
            path,
            pos: 0,
            size: Some(size),
            data: None,
        });
        self.state = JointState::InUse;
        Ok(())
    }

    async fn close_file(&mut self) -> Result<()> {
        let result = self.drop_stream().await;
        self.open = None;
        self.state = JointState::Idle;
        result
    }

    async fn info(&mut self, inner: &str) -> Result<FileInfo> {
        let path = join_remote(&self.pwd, inner);
        let name = base_name(&path).to_string();
        Ok(match self.remote_size(path).await? {
            Some(size) => FileInfo::file(name, size, None),
            None => FileInfo::dir(name, None),
        })
    }

    async fn read_dir(&mut self, inner: &str) -> Result<Vec<FileInfo>> {
        let path = escape_brackets(&join_remote(&self.pwd, inner));
        let lines = self
            .with_conn(move |conn| {
                conn.list(Some(path.as_str())).or_raise(|| ErrorKind::Transport(TransportKind::Protocol))
            })
            .await?;
        Ok(parse_listing(&lines))
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = self.file()?;
        if file.size.is_some_and(|size| file.pos >= size) {
            return Ok(0);
        }
        if file.data.is_none() {
            let path = file.path.clone();
            let pos = file.pos;
            let data = self
                .with_conn(move |conn| {
                    if pos > 0 {
                        let offset = usize::try_from(pos).or_raise(|| ErrorKind::InvalidOffset(i64::MAX))?;
                        conn.resume_transfer(offset).or_raise(|| ErrorKind::Transport(TransportKind::Protocol))?;
                    }
                    let stream = conn
                        .retr_as_stream(path.as_str())
                        .or_raise(|| ErrorKind::Transport(TransportKind::Protocol))?;
                    Ok(Box::new(stream) as DataStream)
                })
                .await?;
            self.file()?.data = Some(data);
        }

        let file = self.file()?;
        let mut data = file.data.take().ok_or_raise(|| ErrorKind::NotOpen)?;
        let len = buf.len();
        let (data, chunk) = tokio::task::spawn_blocking(move || {
            let mut chunk = vec![0u8; len];
            let result = data.read(&mut chunk).map(|n| {
                chunk.truncate(n);
                chunk
            });
            (data, result)
        })
        .await
        .or_raise(|| ErrorKind::Transport(TransportKind::Session))?;
        let file = self.file()?;
        file.data = Some(data);
        let chunk = chunk.or_raise(|| ErrorKind::Transport(TransportKind::Protocol))?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        file.pos += chunk.len() as u64;
        Ok(chunk.len())
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let size = if needs_size(pos) { self.size().await? } else { 0 };
        let file = self.file()?;
        let target = seek_target(pos, file.pos, size)?;
        if target != file.pos {
            self.drop_stream().await?;
            self.file()?.pos = target;
        }
        Ok(target)
    }

    async fn size(&mut self) -> Result<u64> {
        let file = self.file()?;
        if let Some(size) = file.size {
            return Ok(size);
        }
        let path = file.path.clone();
        let size = self
            .with_conn(move |conn| conn.size(path.as_str()).or_raise(|| ErrorKind::Transport(TransportKind::Protocol)))
            .await? as u64;
        self.file()?.size = Some(size);
        Ok(size)
    }

    async fn cleanup(&mut self) -> Result<()> {
        // The data stream goes down with the control connection.
        self.open = None;
        self.state = JointState::Closed;
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        tracing::debug!(key = %self.key, "closing FTP joint");
        tokio::task::spawn_blocking(move || conn.quit())
            .await
            .or_raise(|| ErrorKind::Transport(TransportKind::Session))?
            .or_raise(|| ErrorKind::Transport(TransportKind::Protocol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/pub/a.jpg", "/pub/a.jpg")]
    #[case("/pub/[2019] trip", "/pub/[[]2019[]] trip")]
    #[case("[]", "[[][]]")]
    fn test_escape_brackets(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(escape_brackets(path), expected);
    }

    #[test]
    fn test_parse_listing() {
        let lines = vec![
            "drwxr-xr-x    2 1000     1000         4096 Jan 02 10:00 photos".to_string(),
            "-rw-r--r--    1 1000     1000        12345 Jan 02 10:00 a.jpg".to_string(),
            "drwxr-xr-x    2 1000     1000         4096 Jan 02 10:00 .".to_string(),
            "total 8".to_string(),
        ];
        let list = parse_listing(&lines);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "photos");
        assert!(list[0].is_dir);
        assert_eq!(list[1].name, "a.jpg");
        assert_eq!(list[1].size, 12345);
    }

    /// A joint with a file open but no control connection: any request
    /// that reaches the server fails.
    fn disconnected(size: u64) -> FtpJoint {
        FtpJoint {
            key: "ftp://host".to_string(),
            conn: None,
            pwd: "/".to_string(),
            state: JointState::InUse,
            open: Some(FtpFile {
                path: "/a.jpg".to_string(),
                pos: 0,
                size: Some(size),
                data: None,
            }),
        }
    }

    #[tokio::test]
    async fn test_read_at_end_is_eof_without_transfer() {
        let mut joint = disconnected(10);
        let mut buf = [0u8; 4];
        assert_eq!(joint.read_at(&mut buf, 10).await.unwrap(), 0);
        assert_eq!(joint.seek(SeekFrom::End(0)).await.unwrap(), 10);
        assert_eq!(joint.read(&mut buf).await.unwrap(), 0);
        assert_eq!(joint.seek(SeekFrom::End(5)).await.unwrap(), 15);
        assert_eq!(joint.read(&mut buf).await.unwrap(), 0);
        assert!(joint.read_at(&mut buf, 3).await.is_err());
    }

    #[tokio::test]
    async fn test_make_rejects_bad_key() {
        let ctx = JointContext::new(&crate::settings::VfsSettings::default());
        let Err(err) = FtpJoint::make("not a url", &ctx).await else {
            panic!("expected an invalid URL error");
        };
        assert!(matches!(&*err, ErrorKind::InvalidUrl(_)));
    }
}
