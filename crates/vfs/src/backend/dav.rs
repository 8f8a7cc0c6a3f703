//! WebDAV joint.
//!
//! Metadata comes from `PROPFIND`, file bodies from ranged `GET`s. Like FTP,
//! the body is a forward-only stream: a seek that moves the position drops
//! it, and the next read asks the server for `bytes=<pos>-`.

use super::{Credentials, parse_key};
use crate::error::{ErrorKind, Result, TransportKind};
use crate::joint::{Joint, JointContext, JointState, needs_size, seek_target};
use crate::models::{FileInfo, base_name};
use async_trait::async_trait;
use bytes::Bytes;
use exn::{OptionExt, ResultExt};
use futures::{Stream, StreamExt};
use percent_encoding::percent_decode_str;
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, RANGE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::io::SeekFrom;
use std::pin::Pin;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc2822;
use url::Url;

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:resourcetype/><d:getcontentlength/><d:getlastmodified/></d:prop></d:propfind>"#;

fn propfind_method() -> Method {
    // Infallible: PROPFIND is a valid token.
    Method::from_bytes(b"PROPFIND").unwrap_or(Method::GET)
}

/// `timeout` bounds connecting and every read of a response, so a server
/// that stalls mid-body fails the read instead of hanging it.
fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
        .or_raise(|| ErrorKind::Transport(TransportKind::Session))
}

/// One `<response>` of a `multistatus` document.
#[derive(Debug, Default, Clone, PartialEq)]
struct DavEntry {
    /// Percent-decoded path of the resource, without scheme or host.
    path: String,
    size: Option<u64>,
    modified: Option<OffsetDateTime>,
    is_dir: bool,
}
impl DavEntry {
    fn info(&self, name: &str) -> FileInfo {
        if self.is_dir {
            FileInfo::dir(name, self.modified)
        } else {
            FileInfo::file(name, self.size.unwrap_or(0), self.modified)
        }
    }
}

#[derive(Clone, Copy)]
enum Field {
    Href,
    Length,
    Modified,
}

fn decode_href(href: &str) -> String {
    let path = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    percent_decode_str(&path).decode_utf8_lossy().into_owned()
}

fn parse_http_date(text: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(text, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(&text.replace(" GMT", " +0000"), &Rfc2822))
        .ok()
}

fn parse_multistatus(xml: &str) -> Result<Vec<DavEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut entries = Vec::new();
    let mut current: Option<DavEntry> = None;
    let mut field = None;
    loop {
        match reader.read_event().or_raise(|| ErrorKind::Transport(TransportKind::Protocol))? {
            Event::Start(element) => match element.local_name().as_ref() {
                b"response" => current = Some(DavEntry::default()),
                b"href" => field = Some(Field::Href),
                b"getcontentlength" => field = Some(Field::Length),
                b"getlastmodified" => field = Some(Field::Modified),
                b"collection" => current.iter_mut().for_each(|entry| entry.is_dir = true),
                _ => {},
            },
            Event::Empty(element) if element.local_name().as_ref() == b"collection" => {
                current.iter_mut().for_each(|entry| entry.is_dir = true);
            },
            Event::Text(text) => {
                if let (Some(entry), Some(field)) = (current.as_mut(), field) {
                    let text = text.unescape().or_raise(|| ErrorKind::Transport(TransportKind::Protocol))?;
                    match field {
                        Field::Href => entry.path = decode_href(&text),
                        Field::Length => entry.size = text.trim().parse().ok(),
                        Field::Modified => entry.modified = parse_http_date(text.trim()),
                    }
                }
            },
            Event::End(element) => match element.local_name().as_ref() {
                b"response" => entries.extend(current.take()),
                b"href" | b"getcontentlength" | b"getlastmodified" => field = None,
                _ => {},
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(entries)
}

fn check_status(response: &Response, what: &str) -> Result<()> {
    match response.status() {
        status if status.is_success() => Ok(()),
        StatusCode::NOT_FOUND => exn::bail!(ErrorKind::NotFound(what.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => exn::bail!(ErrorKind::Transport(TransportKind::Auth)),
        status => {
            tracing::debug!(%status, what, "unexpected WebDAV status");
            exn::bail!(ErrorKind::Transport(TransportKind::Protocol))
        },
    }
}

fn with_auth(request: RequestBuilder, credentials: &Credentials) -> RequestBuilder {
    match &credentials.user {
        Some(user) => request.basic_auth(user, credentials.password.as_deref()),
        None => request,
    }
}

/// Ask whether `url` is a WebDAV collection, using a throwaway client.
///
/// Any failure (network, auth, not a collection) is simply `false`; the
/// router moves on to the next prefix.
pub(crate) async fn is_collection(url: String, timeout: Duration) -> bool {
    let Ok((mut target, credentials)) = parse_key(&url) else {
        return false;
    };
    let _ = target.set_username("");
    let _ = target.set_password(None);
    let Ok(client) = build_client(timeout) else {
        return false;
    };
    let request = client
        .request(propfind_method(), target)
        .header("Depth", "0")
        .header(CONTENT_TYPE, "application/xml")
        .body(PROPFIND_BODY);
    let response = match with_auth(request, &credentials).send().await {
        Ok(response) if response.status() == StatusCode::MULTI_STATUS => response,
        Ok(response) => {
            tracing::trace!(%url, status = %response.status(), "WebDAV PROPFIND rejected");
            return false;
        },
        Err(err) => {
            tracing::trace!(%url, error = %err, "WebDAV PROPFIND failed");
            return false;
        },
    };
    match response.text().await.map(|xml| parse_multistatus(&xml)) {
        Ok(Ok(entries)) => entries.first().is_some_and(|entry| entry.is_dir),
        _ => false,
    }
}

struct DavFile {
    url: Url,
    inner: String,
    pos: u64,
    size: Option<u64>,
    body: Option<BodyStream>,
    /// Unread remainder of the last body chunk.
    chunk: Bytes,
    /// Bytes still to discard because the server ignored our `Range`.
    skip: u64,
}
impl DavFile {
    fn drop_body(&mut self) {
        self.body = None;
        self.chunk = Bytes::new();
        self.skip = 0;
    }
}

pub struct DavJoint {
    key: String,
    base: Url,
    credentials: Credentials,
    client: Client,
    state: JointState,
    open: Option<DavFile>,
}
impl DavJoint {
    /// Build a client rooted at the resolved share URL. No request is made.
    pub async fn make(key: &str, ctx: &JointContext) -> Result<Self> {
        let (mut base, credentials) = parse_key(key)?;
        if base.cannot_be_a_base() {
            exn::bail!(ErrorKind::InvalidUrl(key.to_string()));
        }
        let _ = base.set_username("");
        let _ = base.set_password(None);
        Ok(Self {
            key: key.to_string(),
            base,
            credentials,
            client: build_client(ctx.dial_timeout)?,
            state: JointState::Fresh,
            open: None,
        })
    }

    /// URL of `inner` below the share root; collections get a trailing slash.
    fn target(&self, inner: &str, dir: bool) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments =
                url.path_segments_mut().ok().ok_or_raise(|| ErrorKind::InvalidUrl(self.key.clone()))?;
            segments.pop_if_empty();
            segments.extend(inner.split('/').filter(|segment| !segment.is_empty()));
            if dir || inner.trim_matches('/').is_empty() {
                segments.push("");
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        with_auth(self.client.request(method, url), &self.credentials)
    }

    async fn propfind(&self, url: Url, depth: &str, inner: &str) -> Result<Vec<DavEntry>> {
        let response = self
            .request(propfind_method(), url)
            .header("Depth", depth)
            .header(CONTENT_TYPE, "application/xml")
            .body(PROPFIND_BODY)
            .send()
            .await
            .or_raise(|| ErrorKind::Transport(TransportKind::Dial))?;
        check_status(&response, inner)?;
        let xml = response.text().await.or_raise(|| ErrorKind::Transport(TransportKind::Protocol))?;
        parse_multistatus(&xml)
    }

    async fn stat(&self, inner: &str) -> Result<DavEntry> {
        let url = self.target(inner, false)?;
        let mut entries = self.propfind(url, "0", inner).await?;
        if entries.is_empty() {
            exn::bail!(ErrorKind::NotFound(inner.to_string()));
        }
        Ok(entries.swap_remove(0))
    }

    fn file(&mut self) -> Result<&mut DavFile> {
        self.open.as_mut().ok_or_else(|| exn::Exn::from(ErrorKind::NotOpen))
    }

    /// Start a `GET` at the current position.
    async fn start_body(&mut self) -> Result<bool> {
        let file = self.file()?;
        let (url, pos, inner) = (file.url.clone(), file.pos, file.inner.clone());
        let mut request = self.request(Method::GET, url);
        if pos > 0 {
            request = request.header(RANGE, format!("bytes={pos}-"));
        }
        let response = request.send().await.or_raise(|| ErrorKind::Transport(TransportKind::Dial))?;
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(false);
        }
        check_status(&response, &inner)?;
        let skip = if response.status() == StatusCode::PARTIAL_CONTENT { 0 } else { pos };
        let file = self.file()?;
        file.skip = skip;
        file.body = Some(Box::pin(response.bytes_stream()));
        Ok(true)
    }
}

#[async_trait]
impl Joint for DavJoint {
    fn key(&self) -> &str {
        &self.key
    }

    fn state(&self) -> JointState {
        self.state
    }

    async fn open(&mut self, inner: &str) -> Result<()> {
        let entry = self.stat(inner).await?;
        if entry.is_dir {
            exn::bail!(ErrorKind::UnexpectedDir(inner.to_string()));
        }
        self.open = Some(DavFile {
            url: self.target(inner, false)?,
            inner: inner.to_string(),
            pos: 0,
            size: entry.size,
            body: None,
            chunk: Bytes::new(),
            skip: 0,
        });
        self.state = JointState::InUse;
        Ok(())
    }

    async fn close_file(&mut self) -> Result<()> {
        self.open = None;
        self.state = JointState::Idle;
        Ok(())
    }

    async fn info(&mut self, inner: &str) -> Result<FileInfo> {
        let entry = self.stat(inner).await?;
        let name = match inner.trim_matches('/') {
            "" => base_name(self.base.path()).to_string(),
            inner => base_name(inner).to_string(),
        };
        Ok(entry.info(&name))
    }

    async fn read_dir(&mut self, inner: &str) -> Result<Vec<FileInfo>> {
        let url = self.target(inner, true)?;
        let own_path = percent_decode_str(url.path()).decode_utf8_lossy().into_owned();
        let entries = self.propfind(url, "1", inner).await?;
        Ok(entries
            .iter()
            .filter(|entry| entry.path.trim_end_matches('/') != own_path.trim_end_matches('/'))
            .map(|entry| entry.info(base_name(&entry.path)))
            .collect())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = self.file()?;
        if file.size.is_some_and(|size| file.pos >= size) {
            return Ok(0);
        }
        if file.body.is_none() && file.chunk.is_empty() && !self.start_body().await? {
            return Ok(0);
        }
        let file = self.file()?;
        while file.chunk.is_empty() {
            let Some(body) = file.body.as_mut() else {
                return Ok(0);
            };
            let Some(next) = body.next().await else {
                return Ok(0);
            };
            let mut chunk = next.or_raise(|| ErrorKind::Transport(TransportKind::Protocol))?;
            if file.skip > 0 {
                let skipped = usize::try_from(file.skip).map_or(chunk.len(), |skip| skip.min(chunk.len()));
                let _ = chunk.split_to(skipped);
                file.skip -= skipped as u64;
            }
            file.chunk = chunk;
        }
        let n = buf.len().min(file.chunk.len());
        buf[..n].copy_from_slice(&file.chunk.split_to(n));
        file.pos += n as u64;
        Ok(n)
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let size = if needs_size(pos) { self.size().await? } else { 0 };
        let file = self.file()?;
        let target = seek_target(pos, file.pos, size)?;
        if target != file.pos {
            file.drop_body();
            file.pos = target;
        }
        Ok(target)
    }

    async fn size(&mut self) -> Result<u64> {
        let file = self.file()?;
        if let Some(size) = file.size {
            return Ok(size);
        }
        let (url, inner) = (file.url.clone(), file.inner.clone());
        let response =
            self.request(Method::HEAD, url).send().await.or_raise(|| ErrorKind::Transport(TransportKind::Dial))?;
        check_status(&response, &inner)?;
        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .ok_or_raise(|| ErrorKind::Transport(TransportKind::Protocol))?;
        self.file()?.size = Some(size);
        Ok(size)
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.open = None;
        self.state = JointState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::VfsSettings;
    use rstest::rstest;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// How the loopback server behaves.
    #[derive(Clone, Copy, Default)]
    struct Behaviour {
        /// Answer `Range` requests with `206`; otherwise always send the whole body.
        ranges: bool,
        /// Report `getcontentlength` in `PROPFIND` answers.
        length: bool,
        /// Send half of every `GET` body, then go silent.
        stall: bool,
    }

    fn payload() -> Vec<u8> {
        (0..50_000u32).map(|i| (i % 251) as u8).collect()
    }

    fn header(head: &str, name: &str) -> Option<String> {
        head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim().to_string())
        })
    }

    async fn answer(mut socket: TcpStream, body: &[u8], behaviour: Behaviour) -> std::io::Result<()> {
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        let head_end = loop {
            let n = socket.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            request.extend_from_slice(&buf[..n]);
            if let Some(at) = request.windows(4).position(|window| window == b"\r\n\r\n") {
                break at + 4;
            }
        };
        let head = String::from_utf8_lossy(&request[..head_end]).into_owned();
        let length: usize = header(&head, "content-length").and_then(|value| value.parse().ok()).unwrap_or(0);
        while request.len() < head_end + length {
            let n = socket.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }

        let total = body.len();
        let method = head.split(' ').next().unwrap_or("");
        let (status, extra, content): (&str, String, Vec<u8>) = match method {
            "PROPFIND" => {
                let size = if behaviour.length {
                    format!("<D:getcontentlength>{total}</D:getcontentlength>")
                } else {
                    String::new()
                };
                let xml = format!(
                    r#"<?xml version="1.0"?><D:multistatus xmlns:D="DAV:"><D:response><D:href>/dav/photo.jpg</D:href><D:propstat><D:prop><D:resourcetype/>{size}</D:prop></D:propstat></D:response></D:multistatus>"#
                );
                ("207 Multi-Status", "Content-Type: application/xml\r\n".to_string(), xml.into_bytes())
            },
            "HEAD" => {
                let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nConnection: close\r\n\r\n");
                socket.write_all(head.as_bytes()).await?;
                return socket.shutdown().await;
            },
            "GET" => {
                let start = header(&head, "range")
                    .and_then(|range| range.strip_prefix("bytes=")?.strip_suffix('-')?.parse::<usize>().ok());
                match start {
                    Some(start) if behaviour.ranges && start >= total => {
                        ("416 Range Not Satisfiable", String::new(), Vec::new())
                    },
                    Some(start) if behaviour.ranges => (
                        "206 Partial Content",
                        format!("Content-Range: bytes {start}-{}/{total}\r\n", total - 1),
                        body[start..].to_vec(),
                    ),
                    _ => ("200 OK", String::new(), body.to_vec()),
                }
            },
            _ => ("405 Method Not Allowed", String::new(), Vec::new()),
        };
        let head = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n{extra}\r\n",
            content.len()
        );
        socket.write_all(head.as_bytes()).await?;
        if behaviour.stall && method == "GET" {
            socket.write_all(&content[..content.len() / 2]).await?;
            socket.flush().await?;
            std::future::pending::<()>().await;
        }
        socket.write_all(&content).await?;
        socket.shutdown().await
    }

    /// Serve `body` as `/dav/photo.jpg` on a loopback port; returns the share URL.
    async fn serve(body: Vec<u8>, behaviour: Behaviour) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let body = body.clone();
                tokio::spawn(async move {
                    let _ = answer(socket, &body, behaviour).await;
                });
            }
        });
        format!("http://{address}/dav/")
    }

    async fn joint(behaviour: Behaviour, timeout: Duration) -> DavJoint {
        let share = serve(payload(), behaviour).await;
        let settings = VfsSettings {
            dial_timeout: timeout,
            ..VfsSettings::default()
        };
        let mut joint = DavJoint::make(&share, &JointContext::new(&settings)).await.unwrap();
        joint.open("photo.jpg").await.unwrap();
        joint
    }

    async fn read_up_to(joint: &mut DavJoint, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = joint.read(&mut out[filled..]).await.unwrap();
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.truncate(filled);
        out
    }

    #[rstest]
    #[tokio::test]
    async fn test_seek_equivalence(#[values(true, false)] ranges: bool) {
        let body = payload();
        let behaviour = Behaviour {
            ranges,
            length: true,
            ..Behaviour::default()
        };
        let mut joint = joint(behaviour, Duration::from_secs(5)).await;
        assert_eq!(joint.size().await.unwrap(), body.len() as u64);

        // Reading straight through and seeking to the same offsets agree.
        assert_eq!(read_up_to(&mut joint, 1000).await, body[..1000]);
        assert_eq!(read_up_to(&mut joint, 1000).await, body[1000..2000]);
        assert_eq!(joint.seek(SeekFrom::Start(30_000)).await.unwrap(), 30_000);
        assert_eq!(read_up_to(&mut joint, 1000).await, body[30_000..31_000]);
        assert_eq!(joint.seek(SeekFrom::Current(-21_000)).await.unwrap(), 10_000);
        assert_eq!(read_up_to(&mut joint, 500).await, body[10_000..10_500]);

        let mut buf = [0u8; 16];
        let n = joint.read_at(&mut buf, 40_000).await.unwrap();
        assert_eq!(buf[..n], body[40_000..40_000 + n]);

        assert_eq!(joint.seek(SeekFrom::End(-10)).await.unwrap(), 49_990);
        assert_eq!(read_up_to(&mut joint, 100).await, body[49_990..]);
        assert_eq!(joint.read(&mut buf).await.unwrap(), 0);

        joint.close_file().await.unwrap();
        assert_eq!(joint.state(), JointState::Idle);
    }

    #[tokio::test]
    async fn test_unsatisfiable_range_is_eof() {
        let body = payload();
        let behaviour = Behaviour {
            ranges: true,
            ..Behaviour::default()
        };
        let mut joint = joint(behaviour, Duration::from_secs(5)).await;
        joint.seek(SeekFrom::Start(body.len() as u64)).await.unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(joint.read(&mut buf).await.unwrap(), 0);

        // Without a length in the listing the size comes from HEAD.
        assert_eq!(joint.seek(SeekFrom::End(-4)).await.unwrap(), body.len() as u64 - 4);
        assert_eq!(read_up_to(&mut joint, 16).await, body[body.len() - 4..]);
    }

    #[tokio::test]
    async fn test_info_over_http() {
        let share = serve(payload(), Behaviour::default()).await;
        let mut joint = DavJoint::make(&share, &JointContext::new(&VfsSettings::default())).await.unwrap();
        let info = joint.info("photo.jpg").await.unwrap();
        assert_eq!(info.name, "photo.jpg");
        assert!(!info.is_dir);
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        let behaviour = Behaviour {
            ranges: true,
            length: true,
            stall: true,
        };
        let mut joint = joint(behaviour, Duration::from_millis(300)).await;
        let mut buf = vec![0u8; 8192];
        let outcome = tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                match joint.read(&mut buf).await {
                    Ok(0) => return Ok(()),
                    Ok(_) => continue,
                    Err(err) => return Err(err),
                }
            }
        })
        .await
        .expect("read should give up on its own");
        assert!(outcome.is_err(), "a stalled body must fail the read");
    }

    const MULTISTATUS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/dav/share/</D:href>
    <D:propstat>
      <D:prop>
        <D:resourcetype><D:collection/></D:resourcetype>
        <D:getlastmodified>Tue, 02 Jan 2024 03:04:05 GMT</D:getlastmodified>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>https://host/dav/share/x%20y.png</D:href>
    <D:propstat>
      <D:prop>
        <D:resourcetype/>
        <D:getcontentlength>1234</D:getcontentlength>
      </D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
  <D:response>
    <D:href>/dav/share/%D0%A4%D0%BE%D1%82%D0%BE/</D:href>
    <D:propstat>
      <D:prop><D:resourcetype><D:collection></D:collection></D:resourcetype></D:prop>
    </D:propstat>
  </D:response>
</D:multistatus>"#;

    #[test]
    fn test_parse_multistatus() {
        let entries = parse_multistatus(MULTISTATUS).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].path, "/dav/share/");
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].modified.map(|m| m.year()), Some(2024));
        assert_eq!(entries[1].path, "/dav/share/x y.png");
        assert_eq!(entries[1].size, Some(1234));
        assert!(!entries[1].is_dir);
        assert_eq!(entries[2].path, "/dav/share/Фото/");
        assert!(entries[2].is_dir);
    }

    #[test]
    fn test_parse_garbage_is_an_error() {
        assert!(parse_multistatus("<a><b></a>").is_err());
    }

    #[tokio::test]
    async fn test_target_urls() {
        let ctx = JointContext::new(&VfsSettings::default());
        let joint = DavJoint::make("https://u:p@host/dav/", &ctx).await.unwrap();
        assert_eq!(joint.credentials.user.as_deref(), Some("u"));
        assert_eq!(joint.target("share/x y.png", false).unwrap().as_str(), "https://host/dav/share/x%20y.png");
        assert_eq!(joint.target("share", true).unwrap().as_str(), "https://host/dav/share/");
        assert_eq!(joint.target("", false).unwrap().as_str(), "https://host/dav/");
    }

    #[test]
    fn test_http_date() {
        let date = parse_http_date("Tue, 02 Jan 2024 03:04:05 GMT").unwrap();
        assert_eq!(date.unix_timestamp(), 1_704_164_645);
        assert!(parse_http_date("yesterday").is_none());
    }
}
