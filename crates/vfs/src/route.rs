//! Path routing.
//!
//! Turns an arbitrary user path into a [`Route`]: which back-end serves it,
//! the joint key the pool caches connections under, and the inner path
//! below that key.

use crate::error::{ErrorKind, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Local,
    Iso,
    Ftp,
    Sftp,
    Dav,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub backend: Backend,
    /// Joint key; empty for plain local paths.
    pub key: String,
    /// Path below the key, without leading or trailing slashes (local
    /// routes keep the full path here).
    pub inner: String,
}
impl Route {
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            backend: Backend::Local,
            key: String::new(),
            inner: path.into(),
        }
    }

    pub fn iso(key: impl Into<String>, inner: &str) -> Self {
        Self {
            backend: Backend::Iso,
            key: key.into(),
            inner: inner.trim_matches('/').to_string(),
        }
    }

    fn remote(backend: Backend, key: impl Into<String>, inner: &str) -> Self {
        Self {
            backend,
            key: key.into(),
            inner: inner.trim_matches('/').to_string(),
        }
    }
}

/// Classify a path by its scheme prefix. `None` means local.
pub fn remote_backend(path: &str) -> Option<Backend> {
    if path.starts_with("ftp://") {
        Some(Backend::Ftp)
    } else if path.starts_with("sftp://") {
        Some(Backend::Sftp)
    } else if path.starts_with("http://") || path.starts_with("https://") {
        Some(Backend::Dav)
    } else {
        None
    }
}

/// Split a URL into `scheme://authority` and the path after it (without the
/// leading slash).
///
/// ```
/// use hearth_vfs::route::split_url;
///
/// assert_eq!(split_url("ftp://u:p@host:21/a/b.jpg"), ("ftp://u:p@host:21", "a/b.jpg"));
/// assert_eq!(split_url("https://host"), ("https://host", ""));
/// ```
pub fn split_url(url: &str) -> (&str, &str) {
    let authority_start = url.find("://").map_or(0, |i| i + 3);
    match url[authority_start..].find('/') {
        Some(slash) => {
            let slash = authority_start + slash;
            (&url[..slash], &url[slash + 1..])
        },
        None => (url, ""),
    }
}

fn is_missing(err: &std::io::Error) -> bool {
    matches!(err.kind(), std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory)
}

/// Route a local path, descending into an ISO image when a file sits where
/// a directory was expected.
pub(crate) async fn route_local(path: &str) -> Result<Route> {
    match fs::metadata(path).await {
        Ok(_) => return Ok(Route::local(path)),
        Err(err) if is_missing(&err) => {},
        Err(err) => exn::bail!(ErrorKind::from_io(err, path)),
    }
    let mut container = path.trim_end_matches('/');
    while let Some((parent, _)) = container.rsplit_once('/') {
        container = parent;
        if container.is_empty() || container == "." {
            break;
        }
        match fs::metadata(container).await {
            Ok(metadata) if metadata.is_file() => {
                let inner = &path[container.len()..];
                tracing::trace!(container, inner, "descending into ISO image");
                return Ok(Route::iso(container, inner));
            },
            // A real directory exists, only the child is missing.
            Ok(_) => break,
            Err(err) if is_missing(&err) => continue,
            Err(err) => exn::bail!(ErrorKind::from_io(err, container)),
        }
    }
    exn::bail!(ErrorKind::NotFound(path.to_string()))
}

/// Memoized WebDAV share roots, keyed by `scheme://authority`.
///
/// Written once per authority on the first successful lookup and read for
/// every later URL on the same server.
#[derive(Default)]
pub(crate) struct DavRoots(RwLock<HashMap<String, String>>);
impl DavRoots {
    /// Resolve the share root of `url`, checking each path prefix left to
    /// right with `is_root` until one reports a collection.
    pub(crate) async fn resolve<F, Fut>(&self, url: &str, mut is_root: F) -> Result<Route>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = bool>,
    {
        let (addr, path) = split_url(url);
        let known = self.0.read().get(addr).cloned();
        if let Some(root) = known {
            return Self::route(url, &root);
        }

        let mut prefix = format!("{addr}/");
        let chunks = path.split('/').filter(|chunk| !chunk.is_empty());
        for chunk in std::iter::once("").chain(chunks) {
            if !chunk.is_empty() {
                prefix.push_str(chunk);
                prefix.push('/');
            }
            if is_root(prefix.clone()).await {
                tracing::debug!(addr, root = %prefix, "resolved WebDAV root");
                let root = self.0.write().entry(addr.to_string()).or_insert(prefix).clone();
                return Self::route(url, &root);
            }
        }
        exn::bail!(ErrorKind::NotFound(url.to_string()))
    }

    fn route(url: &str, root: &str) -> Result<Route> {
        if let Some(inner) = url.strip_prefix(root) {
            return Ok(Route::remote(Backend::Dav, root, inner));
        }
        if root.strip_suffix('/') == Some(url) {
            return Ok(Route::remote(Backend::Dav, root, ""));
        }
        exn::bail!(ErrorKind::NotFound(url.to_string()))
    }
}

/// Route a remote URL that needs no probing.
pub(crate) fn route_plain_remote(backend: Backend, url: &str) -> Route {
    let (addr, inner) = split_url(url);
    Route::remote(backend, addr, inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rstest::rstest;
    use std::sync::Arc;

    #[rstest]
    #[case("ftp://u:p@h/a", Some(Backend::Ftp))]
    #[case("sftp://h:22/x", Some(Backend::Sftp))]
    #[case("http://h/dav/x", Some(Backend::Dav))]
    #[case("https://h/dav/x", Some(Backend::Dav))]
    #[case("/var/media/a.jpg", None)]
    #[case("./disk.iso/dir/a.jpg", None)]
    #[case("ftpish/file", None)]
    fn test_remote_backend(#[case] path: &str, #[case] expected: Option<Backend>) {
        assert_eq!(remote_backend(path), expected);
    }

    #[rstest]
    #[case("ftp://u:p@h/a", "ftp://u:p@h", "a")]
    #[case("sftp://h:22/dir/x.jpg", "sftp://h:22", "dir/x.jpg")]
    #[case("https://host/", "https://host", "")]
    #[case("https://host", "https://host", "")]
    fn test_split_url(#[case] url: &str, #[case] addr: &str, #[case] path: &str) {
        assert_eq!(split_url(url), (addr, path));
    }

    #[test]
    fn test_plain_remote_route() {
        let route = route_plain_remote(Backend::Ftp, "ftp://u:p@h/music/a.mp3");
        assert_eq!(route.key, "ftp://u:p@h");
        assert_eq!(route.inner, "music/a.mp3");
    }

    #[tokio::test]
    async fn test_local_existing_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("a.jpg");
        std::fs::write(&file, b"data").unwrap();
        let path = file.to_str().unwrap();
        assert_eq!(route_local(path).await.unwrap(), Route::local(path));
    }

    #[tokio::test]
    async fn test_local_iso_descent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let iso = temp_dir.path().join("disk.iso");
        std::fs::write(&iso, b"not parsed by the router").unwrap();
        let iso = iso.to_str().unwrap();

        let route = route_local(&format!("{iso}/dir/a.jpg")).await.unwrap();
        assert_eq!(route.backend, Backend::Iso);
        assert_eq!(route.key, iso);
        assert_eq!(route.inner, "dir/a.jpg");

        let route = route_local(&format!("{iso}/dir/")).await.unwrap();
        assert_eq!(route.inner, "dir");
    }

    #[rstest]
    #[case("missing.jpg")]
    #[case("sub/missing.jpg")]
    #[case("nowhere/at/all.jpg")]
    #[tokio::test]
    async fn test_local_not_found(#[case] relative: &str) {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(temp_dir.path().join("sub")).unwrap();
        let path = temp_dir.path().join(relative);
        let err = route_local(path.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_dav_root_discovery() {
        let roots = DavRoots::default();
        let asked = Arc::new(Mutex::new(Vec::new()));
        let is_root = |url: String| {
            let asked = Arc::clone(&asked);
            async move {
                let found = url == "https://host/dav/";
                asked.lock().push(url);
                found
            }
        };
        let route = roots.resolve("https://host/dav/share/x.png", is_root).await.unwrap();
        assert_eq!(route.backend, Backend::Dav);
        assert_eq!(route.key, "https://host/dav/");
        assert_eq!(route.inner, "share/x.png");
        assert_eq!(*asked.lock(), vec!["https://host/", "https://host/dav/"]);

        // Memoized per authority: a lookup that never succeeds is not consulted.
        let route = roots.resolve("https://host/dav/other/y.png", |_| async { false }).await.unwrap();
        assert_eq!(route.inner, "other/y.png");
        let root = roots.resolve("https://host/dav", |_| async { false }).await.unwrap();
        assert_eq!(root.inner, "");
    }

    #[tokio::test]
    async fn test_dav_root_not_found() {
        let roots = DavRoots::default();
        let err = roots.resolve("https://host/a/b", |_| async { false }).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }
}
