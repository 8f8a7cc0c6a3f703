use crate::backend::{LocalJoint, is_dav_collection, make_joint};
use crate::error::Result;
use crate::file::File;
use crate::joint::{BoxJoint, JointContext};
use crate::models::FileInfo;
use crate::pool::JointPool;
use crate::route::{Backend, DavRoots, Route, remote_backend, route_local, route_plain_remote};
use crate::settings::VfsSettings;
use std::sync::Arc;

struct VfsInner {
    settings: VfsSettings,
    ctx: JointContext,
    pool: JointPool,
    dav_roots: DavRoots,
}

/// Entry point to the virtual filesystem.
///
/// Cheap to clone; clones share the joint pool, the WebDAV root cache and
/// the FTP/SFTP working directory cache.
///
/// # Examples
///
/// ```
/// use hearth_vfs::backend::IsoImageBuilder;
/// use hearth_vfs::{Vfs, VfsSettings};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let dir = tempfile::tempdir()?;
/// let iso = dir.path().join("disk.iso");
/// std::fs::write(&iso, IsoImageBuilder::new().file("photos/a.jpg", b"\xFF\xD8").build())?;
///
/// let vfs = Vfs::new(VfsSettings::default());
/// let mut file = vfs.open(&format!("{}/photos/a.jpg", iso.display())).await?;
/// assert_eq!(file.read_to_end(1024).await?, b"\xFF\xD8");
/// file.close().await?;
/// vfs.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Vfs {
    inner: Arc<VfsInner>,
}
impl Vfs {
    pub fn new(settings: VfsSettings) -> Self {
        Self {
            inner: Arc::new(VfsInner {
                ctx: JointContext::new(&settings),
                pool: JointPool::new(settings.disk_cache_expire),
                dav_roots: DavRoots::default(),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &VfsSettings {
        &self.inner.settings
    }

    pub fn pool(&self) -> &JointPool {
        &self.inner.pool
    }

    /// Work out which back-end serves `path`.
    ///
    /// WebDAV URLs may query the server the first time their authority is
    /// seen; local paths may touch the filesystem to find an ISO container.
    pub async fn route(&self, path: &str) -> Result<Route> {
        match remote_backend(path) {
            Some(Backend::Dav) => {
                let timeout = self.inner.settings.dial_timeout;
                self.inner.dav_roots.resolve(path, |url| is_dav_collection(url, timeout)).await
            },
            Some(backend) => Ok(route_plain_remote(backend, path)),
            None => route_local(path).await,
        }
    }

    async fn checkout(&self, route: &Route) -> Result<(BoxJoint, Option<JointPool>)> {
        if route.backend == Backend::Local {
            return Ok((Box::new(LocalJoint::new()), None));
        }
        let ctx = &self.inner.ctx;
        let joint = self.inner.pool.acquire(&route.key, || make_joint(route, ctx)).await?;
        Ok((joint, Some(self.inner.pool.clone())))
    }

    /// Hand a joint back after a metadata call: park it on success, tear it
    /// down on failure.
    async fn checkin<T>(&self, mut joint: BoxJoint, pool: Option<JointPool>, result: Result<T>) -> Result<T> {
        match (&result, pool) {
            (Ok(_), Some(pool)) => pool.release(joint),
            _ => {
                if let Err(err) = joint.cleanup().await {
                    tracing::debug!(key = %joint.key(), error = %err, "failed to clean up joint");
                }
            },
        }
        result
    }

    pub async fn open(&self, path: &str) -> Result<File> {
        let route = self.route(path).await?;
        let (mut joint, pool) = self.checkout(&route).await?;
        match joint.open(&route.inner).await {
            Ok(()) => Ok(File::new(path, joint, pool)),
            Err(err) => self.checkin(joint, None, Err(err)).await,
        }
    }

    pub async fn stat(&self, path: &str) -> Result<FileInfo> {
        let route = self.route(path).await?;
        let (mut joint, pool) = self.checkout(&route).await?;
        let result = joint.info(&route.inner).await;
        self.checkin(joint, pool, result).await
    }

    /// List a directory. A local regular file is read as an ISO image and
    /// its root directory is listed.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>> {
        let mut route = self.route(path).await?;
        if route.backend == Backend::Local && tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file()) {
            route = Route::iso(path, "");
        }
        let (mut joint, pool) = self.checkout(&route).await?;
        let result = joint.read_dir(&route.inner).await;
        self.checkin(joint, pool, result).await
    }

    /// Close the joint pool. Files still open release into a closed pool,
    /// which tears their joints down.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.pool.shutdown().await
    }
}
