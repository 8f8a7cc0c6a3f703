//! Per-key joint cache with timed expiry.
//!
//! Joints are expensive to build (TCP + login, SSH handshake, ISO directory
//! parse) and cheap to keep, so released joints are parked per key and
//! handed back out LIFO, hottest connection first. Each parked joint has its
//! own expiry timer; when it fires, that joint (and only that joint) is
//! pulled out of the cache and torn down.
//!
//! Locking is per key. The pool map itself is only write-locked to insert a
//! key the first time it is seen or to drop it once its last idle joint has
//! expired, and no lock is ever held across an `.await`.

use crate::error::{ErrorKind, Result};
use crate::joint::{BoxJoint, JointState};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::AbortHandle;

struct Parked {
    id: u64,
    joint: BoxJoint,
    timer: AbortHandle,
}

#[derive(Default)]
struct Idle {
    parked: Vec<Parked>,
    /// Removed from the pool map; nothing may be parked here any more.
    retired: bool,
}

#[derive(Default)]
struct JointCache {
    idle: Mutex<Idle>,
}
impl JointCache {
    fn pop(&self) -> Option<Parked> {
        self.idle.lock().parked.pop()
    }

    fn take(&self, id: u64) -> Option<BoxJoint> {
        let mut idle = self.idle.lock();
        let index = idle.parked.iter().position(|parked| parked.id == id)?;
        Some(idle.parked.remove(index).joint)
    }
}

struct PoolInner {
    expire: Duration,
    closed: AtomicBool,
    next_id: AtomicU64,
    caches: RwLock<HashMap<String, Arc<JointCache>>>,
}

/// Cache of idle joints keyed by [`Joint::key()`](crate::joint::Joint::key).
///
/// Cloning is cheap and every clone refers to the same pool. Releasing a
/// joint spawns its expiry timer, so the pool must be used from inside a
/// Tokio runtime.
///
/// # Examples
///
/// ```
/// use hearth_vfs::joint::{BoxJoint, MockJoint, MockStats};
/// use hearth_vfs::pool::JointPool;
/// use std::collections::HashMap;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = JointPool::new(Duration::from_secs(15));
/// let stats = Arc::new(MockStats::default());
/// let joint = pool
///     .acquire("mock://host", || async {
///         Ok(Box::new(MockJoint::new("mock://host", Arc::new(HashMap::new()), stats.clone())) as BoxJoint)
///     })
///     .await?;
/// pool.release(joint);
/// assert_eq!(pool.idle_count("mock://host"), 1);
/// pool.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct JointPool {
    inner: Arc<PoolInner>,
}
impl JointPool {
    pub fn new(expire: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                expire,
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                caches: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn expire(&self) -> Duration {
        self.inner.expire
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of idle joints currently parked under `key`.
    pub fn idle_count(&self, key: &str) -> usize {
        self.inner.caches.read().get(key).map_or(0, |cache| cache.idle.lock().parked.len())
    }

    fn cache(&self, key: &str) -> Arc<JointCache> {
        if let Some(cache) = self.inner.caches.read().get(key) {
            return Arc::clone(cache);
        }
        Arc::clone(self.inner.caches.write().entry(key.to_string()).or_default())
    }

    /// Forget `key` once its cache has no idle joints left.
    fn prune(inner: &PoolInner, key: &str, cache: &Arc<JointCache>) {
        let mut caches = inner.caches.write();
        let mut idle = cache.idle.lock();
        if idle.parked.is_empty() && caches.get(key).is_some_and(|current| Arc::ptr_eq(current, cache)) {
            idle.retired = true;
            caches.remove(key);
        }
    }

    /// Check a joint out of the pool, building one with `make` on a miss.
    ///
    /// The factory runs outside every lock since it usually dials a server.
    /// If it fails, the cache for `key` is left as it was.
    pub async fn acquire<F, Fut>(&self, key: &str, make: F) -> Result<BoxJoint>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<BoxJoint>>,
    {
        if self.is_closed() {
            exn::bail!(ErrorKind::PoolClosed);
        }
        if let Some(parked) = self.cache(key).pop() {
            parked.timer.abort();
            tracing::trace!(key, "reusing idle joint");
            return Ok(parked.joint);
        }
        tracing::debug!(key, "creating joint");
        make().await
    }

    /// Park a joint for reuse and arm its expiry timer. Never blocks.
    ///
    /// Joints that still have a file open, that are already closed, or that
    /// come back after [`shutdown()`](Self::shutdown) are not parked; they
    /// are torn down in the background instead.
    pub fn release(&self, joint: BoxJoint) {
        if joint.busy() || joint.state() == JointState::Closed || self.is_closed() {
            Self::discard(joint);
            return;
        }
        let key = joint.key().to_string();
        let cache = self.cache(&key);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        // Checked again under the cache lock so a concurrent shutdown
        // either sees this joint while draining or we see the closed flag.
        let mut idle = cache.idle.lock();
        if self.is_closed() {
            drop(idle);
            Self::discard(joint);
            return;
        }
        if idle.retired {
            // Lost a race with expiry; the next lookup builds a new cache.
            drop(idle);
            return self.release(joint);
        }
        let expire = self.inner.expire;
        let timer = tokio::spawn({
            let cache = Arc::clone(&cache);
            let pool = Arc::downgrade(&self.inner);
            async move {
                tokio::time::sleep(expire).await;
                let Some(mut joint) = cache.take(id) else {
                    return;
                };
                if let Some(pool) = pool.upgrade() {
                    Self::prune(&pool, &key, &cache);
                }
                tracing::debug!(key = %joint.key(), "idle joint expired");
                if let Err(err) = joint.cleanup().await {
                    tracing::warn!(key = %joint.key(), error = %err, "failed to clean up expired joint");
                }
            }
        });
        idle.parked.push(Parked {
            id,
            joint,
            timer: timer.abort_handle(),
        });
    }

    fn discard(mut joint: BoxJoint) {
        if joint.state() == JointState::Closed {
            return;
        }
        tokio::spawn(async move {
            if let Err(err) = joint.cleanup().await {
                tracing::warn!(key = %joint.key(), error = %err, "failed to clean up discarded joint");
            }
        });
    }

    /// Close the pool: stop every timer, drain every cache and clean up each
    /// parked joint.
    ///
    /// All joints are cleaned up even when some fail; the last failure is
    /// returned. Later calls to [`acquire()`](Self::acquire) fail with
    /// [`PoolClosed`](ErrorKind::PoolClosed).
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        let caches: Vec<Arc<JointCache>> = self.inner.caches.write().drain().map(|(_, cache)| cache).collect();
        let mut last_error = None;
        let mut cleaned = 0usize;
        for cache in caches {
            let parked = std::mem::take(&mut cache.idle.lock().parked);
            for Parked { mut joint, timer, .. } in parked {
                timer.abort();
                cleaned += 1;
                if let Err(err) = joint.cleanup().await {
                    tracing::warn!(key = %joint.key(), error = %err, "failed to clean up joint on shutdown");
                    last_error = Some(err);
                }
            }
        }
        tracing::debug!(joints = cleaned, "joint pool shut down");
        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
