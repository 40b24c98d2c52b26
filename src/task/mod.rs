//! Source task machinery: the snapshot cache shared between refresh and
//! emission, and the trait the scheduler drives.

pub mod socket;
pub mod traffic;
pub mod transform;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// A background refresh loop over one telemetry source.
///
/// `collect` is driven serially by one scheduler loop per source. It may
/// block on network I/O up to the scrape client's timeouts; on any failure
/// the previously cached snapshot is retained. A disabled source returns
/// `Ok(())` without touching its cache. Concurrent `collect` calls are
/// safe and resolve last-write-wins on the cache.
#[async_trait]
pub trait SourceTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn collect(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Lock-guarded snapshot slot for a task's latest computed result.
///
/// The lock protects only the pointer swap, never the scrape or transform
/// work that produced the value, so a slow refresh can never block a
/// reader. Readers get an `Arc` to a fully built snapshot and can hold it
/// for as long as they like while later refreshes swap in replacements.
pub struct TaskCache<T> {
    slot: RwLock<Arc<T>>,
}

impl<T: Default> TaskCache<T> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Arc::new(T::default())),
        }
    }
}

impl<T> TaskCache<T> {
    /// Atomically replace the cached snapshot.
    pub fn replace(&self, next: T) {
        *self.slot.write() = Arc::new(next);
    }

    /// Latest successfully cached snapshot. Never blocks on refresh work
    /// and never fails; before the first successful refresh this is the
    /// default (empty) value.
    pub fn snapshot(&self) -> Arc<T> {
        Arc::clone(&self.slot.read())
    }
}

impl<T: Default> Default for TaskCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
