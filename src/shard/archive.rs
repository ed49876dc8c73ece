use crate::batch::ArchiveBatch;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// One immutable view of a shard's archive: bucket → batch.
///
/// Versions share the batches of buckets they did not change.
#[derive(Debug, Default, Clone)]
pub struct ArchiveStoreVersion {
    batches: BTreeMap<i32, Arc<ArchiveBatch>>,
}

impl ArchiveStoreVersion {
    pub fn get(&self, bucket: i32) -> Option<&Arc<ArchiveBatch>> {
        self.batches.get(&bucket)
    }

    /// Version of `bucket`, if the bucket exists.
    pub fn batch_version(&self, bucket: i32) -> Option<u32> {
        self.batches.get(&bucket).map(|batch| batch.version())
    }

    pub fn buckets(&self) -> impl Iterator<Item = i32> + '_ {
        self.batches.keys().copied()
    }

    pub fn batches(&self) -> impl Iterator<Item = &Arc<ArchiveBatch>> {
        self.batches.values()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn num_rows(&self) -> usize {
        self.batches.values().map(|batch| batch.num_rows()).sum()
    }
}

/// Holds the current [`ArchiveStoreVersion`] of a shard. Readers clone the
/// `Arc` and keep a consistent view for as long as they hold it.
#[derive(Debug, Default)]
pub struct ArchiveStore {
    current: RwLock<Arc<ArchiveStoreVersion>>,
}

impl ArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_version(&self) -> Arc<ArchiveStoreVersion> {
        Arc::clone(&self.current.read().unwrap())
    }

    /// Publish a version in which `batches` replace their buckets, in a single
    /// swap. Callers must serialize publication. Returns how long the write
    /// lock was held.
    pub(crate) fn publish(&self, batches: impl IntoIterator<Item = Arc<ArchiveBatch>>) -> Duration {
        let mut next = ArchiveStoreVersion::clone(&self.current_version());
        for batch in batches {
            next.batches.insert(batch.bucket(), batch);
        }
        let next = Arc::new(next);

        let start = Instant::now();
        *self.current.write().unwrap() = next;
        start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Batch;
    use crate::testutil;

    fn archive(bucket: i32, version: u32) -> Arc<ArchiveBatch> {
        Arc::new(ArchiveBatch::new(bucket, version, testutil::base_batch()))
    }

    #[test]
    fn test_publish_replaces_buckets() {
        let store = ArchiveStore::new();
        assert!(store.current_version().is_empty());

        store.publish([archive(0, 1), archive(1, 1)]);
        let first = store.current_version();
        assert_eq!(first.buckets().collect::<Vec<_>>(), vec![0, 1]);

        store.publish([archive(1, 2)]);
        let second = store.current_version();
        assert_eq!(second.batch_version(0), Some(1));
        assert_eq!(second.batch_version(1), Some(2));
        // Untouched buckets are shared between versions.
        assert!(Arc::ptr_eq(first.get(0).unwrap(), second.get(0).unwrap()));
        // Readers of the old version are unaffected.
        assert_eq!(first.batch_version(1), Some(1));
        assert_eq!(second.num_rows(), 10);
    }

    #[test]
    fn test_publish_nothing_keeps_batches() {
        let store = ArchiveStore::new();
        store.publish([Arc::new(ArchiveBatch::new(
            3,
            1,
            Batch::empty(&testutil::schema()),
        ))]);
        store.publish(Vec::new());
        assert_eq!(store.current_version().batch_version(3), Some(1));
    }
}
