use crate::collab::DiskStore;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Superseded on-disk versions of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeRange {
    pub bucket: i32,
    pub from_version: u32,
    pub to_version: u32,
}

#[derive(Debug, Default)]
struct PinState {
    pins: usize,
    pending: Vec<PurgeRange>,
}

/// Deletes superseded batch versions, holding them back while any peer
/// transfer pin is alive.
pub(crate) struct PurgeQueue {
    table: String,
    shard: u32,
    disk_store: Arc<dyn DiskStore>,
    state: Mutex<PinState>,
}

impl PurgeQueue {
    pub(crate) fn new(table: String, shard: u32, disk_store: Arc<dyn DiskStore>) -> Self {
        Self {
            table,
            shard,
            disk_store,
            state: Mutex::new(PinState::default()),
        }
    }

    pub(crate) fn pin(self: &Arc<Self>) -> PeerTransferPin {
        let mut state = self.state.lock().unwrap();
        state.pins += 1;
        tracing::debug!(table = %self.table, shard = self.shard, pins = state.pins, "Pinned for peer data transfer");
        PeerTransferPin {
            queue: Arc::clone(self),
        }
    }

    /// Delete `ranges` now, or queue them if the shard is pinned.
    pub(crate) fn purge(&self, ranges: Vec<PurgeRange>) {
        if ranges.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if state.pins > 0 {
            tracing::info!(
                table = %self.table,
                shard = self.shard,
                pins = state.pins,
                deferred = ranges.len(),
                "Deferring purge during peer data transfer"
            );
            state.pending.extend(ranges);
            return;
        }
        // Deleting under the lock keeps a new pin from racing the purge.
        self.execute(&ranges);
    }

    pub(crate) fn pins(&self) -> usize {
        self.state.lock().unwrap().pins
    }

    pub(crate) fn pending(&self) -> Vec<PurgeRange> {
        self.state.lock().unwrap().pending.clone()
    }

    fn unpin(&self) {
        let mut state = self.state.lock().unwrap();
        state.pins -= 1;
        if state.pins == 0 && !state.pending.is_empty() {
            let pending = std::mem::take(&mut state.pending);
            self.execute(&pending);
        }
    }

    fn execute(&self, ranges: &[PurgeRange]) {
        for range in ranges {
            match self.disk_store.delete_batch_versions(
                &self.table,
                self.shard,
                range.bucket,
                range.from_version,
                range.to_version,
            ) {
                Ok(()) => tracing::info!(
                    table = %self.table,
                    shard = self.shard,
                    bucket = range.bucket,
                    from_version = range.from_version,
                    to_version = range.to_version,
                    "Purged archive batch versions"
                ),
                Err(e) => tracing::warn!(
                    table = %self.table,
                    shard = self.shard,
                    bucket = range.bucket,
                    error = %e,
                    "Failed to purge archive batch versions"
                ),
            }
        }
    }
}

impl fmt::Debug for PurgeQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PurgeQueue")
            .field("table", &self.table)
            .field("shard", &self.shard)
            .field("state", &self.state)
            .finish()
    }
}

/// Keeps superseded versions of a shard on disk while a peer copies them.
/// Purges queued meanwhile run when the last pin is dropped.
#[must_use = "the shard is unpinned as soon as the pin is dropped"]
#[derive(Debug)]
pub struct PeerTransferPin {
    queue: Arc<PurgeQueue>,
}

impl Drop for PeerTransferPin {
    fn drop(&mut self) {
        self.queue.unpin();
    }
}
