use crate::config::EngineConfig;
use crate::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Capacity-aware host memory accounting.
///
/// Consulted whenever a column buffer is forked or a batch is allocated, and
/// told when those bytes are given back.
pub trait HostMemoryManager: Send + Sync + fmt::Debug {
    /// Reserve `bytes`, failing if that would exceed capacity.
    fn try_allocate(&self, bytes: usize) -> Result<()>;

    /// Return previously reserved bytes.
    fn release(&self, bytes: usize);

    fn used_bytes(&self) -> usize;

    fn capacity(&self) -> usize;
}

/// Counter-based [`HostMemoryManager`].
#[derive(Debug)]
pub struct HostMemoryTracker {
    capacity: usize,
    used: AtomicUsize,
}

impl HostMemoryTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.host_memory_capacity)
    }
}

impl HostMemoryManager for HostMemoryTracker {
    fn try_allocate(&self, bytes: usize) -> Result<()> {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(bytes).filter(|total| *total <= self.capacity)
            })
            .map(|_| ())
            .map_err(|used| Error::OutOfMemory {
                requested: bytes,
                available: self.capacity.saturating_sub(used),
            })
    }

    fn release(&self, bytes: usize) {
        let previous = self.used.fetch_sub(bytes, Ordering::SeqCst);
        debug_assert!(previous >= bytes, "released more host memory than reserved");
    }

    fn used_bytes(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Bytes held against a [`HostMemoryManager`], given back on drop.
pub struct Reservation {
    manager: Option<Arc<dyn HostMemoryManager>>,
    bytes: usize,
}

impl Reservation {
    pub fn new(manager: &Arc<dyn HostMemoryManager>, bytes: usize) -> Result<Self> {
        manager.try_allocate(bytes)?;
        Ok(Self {
            manager: Some(Arc::clone(manager)),
            bytes,
        })
    }

    /// A reservation that accounts nothing, for data loaded outside the tracker.
    pub fn untracked() -> Self {
        Self {
            manager: None,
            bytes: 0,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Grow the reservation by `bytes`.
    pub fn grow(&mut self, bytes: usize) -> Result<()> {
        if let Some(manager) = &self.manager {
            manager.try_allocate(bytes)?;
            self.bytes += bytes;
        }
        Ok(())
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("tracked", &self.manager.is_some())
            .field("bytes", &self.bytes)
            .finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.take() {
            manager.release(self.bytes);
        }
    }
}
