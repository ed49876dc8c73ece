pub mod backfill;
pub mod batch;
pub mod collab;
pub mod column;
pub mod config;
pub mod encoding;
pub mod error;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod primary_key;
pub mod scheduler;
pub mod schema;
pub mod shard;
pub mod upsert;

#[cfg(test)]
mod testutil;

pub use batch::{ArchiveBatch, Batch, RecordId};
pub use collab::{DiskStore, LocalDiskStore, MetaStore};
pub use config::{EngineConfig, TableConfig};
pub use error::{Error, Result};
pub use job::{JobKey, JobManager};
pub use memory::{HostMemoryManager, HostMemoryTracker};
pub use scheduler::Scheduler;
pub use schema::TableSchema;
pub use shard::TableShard;
pub use upsert::UpsertBatch;
