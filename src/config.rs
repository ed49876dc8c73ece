use std::path::PathBuf;
use std::time::Duration;

/// Per-table settings that shape archiving and backfill.
#[derive(Debug, Clone, PartialEq)]
pub struct TableConfig {
    /// Row capacity of each backfill store batch (default: 20000)
    pub backfill_store_batch_size: usize,

    /// Width of one archive bucket in seconds of the time column (default: 86400)
    pub bucket_size_seconds: u32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            backfill_store_batch_size: 20000,
            bucket_size_seconds: 86400,
        }
    }
}

impl TableConfig {
    /// Set the backfill store batch capacity
    pub fn backfill_store_batch_size(mut self, size: usize) -> Self {
        self.backfill_store_batch_size = size;
        self
    }

    /// Set the bucket width
    pub fn bucket_size_seconds(mut self, seconds: u32) -> Self {
        self.bucket_size_seconds = seconds;
        self
    }
}

/// Engine-wide settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory of the local disk store (default: ./ashcol)
    pub dir: PathBuf,

    /// Host memory available to archive batches and merge buffers (default: 4GB)
    pub host_memory_capacity: usize,

    /// How long finished job records stay queryable (default: 1h)
    pub job_retention: Duration,

    /// How often finished job records are collected (default: 60s)
    pub job_gc_interval: Duration,

    /// How often shard and job metrics are logged (default: 30s)
    pub metrics_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./ashcol"),
            host_memory_capacity: 4 * 1024 * 1024 * 1024, // 4GB
            job_retention: Duration::from_secs(60 * 60),
            job_gc_interval: Duration::from_secs(60),
            metrics_interval: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set host memory capacity
    pub fn host_memory_capacity(mut self, bytes: usize) -> Self {
        self.host_memory_capacity = bytes;
        self
    }

    /// Set job record retention
    pub fn job_retention(mut self, retention: Duration) -> Self {
        self.job_retention = retention;
        self
    }

    /// Set job record collection interval
    pub fn job_gc_interval(mut self, interval: Duration) -> Self {
        self.job_gc_interval = interval;
        self
    }

    /// Set metrics logging interval
    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.dir, PathBuf::from("./ashcol"));
        assert_eq!(config.host_memory_capacity, 4 * 1024 * 1024 * 1024);
        assert_eq!(config.job_retention, Duration::from_secs(3600));

        let table = TableConfig::default();
        assert_eq!(table.backfill_store_batch_size, 20000);
        assert_eq!(table.bucket_size_seconds, 86400);
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new("/tmp/test")
            .host_memory_capacity(1 << 20)
            .job_retention(Duration::from_secs(5))
            .job_gc_interval(Duration::from_millis(500))
            .metrics_interval(Duration::from_secs(1));

        assert_eq!(config.dir, PathBuf::from("/tmp/test"));
        assert_eq!(config.host_memory_capacity, 1 << 20);
        assert_eq!(config.job_retention, Duration::from_secs(5));
        assert_eq!(config.job_gc_interval, Duration::from_millis(500));
        assert_eq!(config.metrics_interval, Duration::from_secs(1));

        let table = TableConfig::default()
            .backfill_store_batch_size(1)
            .bucket_size_seconds(3600);

        assert_eq!(table.backfill_store_batch_size, 1);
        assert_eq!(table.bucket_size_seconds, 3600);
    }
}
