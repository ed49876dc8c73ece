use std::{sync::Arc, time::Duration};

use crate::{
    config::EngineConfig,
    error::Result,
    job::JobManager,
    metrics,
    scheduler::{BackgroundTask, Context},
    shard::TableShard,
};

/// Collects finished job records once they are past the retention window.
pub struct JobGcTask {
    jobs: Arc<JobManager>,
    retention: Duration,
    interval: Duration,
}

impl JobGcTask {
    pub fn new(jobs: Arc<JobManager>, config: &EngineConfig) -> Self {
        Self {
            jobs,
            retention: config.job_retention,
            interval: config.job_gc_interval,
        }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for JobGcTask {
    fn name(&self) -> &'static str {
        "job-gc"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        self.jobs.gc(self.retention);
        Ok(())
    }
}

pub struct MetricsTask {
    jobs: Arc<JobManager>,
    shards: Vec<Arc<TableShard>>,
    interval: Duration,
}

impl MetricsTask {
    pub fn new(jobs: Arc<JobManager>, shards: Vec<Arc<TableShard>>, config: &EngineConfig) -> Self {
        Self {
            jobs,
            shards,
            interval: config.metrics_interval,
        }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for MetricsTask {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        for shard in &self.shards {
            metrics::collect_shard_metrics(shard)?;
        }
        metrics::collect_job_metrics(&self.jobs)
    }
}
