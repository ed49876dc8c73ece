use crate::error::Result;
use crate::job::{JobManager, JobStatus};
use crate::shard::TableShard;

/// Log a snapshot of a shard's archive and purge state.
pub fn collect_shard_metrics(shard: &TableShard) -> Result<()> {
    let version = shard.archive_version();
    let bucket_versions: Vec<_> = version
        .buckets()
        .filter_map(|bucket| version.batch_version(bucket).map(|v| (bucket, v)))
        .collect();
    let pending_purges = shard.pending_purges().len();
    let memory = shard.memory();

    tracing::info!(
        table = shard.table(),
        shard = shard.shard_id(),
        buckets = version.len(),
        rows = version.num_rows(),
        ?bucket_versions,
        memory_used = memory.used_bytes(),
        memory_capacity = memory.capacity(),
        peer_transfer_pins = shard.peer_transfer_pins(),
        pending_purges,
        "Shard metrics"
    );

    Ok(())
}

pub fn collect_job_metrics(jobs: &JobManager) -> Result<()> {
    let details = jobs.job_details();
    let failed = details
        .iter()
        .filter(|(_, detail)| detail.job.status == JobStatus::Failed)
        .count();

    tracing::info!(
        jobs = details.len(),
        running = jobs.running_jobs(),
        failed,
        "Job metrics"
    );

    Ok(())
}
