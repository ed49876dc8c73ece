//! Process-wide job progress registry.
//!
//! Lifecycle of a record: inserted when a job starts, updated in place while
//! it runs, read-only once it reaches a terminal status, and collected by
//! [`JobManager::gc`] after the retention window. One lock guards the map and
//! nothing else.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    Backfill,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::Backfill => write!(f, "backfill"),
        }
    }
}

/// Identifies one job slot: at most one job runs per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub table: String,
    pub shard: u32,
    pub job_type: JobType,
}

impl JobKey {
    pub fn new(table: impl Into<String>, shard: u32, job_type: JobType) -> Self {
        Self {
            table: table.into(),
            shard,
            job_type,
        }
    }

    pub fn backfill(table: impl Into<String>, shard: u32) -> Self {
        Self::new(table, shard, JobType::Backfill)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.table, self.shard, self.job_type)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobStatus {
    #[default]
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Progress shared by all job types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobDetail {
    pub current: usize,
    pub total: usize,
    pub num_records: usize,
    pub num_affected_days: usize,
    /// Time spent holding the archive version lock.
    pub lock_duration: Duration,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackfillStage {
    #[default]
    Queued,
    CreatePatch,
    ApplyPatch,
}

impl fmt::Display for BackfillStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackfillStage::Queued => write!(f, "queued"),
            BackfillStage::CreatePatch => write!(f, "create patch"),
            BackfillStage::ApplyPatch => write!(f, "apply patch"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillJobDetail {
    pub job: JobDetail,
    pub stage: BackfillStage,
}

/// Sink for backfill progress updates.
pub trait BackfillProgress: Send + Sync {
    /// Apply `update` to the record for `key`.
    fn report(&self, key: &JobKey, update: &dyn Fn(&mut BackfillJobDetail));
}

#[derive(Debug, Default)]
pub struct JobManager {
    details: RwLock<HashMap<JobKey, BackfillJobDetail>>,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `key`. A second claim while a job is running is
    /// rejected, never queued.
    pub fn start_backfill(self: &Arc<Self>, key: JobKey) -> Result<JobGuard> {
        let mut details = self.details.write().unwrap();
        if let Some(detail) = details.get(&key) {
            if !detail.job.status.is_terminal() {
                return Err(Error::JobAlreadyRunning(key.to_string()));
            }
        }

        details.insert(
            key.clone(),
            BackfillJobDetail {
                job: JobDetail {
                    started_at: Some(Instant::now()),
                    ..Default::default()
                },
                stage: BackfillStage::Queued,
            },
        );
        tracing::info!(job = %key, "Backfill job started");

        Ok(JobGuard {
            manager: Arc::clone(self),
            key,
            finished: false,
        })
    }

    /// Snapshot of one record.
    pub fn job_detail(&self, key: &JobKey) -> Option<BackfillJobDetail> {
        self.details.read().unwrap().get(key).cloned()
    }

    /// Snapshot of every record.
    pub fn job_details(&self) -> Vec<(JobKey, BackfillJobDetail)> {
        self.details
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn running_jobs(&self) -> usize {
        self.details
            .read()
            .unwrap()
            .values()
            .filter(|d| !d.job.status.is_terminal())
            .count()
    }

    /// Drop terminal records that finished more than `retention` ago.
    pub fn gc(&self, retention: Duration) -> usize {
        let mut details = self.details.write().unwrap();
        let before = details.len();
        details.retain(|_, detail| match detail.job.finished_at {
            Some(finished) if detail.job.status.is_terminal() => finished.elapsed() < retention,
            _ => true,
        });
        let removed = before - details.len();
        if removed > 0 {
            tracing::debug!(removed, "Collected finished job records");
        }
        removed
    }

    fn finish(&self, key: &JobKey, error: Option<String>) {
        let mut details = self.details.write().unwrap();
        let Some(detail) = details.get_mut(key) else {
            return;
        };
        detail.job.finished_at = Some(Instant::now());
        match error {
            None => {
                detail.job.status = JobStatus::Succeeded;
                tracing::info!(
                    job = %key,
                    records = detail.job.num_records,
                    affected_days = detail.job.num_affected_days,
                    "Backfill job succeeded"
                );
            }
            Some(message) => {
                detail.job.status = JobStatus::Failed;
                tracing::error!(job = %key, stage = %detail.stage, error = %message, "Backfill job failed");
                detail.job.last_error = Some(message);
            }
        }
    }
}

impl BackfillProgress for JobManager {
    fn report(&self, key: &JobKey, update: &dyn Fn(&mut BackfillJobDetail)) {
        let mut details = self.details.write().unwrap();
        let detail = details.entry(key.clone()).or_insert_with(|| BackfillJobDetail {
            job: JobDetail {
                started_at: Some(Instant::now()),
                ..Default::default()
            },
            ..Default::default()
        });
        if detail.job.status.is_terminal() {
            return;
        }
        update(detail);
    }
}

/// Holds a job slot. Dropping it without finishing marks the job failed.
#[derive(Debug)]
pub struct JobGuard {
    manager: Arc<JobManager>,
    key: JobKey,
    finished: bool,
}

impl JobGuard {
    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn succeed(mut self) {
        self.finished = true;
        self.manager.finish(&self.key, None);
    }

    pub fn fail(mut self, error: &Error) {
        self.finished = true;
        self.manager.finish(&self.key, Some(error.to_string()));
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.manager
                .finish(&self.key, Some("job abandoned before completion".to_string()));
        }
    }
}
