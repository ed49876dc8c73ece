use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::job::JobManager;
use crate::shard::TableShard;
use crate::upsert::UpsertBatch;

pub mod tasks;

pub use tasks::{JobGcTask, MetricsTask};

/// Context provided to background tasks during execution
pub struct Context {
    pub task_name: &'static str,
    pub run_id: u64,
    pub shutdown: broadcast::Receiver<()>,
}

/// Trait for background tasks that run periodically
#[async_trait::async_trait]
pub trait BackgroundTask: Send + Sync {
    /// Task name for logging
    fn name(&self) -> &'static str;

    /// How often to run this task
    fn interval(&self) -> Duration;

    /// Execute the task
    async fn execute(&self, ctx: Context) -> Result<()>;
}

/// Runs backfill jobs and the periodic housekeeping tasks, with graceful
/// shutdown.
pub struct Scheduler {
    jobs: Arc<JobManager>,
    tasks: RwLock<Vec<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(jobs: Arc<JobManager>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            jobs,
            tasks: RwLock::new(Vec::new()),
            shutdown_tx,
        }
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }

    /// Register a periodic background task
    pub fn register<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> &Self {
        let handle = self.spawn_timer_loop(task);
        self.tasks.write().unwrap().push(handle);
        self
    }

    /// Backfill `batches` into `shard` on the blocking pool.
    ///
    /// Fails with `JobAlreadyRunning` without doing any work if the shard
    /// already has a backfill in flight. The job record ends up `Succeeded`
    /// or `Failed` with the error.
    pub async fn run_backfill(
        &self,
        shard: Arc<TableShard>,
        batches: Vec<UpsertBatch>,
    ) -> Result<()> {
        let guard = self.jobs.start_backfill(shard.backfill_job_key())?;
        let jobs = Arc::clone(&self.jobs);
        let key = guard.key().clone();

        let result = tokio::task::spawn_blocking(move || shard.backfill(batches, jobs.as_ref(), &key))
            .await
            .map_err(|e| Error::InvalidState(format!("Backfill task join error: {}", e)))
            .and_then(|result| result);

        match &result {
            Ok(()) => guard.succeed(),
            Err(e) => guard.fail(e),
        }
        result
    }

    fn spawn_timer_loop<T: BackgroundTask + 'static>(&self, task: Arc<T>) -> JoinHandle<()> {
        let interval = task.interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut run_id = 0u64;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_id += 1;
                        let ctx = Context {
                            task_name: task.name(),
                            run_id,
                            shutdown: shutdown_rx.resubscribe(),
                        };

                        if let Err(e) = task.execute(ctx).await {
                            tracing::error!(
                                task = task.name(),
                                error = %e,
                                "Task execution failed"
                            );
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        tracing::info!(task = task.name(), "Task shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Graceful shutdown - wait for all tasks
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx.send(()).ok();

        for task in self.tasks.write().unwrap().drain(..) {
            task.await
                .map_err(|e| Error::InvalidState(format!("Task join error: {}", e)))?;
        }

        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Arc::new(JobManager::new()))
    }
}
