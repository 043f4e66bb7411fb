use super::job_queue::{JobQueue, QueuedJob};
use super::tracker::TaskTracker;
use crate::store::SqliteStore;
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What a job body gets to work with.
#[derive(Clone)]
pub struct TaskContext {
    pub store: Arc<SqliteStore>,
    pub tracker: Arc<TaskTracker>,
    pub export_dir: PathBuf,
}

/// A named unit of background work. Bodies report intermediate progress
/// themselves but must never report 100; the worker owns completion.
pub trait TaskJob: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, ctx: &TaskContext, job_id: &str, owner_id: i64) -> Result<()>;
}

/// Drains the job queue one job at a time. Job bodies are blocking code, so
/// each runs on the blocking pool while the loop itself stays async.
///
/// The wrapper around every job is the reliability boundary: whatever the
/// body does (fail, panic, or be a name nobody registered) the job ends with
/// progress 100 and a completed task record, and the error only reaches the
/// log.
pub struct TaskWorker {
    receiver: mpsc::UnboundedReceiver<QueuedJob>,
    queue: Arc<dyn JobQueue>,
    jobs: HashMap<&'static str, Arc<dyn TaskJob>>,
    ctx: TaskContext,
    shutdown: CancellationToken,
}

impl TaskWorker {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<QueuedJob>,
        queue: Arc<dyn JobQueue>,
        jobs: Vec<Arc<dyn TaskJob>>,
        ctx: TaskContext,
        shutdown: CancellationToken,
    ) -> TaskWorker {
        let jobs = jobs.into_iter().map(|job| (job.name(), job)).collect();
        TaskWorker {
            receiver,
            queue,
            jobs,
            ctx,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!("Task worker started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Task worker shutting down");
                    break;
                }
                received = self.receiver.recv() => match received {
                    Some(job) => self.execute(job).await,
                    None => break,
                }
            }
        }
    }

    async fn execute(&self, job: QueuedJob) {
        let handler = self.jobs.get(job.task_name.as_str()).cloned();
        let ctx = self.ctx.clone();
        let body_job = job.clone();
        let outcome = tokio::task::spawn_blocking(move || match handler {
            Some(handler) => handler.run(&ctx, &body_job.id, body_job.owner_id),
            None => {
                warn!("No handler registered for task '{}'", body_job.task_name);
                Ok(())
            }
        })
        .await;

        match outcome {
            Ok(Ok(())) => info!("Task '{}' job {} finished", job.task_name, job.id),
            Ok(Err(err)) => error!("Task '{}' job {} failed: {:#}", job.task_name, job.id, err),
            Err(join_err) => error!(
                "Task '{}' job {} panicked: {}",
                job.task_name, job.id, join_err
            ),
        }

        if let Err(err) = self.ctx.tracker.report_progress(&job.id, 100) {
            error!("Failed to finalize job {}: {:#}", job.id, err);
        }
        self.queue.remove(&job.id);
    }
}
