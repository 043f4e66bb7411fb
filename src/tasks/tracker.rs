use super::job_queue::JobQueue;
use crate::store::{SqliteStore, StoreTransaction, TaskRecord};
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

pub const PROGRESS_META_KEY: &str = "progress";

/// Layers durable task records over the job queue.
///
/// The queue knows the job's transient side (is it live, how far along);
/// the store knows the durable side (that it was launched, and whether it
/// finished). Progress reads are fail-open: a job the queue no longer knows
/// is reported as done, and a live job that has not reported yet as 0.
pub struct TaskTracker {
    store: Arc<SqliteStore>,
    queue: Arc<dyn JobQueue>,
}

impl TaskTracker {
    pub fn new(store: Arc<SqliteStore>, queue: Arc<dyn JobQueue>) -> TaskTracker {
        TaskTracker { store, queue }
    }

    /// Submits a job and records its task row in the caller's open
    /// transaction, so the row becomes durable together with whatever else
    /// the caller is committing.
    pub fn launch(
        &self,
        tx: &mut StoreTransaction,
        owner_id: i64,
        task_name: &str,
        description: &str,
    ) -> Result<TaskRecord> {
        let queued = self.queue.submit(task_name, owner_id)?;
        debug!("Launching task '{}' as job {}", task_name, queued.id);
        let record = TaskRecord {
            id: queued.id,
            name: task_name.to_string(),
            description: description.to_string(),
            complete: false,
            user_id: owner_id,
        };
        tx.insert_task(&record)?;
        Ok(record)
    }

    /// Current progress in percent. A task whose job the queue has forgotten
    /// is considered finished; a live job with no reported progress yet is 0.
    pub fn progress(&self, task: &TaskRecord) -> u8 {
        match self.queue.fetch(&task.id) {
            Some(handle) => handle
                .get_meta(PROGRESS_META_KEY)
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(0),
            None => 100,
        }
    }

    /// Called from inside job bodies (and the worker's completion wrapper).
    /// Writes the transient progress value and, at 100, flips the durable
    /// completion flag.
    pub fn report_progress(&self, job_id: &str, progress: u8) -> Result<()> {
        if let Some(handle) = self.queue.fetch(job_id) {
            handle.set_meta(PROGRESS_META_KEY, &progress.to_string());
        }
        if progress >= 100 {
            self.store.transaction(|tx| tx.complete_task(job_id))?;
        }
        Ok(())
    }
}
