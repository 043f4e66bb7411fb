use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job queue is shut down")]
    Closed,
}

/// A job accepted by the queue, as handed to the worker.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: String,
    pub task_name: String,
    pub owner_id: i64,
}

/// Shared transient metadata for one live job. Key/value pairs only; anything
/// durable belongs in the store.
#[derive(Clone, Default)]
pub struct JobHandle {
    meta: Arc<Mutex<HashMap<String, String>>>,
}

impl JobHandle {
    pub fn get_meta(&self, key: &str) -> Option<String> {
        self.meta.lock().unwrap().get(key).cloned()
    }

    pub fn set_meta(&self, key: &str, value: &str) {
        self.meta
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

/// The job queue seam: submit work, look up a live job's handle. A handle
/// exists only while the job is queued or running; callers must treat a
/// missing handle as "job gone", not as an error.
pub trait JobQueue: Send + Sync {
    fn submit(&self, task_name: &str, owner_id: i64) -> Result<QueuedJob, QueueError>;

    fn fetch(&self, job_id: &str) -> Option<JobHandle>;

    /// Drops the job's handle. Called by the worker once the job is done.
    fn remove(&self, job_id: &str);
}

/// Channel-backed queue living in the server process. Jobs and their metadata
/// do not survive a restart; the durable task rows in the store do.
pub struct InProcessJobQueue {
    sender: mpsc::UnboundedSender<QueuedJob>,
    handles: Mutex<HashMap<String, JobHandle>>,
}

impl InProcessJobQueue {
    pub fn new() -> (Arc<InProcessJobQueue>, mpsc::UnboundedReceiver<QueuedJob>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Arc::new(InProcessJobQueue {
            sender,
            handles: Mutex::new(HashMap::new()),
        });
        (queue, receiver)
    }
}

impl JobQueue for InProcessJobQueue {
    fn submit(&self, task_name: &str, owner_id: i64) -> Result<QueuedJob, QueueError> {
        let job = QueuedJob {
            id: Uuid::new_v4().to_string(),
            task_name: task_name.to_string(),
            owner_id,
        };
        self.handles
            .lock()
            .unwrap()
            .insert(job.id.clone(), JobHandle::default());
        if self.sender.send(job.clone()).is_err() {
            self.handles.lock().unwrap().remove(&job.id);
            return Err(QueueError::Closed);
        }
        Ok(job)
    }

    fn fetch(&self, job_id: &str) -> Option<JobHandle> {
        self.handles.lock().unwrap().get(job_id).cloned()
    }

    fn remove(&self, job_id: &str) {
        self.handles.lock().unwrap().remove(job_id);
    }
}
