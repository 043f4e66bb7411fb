mod job_queue;
mod jobs;
mod tracker;
mod worker;

pub use job_queue::{InProcessJobQueue, JobHandle, JobQueue, QueueError, QueuedJob};
pub use jobs::{ExportPostsJob, EXPORT_POSTS_TASK};
pub use tracker::{TaskTracker, PROGRESS_META_KEY};
pub use worker::{TaskContext, TaskJob, TaskWorker};
