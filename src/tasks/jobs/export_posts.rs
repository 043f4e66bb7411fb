use crate::tasks::{TaskContext, TaskJob};
use anyhow::{Context, Result};
use std::fs::File;
use tracing::info;

pub const EXPORT_POSTS_TASK: &str = "export_posts";

/// Writes all of a user's posts to a JSON file under the export directory,
/// reporting per-post progress along the way. Progress is capped at 99;
/// only the worker reports 100.
pub struct ExportPostsJob;

impl TaskJob for ExportPostsJob {
    fn name(&self) -> &'static str {
        EXPORT_POSTS_TASK
    }

    fn run(&self, ctx: &TaskContext, job_id: &str, owner_id: i64) -> Result<()> {
        ctx.tracker.report_progress(job_id, 0)?;
        let posts = ctx.store.get_user_posts(owner_id)?;
        let total = posts.len();

        let mut exported = Vec::with_capacity(total);
        for (done, post) in posts.iter().enumerate() {
            exported.push(serde_json::json!({
                "body": post.body,
                "timestamp": post.timestamp.to_rfc3339(),
            }));
            let progress = (((done + 1) * 100 / total) as u8).min(99);
            ctx.tracker.report_progress(job_id, progress)?;
        }

        let path = ctx.export_dir.join(format!("posts_{}_{}.json", owner_id, job_id));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create export file {:?}", path))?;
        serde_json::to_writer_pretty(file, &exported)?;
        info!("Exported {} posts for user {} to {:?}", total, owner_id, path);
        Ok(())
    }
}
