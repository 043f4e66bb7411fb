mod export_posts;

pub use export_posts::{ExportPostsJob, EXPORT_POSTS_TASK};
