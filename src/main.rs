use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use quill_server::search::{Fts5SearchIndex, IndexSynchronizer, SearchIndex};
use quill_server::server::{run_server, ServerState};
use quill_server::store::SqliteStore;
use quill_server::tasks::{
    ExportPostsJob, InProcessJobQueue, TaskContext, TaskTracker, TaskWorker,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite database file.
    #[clap(value_parser = parse_path)]
    pub db: PathBuf,

    /// Path to the SQLite full-text search database file. Omit to run
    /// without a search index.
    #[clap(long, value_parser = parse_path)]
    pub search_db: Option<PathBuf>,

    /// Directory where post exports are written. Defaults to the database
    /// file's directory.
    #[clap(long, value_parser = parse_path)]
    pub export_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    info!("Opening SQLite quill database at {:?}...", cli_args.db);
    let store = Arc::new(SqliteStore::new(&cli_args.db)?);

    let index: Option<Arc<dyn SearchIndex>> = match &cli_args.search_db {
        Some(path) => {
            info!("Opening search index at {:?}...", path);
            Some(Arc::new(Fts5SearchIndex::new(path)?) as Arc<dyn SearchIndex>)
        }
        None => {
            info!("Running without a search index");
            None
        }
    };
    let synchronizer = Arc::new(IndexSynchronizer::new(index)?);
    store.register_commit_listener(synchronizer.clone());
    if synchronizer.enabled() {
        info!("Indexing content for search...");
        synchronizer.reindex_posts(&store)?;
    }

    let export_dir = match cli_args.export_dir {
        Some(path) => path,
        None => cli_args
            .db
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    std::fs::create_dir_all(&export_dir)
        .with_context(|| format!("Failed to create export directory {:?}", export_dir))?;

    let (queue, receiver) = InProcessJobQueue::new();
    let tracker = Arc::new(TaskTracker::new(store.clone(), queue.clone()));
    let shutdown = CancellationToken::new();
    let worker = TaskWorker::new(
        receiver,
        queue,
        vec![Arc::new(ExportPostsJob)],
        TaskContext {
            store: store.clone(),
            tracker: tracker.clone(),
            export_dir,
        },
        shutdown.clone(),
    );
    tokio::spawn(worker.run());

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            signal_shutdown.cancel();
        }
    });

    let state = ServerState {
        store,
        synchronizer,
        tracker,
    };
    info!("Ready to serve at port {}!", cli_args.port);
    run_server(state, cli_args.port, shutdown).await
}
