use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spindle_core::ports::{JsonFileSnapshotStore, SnapshotStore};
use spindle_core::store::spawn_autosave;
use spindle_core::typed::{Handler, HandlerError, TaskContext, TaskPayload};
use spindle_core::{PoolConfig, Priority, TaskSpec, TaskStore, WorkerPool};

/// Run a demo batch through a spindle worker pool.
#[derive(Debug, Parser)]
#[command(name = "spindle", version)]
struct Args {
    /// Upper bound on worker threads (default: CPU count, at least 2).
    #[arg(long, env = "SPINDLE_MAX_WORKERS")]
    max_workers: Option<usize>,

    /// Poll interval in milliseconds.
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    /// Per-task timeout in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    task_timeout_ms: u64,

    /// Idle workers older than this are stopped (milliseconds).
    #[arg(long, default_value_t = 2_000)]
    idle_timeout_ms: u64,

    /// Number of echo tasks in the demo batch.
    #[arg(long, default_value_t = 8)]
    batch: usize,

    /// Load tasks from and save them to this JSON snapshot.
    #[arg(long, env = "SPINDLE_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Autosave interval in milliseconds (with --snapshot).
    #[arg(long, default_value_t = 1_000)]
    autosave_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Echo {
    message: String,
}

impl TaskPayload for Echo {
    const KIND: &'static str = "echo";
    type Output = String;
}

struct EchoHandler;

#[async_trait]
impl Handler<Echo> for EchoHandler {
    async fn handle(&self, task: Echo, ctx: TaskContext) -> Result<String, HandlerError> {
        Ok(format!("{} (attempt {})", task.message, ctx.attempt()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Nap {
    ms: u64,
}

impl TaskPayload for Nap {
    const KIND: &'static str = "sleep";
    type Output = u64;
}

struct NapHandler;

#[async_trait]
impl Handler<Nap> for NapHandler {
    async fn handle(&self, task: Nap, ctx: TaskContext) -> Result<u64, HandlerError> {
        let step = task.ms / 4;
        for n in 1..=4u8 {
            sleep(Duration::from_millis(step)).await;
            ctx.report_progress(n * 25);
        }
        Ok(task.ms)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn pool_config(args: &Args) -> PoolConfig {
    let mut config = PoolConfig::default()
        .with_poll_interval(Duration::from_millis(args.poll_ms))
        .with_task_timeout(Duration::from_millis(args.task_timeout_ms))
        .with_idle_timeout(Duration::from_millis(args.idle_timeout_ms));
    if let Some(max_workers) = args.max_workers {
        config = config.with_max_workers(max_workers);
    }
    config
}

async fn submit_demo_batch(store: &TaskStore, batch: usize) -> anyhow::Result<()> {
    let warmup = store
        .submit(
            Nap { ms: 200 }
                .to_spec()?
                .priority(Priority::High)
                .tag("warmup"),
        )
        .await?;

    let priorities = [Priority::Critical, Priority::Medium, Priority::Low, Priority::Background];
    for n in 0..batch {
        let spec = Echo {
            message: format!("hello #{n}"),
        }
        .to_spec()?
        .priority(priorities[n % priorities.len()])
        .tag("demo")
        .depends_on(warmup.id);
        store.submit(spec).await?;
    }

    store
        .submit(TaskSpec::new("flaky", json!({ "note": "fails once" })).tag("demo"))
        .await?;
    Ok(())
}

async fn wait_for_drain(store: &TaskStore) {
    loop {
        let stats = store.stats().await;
        if stats.pending + stats.running + stats.retrying == 0 {
            return;
        }
        sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let store = Arc::new(TaskStore::new());
    let snapshots: Option<Arc<dyn SnapshotStore>> = args
        .snapshot
        .clone()
        .map(|path| Arc::new(JsonFileSnapshotStore::new(path)) as Arc<dyn SnapshotStore>);

    if let Some(snapshots) = &snapshots {
        let restored = store
            .load_from(snapshots.as_ref())
            .await
            .context("loading snapshot")?;
        info!(restored, "snapshot loaded");
    }

    let pool = WorkerPool::builder(Arc::clone(&store))
        .config(pool_config(&args))
        .register::<Echo, _>(EchoHandler)?
        .register::<Nap, _>(NapHandler)?
        .register_fn("flaky", |payload, ctx: TaskContext| async move {
            if ctx.attempt() < 2 {
                return Err(HandlerError::failed("transient failure"));
            }
            Ok(payload)
        })?
        .expect_kinds(&[Echo::KIND, Nap::KIND, "flaky"])
        .build()?;

    let mut events = pool.events();
    let event_log = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(event = event.name(), task_id = ?event.task_id(), "pool event");
        }
    });

    let (stop_autosave, autosave_rx) = watch::channel(false);
    let autosave = snapshots.clone().map(|snapshots| {
        spawn_autosave(
            Arc::clone(&store),
            snapshots,
            Duration::from_millis(args.autosave_ms),
            autosave_rx,
        )
    });

    pool.start().await;
    submit_demo_batch(&store, args.batch).await?;

    tokio::select! {
        _ = wait_for_drain(&store) => info!("all tasks settled"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for ctrl-c")?;
            warn!("interrupted, stopping pool");
        }
    }

    let status = pool.status().await;
    pool.stop().await;
    event_log.abort();

    let _ = stop_autosave.send(true);
    if let Some(autosave) = autosave {
        autosave.await.context("autosave task")?;
    }

    let report = json!({
        "pool": status,
        "tasks": store.stats().await,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
