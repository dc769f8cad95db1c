//! End-to-end scenarios: a real TaskStore driving real worker threads.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::{Instant, sleep};

use spindle_core::domain::PoolEvent;
use spindle_core::pool::failure;
use spindle_core::ports::{JsonFileSnapshotStore, SnapshotStore};
use spindle_core::typed::{HandlerError, TaskContext};
use spindle_core::{
    PoolBuilder, PoolConfig, PoolOptions, PoolStatus, Priority, Task, TaskId, TaskSpec,
    TaskStatus, TaskStore, WorkerId, WorkerPool,
};

const WAIT: Duration = Duration::from_secs(10);

fn fast_config() -> PoolConfig {
    PoolConfig::default()
        .with_max_workers(2)
        .with_poll_interval(Duration::from_millis(20))
        .with_idle_timeout(Duration::from_secs(5))
        .with_task_timeout(Duration::from_secs(5))
        .with_worker_boot_timeout(Duration::from_secs(2))
}

fn builder(store: &Arc<TaskStore>, config: PoolConfig) -> PoolBuilder {
    WorkerPool::builder(Arc::clone(store))
        .config(config)
        .register_fn("echo", |payload, _ctx| async move { Ok::<_, HandlerError>(payload) })
        .unwrap()
        .register_fn("flaky", |payload, ctx: TaskContext| async move {
            if ctx.attempt() == 1 {
                Err(HandlerError::failed("first attempt always fails"))
            } else {
                Ok(payload)
            }
        })
        .unwrap()
        .register_fn("fail", |_, _| async {
            Err::<Value, _>(HandlerError::failed("nope"))
        })
        .unwrap()
        .register_fn("sleep", |payload: Value, ctx: TaskContext| async move {
            let ms = payload["ms"].as_u64().unwrap_or(10_000);
            ctx.report_progress(10);
            sleep(Duration::from_millis(ms)).await;
            Ok::<_, HandlerError>(json!({ "slept_ms": ms }))
        })
        .unwrap()
        .register_fn("panic", |_, _| async {
            if true {
                panic!("handler blew up");
            }
            Ok::<_, HandlerError>(Value::Null)
        })
        .unwrap()
}

async fn wait_for_task(store: &TaskStore, id: TaskId, done: impl Fn(&Task) -> bool) -> Task {
    let deadline = Instant::now() + WAIT;
    loop {
        let task = store.get(id).await.expect("task exists");
        if done(&task) {
            return task;
        }
        assert!(Instant::now() < deadline, "task never reached the expected state: {task:?}");
        sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_terminal(store: &TaskStore, id: TaskId) -> Task {
    wait_for_task(store, id, |t| t.status.is_terminal()).await
}

async fn wait_for_pool(pool: &WorkerPool, ok: impl Fn(&PoolStatus) -> bool) -> PoolStatus {
    let deadline = Instant::now() + WAIT;
    loop {
        let status = pool.status().await;
        if ok(&status) {
            return status;
        }
        assert!(Instant::now() < deadline, "pool never reached the expected state: {status:?}");
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn drains_mixed_priorities_with_two_workers() {
    let store = Arc::new(TaskStore::new());
    let pool = builder(&store, fast_config()).build().unwrap();
    let mut events = pool.events();

    let mut ids = Vec::new();
    for priority in [
        Priority::Critical,
        Priority::High,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ] {
        let task = store
            .submit(TaskSpec::new("echo", json!({ "p": format!("{priority:?}") })).priority(priority))
            .await
            .unwrap();
        ids.push(task.id);
    }

    pool.start().await;
    for &id in &ids {
        let task = wait_for_terminal(&store, id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.attempts, 1);
    }

    let status = pool.status().await;
    assert_eq!(status.processed_total, 5);
    assert_eq!(status.failed_total, 0);
    assert!(status.total <= 2);

    let mut first_assigned = None;
    while let Ok(event) = events.try_recv() {
        if let PoolEvent::TaskAssigned { task_id, .. } = event {
            first_assigned = Some(task_id);
            break;
        }
    }
    assert_eq!(first_assigned, Some(ids[0]));

    pool.stop().await;
}

#[tokio::test]
async fn handler_failure_is_retried() {
    let store = Arc::new(TaskStore::new());
    let pool = builder(&store, fast_config()).build().unwrap();
    pool.start().await;

    let task = store.submit(TaskSpec::new("flaky", json!("x"))).await.unwrap();
    let task = wait_for_terminal(&store, task.id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.attempts, 2);
    assert_eq!(task.result, Some(json!("x")));
    assert!(task.error.is_none());
    assert_eq!(pool.status().await.failed_total, 1);

    pool.stop().await;
}

#[tokio::test]
async fn exhausted_budget_ends_failed() {
    let store = Arc::new(TaskStore::new());
    let pool = builder(&store, fast_config()).build().unwrap();
    pool.start().await;

    let task = store
        .submit(TaskSpec::new("fail", json!(null)).max_attempts(2))
        .await
        .unwrap();
    let task = wait_for_terminal(&store, task.id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.attempts, 2);
    assert_eq!(task.error.as_deref(), Some("nope"));
    assert!(task.assigned_worker.is_none());

    pool.stop().await;
}

#[tokio::test]
async fn unknown_kind_fails_without_killing_the_worker() {
    let store = Arc::new(TaskStore::new());
    let pool = builder(&store, fast_config()).build().unwrap();
    pool.start().await;

    let task = store
        .submit(TaskSpec::new("missing", json!(null)).max_attempts(1))
        .await
        .unwrap();
    let task = wait_for_terminal(&store, task.id).await;
    assert!(task.error.unwrap().contains("no handler registered"));

    let follow_up = store.submit(TaskSpec::new("echo", json!(1))).await.unwrap();
    assert_eq!(
        wait_for_terminal(&store, follow_up.id).await.status,
        TaskStatus::Completed
    );

    pool.stop().await;
}

#[tokio::test]
async fn crashed_worker_is_removed_and_replaced() {
    let store = Arc::new(TaskStore::new());
    let pool = builder(&store, fast_config()).build().unwrap();
    let mut events = pool.events();
    pool.start().await;

    let task = store
        .submit(TaskSpec::new("panic", json!(null)).max_attempts(1))
        .await
        .unwrap();
    let task = wait_for_terminal(&store, task.id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some(failure::WORKER_TERMINATED));

    let mut crashed: Option<WorkerId> = None;
    while let Ok(event) = events.try_recv() {
        if let PoolEvent::WorkerErrored { worker_id, .. } = event {
            crashed = Some(worker_id);
        }
    }
    let crashed = crashed.expect("worker error event");

    wait_for_pool(&pool, |s| s.idle >= 1).await;
    assert!(pool.workers().await.iter().all(|w| w.id != crashed));

    let after = store.submit(TaskSpec::new("echo", json!(2))).await.unwrap();
    assert_eq!(
        wait_for_terminal(&store, after.id).await.status,
        TaskStatus::Completed
    );

    pool.stop().await;
}

#[tokio::test]
async fn slow_task_times_out_and_worker_is_replaced() {
    let store = Arc::new(TaskStore::new());
    let config = fast_config().with_task_timeout(Duration::from_millis(150));
    let pool = builder(&store, config).build().unwrap();
    let mut events = pool.events();
    pool.start().await;

    let task = store
        .submit(TaskSpec::new("sleep", json!({ "ms": 5_000 })).max_attempts(1))
        .await
        .unwrap();
    let task = wait_for_terminal(&store, task.id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some(failure::TIMED_OUT));

    // the replacement only exists once the timeout has been fully handled
    let status = wait_for_pool(&pool, |s| s.idle >= 1).await;
    assert_eq!(status.failed_total, 1);

    let mut timed_out = false;
    while let Ok(event) = events.try_recv() {
        timed_out |= matches!(event, PoolEvent::TaskTimedOut { task_id, .. } if task_id == task.id);
    }
    assert!(timed_out);

    pool.stop().await;
}

#[tokio::test]
async fn pool_keeps_one_worker_after_idle_timeouts() {
    let store = Arc::new(TaskStore::new());
    let config = fast_config()
        .with_max_workers(3)
        .with_idle_timeout(Duration::from_millis(50));
    let pool = builder(&store, config).build().unwrap();
    pool.start().await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            store
                .submit(TaskSpec::new("sleep", json!({ "ms": 100 })))
                .await
                .unwrap()
                .id,
        );
    }
    for id in ids {
        wait_for_terminal(&store, id).await;
    }

    sleep(Duration::from_millis(300)).await;
    let status = pool.status().await;
    assert_eq!(status.total, 1);
    assert_eq!(status.idle, 1);
    assert!(status.running);

    pool.stop().await;
}

#[tokio::test]
async fn cancel_task_aborts_running_execution() {
    let store = Arc::new(TaskStore::new());
    let pool = builder(&store, fast_config()).build().unwrap();
    pool.start().await;

    let task = store
        .submit(TaskSpec::new("sleep", json!({ "ms": 10_000 })))
        .await
        .unwrap();
    let running = wait_for_task(&store, task.id, |t| t.status == TaskStatus::Running).await;
    let worker_id = running.assigned_worker.unwrap();

    let cancelled = pool.cancel_task(task.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.assigned_worker.is_none());

    assert!(pool.workers().await.iter().all(|w| w.id != worker_id));
    wait_for_pool(&pool, |s| s.idle == 1).await;
    assert_eq!(store.get(task.id).await.unwrap().status, TaskStatus::Cancelled);

    assert!(pool.cancel_task(task.id).await.is_err());
    pool.stop().await;
}

#[tokio::test]
async fn worker_progress_reaches_the_task() {
    let store = Arc::new(TaskStore::new());
    let pool = builder(&store, fast_config()).build().unwrap();
    let mut events = pool.events();
    pool.start().await;

    let task = store
        .submit(TaskSpec::new("sleep", json!({ "ms": 10_000 })))
        .await
        .unwrap();

    let percent = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(PoolEvent::TaskProgress { task_id, percent, .. }) = events.recv().await
                && task_id == task.id
            {
                return percent;
            }
        }
    })
    .await
    .expect("progress event");
    assert_eq!(percent, 10);

    let running = store.get(task.id).await.unwrap();
    assert_eq!(running.status, TaskStatus::Running);
    assert_eq!(running.progress, 10);

    pool.cancel_task(task.id).await.unwrap();
    pool.stop().await;
}

#[tokio::test]
async fn stop_fails_in_flight_tasks_and_is_idempotent() {
    let store = Arc::new(TaskStore::new());
    let pool = builder(&store, fast_config()).build().unwrap();
    pool.start().await;
    pool.start().await;

    let task = store
        .submit(TaskSpec::new("sleep", json!({ "ms": 10_000 })))
        .await
        .unwrap();
    wait_for_task(&store, task.id, |t| t.status == TaskStatus::Running).await;

    pool.stop().await;
    pool.stop().await;

    let task = store.get(task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Retrying);
    assert_eq!(task.error.as_deref(), Some(failure::POOL_STOPPED));
    assert!(!pool.is_running().await);

    let status = pool.status().await;
    assert_eq!(status.total, 0);
    assert!(!status.running);
}

#[tokio::test]
async fn dependent_runs_after_its_dependency() {
    let store = Arc::new(TaskStore::new());
    let pool = builder(&store, fast_config()).build().unwrap();

    let parent = store
        .submit(TaskSpec::new("sleep", json!({ "ms": 50 })).priority(Priority::Low))
        .await
        .unwrap();
    let child = store
        .submit(
            TaskSpec::new("echo", json!("child"))
                .priority(Priority::Critical)
                .depends_on(parent.id),
        )
        .await
        .unwrap();

    pool.start().await;
    let child = wait_for_terminal(&store, child.id).await;
    let parent = store.get(parent.id).await.unwrap();

    assert_eq!(parent.status, TaskStatus::Completed);
    assert_eq!(child.status, TaskStatus::Completed);
    assert!(child.started_at.unwrap() >= parent.completed_at.unwrap());

    pool.stop().await;
}

#[tokio::test]
async fn configure_scales_up_a_running_pool() {
    let store = Arc::new(TaskStore::new());
    let pool = builder(&store, fast_config().with_max_workers(1))
        .build()
        .unwrap();
    pool.start().await;

    for _ in 0..4 {
        store
            .submit(TaskSpec::new("sleep", json!({ "ms": 500 })))
            .await
            .unwrap();
    }
    wait_for_pool(&pool, |s| s.busy == 1).await;

    let config = pool
        .configure(PoolOptions::new().max_workers(3))
        .await
        .unwrap();
    assert_eq!(config.max_workers, 3);
    wait_for_pool(&pool, |s| s.active() == 3).await;

    assert!(pool.configure(PoolOptions::new().max_workers(0)).await.is_err());
    assert_eq!(pool.config().await.max_workers, 3);

    pool.stop().await;
}

#[tokio::test]
async fn snapshot_restore_recovers_lost_running_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let snapshots = JsonFileSnapshotStore::new(dir.path().join("tasks.json"));

    let before = TaskStore::new();
    let done = before.submit(TaskSpec::new("echo", json!(1))).await.unwrap();
    before.mark_running(done.id, WorkerId::generate()).await.unwrap();
    before.mark_completed(done.id, json!(1)).await.unwrap();
    let orphan = before.submit(TaskSpec::new("echo", json!(2))).await.unwrap();
    before.mark_running(orphan.id, WorkerId::generate()).await.unwrap();
    before.submit(TaskSpec::new("echo", json!(3)).tag("queued")).await.unwrap();
    before.save_to(&snapshots).await.unwrap();

    let saved = snapshots.load_snapshot().await.unwrap();
    assert_eq!(saved, before.snapshot().await);

    let store = Arc::new(TaskStore::new());
    assert_eq!(store.load_from(&snapshots).await.unwrap(), 3);
    assert_eq!(store.all().await, before.all().await);

    let pool = builder(&store, fast_config()).build().unwrap();
    pool.start().await;

    let orphan = wait_for_terminal(&store, orphan.id).await;
    assert_eq!(orphan.status, TaskStatus::Completed);
    assert_eq!(orphan.attempts, 2);
    assert_eq!(store.get(done.id).await.unwrap().attempts, 1);

    let queued = store.by_tag("queued").await;
    assert_eq!(wait_for_terminal(&store, queued[0].id).await.status, TaskStatus::Completed);

    pool.stop().await;
}
