//! Processing loops running against a shared SQLite file in real time

mod common;

use common::TestDb;
use lockstep_core::application::{shutdown_channel, Scheduler, SchedulerConfig};
use lockstep_core::domain::JobDefinition;
use lockstep_core::port::job_handler::mocks::{MockBehavior, MockJobHandler};
use lockstep_core::port::time_provider::SystemTimeProvider;
use lockstep_core::port::{JobRepository, TimeProvider};
use lockstep_infra_system::CommandHandler;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn fast_config(name: &str) -> SchedulerConfig {
    SchedulerConfig::default()
        .with_name(name)
        .with_process_every(Duration::from_millis(50))
}

async fn scheduler(db: &TestDb, name: &str) -> Scheduler {
    db.scheduler(Arc::new(SystemTimeProvider), fast_config(name))
        .await
}

async fn join_all(workers: Vec<JoinHandle<lockstep_core::Result<()>>>) {
    for worker in workers {
        timeout(WAIT, worker)
            .await
            .expect("worker stops after shutdown")
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn test_loop_runs_every_due_job_once() {
    let db = TestDb::new();
    let scheduler = scheduler(&db, "loop-1").await;
    let handler = Arc::new(MockJobHandler::new_success());
    scheduler
        .define(JobDefinition::new("thumbnail").with_concurrency(2), handler.clone())
        .await
        .unwrap();
    let mut completed = scheduler.subscribe_topic("complete:thumbnail");

    for i in 0..5 {
        scheduler.now("thumbnail", json!({ "image": i })).await.unwrap();
    }

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let workers = scheduler.start(shutdown_rx).await;

    for _ in 0..5 {
        timeout(WAIT, completed.recv())
            .await
            .expect("job completes in time")
            .expect("event bus open");
    }
    shutdown_tx.shutdown();
    join_all(workers).await;

    assert_eq!(handler.call_count(), 5);
    assert!(handler.max_in_flight() <= 2);

    let repo = db.repository().await;
    for job in repo.find_by_name("thumbnail").await.unwrap() {
        assert!(job.last_finished_at.is_some());
        assert_eq!(job.locked_at, None);
        assert_eq!(job.next_run_at, None, "one-off jobs are not rescheduled");
        assert_eq!(job.last_modified_by.as_deref(), Some("loop-1"));
    }
}

/// Two daemons sharing one database split the work without overlap
#[tokio::test]
async fn test_two_schedulers_share_the_queue() {
    let db = TestDb::new();
    let scheduler_a = scheduler(&db, "a").await;
    let scheduler_b = scheduler(&db, "b").await;

    let handler_a = Arc::new(MockJobHandler::new(MockBehavior::Sleep(
        Duration::from_millis(5),
    )));
    let handler_b = Arc::new(MockJobHandler::new(MockBehavior::Sleep(
        Duration::from_millis(5),
    )));
    scheduler_a
        .define(JobDefinition::new("encode"), handler_a.clone())
        .await
        .unwrap();
    scheduler_b
        .define(JobDefinition::new("encode"), handler_b.clone())
        .await
        .unwrap();

    for i in 0..30 {
        scheduler_a.now("encode", json!({ "chunk": i })).await.unwrap();
    }

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut workers = scheduler_a.start(shutdown_rx.clone()).await;
    workers.extend(scheduler_b.start(shutdown_rx).await);

    let repo = db.repository().await;
    let drained = timeout(WAIT, async {
        loop {
            let jobs = repo.find_by_name("encode").await.unwrap();
            if jobs.iter().all(|job| job.last_finished_at.is_some()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    shutdown_tx.shutdown();
    join_all(workers).await;
    assert!(drained.is_ok(), "all jobs finished in time");

    assert_eq!(handler_a.call_count() + handler_b.call_count(), 30);

    let seen: Vec<String> = handler_a
        .seen()
        .into_iter()
        .chain(handler_b.seen())
        .filter_map(|job| job.id)
        .collect();
    let unique: HashSet<&String> = seen.iter().collect();
    assert_eq!(unique.len(), 30, "no job ran twice");
}

/// Jobs claimed ahead of their due time are unlocked when the loop stops
#[tokio::test]
async fn test_shutdown_releases_waiting_jobs() {
    let db = TestDb::new();
    let scheduler = db
        .scheduler(
            Arc::new(SystemTimeProvider),
            SchedulerConfig::default().with_process_every(Duration::from_secs(5)),
        )
        .await;
    let handler = Arc::new(MockJobHandler::new_success());
    scheduler
        .define(JobDefinition::new("later"), handler.clone())
        .await
        .unwrap();

    let due = SystemTimeProvider.now_millis() + 3_000;
    let job = scheduler.schedule(due, "later", json!({})).await.unwrap();

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let workers = scheduler.start(shutdown_rx).await;

    let repo = db.repository().await;
    let id = job.id().cloned().unwrap();
    timeout(WAIT, async {
        while repo.find_by_id(&id).await.unwrap().unwrap().locked_at.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job is claimed within the scan window");

    shutdown_tx.shutdown();
    join_all(workers).await;

    let stored = repo.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(stored.locked_at, None);
    assert_eq!(stored.next_run_at, Some(due));
    assert_eq!(handler.call_count(), 0);
}

/// The command handler's stdout is stored when the definition asks for it
#[tokio::test]
async fn test_command_job_saves_result() {
    let db = TestDb::new();
    let scheduler = scheduler(&db, "shell-runner").await;
    scheduler
        .define(
            JobDefinition::new("shell").with_should_save_result(true),
            Arc::new(CommandHandler::new(vec!["PATH".to_string()])),
        )
        .await
        .unwrap();
    let mut succeeded = scheduler.subscribe_topic("success:shell");

    let job = scheduler
        .now("shell", json!({"command": "echo", "args": ["{\"ok\": true}"]}))
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let workers = scheduler.start(shutdown_rx).await;

    timeout(WAIT, succeeded.recv())
        .await
        .expect("command succeeds in time")
        .expect("event bus open");
    shutdown_tx.shutdown();
    join_all(workers).await;

    let repo = db.repository().await;
    let stored = repo.find_by_id(job.id().unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.result, Some(json!({"ok": true})));
    assert_eq!(stored.fail_count, 0);
}
