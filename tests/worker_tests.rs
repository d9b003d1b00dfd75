//! Integration tests for workers and the dispatch pool.

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use taskrow::db::Database;
use taskrow::queue::{RunContext, RunnerRegistry, TaskRunner, Worker, WorkerPool};
use taskrow::types::{NewTask, Task, TaskState};

fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

struct AlwaysFails;

#[async_trait]
impl TaskRunner for AlwaysFails {
    async fn run(&self, ctx: &RunContext, _db: &Database, _task: &Task) -> Result<()> {
        bail!("attempt {} failed", ctx.attempt)
    }
}

struct Panics;

#[async_trait]
impl TaskRunner for Panics {
    async fn run(&self, _ctx: &RunContext, _db: &Database, _task: &Task) -> Result<()> {
        panic!("runner exploded")
    }
}

/// Counts invocations.
#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
}

#[async_trait]
impl TaskRunner for Counting {
    async fn run(&self, _ctx: &RunContext, _db: &Database, _task: &Task) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Writes a child task through the store handle it was given.
struct Spawner;

#[async_trait]
impl TaskRunner for Spawner {
    async fn run(&self, _ctx: &RunContext, db: &Database, task: &Task) -> Result<()> {
        db.insert_task(&NewTask::new(format!("{}-child", task.name), "log"))?;
        Ok(())
    }
}

/// Blocks until the test releases a permit.
struct Gated {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl TaskRunner for Gated {
    async fn run(&self, _ctx: &RunContext, _db: &Database, _task: &Task) -> Result<()> {
        self.gate.acquire().await?.forget();
        Ok(())
    }
}

fn worker(db: &Database, registry: RunnerRegistry) -> Worker {
    Worker::new(0, db.clone(), Arc::new(registry))
}

mod worker_tests {
    use super::*;

    #[tokio::test]
    async fn always_failing_runner_exhausts_budget() {
        let db = setup_db();
        let task = db
            .insert_task(&NewTask::new("doomed", "fail").with_max_retries(3))
            .unwrap();
        let worker = worker(&db, RunnerRegistry::new().register("fail", AlwaysFails));

        let mut states = Vec::new();
        for _ in 0..3 {
            let resolution = worker.process(task.id).await.unwrap().unwrap();
            states.push(resolution.state);
        }
        assert_eq!(
            states,
            vec![TaskState::Pending, TaskState::Pending, TaskState::Failed]
        );

        let stored = db.get_task(task.id).unwrap().unwrap();
        assert_eq!(stored.num_retries, 3);
        assert_eq!(stored.task_result.as_deref(), Some("attempt 3 failed"));

        // Terminal: a further attempt loses the claim and runs nothing.
        assert!(worker.process(task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_budget_success_runs_once_and_finishes() {
        let db = setup_db();
        let task = db.insert_task(&NewTask::new("once", "count")).unwrap();
        let counter = Arc::new(Counting::default());
        let worker = worker(
            &db,
            RunnerRegistry::new().register_arc("count", counter.clone()),
        );

        let resolution = worker.process(task.id).await.unwrap().unwrap();
        assert_eq!(resolution.state, TaskState::Finished);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);

        let stored = db.get_task(task.id).unwrap().unwrap();
        assert_eq!(stored.task_result.as_deref(), Some("success"));
        assert_eq!(stored.num_retries, 1);
    }

    #[tokio::test]
    async fn unknown_task_type_fails_the_attempt() {
        let db = setup_db();
        let task = db.insert_task(&NewTask::new("orphan", "nope")).unwrap();
        let worker = worker(&db, RunnerRegistry::with_builtins());

        let resolution = worker.process(task.id).await.unwrap().unwrap();
        assert_eq!(resolution.state, TaskState::Failed);

        let stored = db.get_task(task.id).unwrap().unwrap();
        assert_eq!(
            stored.task_result.as_deref(),
            Some("runner not found for task type 'nope'")
        );
    }

    #[tokio::test]
    async fn panicking_runner_is_a_failed_attempt() {
        let db = setup_db();
        let task = db
            .insert_task(&NewTask::new("fragile", "panic").with_max_retries(2))
            .unwrap();
        let worker = worker(&db, RunnerRegistry::new().register("panic", Panics));

        let resolution = worker.process(task.id).await.unwrap().unwrap();
        assert_eq!(resolution.state, TaskState::Pending);

        let stored = db.get_task(task.id).unwrap().unwrap();
        assert_eq!(
            stored.task_result.as_deref(),
            Some("runner panicked: runner exploded")
        );
    }

    #[tokio::test]
    async fn runner_can_write_through_the_store() {
        let db = setup_db();
        let task = db.insert_task(&NewTask::new("parent", "spawn")).unwrap();
        let worker = worker(&db, RunnerRegistry::new().register("spawn", Spawner));

        worker.process(task.id).await.unwrap().unwrap();

        let pending = db.list_tasks_by_state(TaskState::Pending, None).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "parent-child");
    }
}

mod pool_tests {
    use super::*;

    async fn wait_until_settled(db: &Database, expected_finished: i64) {
        for _ in 0..200 {
            let counts = db.task_counts().unwrap();
            if counts.finished == expected_finished && counts.running == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("tasks did not finish: {:?}", db.task_counts().unwrap());
    }

    #[tokio::test]
    async fn dispatch_runs_every_pending_task_once() {
        let db = setup_db();
        let counter = Arc::new(Counting::default());
        let registry = RunnerRegistry::new().register_arc("count", counter.clone());

        for i in 0..10 {
            db.insert_task(&NewTask::new(format!("job-{i}"), "count"))
                .unwrap();
        }

        let mut pool = WorkerPool::spawn(db.clone(), Arc::new(registry), 3);
        assert_eq!(pool.size(), 3);

        let dispatched = pool.dispatch_once().await.unwrap();
        assert_eq!(dispatched, 10);

        wait_until_settled(&db, 10).await;
        assert_eq!(counter.calls.load(Ordering::SeqCst), 10);

        // Nothing left to hand out.
        assert_eq!(pool.dispatch_once().await.unwrap(), 0);
        pool.stop().await;
    }

    #[tokio::test]
    async fn dispatch_skips_tasks_claimed_elsewhere() {
        let db = setup_db();
        let counter = Arc::new(Counting::default());
        let registry = RunnerRegistry::new().register_arc("count", counter.clone());

        let taken = db.insert_task(&NewTask::new("taken", "count")).unwrap();
        db.insert_task(&NewTask::new("free", "count")).unwrap();

        let mut pool = WorkerPool::spawn(db.clone(), Arc::new(registry), 2);
        // Another process got here first.
        db.claim_task(taken.id, 99).unwrap().unwrap();

        assert_eq!(pool.dispatch_once().await.unwrap(), 1);
        wait_for_finished(&db, 1).await;
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        pool.stop().await;
    }

    /// Wait until `finished` reaches `expected`, ignoring rows held elsewhere.
    async fn wait_for_finished(db: &Database, expected: i64) {
        for _ in 0..200 {
            if db.task_counts().unwrap().finished == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("tasks did not finish: {:?}", db.task_counts().unwrap());
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown() {
        let db = setup_db();
        db.insert_task(&NewTask::new("tick", "log")).unwrap();

        let pool = WorkerPool::spawn(db.clone(), Arc::new(RunnerRegistry::with_builtins()), 1);
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(pool.run(Duration::from_millis(20), rx));

        wait_until_settled(&db, 1).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("pool did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_interrupts_pass_waiting_for_idle_worker() {
        let db = setup_db();
        let gate = Arc::new(Semaphore::new(0));
        let registry = RunnerRegistry::new().register("gate", Gated { gate: gate.clone() });

        let first = db.insert_task(&NewTask::new("first", "gate")).unwrap();
        let second = db.insert_task(&NewTask::new("second", "gate")).unwrap();

        let pool = WorkerPool::spawn(db.clone(), Arc::new(registry), 1);
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(pool.run(Duration::from_millis(20), rx));

        // The only worker is busy, so the pass is parked on the second task.
        for _ in 0..200 {
            if db.task_counts().unwrap().running == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(db.task_counts().unwrap().running, 1);

        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.add_permits(1);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("pool did not stop")
            .unwrap();

        let first = db.get_task(first.id).unwrap().unwrap();
        assert_eq!(first.state, TaskState::Finished);
        let second = db.get_task(second.id).unwrap().unwrap();
        assert_eq!(second.state, TaskState::Pending);
        assert_eq!(second.num_retries, 0);
    }
}
