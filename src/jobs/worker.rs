//! Worker loop: notifications in, claimed and executed queue entries out.
//!
//! Three activities share one bounded channel:
//! - the notification source (a `LISTEN` connection) feeds it,
//! - the dispatcher takes one payload per free concurrency slot,
//! - shutdown stops intake and drains in-flight runs within a deadline.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::json;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{ConfigError, WorkerConfig};
use crate::jobs::backend::{QueueBackend, TaskLogSink};
use crate::jobs::context::TaskContext;
use crate::jobs::error::JobError;
use crate::jobs::registry::TaskRegistry;
use crate::jobs::time_before;
use crate::models::{QueueEntry, QueueState};
use crate::pubsub::{NotificationSource, QueueNotification};
use crate::repositories::ClaimOutcome;

/// Runtime form of `[worker]` with durations parsed.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub max_concurrent_tasks: usize,
    pub shutdown_deadline: Duration,
    pub backfill: bool,
    pub stale_threshold: Duration,
    pub backfill_page_size: i64,
    pub channel_capacity: usize,
}

impl WorkerOptions {
    pub fn from_config(config: &WorkerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            max_concurrent_tasks: config.max_concurrent_tasks,
            shutdown_deadline: config.shutdown_deadline()?,
            backfill: config.backfill,
            stale_threshold: config.stale_threshold()?,
            backfill_page_size: config.backfill_page_size,
            channel_capacity: config.channel_capacity,
        })
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 1,
            shutdown_deadline: Duration::from_secs(30),
            backfill: true,
            stale_threshold: Duration::from_secs(60),
            backfill_page_size: 500,
            channel_capacity: 64,
        }
    }
}

/// What happened to one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Claimed and the handler succeeded.
    Completed,
    /// Claimed, then the handler failed or no handler was registered.
    Stopped,
    /// Another worker has it, or the entry no longer exists.
    Skipped,
    /// A store call failed; the entry is left for a later notification.
    Errored,
    /// The handler gave up on shutdown; the entry stays `running`.
    Interrupted,
}

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Drained,
    /// Runs were still in flight at the deadline and were abandoned.
    DeadlineExceeded,
}

pub struct Worker {
    queue: Arc<dyn QueueBackend>,
    logs: Arc<dyn TaskLogSink>,
    registry: Arc<TaskRegistry>,
    options: WorkerOptions,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn QueueBackend>,
        logs: Arc<dyn TaskLogSink>,
        registry: Arc<TaskRegistry>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            queue,
            logs,
            registry,
            options,
        }
    }

    /// Runs until `cancel` fires, then drains within `shutdown_deadline`.
    ///
    /// The backfill scan finishes before the source starts, so entries that
    /// lost their notification while no worker was running come first.
    pub async fn run(self, source: Box<dyn NotificationSource>, cancel: CancellationToken) -> Shutdown {
        let worker = Arc::new(self);
        let (tx, rx) = mpsc::channel(worker.options.channel_capacity.max(1));

        let dispatcher = tokio::spawn(Arc::clone(&worker).dispatch_loop(rx, cancel.clone()));

        if worker.options.backfill {
            match worker.backfill(&tx, &cancel).await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "Backfilled stale queue entries"),
                Err(e) => tracing::warn!(error = %e, "Backfill scan failed"),
            }
        }

        let listener = tokio::spawn(source.run(tx, cancel.child_token()));
        tracing::info!(
            max_concurrent_tasks = worker.options.max_concurrent_tasks,
            "Worker loop started"
        );

        cancel.cancelled().await;
        tracing::info!("Worker loop stopping");

        if let Err(e) = listener.await {
            tracing::warn!(error = %e, "Notification listener ended abnormally");
        }
        let mut in_flight = match dispatcher.await {
            Ok(in_flight) => in_flight,
            Err(e) => {
                tracing::error!(error = %e, "Dispatcher ended abnormally");
                return Shutdown::DeadlineExceeded;
            }
        };

        let pending = in_flight.len();
        if pending > 0 {
            tracing::info!(pending, "Draining in-flight task runs");
        }
        let drained = tokio::time::timeout(worker.options.shutdown_deadline, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;

        match drained {
            Ok(()) => {
                tracing::info!("Worker loop stopped");
                Shutdown::Drained
            }
            Err(_) => {
                tracing::error!(
                    abandoned = in_flight.len(),
                    deadline = ?worker.options.shutdown_deadline,
                    "Shutdown deadline exceeded, abandoning running tasks"
                );
                in_flight.abort_all();
                Shutdown::DeadlineExceeded
            }
        }
    }

    /// Takes one payload per free slot; returns the runs still in flight.
    async fn dispatch_loop(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<QueueNotification>,
        cancel: CancellationToken,
    ) -> JoinSet<Dispatch> {
        let slots = Arc::new(Semaphore::new(self.options.max_concurrent_tasks.max(1)));
        let mut in_flight = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let notification = tokio::select! {
                _ = cancel.cancelled() => break,
                notification = rx.recv() => match notification {
                    Some(notification) => notification,
                    None => break,
                },
            };

            let worker = Arc::clone(&self);
            let run_cancel = cancel.child_token();
            in_flight.spawn(async move {
                let _permit = permit;
                worker.process(notification, run_cancel).await
            });

            while let Some(finished) = in_flight.try_join_next() {
                if let Err(e) = finished {
                    tracing::error!(error = %e, "Task run aborted");
                }
            }
        }

        in_flight
    }

    /// Claim, execute and finalize the entry named by one notification.
    pub async fn process(&self, notification: QueueNotification, cancel: CancellationToken) -> Dispatch {
        let id = notification.id;
        let entry = match self.queue.claim(id).await {
            Ok(ClaimOutcome::Claimed(entry)) => entry,
            Ok(ClaimOutcome::AlreadyClaimed) => {
                tracing::info!(entry_id = %id, "Entry already claimed");
                return Dispatch::Skipped;
            }
            Ok(ClaimOutcome::NotFound) => {
                tracing::info!(entry_id = %id, "Entry not found");
                return Dispatch::Skipped;
            }
            Err(e) => {
                tracing::warn!(entry_id = %id, error = %e, "Claim failed");
                return Dispatch::Errored;
            }
        };
        if entry.name != notification.queue {
            tracing::debug!(entry_id = %id, queue = %notification.queue, task = %entry.name, "Notification queue differs from entry");
        }

        let handler = match self.registry.get(&entry.name) {
            Ok(handler) => handler,
            Err(e) => {
                tracing::error!(entry_id = %id, task = %entry.name, "No handler registered");
                return self.finalize(&entry, Err(JobError::from(e))).await;
            }
        };

        let shutdown = cancel.clone();
        let ctx = TaskContext::new(&entry, cancel, Arc::clone(&self.logs));
        let span = ctx.span().clone();
        let result = AssertUnwindSafe(handler.run(ctx).instrument(span))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(JobError::failed("task panicked")));

        if matches!(result, Err(JobError::Cancelled)) && shutdown.is_cancelled() {
            tracing::warn!(entry_id = %id, task = %entry.name, "Task run interrupted by shutdown, leaving entry running");
            return Dispatch::Interrupted;
        }

        self.finalize(&entry, result).await
    }

    async fn finalize(&self, entry: &QueueEntry, result: Result<(), JobError>) -> Dispatch {
        let (state, outcome) = match result {
            Ok(()) => (QueueState::Complete, Dispatch::Completed),
            Err(e) => {
                tracing::error!(entry_id = %entry.id, task = %entry.name, error = %e, "Task run failed");
                if let Err(log_err) = self
                    .logs
                    .append_log(entry.id, json!({ "error": e.to_string() }))
                    .await
                {
                    tracing::warn!(entry_id = %entry.id, error = %log_err, "Failed to record task error");
                }
                (QueueState::Stopped, Dispatch::Stopped)
            }
        };

        match self.queue.finish(entry.id, state).await {
            Ok(_) => {
                tracing::info!(entry_id = %entry.id, task = %entry.name, %state, "Task run finished");
                outcome
            }
            Err(e) => {
                tracing::error!(entry_id = %entry.id, %state, error = %e, "Failed to finalize entry");
                Dispatch::Errored
            }
        }
    }

    /// Pages through waiting entries older than `stale_threshold` and feeds
    /// them to the dispatcher. Each page is its own short query.
    async fn backfill(
        &self,
        tx: &mpsc::Sender<QueueNotification>,
        cancel: &CancellationToken,
    ) -> Result<usize, JobError> {
        let cutoff = time_before(jiff::Timestamp::now(), self.options.stale_threshold);
        let page_size = self.options.backfill_page_size.max(1);
        let mut after = None;
        let mut sent = 0;

        loop {
            let page = self.queue.list_stale(cutoff, after, page_size).await?;
            let full = page.len() as i64 == page_size;
            after = page.last().map(|entry| entry.id);

            for entry in page {
                let notification = QueueNotification::new(entry.id, entry.name);
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(sent),
                    delivered = tx.send(notification) => {
                        if delivered.is_err() {
                            return Ok(sent);
                        }
                    }
                }
                sent += 1;
            }

            if !full {
                return Ok(sent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::error::JobResult;
    use crate::jobs::memory::MemoryBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sends a fixed list of notifications, then idles until cancelled.
    struct VecSource(Vec<QueueNotification>);

    #[async_trait]
    impl NotificationSource for VecSource {
        async fn run(self: Box<Self>, sink: mpsc::Sender<QueueNotification>, cancel: CancellationToken) {
            for notification in self.0 {
                if sink.send(notification).await.is_err() {
                    return;
                }
            }
            cancel.cancelled().await;
        }
    }

    fn worker(backend: &Arc<MemoryBackend>, registry: TaskRegistry, options: WorkerOptions) -> Worker {
        Worker::new(backend.clone(), backend.clone(), Arc::new(registry), options)
    }

    fn notify(entry: &QueueEntry) -> QueueNotification {
        QueueNotification::new(entry.id, entry.name.clone())
    }

    async fn say_hi(ctx: TaskContext) -> JobResult<()> {
        ctx.log("hi").await
    }

    async fn explode(_ctx: TaskContext) -> JobResult<()> {
        Err(JobError::failed("disk full"))
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_happy_path_completes_and_logs() {
        let backend = Arc::new(MemoryBackend::new());
        let registry = TaskRegistry::new();
        registry.add("hello", say_hi);
        let entry = backend.seed_waiting("hello");

        let outcome = worker(&backend, registry, WorkerOptions::default())
            .process(notify(&entry), CancellationToken::new())
            .await;

        assert_eq!(outcome, Dispatch::Completed);
        assert_eq!(backend.entry(entry.id).unwrap().state, QueueState::Complete);
        assert_eq!(backend.logs_for(entry.id), vec![json!({ "message": "hi" })]);
    }

    #[tokio::test]
    async fn test_duplicate_claim_race_runs_once() {
        let backend = Arc::new(MemoryBackend::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = TaskRegistry::new();
        let counter = Arc::clone(&runs);
        registry.add("hello", move |ctx: TaskContext| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ctx.log("hi").await
            }
        });
        let worker = Arc::new(worker(&backend, registry, WorkerOptions::default()));
        let entry = backend.seed_waiting("hello");

        let mut racers = JoinSet::new();
        for _ in 0..10 {
            let worker = Arc::clone(&worker);
            let notification = notify(&entry);
            racers.spawn(async move { worker.process(notification, CancellationToken::new()).await });
        }
        let outcomes: Vec<Dispatch> = racers.join_all().await;

        assert_eq!(outcomes.iter().filter(|o| **o == Dispatch::Completed).count(), 1);
        assert_eq!(outcomes.iter().filter(|o| **o == Dispatch::Skipped).count(), 9);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(backend.count_in(QueueState::Complete), 1);
        assert_eq!(backend.logs_for(entry.id).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_task_is_stopped() {
        let backend = Arc::new(MemoryBackend::new());
        let entry = backend.seed_waiting("ghost");

        let outcome = worker(&backend, TaskRegistry::new(), WorkerOptions::default())
            .process(notify(&entry), CancellationToken::new())
            .await;

        assert_eq!(outcome, Dispatch::Stopped);
        assert_eq!(backend.entry(entry.id).unwrap().state, QueueState::Stopped);
        let logs = backend.logs_for(entry.id);
        assert_eq!(logs.len(), 1);
        assert!(logs[0]["error"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_handler_failure_is_stopped_with_error_log() {
        let backend = Arc::new(MemoryBackend::new());
        let registry = TaskRegistry::new();
        registry.add("flaky", explode);
        let entry = backend.seed_waiting("flaky");

        let outcome = worker(&backend, registry, WorkerOptions::default())
            .process(notify(&entry), CancellationToken::new())
            .await;

        assert_eq!(outcome, Dispatch::Stopped);
        assert_eq!(backend.entry(entry.id).unwrap().state, QueueState::Stopped);
        assert_eq!(
            backend.logs_for(entry.id),
            vec![json!({ "error": "Task failed: disk full" })]
        );
        // Failures are not re-enqueued.
        assert_eq!(backend.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_handler_panic_is_stopped() {
        let backend = Arc::new(MemoryBackend::new());
        let registry = TaskRegistry::new();
        registry.add("panics", |_ctx: TaskContext| async move {
            if true {
                panic!("handler bug");
            }
            Ok::<(), JobError>(())
        });
        let entry = backend.seed_waiting("panics");

        let outcome = worker(&backend, registry, WorkerOptions::default())
            .process(notify(&entry), CancellationToken::new())
            .await;

        assert_eq!(outcome, Dispatch::Stopped);
        assert_eq!(backend.entry(entry.id).unwrap().state, QueueState::Stopped);
    }

    #[tokio::test]
    async fn test_unknown_entry_is_skipped() {
        let backend = Arc::new(MemoryBackend::new());
        let outcome = worker(&backend, TaskRegistry::new(), WorkerOptions::default())
            .process(
                QueueNotification::new(uuid::Uuid::new_v4(), "hello"),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(outcome, Dispatch::Skipped);
        assert!(backend.entries().is_empty());
    }

    #[tokio::test]
    async fn test_run_dispatches_notifications_and_backfill() {
        let backend = Arc::new(MemoryBackend::new());
        let registry = TaskRegistry::new();
        registry.add("hello", say_hi);

        let stale = backend.seed(
            "hello",
            QueueState::Waiting,
            jiff::Timestamp::now() - jiff::SignedDuration::from_secs(600),
        );
        let fresh = backend.seed_waiting("hello");

        let options = WorkerOptions {
            max_concurrent_tasks: 2,
            backfill_page_size: 1,
            ..WorkerOptions::default()
        };
        let cancel = CancellationToken::new();
        let source = Box::new(VecSource(vec![notify(&fresh)]));
        let handle = tokio::spawn(worker(&backend, registry, options).run(source, cancel.clone()));

        wait_until(|| backend.count_in(QueueState::Complete) == 2).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), Shutdown::Drained);
        assert_eq!(backend.entry(stale.id).unwrap().state, QueueState::Complete);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_cooperative_handler() {
        let backend = Arc::new(MemoryBackend::new());
        let registry = TaskRegistry::new();
        registry.add("sleepy", |ctx: TaskContext| async move {
            tokio::select! {
                _ = ctx.cancellation().cancelled() => Err(JobError::Cancelled),
                _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(()),
            }
        });
        let entry = backend.seed_waiting("sleepy");

        let cancel = CancellationToken::new();
        let source = Box::new(VecSource(vec![notify(&entry)]));
        let handle = tokio::spawn(
            worker(&backend, registry, WorkerOptions::default()).run(source, cancel.clone()),
        );

        wait_until(|| backend.count_in(QueueState::Running) == 1).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), Shutdown::Drained);
        // Interrupted runs are neither complete nor stopped.
        assert_eq!(backend.entry(entry.id).unwrap().state, QueueState::Running);
        assert!(backend.logs_for(entry.id).is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_lets_finishing_handler_complete() {
        let backend = Arc::new(MemoryBackend::new());
        let registry = TaskRegistry::new();
        registry.add("wrap_up", |ctx: TaskContext| async move {
            ctx.cancellation().cancelled().await;
            Ok::<(), JobError>(())
        });
        let entry = backend.seed_waiting("wrap_up");

        let cancel = CancellationToken::new();
        let source = Box::new(VecSource(vec![notify(&entry)]));
        let handle = tokio::spawn(
            worker(&backend, registry, WorkerOptions::default()).run(source, cancel.clone()),
        );

        wait_until(|| backend.count_in(QueueState::Running) == 1).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), Shutdown::Drained);
        assert_eq!(backend.entry(entry.id).unwrap().state, QueueState::Complete);
    }

    #[tokio::test]
    async fn test_cancelled_error_without_shutdown_stops_entry() {
        let backend = Arc::new(MemoryBackend::new());
        let registry = TaskRegistry::new();
        registry.add("quitter", |_ctx: TaskContext| async move { Err::<(), JobError>(JobError::Cancelled) });
        let entry = backend.seed_waiting("quitter");

        let dispatch = worker(&backend, registry, WorkerOptions::default())
            .process(notify(&entry), CancellationToken::new())
            .await;
        assert_eq!(dispatch, Dispatch::Stopped);
        assert_eq!(backend.entry(entry.id).unwrap().state, QueueState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_deadline_abandons_stuck_handler() {
        let backend = Arc::new(MemoryBackend::new());
        let registry = TaskRegistry::new();
        registry.add("stuck", |_ctx: TaskContext| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), JobError>(())
        });
        let entry = backend.seed_waiting("stuck");

        let options = WorkerOptions {
            shutdown_deadline: Duration::from_millis(100),
            ..WorkerOptions::default()
        };
        let cancel = CancellationToken::new();
        let source = Box::new(VecSource(vec![notify(&entry)]));
        let handle = tokio::spawn(worker(&backend, registry, options).run(source, cancel.clone()));

        wait_until(|| backend.count_in(QueueState::Running) == 1).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), Shutdown::DeadlineExceeded);
        // Abandoned runs stay `running`; nothing is half-written.
        assert_eq!(backend.entry(entry.id).unwrap().state, QueueState::Running);
    }
}
