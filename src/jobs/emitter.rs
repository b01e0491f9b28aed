//! Cron emitter: turns task definitions into queue entries while this
//! instance is the scheduler leader.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::jobs::backend::{DefinitionSource, QueueBackend};
use crate::jobs::cron::CronSchedule;
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::lease::LeadershipHook;
use crate::jobs::registry::TaskRegistry;
use crate::models::{NewQueueEntry, QueueEntry};
use crate::pubsub::QueueNotification;

struct Shared {
    queue: Arc<dyn QueueBackend>,
    definitions: Arc<dyn DefinitionSource>,
    registry: Arc<TaskRegistry>,
    sync_interval: Duration,
}

impl Shared {
    /// One firing: insert a waiting entry, then publish it.
    async fn fire(&self, name: &str) -> Option<QueueEntry> {
        let now = jiff::Timestamp::now();
        let run_at = jiff::Timestamp::from_second(now.as_second()).unwrap_or(now);

        let entry = match self.queue.enqueue(NewQueueEntry::new(name, run_at)).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!(task = name, error = %e, "Failed to enqueue scheduled run");
                return None;
            }
        };

        let notification = QueueNotification::new(entry.id, entry.name.clone());
        if let Err(e) = self.queue.publish(&notification).await {
            tracing::warn!(task = name, entry_id = %entry.id, error = %e, "Failed to publish queue notification");
        }
        tracing::debug!(task = name, entry_id = %entry.id, %run_at, "Scheduled run enqueued");
        Some(entry)
    }
}

struct ScheduledJob {
    job_id: Uuid,
    schedule: CronSchedule,
}

/// Jobs registered with one scheduler instance, keyed by task name.
struct CronJobs {
    scheduler: JobScheduler,
    jobs: HashMap<String, ScheduledJob>,
}

impl CronJobs {
    async fn add(&mut self, shared: &Arc<Shared>, name: &str, schedule: CronSchedule) -> JobResult<()> {
        if let Some(existing) = self.jobs.get(name) {
            if existing.schedule == schedule {
                return Ok(());
            }
        }

        let job_id = self
            .schedule_job(shared, name, &schedule.scheduler_expr())
            .await?;

        let previous = self
            .jobs
            .insert(name.to_string(), ScheduledJob { job_id, schedule });
        if let Some(previous) = previous {
            self.scheduler.remove(&previous.job_id).await?;
        }
        tracing::info!(task = name, cron = %self.jobs[name].schedule, "Cron job scheduled");
        Ok(())
    }

    /// Registers a job firing `name` on a six-field scheduler expression.
    async fn schedule_job(&self, shared: &Arc<Shared>, name: &str, scheduler_expr: &str) -> JobResult<Uuid> {
        let job_shared = Arc::clone(shared);
        let job_name = name.to_string();
        let job = Job::new_async(scheduler_expr, move |_uuid, _scheduler| {
            let shared = Arc::clone(&job_shared);
            let name = job_name.clone();
            Box::pin(async move {
                shared.fire(&name).await;
            })
        })?;
        Ok(self.scheduler.add(job).await?)
    }

    async fn remove(&mut self, name: &str) -> JobResult<bool> {
        match self.jobs.remove(name) {
            Some(job) => {
                self.scheduler.remove(&job.job_id).await?;
                tracing::info!(task = name, "Cron job removed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reconciles scheduled jobs with the active definitions.
    async fn sync(&mut self, shared: &Arc<Shared>) -> JobResult<()> {
        let definitions = shared.definitions.active_definitions().await?;

        let mut desired = HashMap::new();
        for definition in definitions {
            if !shared.registry.contains(&definition.name) {
                tracing::warn!(task = %definition.name, "No handler registered, not scheduling");
                continue;
            }
            match definition.cron_expr.parse::<CronSchedule>() {
                Ok(schedule) => {
                    desired.insert(definition.name, schedule);
                }
                Err(e) => {
                    tracing::error!(task = %definition.name, error = %e, "Skipping definition");
                }
            }
        }

        let stale: Vec<String> = self
            .jobs
            .keys()
            .filter(|name| !desired.contains_key(*name))
            .cloned()
            .collect();
        for name in stale {
            self.remove(&name).await?;
        }
        for (name, schedule) in desired {
            self.add(shared, &name, schedule).await?;
        }
        Ok(())
    }
}

struct ActiveEmitter {
    scheduler: JobScheduler,
    jobs: Arc<Mutex<CronJobs>>,
    sync_cancel: CancellationToken,
    sync_task: JoinHandle<()>,
}

/// Runs a fresh `tokio-cron-scheduler` for each term of leadership.
///
/// Definitions are re-read every `sync_interval`, so added, changed and
/// removed definitions apply from the next tick. Missed ticks are never
/// back-filled.
pub struct CronEmitter {
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveEmitter>>,
}

impl CronEmitter {
    pub fn new(
        queue: Arc<dyn QueueBackend>,
        definitions: Arc<dyn DefinitionSource>,
        registry: Arc<TaskRegistry>,
        sync_interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                definitions,
                registry,
                sync_interval,
            }),
            active: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Schedules `name` on `cron_expr`, replacing its previous schedule.
    ///
    /// The expression is validated first, so a bad expression is reported
    /// even when the emitter is not running.
    pub async fn add_cron_job(&self, name: &str, cron_expr: &str) -> JobResult<()> {
        let schedule: CronSchedule = cron_expr.parse()?;
        let jobs = self.jobs().await?;
        let mut jobs = jobs.lock().await;
        jobs.add(&self.shared, name, schedule).await
    }

    pub async fn remove_cron_job(&self, name: &str) -> JobResult<bool> {
        let jobs = self.jobs().await?;
        let mut jobs = jobs.lock().await;
        jobs.remove(name).await
    }

    /// Re-reads definitions now instead of waiting for the next sync.
    pub async fn sync(&self) -> JobResult<()> {
        let jobs = self.jobs().await?;
        let mut jobs = jobs.lock().await;
        jobs.sync(&self.shared).await
    }

    /// `(task, cron)` pairs currently scheduled, sorted by task.
    pub async fn scheduled(&self) -> Vec<(String, String)> {
        let Ok(jobs) = self.jobs().await else {
            return Vec::new();
        };
        let jobs = jobs.lock().await;
        let mut scheduled: Vec<(String, String)> = jobs
            .jobs
            .iter()
            .map(|(name, job)| (name.clone(), job.schedule.to_string()))
            .collect();
        scheduled.sort();
        scheduled
    }

    /// Emits one run of `name` immediately, as a cron tick would.
    pub async fn fire(&self, name: &str) -> Option<QueueEntry> {
        self.shared.fire(name).await
    }

    async fn jobs(&self) -> JobResult<Arc<Mutex<CronJobs>>> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|active| Arc::clone(&active.jobs))
            .ok_or_else(|| JobError::Scheduler("cron emitter is not running".to_string()))
    }
}

#[async_trait]
impl LeadershipHook for CronEmitter {
    async fn on_elected(&self) -> JobResult<()> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Ok(());
        }

        let mut scheduler = JobScheduler::new().await?;
        let mut jobs = CronJobs {
            scheduler: scheduler.clone(),
            jobs: HashMap::new(),
        };
        let started = match jobs.sync(&self.shared).await {
            Ok(()) => scheduler.start().await.map_err(JobError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            if let Err(shutdown) = scheduler.shutdown().await {
                tracing::warn!(error = %shutdown, "Cron scheduler shutdown failed");
            }
            return Err(e);
        }

        let jobs = Arc::new(Mutex::new(jobs));
        let sync_cancel = CancellationToken::new();
        let sync_task = tokio::spawn(sync_loop(
            Arc::clone(&self.shared),
            Arc::clone(&jobs),
            sync_cancel.clone(),
        ));

        tracing::info!("Cron emitter started");
        *active = Some(ActiveEmitter {
            scheduler,
            jobs,
            sync_cancel,
            sync_task,
        });
        Ok(())
    }

    async fn on_demoted(&self) {
        let Some(mut active) = self.active.lock().await.take() else {
            return;
        };

        active.sync_cancel.cancel();
        if let Err(e) = active.sync_task.await {
            tracing::warn!(error = %e, "Definition sync task ended abnormally");
        }
        if let Err(e) = active.scheduler.shutdown().await {
            tracing::warn!(error = %e, "Cron scheduler shutdown failed");
        }
        tracing::info!("Cron emitter stopped");
    }
}

async fn sync_loop(shared: Arc<Shared>, jobs: Arc<Mutex<CronJobs>>, cancel: CancellationToken) {
    let start = tokio::time::Instant::now() + shared.sync_interval;
    let mut ticker = tokio::time::interval_at(start, shared.sync_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let mut jobs = jobs.lock().await;
        if let Err(e) = jobs.sync(&shared).await {
            tracing::warn!(error = %e, "Definition sync failed, keeping current schedule");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::context::TaskContext;
    use crate::jobs::memory::MemoryBackend;
    use crate::models::QueueState;
    use std::sync::atomic::Ordering;

    async fn noop(_ctx: TaskContext) -> JobResult<()> {
        Ok(())
    }

    fn emitter(backend: &Arc<MemoryBackend>, tasks: &[&str]) -> CronEmitter {
        let registry = Arc::new(TaskRegistry::new());
        for task in tasks {
            registry.add(*task, noop);
        }
        CronEmitter::new(backend.clone(), backend.clone(), registry, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_fire_inserts_then_publishes() {
        let backend = Arc::new(MemoryBackend::new());
        let emitter = emitter(&backend, &["hello"]);

        let entry = emitter.fire("hello").await.expect("entry inserted");
        assert_eq!(entry.name, "hello");
        assert_eq!(entry.state, QueueState::Waiting);
        assert_eq!(entry.run_at().subsec_nanosecond(), 0);
        assert_eq!(
            backend.published(),
            vec![QueueNotification::new(entry.id, "hello")]
        );
    }

    #[tokio::test]
    async fn test_failed_insert_does_not_publish() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_enqueue.store(true, Ordering::SeqCst);
        let emitter = emitter(&backend, &["hello"]);

        assert!(emitter.fire("hello").await.is_none());
        assert!(backend.published().is_empty());
        assert!(backend.entries().is_empty());
    }

    #[tokio::test]
    async fn test_election_schedules_registered_definitions() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_definitions(&[("hello", "* * * * *"), ("ghost", "* * * * *")]);
        let emitter = emitter(&backend, &["hello", "log_retention"]);

        emitter.on_elected().await.unwrap();
        assert!(emitter.is_running().await);
        assert_eq!(
            emitter.scheduled().await,
            vec![("hello".to_string(), "* * * * *".to_string())]
        );

        backend.set_definitions(&[("hello", "*/5 * * * *"), ("log_retention", "0 3 * * *")]);
        emitter.sync().await.unwrap();
        assert_eq!(
            emitter.scheduled().await,
            vec![
                ("hello".to_string(), "*/5 * * * *".to_string()),
                ("log_retention".to_string(), "0 3 * * *".to_string()),
            ]
        );

        backend.set_definitions(&[("log_retention", "0 3 * * *")]);
        emitter.sync().await.unwrap();
        assert_eq!(emitter.scheduled().await.len(), 1);

        emitter.on_demoted().await;
        assert!(!emitter.is_running().await);
        assert!(emitter.scheduled().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_started_scheduler_fires_into_queue() {
        let backend = Arc::new(MemoryBackend::new());
        let emitter = emitter(&backend, &["hello"]);
        let mut scheduler = JobScheduler::new().await.unwrap();
        let jobs = CronJobs {
            scheduler: scheduler.clone(),
            jobs: HashMap::new(),
        };

        jobs.schedule_job(&emitter.shared, "hello", "* * * * * *")
            .await
            .unwrap();
        scheduler.start().await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while backend.published().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        scheduler.shutdown().await.unwrap();

        let published = backend.published();
        assert!(!published.is_empty(), "scheduled job never fired");
        let entry = backend
            .entries()
            .into_iter()
            .find(|entry| entry.id == published[0].id)
            .expect("published entry was inserted");
        assert_eq!(entry.name, "hello");
        assert_eq!(entry.state, QueueState::Waiting);
        assert_eq!(published[0], QueueNotification::new(entry.id, "hello"));
    }

    #[tokio::test]
    async fn test_add_cron_job_validates_expression() {
        let backend = Arc::new(MemoryBackend::new());
        let emitter = emitter(&backend, &["hello"]);

        assert!(matches!(
            emitter.add_cron_job("hello", "61 * * * *").await,
            Err(JobError::InvalidCronExpression(_))
        ));
        assert!(matches!(
            emitter.add_cron_job("hello", "* * * * *").await,
            Err(JobError::Scheduler(_))
        ));

        emitter.on_elected().await.unwrap();
        emitter.add_cron_job("hello", "0 12 * * *").await.unwrap();
        assert!(matches!(
            emitter.add_cron_job("hello", "bad").await,
            Err(JobError::InvalidCronExpression(_))
        ));
        assert_eq!(
            emitter.scheduled().await,
            vec![("hello".to_string(), "0 12 * * *".to_string())]
        );
        assert!(emitter.remove_cron_job("hello").await.unwrap());
        assert!(!emitter.remove_cron_job("hello").await.unwrap());
        emitter.on_demoted().await;
    }
}
