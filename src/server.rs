//! Process supervisor for `cronwell serve`.
//!
//! Wires the store, the task registry, the worker loop and (unless disabled)
//! leader election with the cron emitter, then waits for SIGINT or SIGTERM.
//! Every activity shares one cancellation token.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{Environment, Settings};
use crate::db::{establish_async_connection_pool, run_pending_migrations};
use crate::jobs::tasks::{ensure_builtin_definitions, register_builtin};
use crate::jobs::{
    CronEmitter, LeaderElection, QueueBackend, Shutdown, TaskRegistry, Worker, WorkerOptions,
};
use crate::pubsub::PgListener;
use crate::repositories::Repositories;

/// Time allowed, after the worker drained, for the emitter to stop and the
/// lease to be released.
const LEADER_STOP_GRACE: Duration = Duration::from_secs(5);

pub struct Server {
    settings: Settings,
    registry: Arc<TaskRegistry>,
}

impl Server {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            registry: Arc::new(TaskRegistry::new()),
        }
    }

    /// Registry served by this process. Applications embedding cronwell add
    /// their handlers here before calling [`Server::run`].
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Runs until a shutdown signal.
    ///
    /// # Errors
    /// - Startup failures (database unreachable, migrations, bad settings)
    /// - In-flight runs still executing at `worker.shutdown_deadline`
    pub async fn run(self) -> anyhow::Result<()> {
        let settings = &self.settings;
        tracing::info!(
            app_name = %settings.application.name,
            app_version = %settings.application.version,
            environment = %Environment::from_env().as_str(),
            "Application starting"
        );
        tracing::info!(
            max_open_conns = settings.db.max_open_conns,
            max_idle_conns = settings.db.max_idle_conns,
            timeout = %settings.db.timeout,
            "Database configuration loaded"
        );
        tracing::info!(
            enabled = settings.scheduler.enabled,
            probe_interval = %settings.scheduler.probe_interval,
            lease_ttl = %settings.scheduler.lease_ttl,
            "Scheduler configuration loaded"
        );

        let query_timeout = settings.db.timeout()?;
        let connect_timeout = settings.db.connect_timeout()?;
        let lease_ttl = settings.scheduler.lease_ttl()?;
        let probe_interval = settings.scheduler.probe_interval()?;
        let sync_interval = settings.scheduler.sync_interval()?;
        let worker_options = WorkerOptions::from_config(&settings.worker)?;
        let shutdown_deadline = worker_options.shutdown_deadline;

        if settings.db.auto_migrate {
            let applied = run_pending_migrations(&settings.db.dsn)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!(count = applied.len(), "Applied pending migrations");
        }

        tracing::info!("Initializing database connection pool...");
        let pool = establish_async_connection_pool(&settings.db)
            .await
            .context("Failed to initialize database connection pool")?;
        let repos = Repositories::new(pool, query_timeout, lease_ttl);
        tracing::info!("Database connection pool initialized");

        let queue: Arc<dyn QueueBackend> = Arc::new(repos.queue.clone());
        register_builtin(&self.registry, Arc::clone(&queue), &settings.maintenance)?;
        ensure_builtin_definitions(&repos.tasks, &settings.maintenance)
            .await
            .context("Failed to register built-in task definitions")?;
        tracing::info!(tasks = ?self.registry.names(), "Task registry ready");

        let cancel = CancellationToken::new();
        let instance_id = Uuid::new_v4();

        let worker = Worker::new(
            Arc::clone(&queue),
            Arc::new(repos.logs.clone()),
            Arc::clone(&self.registry),
            worker_options,
        );
        let listener = PgListener::new(settings.db.dsn.clone(), connect_timeout);
        let mut worker_handle = tokio::spawn(worker.run(Box::new(listener), cancel.clone()));

        let election_handle = if settings.scheduler.enabled {
            let emitter = Arc::new(CronEmitter::new(
                Arc::clone(&queue),
                Arc::new(repos.tasks.clone()),
                Arc::clone(&self.registry),
                sync_interval,
            ));
            let election = LeaderElection::new(
                instance_id,
                Arc::new(repos.lease.clone()),
                emitter,
                probe_interval,
            );
            Some(tokio::spawn(election.run(cancel.clone())))
        } else {
            tracing::info!("Scheduler disabled, running as worker only");
            None
        };
        tracing::info!(%instance_id, "Instance started");

        let exited_early = tokio::select! {
            received = shutdown_signal() => {
                match received {
                    Ok(name) => tracing::info!(signal = name, "Received shutdown signal, initiating graceful shutdown"),
                    Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signals, shutting down"),
                }
                None
            }
            finished = &mut worker_handle => {
                tracing::error!("Worker loop exited unexpectedly");
                Some(finished)
            }
        };

        cancel.cancel();
        let worker_result = match exited_early {
            Some(finished) => finished,
            None => worker_handle.await,
        };

        if let Some(handle) = election_handle {
            if tokio::time::timeout(LEADER_STOP_GRACE, handle).await.is_err() {
                tracing::warn!("Leader election did not stop in time");
            }
        }

        match worker_result {
            Ok(Shutdown::Drained) => {
                tracing::info!("Shutdown complete");
                Ok(())
            }
            Ok(Shutdown::DeadlineExceeded) => Err(anyhow::anyhow!(
                "shutdown exceeded the {:?} deadline",
                shutdown_deadline
            )),
            Err(e) => Err(anyhow::Error::from(e).context("Worker loop failed")),
        }
    }
}

/// Waits for Ctrl+C or SIGTERM and returns the signal's name.
async fn shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            ctrl_c = signal::ctrl_c() => ctrl_c.map(|_| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map(|_| "SIGINT")
    }
}
