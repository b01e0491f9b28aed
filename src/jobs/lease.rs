//! Leader election over the scheduler lease row.
//!
//! A probe task calls `acquire` every `probe_interval` and feeds the result
//! to a single state machine over a one-slot channel. The state machine owns
//! the instance's [`LeaseState`] and drives a [`LeadershipHook`] (the cron
//! emitter) on every change.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::jobs::backend::LeaseBackend;
use crate::jobs::error::JobResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Follower,
    /// Lease won; the hook is starting.
    Candidate,
    Leader,
}

/// Work bound to leadership.
#[async_trait]
pub trait LeadershipHook: Send + Sync + 'static {
    /// Called on Candidate. An error gives the lease back.
    async fn on_elected(&self) -> JobResult<()>;

    /// Called when leaving Leader, including on shutdown.
    async fn on_demoted(&self);
}

pub struct LeaderElection {
    instance_id: Uuid,
    backend: Arc<dyn LeaseBackend>,
    hook: Arc<dyn LeadershipHook>,
    probe_interval: Duration,
    state_tx: watch::Sender<LeaseState>,
}

impl LeaderElection {
    pub fn new(
        instance_id: Uuid,
        backend: Arc<dyn LeaseBackend>,
        hook: Arc<dyn LeadershipHook>,
        probe_interval: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(LeaseState::Follower);
        Self {
            instance_id,
            backend,
            hook,
            probe_interval,
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LeaseState> {
        self.state_tx.subscribe()
    }

    /// Runs until `cancel` fires, then demotes and releases the lease.
    pub async fn run(self, cancel: CancellationToken) {
        let (probe_tx, mut probe_rx) = mpsc::channel(1);
        let probe = tokio::spawn(probe_loop(
            Arc::clone(&self.backend),
            self.instance_id,
            self.probe_interval,
            probe_tx,
            cancel.child_token(),
        ));

        tracing::info!(instance_id = %self.instance_id, "Leader election started");
        loop {
            let acquired = tokio::select! {
                _ = cancel.cancelled() => break,
                acquired = probe_rx.recv() => match acquired {
                    Some(acquired) => acquired,
                    None => break,
                },
            };
            self.step(acquired).await;
        }

        if self.state() == LeaseState::Leader {
            self.demote("shutdown").await;
        }
        self.set_state(LeaseState::Follower);

        // A probe in flight may still win the lease; release after it stops.
        if let Err(e) = probe.await {
            tracing::warn!(error = %e, "Lease probe task ended abnormally");
        }
        match self.backend.release(self.instance_id).await {
            Ok(true) => tracing::info!(instance_id = %self.instance_id, "Lease released"),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(instance_id = %self.instance_id, error = %e, "Lease release failed, it will expire")
            }
        }
    }

    fn state(&self) -> LeaseState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: LeaseState) {
        self.state_tx.send_replace(state);
    }

    /// Applies one probe result.
    async fn step(&self, acquired: bool) {
        match (self.state(), acquired) {
            (LeaseState::Follower, true) | (LeaseState::Candidate, true) => self.elect().await,
            (LeaseState::Leader, true) => match self.backend.maintain(self.instance_id).await {
                Ok(true) => {}
                Ok(false) => self.demote("lease taken over").await,
                Err(e) => {
                    tracing::warn!(instance_id = %self.instance_id, error = %e, "Lease heartbeat failed");
                    self.demote("heartbeat failed").await;
                }
            },
            (LeaseState::Leader, false) => self.demote("lease lost").await,
            (_, false) => self.set_state(LeaseState::Follower),
        }
    }

    async fn elect(&self) {
        self.set_state(LeaseState::Candidate);
        match self.hook.on_elected().await {
            Ok(()) => {
                self.set_state(LeaseState::Leader);
                tracing::info!(instance_id = %self.instance_id, "Became scheduler leader");
            }
            Err(e) => {
                tracing::error!(instance_id = %self.instance_id, error = %e, "Leader startup failed, giving up lease");
                if let Err(e) = self.backend.release(self.instance_id).await {
                    tracing::warn!(error = %e, "Lease release failed");
                }
                self.set_state(LeaseState::Follower);
            }
        }
    }

    async fn demote(&self, reason: &str) {
        self.hook.on_demoted().await;
        self.set_state(LeaseState::Follower);
        tracing::info!(instance_id = %self.instance_id, reason, "Stepped down as scheduler leader");
    }
}

/// Probes the lease every `interval`. Errors count as a lost round.
async fn probe_loop(
    backend: Arc<dyn LeaseBackend>,
    instance_id: Uuid,
    interval: Duration,
    results: mpsc::Sender<bool>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let acquired = match backend.acquire(instance_id).await {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::warn!(%instance_id, error = %e, "Lease probe failed");
                false
            }
        };
        tracing::trace!(%instance_id, acquired, "Lease probe");

        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = results.send(acquired) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}
