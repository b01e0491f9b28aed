//! In-memory store used by the scheduler protocol tests.
//!
//! Claims are a check-and-set under one mutex, standing in for
//! `FOR UPDATE SKIP LOCKED`: of any number of concurrent claims on a waiting
//! entry exactly one observes it `waiting`.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jiff_diesel::ToDiesel;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::jobs::backend::{DefinitionSource, LeaseBackend, QueueBackend, TaskLogSink};
use crate::models::{NewQueueEntry, QueueEntry, QueueState, TaskDefinition};
use crate::pubsub::QueueNotification;
use crate::repositories::{ClaimOutcome, PurgedPage};

fn injected(operation: &str) -> AppError {
    AppError::Database {
        operation: operation.to_string(),
        source: anyhow::anyhow!("injected failure"),
    }
}

pub struct MemoryBackend {
    entries: Mutex<BTreeMap<Uuid, QueueEntry>>,
    logs: Mutex<Vec<(Uuid, JsonValue)>>,
    published: Mutex<Vec<QueueNotification>>,
    definitions: Mutex<Vec<TaskDefinition>>,
    lease: Mutex<Option<(Uuid, Instant)>>,
    lease_ttl: Duration,
    pub fail_enqueue: AtomicBool,
    pub fail_acquire: AtomicBool,
    pub fail_maintain: AtomicBool,
    /// Purge call (1-based) that fails; 0 never fails
    pub fail_purge_on_call: AtomicUsize,
    purge_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_lease_ttl(Duration::from_secs(15))
    }

    pub fn with_lease_ttl(lease_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            logs: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            definitions: Mutex::new(Vec::new()),
            lease: Mutex::new(None),
            lease_ttl,
            fail_enqueue: AtomicBool::new(false),
            fail_acquire: AtomicBool::new(false),
            fail_maintain: AtomicBool::new(false),
            fail_purge_on_call: AtomicUsize::new(0),
            purge_calls: AtomicUsize::new(0),
        }
    }

    pub fn seed(&self, name: &str, state: QueueState, run_at: jiff::Timestamp) -> QueueEntry {
        let now = jiff::Timestamp::now();
        let entry = QueueEntry {
            id: Uuid::new_v4(),
            name: name.to_string(),
            state,
            run_at: run_at.to_diesel(),
            task_data: None,
            created_at: now.to_diesel(),
            updated_at: now.to_diesel(),
        };
        self.entries
            .lock()
            .unwrap()
            .insert(entry.id, entry.clone());
        entry
    }

    pub fn seed_waiting(&self, name: &str) -> QueueEntry {
        self.seed(name, QueueState::Waiting, jiff::Timestamp::now())
    }

    pub fn entry(&self, id: Uuid) -> Option<QueueEntry> {
        self.entries.lock().unwrap().get(&id).cloned()
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    pub fn count_in(&self, state: QueueState) -> usize {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|entry| entry.state == state)
            .count()
    }

    pub fn logs_for(&self, id: Uuid) -> Vec<JsonValue> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|(task_id, _)| *task_id == id)
            .map(|(_, log)| log.clone())
            .collect()
    }

    pub fn published(&self) -> Vec<QueueNotification> {
        self.published.lock().unwrap().clone()
    }

    pub fn set_definitions(&self, definitions: &[(&str, &str)]) {
        let now = jiff::Timestamp::now();
        *self.definitions.lock().unwrap() = definitions
            .iter()
            .map(|(name, cron_expr)| TaskDefinition {
                name: name.to_string(),
                cron_expr: cron_expr.to_string(),
                enabled: true,
                deleted: false,
                updated_at: now.to_diesel(),
            })
            .collect();
    }

    pub fn lease_holder(&self) -> Option<Uuid> {
        self.lease.lock().unwrap().map(|(holder, _)| holder)
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn enqueue(&self, entry: NewQueueEntry) -> AppResult<QueueEntry> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(injected("insert queue entry"));
        }

        let mut entries = self.entries.lock().unwrap();
        let id = entry.id.unwrap_or_else(Uuid::new_v4);
        if entries.contains_key(&id) {
            return Err(AppError::Duplicate {
                entity: "task_queue".to_string(),
                field: "id".to_string(),
                value: id.to_string(),
            });
        }

        let now = jiff::Timestamp::now();
        let stored = QueueEntry {
            id,
            name: entry.name,
            state: entry.state,
            run_at: entry.run_at,
            task_data: entry.task_data,
            created_at: now.to_diesel(),
            updated_at: now.to_diesel(),
        };
        entries.insert(id, stored.clone());
        Ok(stored)
    }

    async fn publish(&self, notification: &QueueNotification) -> AppResult<()> {
        self.published.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn claim(&self, id: Uuid) -> AppResult<ClaimOutcome> {
        let mut entries = self.entries.lock().unwrap();
        Ok(match entries.get_mut(&id) {
            Some(entry) if entry.state == QueueState::Waiting => {
                entry.state = QueueState::Running;
                entry.updated_at = jiff::Timestamp::now().to_diesel();
                ClaimOutcome::Claimed(entry.clone())
            }
            Some(_) => ClaimOutcome::AlreadyClaimed,
            None => ClaimOutcome::NotFound,
        })
    }

    async fn finish(&self, id: Uuid, state: QueueState) -> AppResult<QueueEntry> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("QueueEntry", "id", id))?;
        if !entry.state.can_transition_to(state) {
            return Err(AppError::BadRequest {
                message: format!("queue entry {} cannot move from {} to {}", id, entry.state, state),
            });
        }
        entry.state = state;
        entry.updated_at = jiff::Timestamp::now().to_diesel();
        Ok(entry.clone())
    }

    async fn list_stale(
        &self,
        cutoff: jiff::Timestamp,
        after: Option<Uuid>,
        limit: i64,
    ) -> AppResult<Vec<QueueEntry>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .values()
            .filter(|entry| entry.state == QueueState::Waiting && entry.run_at() <= cutoff)
            .filter(|entry| after.is_none_or(|after| entry.id > after))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn purge_completed(
        &self,
        cutoff: jiff::Timestamp,
        after: Option<Uuid>,
        limit: i64,
    ) -> AppResult<PurgedPage> {
        let call = self.purge_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_purge_on_call.load(Ordering::SeqCst) == call {
            return Err(injected("purge completed queue entries"));
        }

        let mut entries = self.entries.lock().unwrap();
        let batch: Vec<Uuid> = entries
            .values()
            .filter(|entry| entry.state == QueueState::Complete && entry.run_at() < cutoff)
            .filter(|entry| after.is_none_or(|after| entry.id > after))
            .take(limit as usize)
            .map(|entry| entry.id)
            .collect();
        for id in &batch {
            entries.remove(id);
        }
        Ok(PurgedPage {
            deleted: batch.len(),
            last_id: batch.last().copied(),
        })
    }
}

#[async_trait]
impl TaskLogSink for MemoryBackend {
    async fn append_log(&self, task_id: Uuid, log: JsonValue) -> AppResult<()> {
        let record = crate::models::NewTaskLog::new(task_id, log);
        self.logs.lock().unwrap().push((record.task_id, record.log));
        Ok(())
    }
}

#[async_trait]
impl LeaseBackend for MemoryBackend {
    async fn acquire(&self, instance_id: Uuid) -> AppResult<bool> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(injected("acquire lease"));
        }
        let mut lease = self.lease.lock().unwrap();
        let writable = match *lease {
            None => true,
            Some((holder, heartbeat)) => {
                holder == instance_id || heartbeat.elapsed() > self.lease_ttl
            }
        };
        if writable {
            *lease = Some((instance_id, Instant::now()));
        }
        Ok(writable)
    }

    async fn maintain(&self, instance_id: Uuid) -> AppResult<bool> {
        if self.fail_maintain.load(Ordering::SeqCst) {
            return Err(injected("maintain lease"));
        }
        let mut lease = self.lease.lock().unwrap();
        match *lease {
            Some((holder, _)) if holder == instance_id => {
                *lease = Some((instance_id, Instant::now()));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, instance_id: Uuid) -> AppResult<bool> {
        let mut lease = self.lease.lock().unwrap();
        match *lease {
            Some((holder, _)) if holder == instance_id => {
                *lease = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl DefinitionSource for MemoryBackend {
    async fn active_definitions(&self) -> AppResult<Vec<TaskDefinition>> {
        Ok(self
            .definitions
            .lock()
            .unwrap()
            .iter()
            .filter(|definition| definition.is_active())
            .cloned()
            .collect())
    }
}
