//! Dedicated `LISTEN` connection feeding the worker's dispatch channel.

use std::time::Duration;

use async_trait::async_trait;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};
use crate::pubsub::{Backoff, CHANNEL, QueueNotification};
use crate::repositories::with_deadline;

/// Something that produces queue notifications until cancelled.
#[async_trait]
pub trait NotificationSource: Send + 'static {
    /// Forwards notifications into `sink` until `cancel` fires or the
    /// receiving side is dropped.
    async fn run(self: Box<Self>, sink: mpsc::Sender<QueueNotification>, cancel: CancellationToken);
}

/// Why one listening session ended without an error.
enum SessionEnd {
    Cancelled,
    SinkClosed,
    StreamEnded,
}

/// Listens on a PostgreSQL channel over its own connection, outside the pool.
///
/// Transport failures are retried with [`Backoff`]; the delay resets once a
/// `LISTEN` succeeds.
pub struct PgListener {
    dsn: String,
    channel: String,
    connect_timeout: Duration,
    backoff: Backoff,
}

impl PgListener {
    pub fn new(dsn: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            dsn: dsn.into(),
            channel: CHANNEL.to_string(),
            connect_timeout,
            backoff: Backoff::default(),
        }
    }

    async fn session(
        &mut self,
        sink: &mpsc::Sender<QueueNotification>,
        cancel: &CancellationToken,
    ) -> AppResult<SessionEnd> {
        let mut conn = with_deadline(self.connect_timeout, "listener connect", async {
            AsyncPgConnection::establish(&self.dsn)
                .await
                .map_err(|e| AppError::Database {
                    operation: "listener connect".to_string(),
                    source: anyhow::Error::from(e),
                })
        })
        .await?;

        diesel::sql_query(listen_statement(&self.channel)?)
            .execute(&mut conn)
            .await?;
        self.backoff.reset();
        tracing::info!(channel = %self.channel, "Listening for queue notifications");

        let mut notifications = std::pin::pin!(conn.notifications_stream());
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                next = notifications.next() => next,
            };

            let notification = match next {
                Some(Ok(notification)) => notification,
                Some(Err(e)) => return Err(AppError::from(e)),
                None => return Ok(SessionEnd::StreamEnded),
            };

            let decoded = match QueueNotification::decode(&notification.payload) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!(payload = %notification.payload, error = %e, "Dropping malformed notification");
                    continue;
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                sent = sink.send(decoded) => {
                    if sent.is_err() {
                        return Ok(SessionEnd::SinkClosed);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl NotificationSource for PgListener {
    async fn run(mut self: Box<Self>, sink: mpsc::Sender<QueueNotification>, cancel: CancellationToken) {
        loop {
            match self.session(&sink, &cancel).await {
                Ok(SessionEnd::Cancelled) | Ok(SessionEnd::SinkClosed) => return,
                Ok(SessionEnd::StreamEnded) => {
                    tracing::warn!(channel = %self.channel, "Notification stream ended, reconnecting");
                }
                Err(e) => {
                    tracing::warn!(channel = %self.channel, error = %e, "Listener connection failed");
                }
            }

            let delay = self.backoff.next_delay();
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Listener backing off");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// `LISTEN "<channel>"`; channel names are restricted to identifier characters.
fn listen_statement(channel: &str) -> AppResult<String> {
    let valid = !channel.is_empty()
        && channel
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(AppError::Validation {
            field: "channel".to_string(),
            reason: format!("'{}' is not a valid channel name", channel),
        });
    }
    Ok(format!("LISTEN \"{}\"", channel))
}
