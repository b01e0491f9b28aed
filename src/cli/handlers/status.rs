//! Status command handler

use super::{connect, format_timestamp};
use crate::config::settings::Settings;
use crate::error::AppResult;
use crate::models::SchedulerLease;

/// Reports which instance holds the scheduler lease
pub struct StatusCommandHandler {
    config: Settings,
}

impl StatusCommandHandler {
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    pub async fn execute(&self) -> AppResult<()> {
        let repos = connect(&self.config).await?;
        let lease = repos.lease.current().await?;
        println!(
            "{}",
            describe_lease(lease.as_ref(), jiff::Timestamp::now(), repos.lease.ttl())
        );
        Ok(())
    }
}

fn describe_lease(
    lease: Option<&SchedulerLease>,
    now: jiff::Timestamp,
    ttl: std::time::Duration,
) -> String {
    match lease {
        None => "No scheduler lease: no instance is emitting cron runs".to_string(),
        Some(lease) => {
            let heartbeat = format_timestamp(lease.last_heartbeat.to_jiff());
            if lease.is_valid_at(now, ttl) {
                format!(
                    "✓ Scheduler leader: {} (last heartbeat {})",
                    lease.holder_id, heartbeat
                )
            } else {
                format!(
                    "Scheduler lease expired: last held by {} (last heartbeat {}); any instance may take over",
                    lease.holder_id, heartbeat
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LEASE_KEY;
    use jiff_diesel::ToDiesel;
    use std::time::Duration;
    use uuid::Uuid;

    fn lease_at(heartbeat: jiff::Timestamp) -> SchedulerLease {
        SchedulerLease {
            id: LEASE_KEY.to_string(),
            holder_id: Uuid::nil(),
            last_heartbeat: heartbeat.to_diesel(),
        }
    }

    #[test]
    fn test_describe_lease() {
        let now = jiff::Timestamp::from_second(1_000_000).unwrap();
        let ttl = Duration::from_secs(15);

        assert!(describe_lease(None, now, ttl).starts_with("No scheduler lease"));

        let fresh = lease_at(jiff::Timestamp::from_second(999_995).unwrap());
        assert!(describe_lease(Some(&fresh), now, ttl).starts_with("✓ Scheduler leader"));

        let stale = lease_at(jiff::Timestamp::from_second(999_900).unwrap());
        assert!(describe_lease(Some(&stale), now, ttl).starts_with("Scheduler lease expired"));
    }
}
