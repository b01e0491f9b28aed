//! Queue command handler
//!
//! Manual enqueue plus listing, inspection and deletion of queue entries.

use super::{connect, format_timestamp};
use crate::cli::parser::QueueCommands;
use crate::config::settings::Settings;
use crate::error::{AppError, AppResult};
use crate::models::{NewQueueEntry, QueueEntry, TaskLog};
use crate::pubsub::QueueNotification;
use crate::repositories::ordering::parse_order_tokens;
use crate::repositories::{Page, PageRequest, QueueFilter};

/// Handler for `enqueue` and `queue list|show|delete`
pub struct QueueCommandHandler {
    config: Settings,
}

impl QueueCommandHandler {
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    /// Insert a `waiting` entry and wake the workers.
    ///
    /// A failed notification is reported but the entry stays queued; a
    /// worker's backfill will pick it up.
    pub async fn enqueue(
        &self,
        name: &str,
        data: Option<&str>,
        at: Option<jiff::Timestamp>,
    ) -> AppResult<QueueEntry> {
        let repos = connect(&self.config).await?;

        let mut entry = NewQueueEntry::new(name, at.unwrap_or_else(jiff::Timestamp::now));
        if let Some(data) = data {
            entry = entry.with_data(data);
        }
        let entry = repos.queue.insert(entry).await?;

        println!("✓ Queued '{}' as {}", entry.name, entry.id);
        if let Err(e) = repos
            .queue
            .publish(&QueueNotification::new(entry.id, entry.name.clone()))
            .await
        {
            eprintln!("Warning: failed to notify workers ({}); the entry stays queued", e);
        }

        Ok(entry)
    }

    /// # Errors
    /// - Database connection errors
    /// - `Validation` for an unknown `--order-by` column
    /// - `NotFound` for `show`/`delete` of an unknown id
    pub async fn execute(&self, command: &QueueCommands) -> AppResult<()> {
        let repos = connect(&self.config).await?;

        match command {
            QueueCommands::List {
                state,
                from,
                to,
                created_from,
                created_to,
                order_by,
                page,
                page_size,
            } => {
                let filter = QueueFilter {
                    state: *state,
                    run_at_from: *from,
                    run_at_to: *to,
                    created_from: *created_from,
                    created_to: *created_to,
                    order_by: order_by.as_deref().map(parse_order_tokens).unwrap_or_default(),
                    page: PageRequest::new(*page, *page_size)?,
                };
                let listing = repos.queue.list(&filter).await?;
                print!("{}", render_page(&listing));
            }
            QueueCommands::Show { id } => {
                let entry = repos
                    .queue
                    .get(*id)
                    .await?
                    .ok_or_else(|| AppError::not_found("QueueEntry", "id", id.to_string()))?;
                let logs = repos.logs.list(*id).await?;
                print!("{}", render_entry(&entry, &logs));
            }
            QueueCommands::Delete { id } => {
                let entry = repos.queue.delete(*id).await?;
                println!("✓ Deleted {} ({}, {})", entry.id, entry.name, entry.state);
            }
        }

        Ok(())
    }
}

fn entry_row(entry: &QueueEntry) -> String {
    format!(
        "{:<36} {:<24} {:<8} {}",
        entry.id,
        entry.name,
        entry.state,
        format_timestamp(entry.run_at())
    )
}

fn render_page(page: &Page<QueueEntry>) -> String {
    let mut out = format!("{:<36} {:<24} {:<8} {}\n", "ID", "TASK", "STATE", "RUN AT");
    for entry in &page.items {
        out.push_str(&entry_row(entry));
        out.push('\n');
    }
    let meta = &page.meta;
    out.push_str(&format!(
        "Page {} of {} ({} entries total, {} per page)\n",
        meta.page,
        meta.total_pages.max(1),
        meta.total_items,
        meta.page_size
    ));
    out
}

fn render_entry(entry: &QueueEntry, logs: &[TaskLog]) -> String {
    let mut out = String::new();
    out.push_str(&format!("ID:       {}\n", entry.id));
    out.push_str(&format!("Task:     {}\n", entry.name));
    out.push_str(&format!("State:    {}\n", entry.state));
    out.push_str(&format!("Run at:   {}\n", format_timestamp(entry.run_at())));
    out.push_str(&format!("Created:  {}\n", format_timestamp(entry.created_at())));
    out.push_str(&format!("Updated:  {}\n", format_timestamp(entry.updated_at())));
    if let Some(ref data) = entry.task_data {
        out.push_str(&format!("Data:     {}\n", data));
    }
    if logs.is_empty() {
        out.push_str("Logs:     (none)\n");
    } else {
        out.push_str("Logs:\n");
        for log in logs {
            out.push_str(&format!("  {}\n", log.log));
        }
    }
    out
}
