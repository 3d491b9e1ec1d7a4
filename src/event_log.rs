//! Append-only event log: one JSONL file per UTC day under `events/`.
//! Every mutation the store, lease manager, scheduler, and gate engine
//! perform is recorded here; nothing ever reads this log back to decide
//! behavior, it exists purely as an audit trail.

use std::io::Write as _;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task;
use tracing::trace;

use crate::error::AofError;
use crate::model::Event;
use crate::store::Layout;

#[derive(Clone)]
pub struct EventLog {
    layout: Layout,
    // Serializes appends so concurrent writers never interleave lines
    // within the same partition file.
    write_lock: Arc<Mutex<()>>,
}

impl EventLog {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn append(&self, event: Event) -> Result<(), AofError> {
        let partition = self.layout.event_partition(event.timestamp.date_naive());
        let line = serde_json::to_string(&event)?;
        let _guard = self.write_lock.lock().await;
        task::spawn_blocking(move || -> std::io::Result<()> {
            if let Some(parent) = partition.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&partition)?;
            writeln!(file, "{line}")?;
            file.sync_data()?;
            Ok(())
        })
        .await
        .map_err(|e| AofError::Internal(anyhow::anyhow!("event log join error: {e}")))??;
        trace!(event_type = ?event.event_type, "event appended");
        Ok(())
    }

    /// Reads back a day's partition, for tests and CLI introspection.
    pub async fn read_partition(
        &self,
        date: chrono::NaiveDate,
    ) -> Result<Vec<Event>, AofError> {
        let path = self.layout.event_partition(date);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(AofError::from))
            .collect()
    }
}
