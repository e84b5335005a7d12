use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tokio::fs;

use super::{
    human_size, logged, path_exists, read_json, sanitize_events, write_json, CalendarEvent,
    Store, StoreError, StoreResult,
};
use crate::ics;
use crate::journaling::BackupCategory;

/// Outcome of a successful calendar file import.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub imported_count: usize,
    pub events: Vec<CalendarEvent>,
}

impl Store {
    /// The persisted event collection minus entries that fail validation.
    pub async fn get_events(&self) -> Vec<CalendarEvent> {
        match self.load_event_values().await {
            Ok(values) => sanitize_events(values),
            Err(err) => {
                tracing::error!(%err, "loading events failed");
                Vec::new()
            }
        }
    }

    /// Replaces the event collection with the valid entries of `payload`,
    /// which must be a JSON array. Returns how many events were kept.
    pub async fn save_events(&self, payload: Value) -> StoreResult<usize> {
        let Value::Array(values) = payload else {
            return logged(
                "save events",
                Err(StoreError::validation("events payload must be an array")),
            );
        };
        let submitted = values.len();
        let events = sanitize_events(values);
        if events.len() < submitted {
            tracing::debug!(
                dropped = submitted - events.len(),
                "dropping invalid events before save"
            );
        }
        self.save_event_list(events).await
    }

    /// Typed counterpart of [`save_events`](Self::save_events).
    pub async fn save_event_list(&self, mut events: Vec<CalendarEvent>) -> StoreResult<usize> {
        events.retain(CalendarEvent::is_persistable);
        let result = write_json(&self.ctx.calendar_file, &events).await;
        logged("save events", result)?;
        self.backup_sampled(BackupCategory::Calendar, &events).await;
        Ok(events.len())
    }

    /// Parses an `.ics` file and makes its events the whole collection.
    pub async fn import_calendar_file(&self, path: &Path) -> StoreResult<ImportSummary> {
        logged("import calendar", self.import_calendar_file_inner(path).await)
    }

    async fn import_calendar_file_inner(&self, path: &Path) -> StoreResult<ImportSummary> {
        let metadata = fs::metadata(path)
            .await
            .map_err(|err| StoreError::io(format!("inspecting {}", path.display()), err))?;
        if metadata.len() > self.ctx.max_import_bytes {
            return Err(StoreError::validation(format!(
                "calendar file too large (max {})",
                human_size(self.ctx.max_import_bytes)
            )));
        }

        let raw = fs::read(path)
            .await
            .map_err(|err| StoreError::io(format!("reading {}", path.display()), err))?;
        let events = ics::parse_calendar(&String::from_utf8_lossy(&raw));
        if events.is_empty() {
            return Err(StoreError::validation("no valid events found in file"));
        }

        write_json(&self.ctx.calendar_file, &events).await?;
        tracing::info!(
            count = events.len(),
            source = %path.display(),
            "imported calendar"
        );
        Ok(ImportSummary {
            imported_count: events.len(),
            events,
        })
    }

    async fn load_event_values(&self) -> StoreResult<Vec<Value>> {
        let path = &self.ctx.calendar_file;
        if !path_exists(path).await? {
            write_json(path, &Vec::<Value>::new()).await?;
            return Ok(Vec::new());
        }
        match read_json::<Value>(path).await? {
            Value::Array(values) => Ok(values),
            _ => {
                tracing::warn!("event collection is not an array, ignoring it");
                Ok(Vec::new())
            }
        }
    }
}
