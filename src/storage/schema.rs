use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::error::{StoreError, StoreResult};
use super::keys::has_forbidden_chars;

pub const GENERAL_FOLDER: &str = "General";
pub const MAX_FOLDER_NAME_CHARS: usize = 50;

/// A note as persisted under `notes/<key>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub folder: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub created: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_modified: String,
    /// Keys written by other front ends; carried through rewrites untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Note {
    /// True when the stored folder is the given one, treating a blank
    /// folder as [`GENERAL_FOLDER`].
    pub fn is_in_folder(&self, folder: &str) -> bool {
        self.folder_or_general() == folder
    }

    pub fn folder_or_general(&self) -> &str {
        if self.folder.is_empty() {
            GENERAL_FOLDER
        } else {
            &self.folder
        }
    }
}

/// Input to [`Store::save_note`](super::Store::save_note).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDraft {
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
}

impl NoteDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn in_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn created_at(mut self, created: impl Into<String>) -> Self {
        self.created = Some(created.into());
        self
    }
}

/// Passive recurrence descriptor; stored, never expanded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recurrence {
    #[serde(default, deserialize_with = "lenient_string")]
    pub frequency: String,
    #[serde(default = "default_interval", deserialize_with = "lenient_interval")]
    pub interval: u32,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_frequency: Option<String>,
}

fn default_interval() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: String,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub end: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub all_day: bool,
    #[serde(
        default,
        deserialize_with = "lenient_recurrence",
        skip_serializing_if = "Option::is_none"
    )]
    pub recurrence: Option<Recurrence>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CalendarEvent {
    pub fn is_persistable(&self) -> bool {
        !self.start.is_empty()
    }
}

// Records may come from other front ends with nulls or numbers where text is
// expected. Such fields read as empty rather than rejecting the record.

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        _ => String::new(),
    })
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        _ => None,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(is_truthy(&Value::deserialize(deserializer)?))
}

fn lenient_interval<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let interval = match Value::deserialize(deserializer)? {
        Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    Ok(interval.filter(|&n| n > 0).unwrap_or_else(default_interval))
}

fn lenient_recurrence<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Recurrence>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    if !value.is_object() {
        return Ok(None);
    }
    Ok(serde_json::from_value(value).ok())
}

/// The acceptance rule shared by reads and writes of the event collection:
/// a string `id`, a string `title`, and a truthy `start`.
pub fn is_valid_event(value: &Value) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    object.get("id").is_some_and(Value::is_string)
        && object.get("title").is_some_and(Value::is_string)
        && object.get("start").is_some_and(is_truthy)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Keeps the entries of a raw event array that pass [`is_valid_event`] and
/// deserialize cleanly; everything else is dropped.
pub fn sanitize_events(values: Vec<Value>) -> Vec<CalendarEvent> {
    values
        .into_iter()
        .filter(is_valid_event)
        .filter_map(|value| match serde_json::from_value::<CalendarEvent>(value) {
            Ok(event) => Some(event),
            Err(err) => {
                tracing::debug!(%err, "dropping event with unexpected field types");
                None
            }
        })
        .collect()
}

/// Trims and validates a folder name, returning the trimmed form.
pub fn validate_folder_name(name: &str) -> StoreResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StoreError::validation("folder name cannot be empty"));
    }
    if trimmed.chars().count() > MAX_FOLDER_NAME_CHARS {
        return Err(StoreError::validation(format!(
            "folder name too long (max {MAX_FOLDER_NAME_CHARS} characters)"
        )));
    }
    if has_forbidden_chars(trimmed) {
        return Err(StoreError::validation(
            "folder name contains invalid characters",
        ));
    }
    Ok(trimmed.to_string())
}

pub fn folder_exists(folders: &[String], candidate: &str) -> bool {
    let needle = candidate.trim().to_lowercase();
    folders
        .iter()
        .any(|existing| existing.trim().to_lowercase() == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn event_validity_requires_id_title_and_truthy_start() {
        assert!(is_valid_event(&json!({"id": "a", "title": "t", "start": "2024-01-01"})));
        assert!(!is_valid_event(&json!({"id": 7, "title": "t", "start": "2024-01-01"})));
        assert!(!is_valid_event(&json!({"id": "a", "start": "2024-01-01"})));
        assert!(!is_valid_event(&json!({"id": "a", "title": "t", "start": ""})));
        assert!(!is_valid_event(&json!({"id": "a", "title": "t", "start": null})));
        assert!(!is_valid_event(&json!("not an object")));
    }

    #[test]
    fn sanitize_keeps_unknown_keys() {
        let events = sanitize_events(vec![
            json!({"id": "a", "title": "Standup", "start": "2024-01-01T09:00:00", "color": "#f00",
                   "recurrence": {"frequency": "weekly", "interval": 1}}),
            json!({"id": "b", "title": "Broken"}),
        ]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].extra.get("color"), Some(&json!("#f00")));
        assert_eq!(
            events[0].recurrence.as_ref().map(|r| r.frequency.as_str()),
            Some("weekly")
        );
    }

    #[test]
    fn loosely_typed_event_fields_do_not_drop_the_event() {
        let events = sanitize_events(vec![
            json!({"id": "a", "title": "Null flags", "start": "2024-01-01", "allDay": null}),
            json!({"id": "b", "title": "Numeric end", "start": "2024-01-02", "end": 5}),
            json!({"id": "c", "title": "Text interval", "start": "2024-01-03",
                   "recurrence": {"frequency": "daily", "interval": "2"}}),
            json!({"id": "d", "title": "Odd recurrence", "start": "2024-01-04",
                   "recurrence": "weekly", "allDay": 1}),
        ]);
        assert_eq!(events.len(), 4);
        assert!(!events[0].all_day);
        assert_eq!(events[1].end, None);
        assert_eq!(events[2].recurrence.as_ref().map(|r| r.interval), Some(2));
        assert_eq!(events[3].recurrence, None);
        assert!(events[3].all_day);
    }

    #[test]
    fn notes_with_null_or_numeric_fields_still_load() {
        let note: Note = serde_json::from_value(json!({
            "title": "A", "folder": null, "content": null, "lastModified": 1700000000000u64,
        }))
        .expect("lenient note");
        assert_eq!(note.content, "");
        assert_eq!(note.folder_or_general(), GENERAL_FOLDER);
        assert_eq!(note.last_modified, "");
        assert!(serde_json::from_value::<Note>(json!({"title": 7})).is_err());
    }

    #[test]
    fn folder_names_are_validated() {
        assert_eq!(validate_folder_name("  Work ").expect("valid"), "Work");
        assert_matches!(validate_folder_name("   "), Err(StoreError::Validation(_)));
        assert_matches!(
            validate_folder_name(&"x".repeat(51)),
            Err(StoreError::Validation(_))
        );
        assert!(validate_folder_name(&"x".repeat(50)).is_ok());
        assert_matches!(validate_folder_name("a/b"), Err(StoreError::Validation(_)));
    }

    #[test]
    fn folder_lookup_ignores_case_and_padding() {
        let folders = vec!["General".to_string(), " Work ".to_string()];
        assert!(folder_exists(&folders, "work"));
        assert!(folder_exists(&folders, "GENERAL "));
        assert!(!folder_exists(&folders, "Personal"));
    }
}
