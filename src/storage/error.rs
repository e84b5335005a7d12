use std::io;

use serde::Serialize;
use thiserror::Error;

/// Failure surfaced by every fallible store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("{context}: {source}")]
    Parse {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn parse(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Parse {
            context: context.into(),
            source,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Wire envelope for front ends: `{"success": true, ...}` or
/// `{"success": false, "error": "..."}`.
///
/// The payload is flattened into the envelope, so `T` must serialize as a
/// struct or map.
#[derive(Debug, Serialize)]
pub struct Reply<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> From<StoreResult<T>> for Reply<T> {
    fn from(result: StoreResult<T>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(err) => Self {
                success: false,
                data: None,
                error: Some(err.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Imported {
        imported_count: usize,
    }

    #[test]
    fn reply_flattens_payload_on_success() {
        let reply = Reply::from(Ok::<_, StoreError>(Imported { imported_count: 3 }));
        let value = serde_json::to_value(&reply).expect("serialize reply");
        assert_eq!(value, json!({"success": true, "importedCount": 3}));
    }

    #[test]
    fn reply_carries_message_on_failure() {
        let reply: Reply<Imported> = Reply::from(Err(StoreError::not_found("note")));
        let value = serde_json::to_value(&reply).expect("serialize reply");
        assert_eq!(value, json!({"success": false, "error": "note not found"}));
    }
}
