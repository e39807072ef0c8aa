//! Query execution errors.
//!
//! Compilation never fails; only execution does. Failures are classified so
//! that an exhausted-resources error can be shown as advice rather than a raw
//! payload.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reason tag the warehouse uses when a query needs too much memory.
pub const RESOURCES_EXCEEDED_REASON: &str = "resourcesExceeded";

/// One entry of the remote `error.errors` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// The `error` object returned by the log-query endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorDetail>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    pub fn is_resources_exceeded(&self) -> bool {
        self.errors
            .iter()
            .any(|detail| detail.reason == RESOURCES_EXCEEDED_REASON)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The warehouse ran out of resources for this query.
    #[error("query exceeded warehouse resources: {}", .0.message)]
    ResourcesExceeded(ErrorPayload),

    /// Any other error reported by the endpoint, payload kept verbatim.
    #[error("query execution failed: {}", .0.message)]
    Execution(ErrorPayload),

    /// The request never produced a usable response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body was not a log-query response.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl QueryError {
    /// Classify a remote error payload.
    pub fn from_payload(payload: ErrorPayload) -> Self {
        if payload.is_resources_exceeded() {
            QueryError::ResourcesExceeded(payload)
        } else {
            QueryError::Execution(payload)
        }
    }

    /// The raw remote payload, if the endpoint sent one.
    pub fn payload(&self) -> Option<&ErrorPayload> {
        match self {
            QueryError::ResourcesExceeded(payload) | QueryError::Execution(payload) => Some(payload),
            QueryError::Transport(_) | QueryError::Decode(_) => None,
        }
    }

    /// Text suitable for showing to the operator.
    pub fn user_message(&self) -> String {
        match self {
            QueryError::ResourcesExceeded(_) => "This query requires too many resources to run. \
                 Narrow the time range, or select specific nested fields through \
                 unnest joins instead of whole objects."
                .to_string(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            QueryError::Decode(err.to_string())
        } else {
            QueryError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resources_exceeded_is_classified() {
        let payload: ErrorPayload = serde_json::from_value(json!({
            "message": "Resources exceeded during query execution",
            "errors": [{"reason": "resourcesExceeded", "message": "too much memory"}],
        }))
        .unwrap();
        let err = QueryError::from_payload(payload.clone());
        assert_eq!(err, QueryError::ResourcesExceeded(payload));
        assert!(err.user_message().contains("Narrow the time range"));
    }

    #[test]
    fn test_other_errors_keep_raw_payload() {
        let payload: ErrorPayload = serde_json::from_value(json!({
            "message": "Syntax error: Unexpected keyword",
            "errors": [{"reason": "invalidQuery", "message": "Unexpected keyword"}],
        }))
        .unwrap();
        let err = QueryError::from_payload(payload.clone());
        assert_eq!(err.payload(), Some(&payload));
        assert_eq!(
            err.user_message(),
            "query execution failed: Syntax error: Unexpected keyword"
        );
    }

    #[test]
    fn test_payload_without_errors_list() {
        let payload: ErrorPayload = serde_json::from_value(json!({"message": "boom"})).unwrap();
        assert!(!payload.is_resources_exceeded());
        assert!(matches!(QueryError::from_payload(payload), QueryError::Execution(_)));
    }
}
