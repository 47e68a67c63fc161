use chrono::{DateTime, Utc};
use serde_json::json;

/// Failure surfaced by a core operation. `code` is one of the stable wire
/// codes (`bad_params`, `not_found`, `conflict`, `out_of_range`) or an infra
/// code such as `db_query_failed`.
#[derive(Debug, Clone)]
pub struct DomainError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl DomainError {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    /// State-machine violation. `reason` travels in `details.reason` so the
    /// host can distinguish e.g. a roster miss from a window miss.
    pub fn conflict(reason: &str, message: impl Into<String>) -> Self {
        Self {
            code: "conflict",
            message: message.into(),
            details: Some(json!({ "reason": reason })),
        }
    }

    pub fn out_of_range(message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        Self {
            code: "out_of_range",
            message: message.into(),
            details,
        }
    }

    pub fn db(code: &'static str, e: rusqlite::Error) -> Self {
        Self {
            code,
            message: e.to_string(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        crate::ipc::error::err(id, self.code, self.message, self.details)
    }
}

pub fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>, DomainError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DomainError::bad_params(format!("invalid timestamp '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_roundtrip() {
        let now = Utc::now();
        let parsed = parse_ts(&fmt_ts(now)).expect("parse formatted timestamp");
        assert_eq!(parsed, now);
    }

    #[test]
    fn conflict_carries_reason() {
        let e = DomainError::conflict("attempt_limit", "no attempts left");
        assert_eq!(e.code, "conflict");
        assert_eq!(
            e.details.as_ref().and_then(|d| d.get("reason")).and_then(|v| v.as_str()),
            Some("attempt_limit")
        );
    }
}
