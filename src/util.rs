//! Shared helpers for request handling and timestamp formatting.

use axum::http::HeaderMap;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Render Unix seconds the way the extension expects (`2024-01-15T10:00:00.000Z`).
pub fn format_timestamp(timestamp: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Parse a client-supplied timestamp: an RFC 3339 string or epoch milliseconds.
pub fn parse_client_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp()),
        Value::Number(n) => n.as_i64().map(|ms| ms / 1000),
        _ => None,
    }
}

/// Extract the user-agent header, if present and valid UTF-8.
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Treat empty or whitespace-only strings as absent.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn formats_like_javascript_iso_strings() {
        assert_eq!(
            format_timestamp(1_705_312_800).as_deref(),
            Some("2024-01-15T10:00:00.000Z")
        );
    }

    #[test]
    fn parses_iso_and_epoch_millis() {
        assert_eq!(
            parse_client_timestamp(&json!("2024-01-15T10:00:00.000Z")),
            Some(1_705_312_800)
        );
        assert_eq!(parse_client_timestamp(&json!(1_705_312_800_123i64)), Some(1_705_312_800));
        assert_eq!(parse_client_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_client_timestamp(&json!(null)), None);
    }

    #[test]
    fn blank_strings_are_absent() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some(" abc ".into())).as_deref(), Some("abc"));
        assert_eq!(non_empty(None), None);
    }
}
