use serde::{Deserialize, Serialize};

/// Analytics event reported by the extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub event: String,
    pub license_key: Option<String>,
    pub plan: Option<String>,
    pub email: Option<String>,
    pub extension_version: Option<String>,
    pub browser: Option<String>,
    pub draft_id: Option<String>,
    /// Arbitrary client metadata, stored as JSON text
    pub metadata: Option<serde_json::Value>,
    /// Client-reported time of the event
    pub occurred_at: Option<i64>,
    pub recorded_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    pub event: String,
    pub license_key: Option<String>,
    pub plan: Option<String>,
    pub email: Option<String>,
    pub extension_version: Option<String>,
    pub browser: Option<String>,
    pub draft_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub occurred_at: Option<i64>,
}
