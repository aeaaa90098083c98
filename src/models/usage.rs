use serde::{Deserialize, Serialize};

/// One metered sync from the extension. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub license_key: String,
    pub device_id: Option<String>,
    pub plan: String,
    pub variant: String,
    pub quantity: i64,
    pub recorded_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewUsageRecord {
    pub license_key: String,
    pub device_id: Option<String>,
    pub plan: String,
    pub variant: String,
    pub quantity: i64,
}
