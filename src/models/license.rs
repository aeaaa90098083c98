use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Device id recorded when a purchase carried no client metadata.
pub const UNKNOWN_CLIENT: &str = "unknown_client";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseStatus {
    Pending,
    Active,
    Expired,
    Inactive,
}

/// One activation record per license key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseRecord {
    pub id: String,
    /// None only for a subscription placeholder still waiting for its key
    pub license_key: Option<String>,
    pub order_id: Option<String>,
    pub order_item_id: Option<String>,
    pub variant: String,
    pub status: LicenseStatus,
    pub device_id: Option<String>,
    pub last_device_switch_at: Option<i64>,
    pub switch_count: i64,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub activated_at: Option<i64>,
    /// When the provider confirmed the subscription for this order
    pub subscribed_at: Option<i64>,
}

impl LicenseRecord {
    /// Whether the record is bound to a real device (not empty, not the sentinel).
    pub fn bound_device(&self) -> Option<&str> {
        self.device_id
            .as_deref()
            .filter(|d| !is_unbound_device(d))
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }
}

pub fn is_unbound_device(device_id: &str) -> bool {
    device_id.is_empty() || device_id == UNKNOWN_CLIENT
}

/// Record created from the provider's answer when a key is first seen on /validate-license.
#[derive(Debug, Clone)]
pub struct NewSyncedLicense {
    pub license_key: String,
    pub order_id: Option<String>,
    pub variant: String,
    pub device_id: String,
    pub expires_at: Option<i64>,
}

/// Input of a `license_key_created` webhook.
#[derive(Debug, Clone)]
pub struct LicenseKeyCreated {
    pub license_key: String,
    pub order_id: String,
    pub order_item_id: Option<String>,
    pub variant: String,
    pub device_id: String,
    /// Tentative expiry from the plan catalog
    pub expires_at: Option<i64>,
}

/// Input of a `subscription_created` webhook.
#[derive(Debug, Clone)]
pub struct SubscriptionConfirmed {
    pub order_id: String,
    pub variant: String,
    /// Authoritative expiry (`renews_at`), or the plan default when the provider sent none
    pub expires_at: Option<i64>,
    pub device_id: Option<String>,
}
