mod lemonsqueezy;

pub use lemonsqueezy::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// License data as the rest of the system sees it, whatever shape the
/// provider answered with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderLicenseInfo {
    pub valid: bool,
    pub order_id: Option<String>,
    pub variant: Option<String>,
    /// Unix seconds; None = no expiry reported
    pub expires_at: Option<i64>,
}

/// Outbound operations against the billing provider's licensing API.
///
/// All calls are blocking from the caller's point of view and bounded by the
/// client's timeout.
#[async_trait]
pub trait LicenseGateway: Send + Sync {
    /// Register an activation instance for a key. `Ok(false)` = provider refused.
    async fn activate(&self, license_key: &str, instance_name: &str) -> Result<bool>;

    /// Authoritative license data, or None when the provider does not know the key.
    async fn validate(&self, license_key: &str) -> Result<Option<ProviderLicenseInfo>>;

    async fn variant_name_for_order_item(&self, order_item_id: &str) -> Result<String>;
}
