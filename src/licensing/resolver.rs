use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use strum::AsRefStr;

use super::device_policy::cooldown_message;
use super::ledger::{self, DEFAULT_VARIANT};
use super::plans::plan_for;
use crate::db::{DbPool, queries};
use crate::error::{AppError, Result};
use crate::models::{LicenseRecord, LicenseStatus, NewSyncedLicense};
use crate::payments::LicenseGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DenialReason {
    MissingDevice,
    Invalid,
    InactiveLicense,
    Expired,
    DeviceSwitchCooldown,
    QuotaExceeded,
    NoValidLicense,
    ServerError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub reason: DenialReason,
    pub message: Option<String>,
    pub used: Option<i64>,
    pub limit: Option<i64>,
}

impl Denial {
    pub fn new(reason: DenialReason) -> Self {
        Self {
            reason,
            message: None,
            used: None,
            limit: None,
        }
    }

    fn with_message(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowance {
    pub license_key: String,
    pub used: i64,
    pub limit: i64,
    pub expires_at: Option<i64>,
    pub variant: String,
}

/// Policy outcome of a validation request. Denials are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed(Allowance),
    Denied(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed(_))
    }
}

type Step<T> = std::result::Result<T, Denial>;

/// Decides whether a license key / device pair may use the product.
///
/// Keyed requests look the key up locally, syncing it from the billing
/// provider on first sight, then arbitrate the device binding. Requests with
/// only a device id fall back to the newest untouched active license bound to
/// that device. Both end in the same quota check against the usage ledger.
pub struct LicenseResolver {
    db: DbPool,
    gateway: Arc<dyn LicenseGateway>,
}

impl LicenseResolver {
    pub fn new(db: DbPool, gateway: Arc<dyn LicenseGateway>) -> Self {
        Self { db, gateway }
    }

    pub async fn resolve(
        &self,
        license_key: Option<&str>,
        device_id: Option<&str>,
    ) -> Result<Decision> {
        self.resolve_at(license_key, device_id, Utc::now().timestamp())
            .await
    }

    /// Same as [`resolve`](Self::resolve) with an explicit clock.
    pub async fn resolve_at(
        &self,
        license_key: Option<&str>,
        device_id: Option<&str>,
        now: i64,
    ) -> Result<Decision> {
        let Some(device_id) = device_id.map(str::trim).filter(|d| !d.is_empty()) else {
            return Ok(Decision::Denied(Denial::new(DenialReason::MissingDevice)));
        };

        let step = match license_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => self.resolve_keyed(key, device_id, now).await?,
            None => self.resolve_polling(device_id, now)?,
        };

        match step {
            Ok(record) => self.check_quota(record),
            Err(denial) => Ok(Decision::Denied(denial)),
        }
    }

    async fn resolve_keyed(
        &self,
        license_key: &str,
        device_id: &str,
        now: i64,
    ) -> Result<Step<LicenseRecord>> {
        let known = {
            let conn = self.db.get()?;
            queries::get_license_by_key(&conn, license_key)?.is_some()
        };

        if !known {
            if let Err(denial) = self.sync_from_provider(license_key, device_id, now).await? {
                return Ok(Err(denial));
            }
        }

        let binding = {
            let mut conn = self.db.get()?;
            queries::bind_device_atomic(&mut conn, license_key, device_id, now)?
        };

        let record = match binding {
            queries::DeviceBinding::Unchanged(record) => record,
            queries::DeviceBinding::Bound(record) => {
                tracing::info!("License {} bound to device {}", license_key, device_id);
                record
            }
            queries::DeviceBinding::Switched(record) => {
                tracing::info!(
                    "License {} switched to device {} (switch #{})",
                    license_key,
                    device_id,
                    record.switch_count
                );
                record
            }
            queries::DeviceBinding::Cooldown { remaining_hours } => {
                tracing::info!(
                    "Device switch for license {} refused, {}h cooldown left",
                    license_key,
                    remaining_hours
                );
                return Ok(Err(Denial::new(DenialReason::DeviceSwitchCooldown)
                    .with_message(cooldown_message(remaining_hours))));
            }
            queries::DeviceBinding::NotFound => {
                return Err(AppError::Internal(format!(
                    "License {} disappeared during validation",
                    license_key
                )));
            }
        };

        if record.status != LicenseStatus::Active {
            return Ok(Err(Denial::new(DenialReason::InactiveLicense)));
        }

        if record.is_expired_at(now) {
            return Ok(Err(Denial::new(DenialReason::Expired)));
        }

        Ok(Ok(record))
    }

    /// First sighting of a key: ask the provider before touching the store.
    async fn sync_from_provider(
        &self,
        license_key: &str,
        device_id: &str,
        now: i64,
    ) -> Result<Step<()>> {
        let info = match self.gateway.validate(license_key).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Provider validation failed for {}: {}", license_key, e);
                return Ok(Err(Denial::new(DenialReason::ServerError)));
            }
        };

        let Some(info) = info.filter(|i| i.valid) else {
            tracing::info!("Provider rejected license key {}", license_key);
            return Ok(Err(Denial::new(DenialReason::Invalid)));
        };

        let variant = info
            .variant
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_VARIANT.to_string());
        let expires_at = info.expires_at.or_else(|| plan_for(&variant).expires_at(now));

        let conn = self.db.get()?;
        let record = queries::insert_synced_license(
            &conn,
            &NewSyncedLicense {
                license_key: license_key.to_string(),
                order_id: info.order_id,
                variant,
                device_id: device_id.to_string(),
                expires_at,
            },
            now,
        )?;

        tracing::info!(
            "Synced license {} from provider (variant={}, expires_at={:?})",
            license_key,
            record.variant,
            record.expires_at
        );

        Ok(Ok(()))
    }

    /// Newest active, unexpired license on the device that has never been used.
    fn resolve_polling(&self, device_id: &str, now: i64) -> Result<Step<LicenseRecord>> {
        let conn = self.db.get()?;

        for record in queries::list_active_licenses_for_device(&conn, device_id)? {
            if record.is_expired_at(now) {
                continue;
            }
            let Some(key) = record.license_key.as_deref() else {
                continue;
            };
            if ledger::total_used(&conn, key)? == 0 {
                return Ok(Ok(record));
            }
        }

        Ok(Err(Denial::new(DenialReason::NoValidLicense)))
    }

    fn check_quota(&self, record: LicenseRecord) -> Result<Decision> {
        let license_key = record
            .license_key
            .ok_or_else(|| AppError::Internal("Resolved a license without a key".into()))?;

        let used = {
            let conn = self.db.get()?;
            ledger::total_used(&conn, &license_key)?
        };
        let limit = plan_for(&record.variant).limit;

        if used >= limit {
            return Ok(Decision::Denied(Denial {
                reason: DenialReason::QuotaExceeded,
                message: None,
                used: Some(used),
                limit: Some(limit),
            }));
        }

        Ok(Decision::Allowed(Allowance {
            license_key,
            used,
            limit,
            expires_at: record.expires_at,
            variant: record.variant,
        }))
    }
}
