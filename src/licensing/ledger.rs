//! Usage ledger: append-only metered usage per license key.
//!
//! Each sync adds its quantity to the total, so clients must send deltas.
//! Sending a running total would double count.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{NewUsageRecord, UsageRecord};

pub const DEFAULT_PLAN: &str = "trial";
pub const DEFAULT_VARIANT: &str = "Trial";

/// Largest delta accepted from a single sync.
pub const MAX_SYNC_QUANTITY: i64 = i32::MAX as i64;

/// A usage sync as received from the extension.
#[derive(Debug, Clone, Default)]
pub struct UsageSync<'a> {
    pub license_key: &'a str,
    pub device_id: Option<&'a str>,
    pub plan: Option<&'a str>,
    pub variant: Option<&'a str>,
    pub quantity: Option<i64>,
}

pub fn record(conn: &Connection, sync: &UsageSync<'_>) -> Result<UsageRecord> {
    if sync.license_key.trim().is_empty() {
        return Err(AppError::BadRequest("licenseKey is required".into()));
    }
    let quantity = sync
        .quantity
        .ok_or_else(|| AppError::BadRequest("used is required".into()))?;
    if quantity < 0 {
        return Err(AppError::BadRequest("used must not be negative".into()));
    }
    if quantity > MAX_SYNC_QUANTITY {
        return Err(AppError::BadRequest(format!(
            "used must not exceed {}",
            MAX_SYNC_QUANTITY
        )));
    }

    queries::create_usage_record(
        conn,
        &NewUsageRecord {
            license_key: sync.license_key.trim().to_string(),
            device_id: sync.device_id.map(String::from),
            plan: sync.plan.unwrap_or(DEFAULT_PLAN).to_string(),
            variant: sync.variant.unwrap_or(DEFAULT_VARIANT).to_string(),
            quantity,
        },
    )
}

pub fn total_used(conn: &Connection, license_key: &str) -> Result<i64> {
    queries::total_used(conn, license_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    #[test]
    fn rejects_missing_or_negative_quantities() {
        let conn = conn();
        let base = UsageSync {
            license_key: "K1",
            ..Default::default()
        };

        assert!(matches!(record(&conn, &base), Err(AppError::BadRequest(_))));
        assert!(matches!(
            record(&conn, &UsageSync { quantity: Some(-2), ..base.clone() }),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            record(&conn, &UsageSync { license_key: " ", quantity: Some(1), ..base }),
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(total_used(&conn, "K1").unwrap(), 0);
    }

    #[test]
    fn rejects_oversized_quantities() {
        let conn = conn();
        let sync = |quantity| UsageSync {
            license_key: "K1",
            quantity: Some(quantity),
            ..Default::default()
        };

        assert!(matches!(record(&conn, &sync(i64::MAX)), Err(AppError::BadRequest(_))));
        assert!(matches!(
            record(&conn, &sync(MAX_SYNC_QUANTITY + 1)),
            Err(AppError::BadRequest(_))
        ));
        record(&conn, &sync(MAX_SYNC_QUANTITY)).unwrap();
        assert_eq!(total_used(&conn, "K1").unwrap(), MAX_SYNC_QUANTITY);
    }

    #[test]
    fn total_saturates_instead_of_failing() {
        let conn = conn();
        for _ in 0..2 {
            queries::create_usage_record(
                &conn,
                &NewUsageRecord {
                    license_key: "K1".into(),
                    device_id: None,
                    plan: DEFAULT_PLAN.into(),
                    variant: DEFAULT_VARIANT.into(),
                    quantity: i64::MAX,
                },
            )
            .unwrap();
        }

        assert_eq!(total_used(&conn, "K1").unwrap(), i64::MAX);
    }

    #[test]
    fn sums_deltas_per_key() {
        let conn = conn();
        for (key, quantity) in [("K1", 2), ("K1", 5), ("K2", 1)] {
            record(
                &conn,
                &UsageSync {
                    license_key: key,
                    quantity: Some(quantity),
                    ..Default::default()
                },
            )
            .unwrap();
        }

        assert_eq!(total_used(&conn, "K1").unwrap(), 7);
        assert_eq!(total_used(&conn, "K2").unwrap(), 1);
    }
}
