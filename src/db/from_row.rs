//! Row mapping for the query helpers.

use rusqlite::{Connection, OptionalExtension, Row, ToSql, types::Type};

use crate::error::Result;
use crate::models::{EventRecord, LicenseRecord, LicenseStatus, UsageRecord};

pub const LICENSE_COLS: &str = "id, license_key, order_id, order_item_id, variant, status, device_id, last_device_switch_at, switch_count, expires_at, created_at, activated_at, subscribed_at";

pub const USAGE_COLS: &str = "id, license_key, device_id, plan, variant, quantity, recorded_at";

pub const EVENT_COLS: &str = "id, event, license_key, plan, email, extension_version, browser, draft_id, metadata, occurred_at, recorded_at";

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Run a query expected to return at most one row.
pub fn query_one<T: FromRow>(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<Option<T>> {
    let mut stmt = conn.prepare(sql)?;
    let row = stmt.query_row(params, |row| T::from_row(row)).optional()?;
    Ok(row)
}

pub fn query_all<T: FromRow>(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| T::from_row(row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn parse_status(idx: usize, raw: String) -> rusqlite::Result<LicenseStatus> {
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl FromRow for LicenseRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(LicenseRecord {
            id: row.get(0)?,
            license_key: row.get(1)?,
            order_id: row.get(2)?,
            order_item_id: row.get(3)?,
            variant: row.get(4)?,
            status: parse_status(5, row.get(5)?)?,
            device_id: row.get(6)?,
            last_device_switch_at: row.get(7)?,
            switch_count: row.get(8)?,
            expires_at: row.get(9)?,
            created_at: row.get(10)?,
            activated_at: row.get(11)?,
            subscribed_at: row.get(12)?,
        })
    }
}

impl FromRow for UsageRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(UsageRecord {
            id: row.get(0)?,
            license_key: row.get(1)?,
            device_id: row.get(2)?,
            plan: row.get(3)?,
            variant: row.get(4)?,
            quantity: row.get(5)?,
            recorded_at: row.get(6)?,
        })
    }
}

impl FromRow for EventRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let metadata: Option<String> = row.get(8)?;
        Ok(EventRecord {
            id: row.get(0)?,
            event: row.get(1)?,
            license_key: row.get(2)?,
            plan: row.get(3)?,
            email: row.get(4)?,
            extension_version: row.get(5)?,
            browser: row.get(6)?,
            draft_id: row.get(7)?,
            metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
            occurred_at: row.get(9)?,
            recorded_at: row.get(10)?,
        })
    }
}
