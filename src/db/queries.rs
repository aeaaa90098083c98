use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior, params};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::licensing::device_policy::{SwitchVerdict, evaluate_switch};
use crate::models::*;

use super::from_row::{EVENT_COLS, LICENSE_COLS, USAGE_COLS, query_all, query_one};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

// ============ Licenses ============

pub fn get_license_by_key(conn: &Connection, license_key: &str) -> Result<Option<LicenseRecord>> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE license_key = ?1", LICENSE_COLS),
        &[&license_key],
    )
}

/// Most recent record for an order (placeholders included).
pub fn get_license_by_order_id(conn: &Connection, order_id: &str) -> Result<Option<LicenseRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM licenses WHERE order_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
            LICENSE_COLS
        ),
        &[&order_id],
    )
}

/// Active keyed licenses bound to a device, newest purchase first.
pub fn list_active_licenses_for_device(
    conn: &Connection,
    device_id: &str,
) -> Result<Vec<LicenseRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM licenses
             WHERE device_id = ?1 AND status = 'active' AND license_key IS NOT NULL
             ORDER BY created_at DESC, rowid DESC",
            LICENSE_COLS
        ),
        &[&device_id],
    )
}

/// Insert a record for a key the provider just vouched for.
///
/// If a concurrent request already created the key, the existing row wins and
/// is returned unchanged; the caller then applies normal device arbitration.
pub fn insert_synced_license(
    conn: &Connection,
    input: &NewSyncedLicense,
    now: i64,
) -> Result<LicenseRecord> {
    conn.execute(
        "INSERT INTO licenses (id, license_key, order_id, variant, status, device_id, switch_count, expires_at, created_at, activated_at)
         VALUES (?1, ?2, ?3, ?4, 'active', ?5, 0, ?6, ?7, ?7)
         ON CONFLICT(license_key) DO NOTHING",
        params![
            gen_id(),
            &input.license_key,
            &input.order_id,
            &input.variant,
            &input.device_id,
            input.expires_at,
            now
        ],
    )?;

    get_license_by_key(conn, &input.license_key)?
        .ok_or_else(|| AppError::Internal("Synced license vanished after insert".into()))
}

/// Outcome of binding a request's device to a license.
#[derive(Debug)]
pub enum DeviceBinding {
    /// Already bound to this device
    Unchanged(LicenseRecord),
    /// Was unbound; bound without counting as a switch
    Bound(LicenseRecord),
    /// Rebound from another device
    Switched(LicenseRecord),
    Cooldown { remaining_hours: i64 },
    NotFound,
}

/// Atomically bind `device_id` to a license, applying the switch cooldown.
///
/// Runs in an IMMEDIATE transaction so two racing requests cannot both win a switch.
pub fn bind_device_atomic(
    conn: &mut Connection,
    license_key: &str,
    device_id: &str,
    now: i64,
) -> Result<DeviceBinding> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let Some(record) = get_license_by_key(&tx, license_key)? else {
        return Ok(DeviceBinding::NotFound);
    };

    if record.device_id.as_deref() == Some(device_id) {
        return Ok(DeviceBinding::Unchanged(record));
    }

    if record.bound_device().is_none() {
        tx.execute(
            "UPDATE licenses SET device_id = ?1 WHERE id = ?2",
            params![device_id, &record.id],
        )?;
        tx.commit()?;
        return Ok(DeviceBinding::Bound(LicenseRecord {
            device_id: Some(device_id.to_string()),
            ..record
        }));
    }

    match evaluate_switch(record.last_device_switch_at, now) {
        SwitchVerdict::Cooldown { remaining_hours } => Ok(DeviceBinding::Cooldown { remaining_hours }),
        SwitchVerdict::Permitted => {
            tx.execute(
                "UPDATE licenses
                 SET device_id = ?1, last_device_switch_at = ?2, switch_count = switch_count + 1
                 WHERE id = ?3",
                params![device_id, now, &record.id],
            )?;
            tx.commit()?;
            Ok(DeviceBinding::Switched(LicenseRecord {
                device_id: Some(device_id.to_string()),
                last_device_switch_at: Some(now),
                switch_count: record.switch_count + 1,
                ..record
            }))
        }
    }
}

/// Mark every other active license on `device_id` as expired.
///
/// Records belonging to `except_order_id` or carrying `except_license_key` are
/// left alone. Returns the number demoted.
pub fn demote_active_for_device(
    conn: &Connection,
    device_id: &str,
    except_order_id: Option<&str>,
    except_license_key: Option<&str>,
) -> Result<usize> {
    let demoted = conn.execute(
        "UPDATE licenses SET status = 'expired'
         WHERE device_id = ?1 AND status = 'active'
           AND (?2 IS NULL OR order_id IS NULL OR order_id != ?2)
           AND (?3 IS NULL OR license_key IS NULL OR license_key != ?3)",
        params![device_id, except_order_id, except_license_key],
    )?;
    Ok(demoted)
}

#[derive(Debug)]
pub enum KeyCreatedOutcome {
    /// New pending record
    Created(LicenseRecord),
    /// Key was already known (replayed delivery); status left untouched
    Updated(LicenseRecord),
    /// Filled in a subscription placeholder for the same order
    Reconciled(LicenseRecord),
}

/// Apply a `license_key_created` event: demote the device's other active
/// licenses, then upsert the record by license key.
pub fn upsert_created_license_key(
    conn: &mut Connection,
    input: &LicenseKeyCreated,
    now: i64,
) -> Result<KeyCreatedOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if !is_unbound_device(&input.device_id) {
        let demoted = demote_active_for_device(
            &tx,
            &input.device_id,
            Some(&input.order_id),
            Some(&input.license_key),
        )?;
        if demoted > 0 {
            tracing::info!(
                "Demoted {} active license(s) on device {} superseded by order {}",
                demoted,
                input.device_id,
                input.order_id
            );
        }
    }

    if let Some(existing) = get_license_by_key(&tx, &input.license_key)? {
        // Keep a device the license was already bound (or switched) to
        let device_id = existing
            .bound_device()
            .unwrap_or(&input.device_id)
            .to_string();
        tx.execute(
            "UPDATE licenses
             SET order_id = ?1, order_item_id = COALESCE(?2, order_item_id), variant = ?3,
                 device_id = ?4, expires_at = COALESCE(expires_at, ?5)
             WHERE id = ?6",
            params![
                &input.order_id,
                &input.order_item_id,
                &input.variant,
                &device_id,
                input.expires_at,
                &existing.id
            ],
        )?;
        let record = reload(&tx, &existing.id)?;
        tx.commit()?;
        return Ok(KeyCreatedOutcome::Updated(record));
    }

    let placeholder: Option<LicenseRecord> = query_one(
        &tx,
        &format!(
            "SELECT {} FROM licenses WHERE order_id = ?1 AND license_key IS NULL
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            LICENSE_COLS
        ),
        &[&input.order_id],
    )?;

    if let Some(placeholder) = placeholder {
        let device_id = if is_unbound_device(&input.device_id) {
            placeholder
                .device_id
                .clone()
                .unwrap_or_else(|| input.device_id.clone())
        } else {
            input.device_id.clone()
        };
        // Subscription already confirmed: the key arrives straight into active
        let (status, activated_at) = if placeholder.subscribed_at.is_some() {
            (LicenseStatus::Active, Some(now))
        } else {
            (LicenseStatus::Pending, None)
        };
        tx.execute(
            "UPDATE licenses
             SET license_key = ?1, order_item_id = COALESCE(?2, order_item_id), device_id = ?3,
                 expires_at = COALESCE(expires_at, ?4), status = ?5,
                 activated_at = COALESCE(activated_at, ?6)
             WHERE id = ?7",
            params![
                &input.license_key,
                &input.order_item_id,
                &device_id,
                input.expires_at,
                status.as_ref(),
                activated_at,
                &placeholder.id
            ],
        )?;
        let record = reload(&tx, &placeholder.id)?;
        tx.commit()?;
        return Ok(KeyCreatedOutcome::Reconciled(record));
    }

    let id = gen_id();
    tx.execute(
        "INSERT INTO licenses (id, license_key, order_id, order_item_id, variant, status, device_id, switch_count, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, 0, ?7, ?8)",
        params![
            &id,
            &input.license_key,
            &input.order_id,
            &input.order_item_id,
            &input.variant,
            &input.device_id,
            input.expires_at,
            now
        ],
    )?;
    tx.commit()?;

    Ok(KeyCreatedOutcome::Created(LicenseRecord {
        id,
        license_key: Some(input.license_key.clone()),
        order_id: Some(input.order_id.clone()),
        order_item_id: input.order_item_id.clone(),
        variant: input.variant.clone(),
        status: LicenseStatus::Pending,
        device_id: Some(input.device_id.clone()),
        last_device_switch_at: None,
        switch_count: 0,
        expires_at: input.expires_at,
        created_at: now,
        activated_at: None,
        subscribed_at: None,
    }))
}

#[derive(Debug)]
pub enum SubscriptionOutcome {
    /// The keyed record for the order is now active
    Activated(LicenseRecord),
    /// No key yet; the confirmation is parked on a placeholder for the order
    Placeholder(LicenseRecord),
    /// The order's record was already expired or disabled; left untouched
    Retired(LicenseRecord),
}

/// Apply a `subscription_created` event for an order.
pub fn confirm_subscription(
    conn: &mut Connection,
    input: &SubscriptionConfirmed,
    now: i64,
) -> Result<SubscriptionOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let existing = get_license_by_order_id(&tx, &input.order_id)?;

    // A redelivered confirmation must not revive an expired or disabled license
    if let Some(record) = &existing {
        if matches!(record.status, LicenseStatus::Expired | LicenseStatus::Inactive) {
            return Ok(SubscriptionOutcome::Retired(record.clone()));
        }
    }

    let device_id = input
        .device_id
        .as_deref()
        .filter(|d| !is_unbound_device(d))
        .or_else(|| existing.as_ref().and_then(|r| r.bound_device()))
        .map(String::from);

    if let Some(device_id) = &device_id {
        let demoted = demote_active_for_device(
            &tx,
            device_id,
            Some(&input.order_id),
            existing.as_ref().and_then(|r| r.license_key.as_deref()),
        )?;
        if demoted > 0 {
            tracing::info!(
                "Demoted {} active license(s) on device {} superseded by order {}",
                demoted,
                device_id,
                input.order_id
            );
        }
    }

    match existing {
        Some(record) if record.license_key.is_some() => {
            tx.execute(
                "UPDATE licenses
                 SET status = 'active', variant = ?1, expires_at = ?2,
                     activated_at = COALESCE(activated_at, ?3), subscribed_at = ?3
                 WHERE id = ?4",
                params![&input.variant, input.expires_at, now, &record.id],
            )?;
            let record = reload(&tx, &record.id)?;
            tx.commit()?;
            Ok(SubscriptionOutcome::Activated(record))
        }
        Some(placeholder) => {
            // Duplicate delivery before the key arrived
            tx.execute(
                "UPDATE licenses SET variant = ?1, expires_at = ?2, subscribed_at = ?3 WHERE id = ?4",
                params![&input.variant, input.expires_at, now, &placeholder.id],
            )?;
            let record = reload(&tx, &placeholder.id)?;
            tx.commit()?;
            Ok(SubscriptionOutcome::Placeholder(record))
        }
        None => {
            let id = gen_id();
            tx.execute(
                "INSERT INTO licenses (id, license_key, order_id, variant, status, device_id, switch_count, expires_at, created_at, subscribed_at)
                 VALUES (?1, NULL, ?2, ?3, 'pending', ?4, 0, ?5, ?6, ?6)",
                params![
                    &id,
                    &input.order_id,
                    &input.variant,
                    &input.device_id,
                    input.expires_at,
                    now
                ],
            )?;
            let record = reload(&tx, &id)?;
            tx.commit()?;
            Ok(SubscriptionOutcome::Placeholder(record))
        }
    }
}

/// Expire every record of an order. Returns the number of rows changed.
pub fn expire_licenses_for_order(conn: &Connection, order_id: &str) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE licenses SET status = 'expired' WHERE order_id = ?1 AND status != 'expired'",
        params![order_id],
    )?;
    Ok(updated)
}

pub fn set_license_status(
    conn: &Connection,
    license_key: &str,
    status: LicenseStatus,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE licenses SET status = ?1 WHERE license_key = ?2",
        params![status.as_ref(), license_key],
    )?;
    Ok(updated > 0)
}

fn reload(conn: &Connection, id: &str) -> Result<LicenseRecord> {
    query_one(
        conn,
        &format!("SELECT {} FROM licenses WHERE id = ?1", LICENSE_COLS),
        &[&id],
    )?
    .ok_or_else(|| AppError::Internal(format!("License {} not found after update", id)))
}

// ============ Usage Ledger ============

pub fn create_usage_record(conn: &Connection, input: &NewUsageRecord) -> Result<UsageRecord> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO usage_records (id, license_key, device_id, plan, variant, quantity, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &id,
            &input.license_key,
            &input.device_id,
            &input.plan,
            &input.variant,
            input.quantity,
            now
        ],
    )?;

    Ok(UsageRecord {
        id,
        license_key: input.license_key.clone(),
        device_id: input.device_id.clone(),
        plan: input.plan.clone(),
        variant: input.variant.clone(),
        quantity: input.quantity,
        recorded_at: now,
    })
}

/// Sum of all recorded quantities for a key (0 when nothing was recorded).
///
/// `TOTAL` cannot overflow like `SUM`; the result saturates at `i64::MAX`.
pub fn total_used(conn: &Connection, license_key: &str) -> Result<i64> {
    let total: f64 = conn.query_row(
        "SELECT TOTAL(quantity) FROM usage_records WHERE license_key = ?1",
        params![license_key],
        |row| row.get(0),
    )?;
    Ok(total as i64)
}

pub fn list_usage_for_license(conn: &Connection, license_key: &str) -> Result<Vec<UsageRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM usage_records WHERE license_key = ?1 ORDER BY recorded_at DESC, rowid DESC",
            USAGE_COLS
        ),
        &[&license_key],
    )
}

// ============ Analytics Events ============

pub fn create_event(conn: &Connection, input: &NewEvent) -> Result<EventRecord> {
    let id = gen_id();
    let now = now();
    let metadata = input
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO events (id, event, license_key, plan, email, extension_version, browser, draft_id, metadata, occurred_at, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            &id,
            &input.event,
            &input.license_key,
            &input.plan,
            &input.email,
            &input.extension_version,
            &input.browser,
            &input.draft_id,
            &metadata,
            input.occurred_at,
            now
        ],
    )?;

    Ok(EventRecord {
        id,
        event: input.event.clone(),
        license_key: input.license_key.clone(),
        plan: input.plan.clone(),
        email: input.email.clone(),
        extension_version: input.extension_version.clone(),
        browser: input.browser.clone(),
        draft_id: input.draft_id.clone(),
        metadata: input.metadata.clone(),
        occurred_at: input.occurred_at,
        recorded_at: now,
    })
}

pub fn list_events_by_name(conn: &Connection, event: &str) -> Result<Vec<EventRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM events WHERE event = ?1 ORDER BY recorded_at DESC, rowid DESC",
            EVENT_COLS
        ),
        &[&event],
    )
}
