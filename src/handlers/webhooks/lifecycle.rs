//! License lifecycle transitions driven by billing provider events.
//!
//! `license_key_created` and `subscription_created` for one order may arrive
//! in either order. Whichever comes first leaves a record the other one
//! completes; the record only becomes `active` once both have been seen.

use chrono::Utc;
use serde::de::DeserializeOwned;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::licensing::plan_for;
use crate::models::{LicenseKeyCreated, LicenseStatus, SubscriptionConfirmed, UNKNOWN_CLIENT};
use crate::payments::{
    LemonSqueezyLicenseKeyAttributes, LemonSqueezySubscriptionAttributes,
    LemonSqueezyWebhookEvent, json_id, parse_provider_timestamp,
};
use crate::util::non_empty;

fn attributes<T: DeserializeOwned>(event: &LemonSqueezyWebhookEvent) -> Result<T> {
    serde_json::from_value(event.data.attributes.clone()).map_err(|e| {
        AppError::BadRequest(format!(
            "Malformed {} attributes: {}",
            event.meta.event_name, e
        ))
    })
}

fn required<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| AppError::BadRequest(format!("Missing {}", field)))
}

fn custom_device_id(event: &LemonSqueezyWebhookEvent) -> Option<String> {
    non_empty(
        event
            .meta
            .custom_data
            .as_ref()
            .and_then(|c| c.device_id.clone()),
    )
}

/// Provider activation after a record turns active. Failures never fail the webhook.
async fn activate_with_provider(state: &AppState, license_key: &str) {
    match state
        .gateway
        .activate(license_key, &state.activation_instance_name)
        .await
    {
        Ok(true) => tracing::info!("Activated license {} with provider", license_key),
        Ok(false) => tracing::warn!("Provider refused activation of {}", license_key),
        Err(e) => tracing::warn!("Provider activation of {} failed: {}", license_key, e),
    }
}

pub async fn process_license_key_created(
    state: &AppState,
    event: &LemonSqueezyWebhookEvent,
) -> Result<&'static str> {
    let attrs: LemonSqueezyLicenseKeyAttributes = attributes(event)?;

    let license_key = required(non_empty(attrs.key), "license key")?;
    let order_id = required(attrs.order_id.as_ref().and_then(json_id), "order id")?;
    let order_item_id = required(attrs.order_item_id.as_ref().and_then(json_id), "order item id")?;
    let device_id = custom_device_id(event).unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

    let variant = state
        .gateway
        .variant_name_for_order_item(&order_item_id)
        .await?;
    let variant = required(non_empty(Some(variant)), "variant")?;

    let now = Utc::now().timestamp();
    let expires_at = attrs
        .expires_at
        .as_deref()
        .and_then(parse_provider_timestamp)
        .or_else(|| plan_for(&variant).expires_at(now));

    let input = LicenseKeyCreated {
        license_key: license_key.clone(),
        order_id,
        order_item_id: Some(order_item_id),
        variant,
        device_id,
        expires_at,
    };

    let outcome = {
        let mut conn = state.db.get()?;
        queries::upsert_created_license_key(&mut conn, &input, now)?
    };

    match outcome {
        queries::KeyCreatedOutcome::Created(record) => {
            tracing::info!(
                "License {} created for order {} ({}), awaiting subscription",
                license_key,
                input.order_id,
                record.variant
            );
        }
        queries::KeyCreatedOutcome::Updated(record) => {
            tracing::info!(
                "License {} already known, refreshed (status={})",
                license_key,
                record.status.as_ref()
            );
        }
        queries::KeyCreatedOutcome::Reconciled(record) => {
            tracing::info!(
                "License {} joined subscription placeholder for order {} (status={})",
                license_key,
                input.order_id,
                record.status.as_ref()
            );
            if record.status == LicenseStatus::Active {
                activate_with_provider(state, &license_key).await;
            }
        }
    }

    Ok("OK")
}

pub async fn process_subscription_created(
    state: &AppState,
    event: &LemonSqueezyWebhookEvent,
) -> Result<&'static str> {
    let attrs: LemonSqueezySubscriptionAttributes = attributes(event)?;

    let order_id = required(attrs.order_id.as_ref().and_then(json_id), "order id")?;
    let variant = required(non_empty(attrs.variant_name), "variant")?;

    let now = Utc::now().timestamp();
    let expires_at = attrs
        .renews_at
        .as_deref()
        .and_then(parse_provider_timestamp)
        .or_else(|| attrs.ends_at.as_deref().and_then(parse_provider_timestamp))
        .or_else(|| plan_for(&variant).expires_at(now));

    let input = SubscriptionConfirmed {
        order_id,
        variant,
        expires_at,
        device_id: custom_device_id(event),
    };

    let outcome = {
        let mut conn = state.db.get()?;
        queries::confirm_subscription(&mut conn, &input, now)?
    };

    match outcome {
        queries::SubscriptionOutcome::Activated(record) => {
            tracing::info!(
                "Subscription for order {} activated license ({}, expires_at={:?})",
                input.order_id,
                record.variant,
                record.expires_at
            );
            if let Some(license_key) = record.license_key.as_deref() {
                activate_with_provider(state, license_key).await;
            }
        }
        queries::SubscriptionOutcome::Retired(record) => {
            tracing::info!(
                "Subscription for order {} ignored, license already {}",
                input.order_id,
                record.status.as_ref()
            );
        }
        queries::SubscriptionOutcome::Placeholder(_) => {
            tracing::info!(
                "Subscription for order {} arrived before its license key",
                input.order_id
            );
        }
    }

    Ok("OK")
}

pub fn process_subscription_expired(
    state: &AppState,
    event: &LemonSqueezyWebhookEvent,
) -> Result<&'static str> {
    let attrs: LemonSqueezySubscriptionAttributes = attributes(event)?;
    let order_id = required(attrs.order_id.as_ref().and_then(json_id), "order id")?;

    let conn = state.db.get()?;
    let expired = queries::expire_licenses_for_order(&conn, &order_id)?;
    tracing::info!("Subscription for order {} expired ({} record(s))", order_id, expired);

    Ok("OK")
}

pub fn process_license_key_updated(
    state: &AppState,
    event: &LemonSqueezyWebhookEvent,
) -> Result<&'static str> {
    let attrs: LemonSqueezyLicenseKeyAttributes = attributes(event)?;
    let license_key = required(non_empty(attrs.key), "license key")?;

    if attrs.status.as_deref() != Some("disabled") {
        return Ok("OK");
    }

    let conn = state.db.get()?;
    if queries::set_license_status(&conn, &license_key, LicenseStatus::Inactive)? {
        tracing::info!("License {} disabled by provider", license_key);
    } else {
        tracing::debug!("Disabled license {} is not stored locally", license_key);
    }

    Ok("OK")
}
