//! Shared test fixtures: a file-backed pool, a scripted billing provider and
//! request helpers.

#![allow(dead_code, unused_imports)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

pub use smartdraft::db::{AppState, DbPool, create_pool, queries};
pub use smartdraft::error::{AppError, Result};
pub use smartdraft::licensing::{Decision, DenialReason, LicenseResolver};
pub use smartdraft::models::*;
pub use smartdraft::payments::{LicenseGateway, ProviderLicenseInfo, sign_webhook_payload};

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const INSTANCE_NAME: &str = "smartdraft-test";

pub const MONTHLY: &str = "SmartDraft Premium (Monthly)";
pub const HALF_YEARLY: &str = "SmartDraft Premium (Half Yearly)";
pub const YEARLY: &str = "SmartDraft Premium (Yearly)";

pub const HOUR: i64 = 3600;
pub const DAY: i64 = 24 * HOUR;

/// Fixed clock for resolver tests: 2024-01-15T10:00:00Z
pub const T0: i64 = 1_705_312_800;

/// Billing provider double with scripted answers and call recording.
#[derive(Default)]
pub struct MockGateway {
    licenses: Mutex<HashMap<String, ProviderLicenseInfo>>,
    variants: Mutex<HashMap<String, String>>,
    activations: Mutex<Vec<(String, String)>>,
    validate_calls: AtomicUsize,
    fail_validate: AtomicBool,
    refuse_activation: AtomicBool,
    fail_activation: AtomicBool,
}

impl MockGateway {
    pub fn with_license(&self, key: &str, info: ProviderLicenseInfo) {
        self.licenses.lock().unwrap().insert(key.to_string(), info);
    }

    pub fn with_valid_license(&self, key: &str, order_id: &str, variant: &str, expires_at: Option<i64>) {
        self.with_license(
            key,
            ProviderLicenseInfo {
                valid: true,
                order_id: Some(order_id.to_string()),
                variant: Some(variant.to_string()),
                expires_at,
            },
        );
    }

    pub fn with_order_item(&self, order_item_id: &str, variant: &str) {
        self.variants
            .lock()
            .unwrap()
            .insert(order_item_id.to_string(), variant.to_string());
    }

    pub fn fail_validate(&self) {
        self.fail_validate.store(true, Ordering::SeqCst);
    }

    pub fn refuse_activation(&self) {
        self.refuse_activation.store(true, Ordering::SeqCst);
    }

    pub fn fail_activation(&self) {
        self.fail_activation.store(true, Ordering::SeqCst);
    }

    pub fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }

    pub fn activations(&self) -> Vec<(String, String)> {
        self.activations.lock().unwrap().clone()
    }
}

#[async_trait]
impl LicenseGateway for MockGateway {
    async fn activate(&self, license_key: &str, instance_name: &str) -> Result<bool> {
        self.activations
            .lock()
            .unwrap()
            .push((license_key.to_string(), instance_name.to_string()));
        if self.fail_activation.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("connection refused".into()));
        }
        Ok(!self.refuse_activation.load(Ordering::SeqCst))
    }

    async fn validate(&self, license_key: &str) -> Result<Option<ProviderLicenseInfo>> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_validate.load(Ordering::SeqCst) {
            return Err(AppError::Upstream("provider timed out".into()));
        }
        Ok(self.licenses.lock().unwrap().get(license_key).cloned())
    }

    async fn variant_name_for_order_item(&self, order_item_id: &str) -> Result<String> {
        self.variants
            .lock()
            .unwrap()
            .get(order_item_id)
            .cloned()
            .ok_or_else(|| AppError::Upstream(format!("order item {} not found", order_item_id)))
    }
}

pub struct TestContext {
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
    _dir: TempDir,
}

impl TestContext {
    pub fn resolver(&self) -> LicenseResolver {
        LicenseResolver::new(self.state.db.clone(), self.state.gateway.clone())
    }

    pub fn app(&self) -> Router {
        smartdraft::handlers::router().with_state(self.state.clone())
    }

    pub fn license(&self, key: &str) -> LicenseRecord {
        let conn = self.state.db.get().unwrap();
        queries::get_license_by_key(&conn, key)
            .unwrap()
            .expect("license should exist")
    }

    pub fn license_for_order(&self, order_id: &str) -> Option<LicenseRecord> {
        let conn = self.state.db.get().unwrap();
        queries::get_license_by_order_id(&conn, order_id).unwrap()
    }
}

/// Pools over `:memory:` give every connection its own database, so tests use
/// a throwaway file instead.
pub fn create_test_context() -> TestContext {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");
    let db = create_pool(path.to_str().unwrap()).unwrap();
    let gateway = Arc::new(MockGateway::default());

    let state = AppState {
        db,
        gateway: gateway.clone(),
        webhook_secret: WEBHOOK_SECRET.to_string(),
        activation_instance_name: INSTANCE_NAME.to_string(),
    };

    TestContext {
        state,
        gateway,
        _dir: dir,
    }
}

/// Store an already-active license bound to `device_id`.
pub fn seed_active_license(
    conn: &rusqlite::Connection,
    key: &str,
    order_id: &str,
    variant: &str,
    device_id: &str,
    expires_at: Option<i64>,
    created_at: i64,
) -> LicenseRecord {
    queries::insert_synced_license(
        conn,
        &NewSyncedLicense {
            license_key: key.to_string(),
            order_id: Some(order_id.to_string()),
            variant: variant.to_string(),
            device_id: device_id.to_string(),
            expires_at,
        },
        created_at,
    )
    .unwrap()
}

pub fn seed_usage(conn: &rusqlite::Connection, key: &str, quantity: i64) {
    queries::create_usage_record(
        conn,
        &NewUsageRecord {
            license_key: key.to_string(),
            device_id: None,
            plan: "premium".to_string(),
            variant: MONTHLY.to_string(),
            quantity,
        },
    )
    .unwrap();
}

pub fn denial_reason(decision: &Decision) -> Option<DenialReason> {
    match decision {
        Decision::Denied(d) => Some(d.reason),
        Decision::Allowed(_) => None,
    }
}

// ============ HTTP helpers ============

pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
    (status, json)
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

/// Deliver a webhook signed with the test secret.
pub async fn post_webhook(app: Router, payload: &Value) -> (StatusCode, Value) {
    let body = payload.to_string();
    let signature = sign_webhook_payload(WEBHOOK_SECRET, body.as_bytes()).unwrap();
    send(
        app,
        Request::builder()
            .method("POST")
            .uri("/lemon-webhook")
            .header("content-type", "application/json")
            .header("x-signature", signature)
            .body(Body::from(body))
            .unwrap(),
    )
    .await
}

// ============ Webhook payloads ============

pub fn license_key_created_event(
    key: &str,
    order_id: i64,
    order_item_id: i64,
    device_id: Option<&str>,
) -> Value {
    let mut meta = json!({ "event_name": "license_key_created" });
    if let Some(device_id) = device_id {
        meta["custom_data"] = json!({ "device_id": device_id });
    }
    json!({
        "meta": meta,
        "data": {
            "type": "license-keys",
            "id": "1",
            "attributes": {
                "key": key,
                "order_id": order_id,
                "order_item_id": order_item_id,
                "status": "inactive",
                "expires_at": null
            }
        }
    })
}

pub fn subscription_created_event(
    order_id: i64,
    variant: &str,
    renews_at: Option<&str>,
    device_id: Option<&str>,
) -> Value {
    let mut meta = json!({ "event_name": "subscription_created" });
    if let Some(device_id) = device_id {
        meta["custom_data"] = json!({ "device_id": device_id });
    }
    json!({
        "meta": meta,
        "data": {
            "type": "subscriptions",
            "id": "77",
            "attributes": {
                "order_id": order_id,
                "variant_name": variant,
                "status": "active",
                "renews_at": renews_at,
                "ends_at": null
            }
        }
    })
}
