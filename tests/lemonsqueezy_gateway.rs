//! LemonSqueezy client against a mock provider: response normalisation,
//! retry policy and failure mapping.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use smartdraft::config::LemonSqueezyConfig;
use smartdraft::error::AppError;
use smartdraft::payments::{LemonSqueezyClient, LicenseGateway};

const MONTHLY: &str = "SmartDraft Premium (Monthly)";

fn mock_client(base_url: &str, timeout: Duration) -> LemonSqueezyClient {
    LemonSqueezyClient::new(&LemonSqueezyConfig {
        api_key: "test-key".to_string(),
        api_base_url: format!("{}/", base_url),
        timeout,
    })
    .unwrap()
}

#[tokio::test]
async fn test_validate_normalises_license_api_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/licenses/validate"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_string_contains("license_key=ABC123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "valid": true,
            "error": null,
            "license_key": {
                "id": 1,
                "status": "active",
                "key": "ABC123",
                "expires_at": "2030-01-01T00:00:00.000000Z"
            },
            "meta": { "order_id": 5001, "variant_name": MONTHLY }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = mock_client(&server.uri(), Duration::from_secs(5));
    let info = client.validate("ABC123").await.unwrap().unwrap();

    assert!(info.valid);
    assert_eq!(info.order_id.as_deref(), Some("5001"));
    assert_eq!(info.variant.as_deref(), Some(MONTHLY));
    assert_eq!(info.expires_at, Some(1_893_456_000));
}

#[tokio::test]
async fn test_validate_normalises_json_api_document() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/licenses/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "type": "license-keys",
                "id": "1",
                "attributes": {
                    "status": "active",
                    "order_id": "5001",
                    "variant_name": MONTHLY,
                    "expires_at": null
                }
            }
        })))
        .mount(&server)
        .await;

    let client = mock_client(&server.uri(), Duration::from_secs(5));
    let info = client.validate("ABC123").await.unwrap().unwrap();

    assert!(info.valid);
    assert_eq!(info.order_id.as_deref(), Some("5001"));
    assert_eq!(info.variant.as_deref(), Some(MONTHLY));
    assert_eq!(info.expires_at, None);
}

#[tokio::test]
async fn test_validate_unknown_or_disabled_key_is_not_valid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/licenses/validate"))
        .and(body_string_contains("license_key=MISSING"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "valid": false,
            "error": "license_key not found.",
            "license_key": null,
            "meta": null
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/licenses/validate"))
        .and(body_string_contains("license_key=DISABLED"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "valid": true,
            "license_key": { "status": "disabled", "expires_at": null },
            "meta": { "order_id": 1, "variant_name": MONTHLY }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/licenses/validate"))
        .and(body_string_contains("license_key=GARBAGE"))
        .respond_with(ResponseTemplate::new(400).set_body_string("<html>bad request</html>"))
        .mount(&server)
        .await;

    let client = mock_client(&server.uri(), Duration::from_secs(5));

    let missing = client.validate("MISSING").await.unwrap();
    assert!(!missing.unwrap().valid);

    let disabled = client.validate("DISABLED").await.unwrap();
    assert!(!disabled.unwrap().valid);

    assert_eq!(client.validate("GARBAGE").await.unwrap(), None);
}

#[tokio::test]
async fn test_provider_outage_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/licenses/validate"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = mock_client(&server.uri(), Duration::from_secs(5));
    let err = client.validate("ABC123").await.unwrap_err();

    assert!(matches!(err, AppError::Upstream(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_read_timeout_is_retried_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/licenses/validate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "valid": true }))
                .set_delay(Duration::from_secs(2)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let client = mock_client(&server.uri(), Duration::from_millis(200));
    let err = client.validate("ABC123").await.unwrap_err();

    assert!(matches!(err, AppError::Upstream(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_activate_timeout_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/licenses/activate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "activated": true }))
                .set_delay(Duration::from_secs(2)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = mock_client(&server.uri(), Duration::from_millis(200));
    let err = client.activate("ABC123", "smartdraft").await.unwrap_err();

    assert!(matches!(err, AppError::Upstream(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_activate_reports_provider_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/licenses/activate"))
        .and(body_string_contains("license_key=ABC123"))
        .and(body_string_contains("instance_name=device-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "activated": true,
            "error": null,
            "license_key": { "status": "active", "expires_at": null },
            "instance": { "id": "47596ad9", "name": "device-1" },
            "meta": { "order_id": 5001, "variant_name": MONTHLY }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/licenses/activate"))
        .and(body_string_contains("license_key=USEDUP"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "activated": false,
            "error": "This license key has reached the activation limit.",
            "license_key": { "status": "active", "expires_at": null },
            "meta": { "order_id": 5002, "variant_name": MONTHLY }
        })))
        .mount(&server)
        .await;

    let client = mock_client(&server.uri(), Duration::from_secs(5));

    assert!(client.activate("ABC123", "device-1").await.unwrap());
    assert!(!client.activate("USEDUP", "device-1").await.unwrap());
}

#[tokio::test]
async fn test_order_item_variant_lookup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/order-items/9001"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "type": "order-items",
                "id": "9001",
                "attributes": { "order_id": 5001, "variant_name": MONTHLY }
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/order-items/404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "errors": [] })))
        .mount(&server)
        .await;

    let client = mock_client(&server.uri(), Duration::from_secs(5));

    assert_eq!(client.variant_name_for_order_item("9001").await.unwrap(), MONTHLY);
    let err = client.variant_name_for_order_item("404").await.unwrap_err();
    assert!(matches!(err, AppError::Upstream(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_unreachable_provider_is_upstream_error() {
    // Nothing listens on port 1
    let client = mock_client("http://127.0.0.1:1", Duration::from_secs(2));
    let err = client.validate("ABC123").await.unwrap_err();

    assert!(matches!(err, AppError::Upstream(_)), "got {:?}", err);
}
