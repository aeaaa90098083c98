use async_trait::async_trait;
use chrono::DateTime;
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{LicenseGateway, ProviderLicenseInfo};
use crate::config::LemonSqueezyConfig;
use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Which transport failures may be retried (once).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryPolicy {
    /// Reads: retry on timeout or connect failure
    Idempotent,
    /// Writes: retry only when the request never reached the provider
    ConnectOnly,
}

impl RetryPolicy {
    fn should_retry(self, err: &reqwest::Error) -> bool {
        match self {
            RetryPolicy::Idempotent => err.is_timeout() || err.is_connect(),
            RetryPolicy::ConnectOnly => err.is_connect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LemonSqueezyClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl LemonSqueezyClient {
    pub fn new(config: &LemonSqueezyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Send a request, retrying at most once on a transient transport failure.
    async fn send<F>(&self, policy: RetryPolicy, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut retried = false;
        loop {
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) if !retried && policy.should_retry(&e) => {
                    tracing::warn!("LemonSqueezy request failed, retrying once: {}", e);
                    retried = true;
                }
                Err(e) => {
                    return Err(AppError::Upstream(format!("LemonSqueezy request failed: {}", e)));
                }
            }
        }
    }

    fn license_api_request(&self, path: &str, form: &[(&str, &str)]) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .form(form)
    }
}

/// Provider failures we must not mistake for "this key is invalid".
fn is_upstream_failure(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::UNAUTHORIZED
}

async fn read_license_response(response: Response) -> Result<Option<LicenseApiResponse>> {
    let status = response.status();
    if is_upstream_failure(status) {
        let error_text = response.text().await.unwrap_or_default();
        return Err(AppError::Upstream(format!(
            "LemonSqueezy API error ({}): {}",
            status, error_text
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| AppError::Upstream(format!("Failed to read LemonSqueezy response: {}", e)))?;

    // 4xx answers (unknown key, activation limit) still carry a license body
    match serde_json::from_slice::<LicenseApiResponse>(&body) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) if status.is_success() => Err(AppError::Upstream(format!(
            "Failed to parse LemonSqueezy response: {}",
            e
        ))),
        Err(_) => Ok(None),
    }
}

#[async_trait]
impl LicenseGateway for LemonSqueezyClient {
    async fn activate(&self, license_key: &str, instance_name: &str) -> Result<bool> {
        let form = [("license_key", license_key), ("instance_name", instance_name)];
        let response = self
            .send(RetryPolicy::ConnectOnly, || {
                self.license_api_request("licenses/activate", &form)
            })
            .await?;

        let activated = read_license_response(response)
            .await?
            .map(|r| r.activated())
            .unwrap_or(false);

        Ok(activated)
    }

    async fn validate(&self, license_key: &str) -> Result<Option<ProviderLicenseInfo>> {
        let form = [("license_key", license_key)];
        let response = self
            .send(RetryPolicy::Idempotent, || {
                self.license_api_request("licenses/validate", &form)
            })
            .await?;

        Ok(read_license_response(response)
            .await?
            .and_then(LicenseApiResponse::into_info))
    }

    async fn variant_name_for_order_item(&self, order_item_id: &str) -> Result<String> {
        let url = self.url(&format!("order-items/{}", order_item_id));
        let response = self
            .send(RetryPolicy::Idempotent, || {
                self.client
                    .get(&url)
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .header("Accept", "application/vnd.api+json")
            })
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "LemonSqueezy order item lookup failed ({}): {}",
                status, error_text
            )));
        }

        let item: JsonApiDocument<OrderItemAttributes> = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse LemonSqueezy order item: {}", e)))?;

        item.data
            .attributes
            .variant_name
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Upstream(format!("Order item {} has no variant name", order_item_id)))
    }
}

// ============ License API response shapes ============

/// The provider answers license calls in two shapes: the License API body and
/// a JSON:API document. Both are normalised into `ProviderLicenseInfo`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LicenseApiResponse {
    JsonApi(JsonApiDocument<LicenseAttributes>),
    LicenseApi(LicenseApiBody),
}

#[derive(Debug, Deserialize)]
struct LicenseApiBody {
    #[serde(default)]
    valid: Option<bool>,
    #[serde(default)]
    activated: Option<bool>,
    #[serde(default)]
    license_key: Option<LicenseKeyObject>,
    #[serde(default)]
    meta: Option<LicenseMeta>,
}

#[derive(Debug, Deserialize)]
struct LicenseKeyObject {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LicenseMeta {
    #[serde(default)]
    order_id: Option<Value>,
    #[serde(default)]
    variant_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonApiDocument<A> {
    data: JsonApiResource<A>,
}

#[derive(Debug, Deserialize)]
struct JsonApiResource<A> {
    attributes: A,
}

#[derive(Debug, Deserialize)]
struct LicenseAttributes {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    order_id: Option<Value>,
    #[serde(default)]
    variant_name: Option<String>,
    #[serde(default)]
    expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderItemAttributes {
    #[serde(default)]
    variant_name: Option<String>,
}

fn status_is_usable(status: Option<&str>) -> bool {
    !matches!(status, Some("disabled") | Some("expired"))
}

impl LicenseApiResponse {
    fn activated(&self) -> bool {
        match self {
            LicenseApiResponse::LicenseApi(body) => body.activated.unwrap_or(false),
            LicenseApiResponse::JsonApi(doc) => status_is_usable(doc.data.attributes.status.as_deref()),
        }
    }

    fn into_info(self) -> Option<ProviderLicenseInfo> {
        match self {
            LicenseApiResponse::LicenseApi(body) => {
                let flag = body.valid.or(body.activated)?;
                let key = body.license_key;
                let status = key.as_ref().and_then(|k| k.status.as_deref());
                let valid = flag && status_is_usable(status);
                let expires_at = key
                    .as_ref()
                    .and_then(|k| k.expires_at.as_deref())
                    .and_then(parse_provider_timestamp);
                let (order_id, variant) = match body.meta {
                    Some(meta) => (meta.order_id.as_ref().and_then(json_id), meta.variant_name),
                    None => (None, None),
                };
                Some(ProviderLicenseInfo {
                    valid,
                    order_id,
                    variant,
                    expires_at,
                })
            }
            LicenseApiResponse::JsonApi(doc) => {
                let attrs = doc.data.attributes;
                Some(ProviderLicenseInfo {
                    valid: status_is_usable(attrs.status.as_deref()),
                    order_id: attrs.order_id.as_ref().and_then(json_id),
                    variant: attrs.variant_name,
                    expires_at: attrs.expires_at.as_deref().and_then(parse_provider_timestamp),
                })
            }
        }
    }
}

/// Provider ids arrive as numbers or strings.
pub fn json_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Parse an RFC 3339 timestamp from the provider into Unix seconds.
pub fn parse_provider_timestamp(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.timestamp())
}

// ============ Webhook signature ============

/// Lowercase hex HMAC-SHA256 of the raw payload.
pub fn sign_webhook_payload(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("Invalid webhook secret".into()))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check an `X-Signature` header against the exact bytes received.
pub fn verify_webhook_signature(secret: &str, payload: &[u8], signature: &str) -> Result<bool> {
    if secret.is_empty() {
        return Err(AppError::Internal("Webhook secret is not configured".into()));
    }
    let expected = sign_webhook_payload(secret, payload)?;
    let provided = signature.trim().to_ascii_lowercase();

    Ok(expected.as_bytes().ct_eq(provided.as_bytes()).into())
}

// ============ Webhook payloads ============

#[derive(Debug, Deserialize)]
pub struct LemonSqueezyWebhookEvent {
    pub meta: LemonSqueezyMeta,
    pub data: LemonSqueezyEventData,
}

#[derive(Debug, Deserialize)]
pub struct LemonSqueezyMeta {
    pub event_name: String,
    #[serde(default)]
    pub custom_data: Option<LemonSqueezyCustomData>,
}

/// Checkout custom data set by the extension.
#[derive(Debug, Default, Deserialize)]
pub struct LemonSqueezyCustomData {
    #[serde(default, alias = "deviceId", alias = "client_id", alias = "clientId")]
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LemonSqueezyEventData {
    #[serde(default)]
    pub id: Option<Value>,
    pub attributes: Value,
}

#[derive(Debug, Deserialize)]
pub struct LemonSqueezyLicenseKeyAttributes {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub order_id: Option<Value>,
    #[serde(default)]
    pub order_item_id: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LemonSqueezySubscriptionAttributes {
    #[serde(default)]
    pub order_id: Option<Value>,
    #[serde(default)]
    pub variant_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub renews_at: Option<String>,
    #[serde(default)]
    pub ends_at: Option<String>,
}
