//! Signed HTTP client for the external access-control platform.
//!
//! Each call carries a fresh `X-Ca-Timestamp` and a signature computed over
//! exactly the header values that go on the wire. Calls are attempted once;
//! retry policy belongs to the caller.

use chrono::Utc;
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use service_core::utils::{sign_canonical, CanonicalHeaders};
use std::time::Duration;

use super::error::ServiceError;
use crate::config::AccessPlatformConfig;

pub const CONTENT_TYPE_JSON: &str = "application/json;charset=UTF-8";
const ACCEPT_JSON: &str = "application/json";
const ERROR_MESSAGE_HEADER: &str = "x-ca-error-message";
const SUCCESS_CODE: &str = "0";

/// Application key pair issued by the platform.
#[derive(Clone)]
pub struct SigningKey {
    app_key: String,
    app_secret: SecretString,
}

impl SigningKey {
    pub fn new(app_key: String, app_secret: SecretString) -> Result<Self, ServiceError> {
        if app_key.trim().is_empty() {
            return Err(ServiceError::Configuration(
                "access platform app key is empty".to_string(),
            ));
        }
        if app_secret.expose_secret().is_empty() {
            return Err(ServiceError::Configuration(
                "access platform app secret is empty".to_string(),
            ));
        }
        Ok(Self {
            app_key,
            app_secret,
        })
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("app_key", &self.app_key)
            .field("app_secret", &"[REDACTED]")
            .finish()
    }
}

/// Response envelope used by every platform endpoint.
#[derive(Debug, Deserialize, Serialize)]
pub struct PlatformEnvelope<T> {
    #[serde(deserialize_with = "code_as_string")]
    pub code: String,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

fn code_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

#[derive(Clone)]
pub struct AccessPlatformClient {
    client: Client,
    base_url: Url,
    key: SigningKey,
    default_timeout: Duration,
}

impl AccessPlatformClient {
    pub fn new(config: &AccessPlatformConfig) -> Result<Self, ServiceError> {
        let key = SigningKey::new(config.app_key.clone(), config.app_secret.clone())?;
        Self::with_key(
            &config.base_url,
            key,
            Duration::from_secs(config.timeout_seconds),
        )
    }

    pub fn with_key(
        base_url: &str,
        key: SigningKey,
        default_timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let base_url = Url::parse(base_url.trim_end_matches('/')).map_err(|e| {
            ServiceError::Configuration(format!("invalid access platform URL: {}", e))
        })?;

        Ok(Self {
            client: Client::new(),
            base_url,
            key,
            default_timeout,
        })
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn url_for(&self, path: &str) -> Result<Url, ServiceError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined)
            .map_err(|e| ServiceError::Validation(format!("invalid request path {}: {}", path, e)))
    }

    /// Headers for one call, signature included.
    pub fn signed_headers(
        &self,
        method: &str,
        path: &str,
    ) -> Result<Vec<(String, String)>, ServiceError> {
        let timestamp = Utc::now().timestamp_millis().to_string();

        let canonical = CanonicalHeaders::from_pairs([
            ("Accept", ACCEPT_JSON),
            ("Content-Type", CONTENT_TYPE_JSON),
            ("X-Ca-Key", self.key.app_key()),
            ("X-Ca-Timestamp", timestamp.as_str()),
        ]);
        let signature = sign_canonical(
            method,
            path,
            &canonical,
            self.key.app_secret.expose_secret(),
        )?;

        Ok(vec![
            ("Accept".to_string(), ACCEPT_JSON.to_string()),
            ("Content-Type".to_string(), CONTENT_TYPE_JSON.to_string()),
            ("X-Ca-Key".to_string(), self.key.app_key().to_string()),
            ("X-Ca-Timestamp".to_string(), timestamp),
            (
                "X-Ca-Signature-Headers".to_string(),
                canonical.signature_headers_value(),
            ),
            ("X-Ca-Signature".to_string(), signature),
        ])
    }

    /// POST `body` as JSON and return the envelope's `data`.
    pub async fn post_json<B, T>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<Option<T>, ServiceError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url_for(path)?;
        let payload = serde_json::to_vec(body)
            .map_err(|e| ServiceError::Validation(format!("request body is not JSON: {}", e)))?;

        let mut request = self.client.post(url.clone()).timeout(timeout).body(payload);
        for (name, value) in self.signed_headers("POST", url.path())? {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(path = %url.path(), error = %e, "Access platform request failed");
            ServiceError::Platform {
                status: 0,
                code: if e.is_timeout() { "timeout" } else { "transport" }.to_string(),
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        let error_header = response
            .headers()
            .get(ERROR_MESSAGE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.map_err(|e| ServiceError::Platform {
            status: status.as_u16(),
            code: "transport".to_string(),
            message: e.to_string(),
        })?;

        interpret_response(status, error_header, &text)
    }
}

fn interpret_response<T: DeserializeOwned>(
    status: StatusCode,
    error_header: Option<String>,
    body: &str,
) -> Result<Option<T>, ServiceError> {
    let envelope = serde_json::from_str::<PlatformEnvelope<serde_json::Value>>(body).ok();
    let code = envelope
        .as_ref()
        .map(|e| e.code.clone())
        .unwrap_or_else(|| status.as_u16().to_string());
    let message = envelope
        .as_ref()
        .map(|e| e.msg.clone())
        .filter(|m| !m.is_empty())
        .or_else(|| error_header.clone())
        .unwrap_or_else(|| body.to_string());

    let signature_rejected = matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        || error_header
            .as_deref()
            .is_some_and(|h| h.to_ascii_lowercase().contains("signature"));

    if signature_rejected {
        tracing::warn!(status = status.as_u16(), code = %code, "Access platform rejected signature");
        return Err(ServiceError::SignatureMismatch {
            code,
            message: error_header.unwrap_or(message),
        });
    }

    let Some(envelope) = envelope.filter(|_| status.is_success()) else {
        return Err(ServiceError::Platform {
            status: status.as_u16(),
            code,
            message,
        });
    };

    if envelope.code != SUCCESS_CODE {
        return Err(ServiceError::Platform {
            status: status.as_u16(),
            code: envelope.code,
            message: envelope.msg,
        });
    }

    envelope
        .data
        .filter(|d| !d.is_null())
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| ServiceError::Platform {
            status: status.as_u16(),
            code: "decode".to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SigningKey {
        SigningKey::new("K".to_string(), SecretString::new("secret".to_string())).unwrap()
    }

    #[test]
    fn test_empty_key_material_is_a_configuration_error() {
        assert!(matches!(
            SigningKey::new(String::new(), SecretString::new("s".to_string())),
            Err(ServiceError::Configuration(_))
        ));
        assert!(matches!(
            SigningKey::new("K".to_string(), SecretString::new(String::new())),
            Err(ServiceError::Configuration(_))
        ));
    }

    #[test]
    fn test_signed_headers_verify_against_transmitted_values() {
        let client =
            AccessPlatformClient::with_key("https://platform.test/artemis", key(), Duration::from_secs(1))
                .unwrap();
        let headers = client.signed_headers("POST", "/artemis/api/x").unwrap();

        let signature = headers
            .iter()
            .find(|(k, _)| k == "X-Ca-Signature")
            .map(|(_, v)| v.clone())
            .unwrap();
        let signed_list = headers
            .iter()
            .find(|(k, _)| k == "X-Ca-Signature-Headers")
            .map(|(_, v)| v.clone())
            .unwrap();

        assert_eq!(signed_list, "x-ca-key,x-ca-timestamp");
        assert!(service_core::utils::verify(
            "POST",
            "/artemis/api/x",
            headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            "secret",
            &signature,
        )
        .unwrap());
    }

    #[test]
    fn test_url_keeps_base_path_prefix() {
        let client =
            AccessPlatformClient::with_key("https://platform.test/artemis/", key(), Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            client.url_for("/api/x").unwrap().path(),
            "/artemis/api/x"
        );
    }

    #[test]
    fn test_success_envelope_returns_data() {
        let data: Option<serde_json::Value> = interpret_response(
            StatusCode::OK,
            None,
            r#"{"code":"0","msg":"success","data":{"total":2}}"#,
        )
        .unwrap();
        assert_eq!(data.unwrap()["total"], 2);
    }

    #[test]
    fn test_signature_rejection_passes_platform_code_through() {
        let result: Result<Option<serde_json::Value>, _> = interpret_response(
            StatusCode::UNAUTHORIZED,
            Some("Invalid Signature".to_string()),
            "",
        );
        match result {
            Err(ServiceError::SignatureMismatch { code, message }) => {
                assert_eq!(code, "401");
                assert_eq!(message, "Invalid Signature");
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_business_error_is_platform_error() {
        let result: Result<Option<serde_json::Value>, _> = interpret_response(
            StatusCode::BAD_GATEWAY,
            None,
            "upstream unavailable",
        );
        assert!(matches!(
            result,
            Err(ServiceError::Platform { status: 502, .. })
        ));

        let result: Result<Option<serde_json::Value>, _> = interpret_response(
            StatusCode::OK,
            None,
            r#"{"code":"0x02401007","msg":"resource not found"}"#,
        );
        match result {
            Err(ServiceError::Platform { status, code, message }) => {
                assert_eq!(status, 200);
                assert_eq!(code, "0x02401007");
                assert_eq!(message, "resource not found");
            }
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}
