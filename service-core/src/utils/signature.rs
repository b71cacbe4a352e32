//! Canonical request signing for calls to the access platform.
//!
//! The string-to-sign is newline joined, in this order:
//!
//! ```text
//! METHOD
//! Accept
//! Content-MD5
//! Content-Type
//! Date
//! x-ca-<name>:<value>      (zero or more, ascending by lowercase name)
//! /request/path            (query string removed)
//! ```
//!
//! The signature is HMAC-SHA256 over the UTF-8 bytes of that string, base64
//! encoded. Header names are lowercased once by [`CanonicalHeaders`]; the
//! signer and the verifier both go through it.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-ca-signature";
pub const SIGNATURE_HEADERS_HEADER: &str = "x-ca-signature-headers";
pub const TIMESTAMP_HEADER: &str = "x-ca-timestamp";
const CUSTOM_HEADER_PREFIX: &str = "x-ca-";
const FIXED_HEADERS: [&str; 4] = ["accept", "content-md5", "content-type", "date"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Header set keyed by lowercase name.
///
/// Values are kept byte for byte; only names are normalised. When two input
/// names collide after lowercasing, the later one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalHeaders(BTreeMap<String, String>);

impl CanonicalHeaders {
    pub fn from_pairs<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self(
            headers
                .into_iter()
                .map(|(k, v)| (k.as_ref().trim().to_ascii_lowercase(), v.as_ref().to_string()))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    fn has_timestamp(&self) -> bool {
        self.get(TIMESTAMP_HEADER).is_some_and(|v| !v.trim().is_empty())
    }

    /// `x-ca-*` headers that take part in the signature, sorted by name.
    pub fn signed_headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter(|(k, _)| {
                k.starts_with(CUSTOM_HEADER_PREFIX)
                    && k.as_str() != SIGNATURE_HEADER
                    && k.as_str() != SIGNATURE_HEADERS_HEADER
            })
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Value for the `X-Ca-Signature-Headers` header.
    pub fn signature_headers_value(&self) -> String {
        self.signed_headers()
            .map(|(k, _)| k)
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn strip_query(path: &str) -> &str {
    match path.split_once('?') {
        Some((path, _)) => path,
        None => path,
    }
}

/// Build the canonical string-to-sign.
pub fn string_to_sign(method: &str, path: &str, headers: &CanonicalHeaders) -> String {
    let mut lines = Vec::with_capacity(FIXED_HEADERS.len() + 2);
    lines.push(method.to_ascii_uppercase());
    for name in FIXED_HEADERS {
        lines.push(headers.get(name).unwrap_or_default().to_string());
    }
    for (name, value) in headers.signed_headers() {
        lines.push(format!("{}:{}", name, value));
    }
    lines.push(strip_query(path).to_string());
    lines.join("\n")
}

fn mac_for(secret: &str) -> Result<HmacSha256, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::Configuration(
            "signing secret is empty".to_string(),
        ));
    }
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SignatureError::Configuration(format!("invalid signing key: {}", e)))
}

/// Sign an already normalised header set. The set must carry a non-empty
/// `x-ca-timestamp`.
pub fn sign_canonical(
    method: &str,
    path: &str,
    headers: &CanonicalHeaders,
    secret: &str,
) -> Result<String, SignatureError> {
    let mut mac = mac_for(secret)?;
    if !headers.has_timestamp() {
        return Err(SignatureError::Configuration(
            "x-ca-timestamp header is required".to_string(),
        ));
    }
    mac.update(string_to_sign(method, path, headers).as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Compute the base64 HMAC-SHA256 signature for one outbound call.
pub fn sign<I, K, V>(
    method: &str,
    path: &str,
    headers: I,
    secret: &str,
) -> Result<String, SignatureError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    sign_canonical(method, path, &CanonicalHeaders::from_pairs(headers), secret)
}

/// Verify a presented signature using constant-time comparison. A request
/// without a timestamp never verifies.
pub fn verify<I, K, V>(
    method: &str,
    path: &str,
    headers: I,
    secret: &str,
    signature: &str,
) -> Result<bool, SignatureError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let headers = CanonicalHeaders::from_pairs(headers);
    if !headers.has_timestamp() {
        mac_for(secret)?;
        return Ok(false);
    }
    let expected = sign_canonical(method, path, &headers, secret)?;

    let expected_bytes = expected.as_bytes();
    let signature_bytes = signature.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}
