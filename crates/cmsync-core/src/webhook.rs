//! Inbound webhook logic: HMAC signature verification and model
//! resolution from CMS event payloads.
//!
//! Transport-agnostic; the HTTP handler passes in header values and
//! the raw body.

use hmac::{Hmac, Mac};
use indexmap::IndexMap;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ModelConfig;

type HmacSha256 = Hmac<Sha256>;

/// Header names checked for a signature, first present wins.
pub const SIGNATURE_HEADERS: &[&str] = &[
    "reearth-signature",
    "x-reearth-signature",
    "x-signature",
    "x-hub-signature-256",
    "x-webhook-signature",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("Missing signature header")]
    Missing,
    #[error("Invalid signature format")]
    Malformed,
    #[error("Invalid signature")]
    Mismatch,
}

// ── Signature ────────────────────────────────────────────────────────

/// How the secret is turned into key bytes.
#[derive(Debug, Clone, Copy)]
enum SecretEncoding {
    Utf8,
    /// Hex-decoded; falls back to the raw bytes when not valid hex.
    Hex,
}

/// What bytes are signed.
#[derive(Debug, Clone, Copy)]
enum SignedMessage {
    Body,
    /// `"{timestamp}." + body`
    TimestampedBody,
}

/// Accepted combinations for the `v1,t=<ts>,<hex>` format. Narrow this
/// table once the provider's scheme is pinned down.
const V1_SCHEMES: &[(SecretEncoding, SignedMessage)] = &[
    (SecretEncoding::Utf8, SignedMessage::Body),
    (SecretEncoding::Utf8, SignedMessage::TimestampedBody),
    (SecretEncoding::Hex, SignedMessage::Body),
    (SecretEncoding::Hex, SignedMessage::TimestampedBody),
];

/// Verify a webhook signature header against the raw request body.
///
/// Accepts `v1,t=<timestamp>,<hex>` and `sha256=<hex>` (or bare hex).
pub fn verify_signature(
    secret: &str,
    header: Option<&str>,
    body: &[u8],
) -> Result<(), SignatureError> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(SignatureError::Missing)?;

    if let Some(rest) = header.strip_prefix("v1,") {
        return verify_v1(secret, rest, body);
    }

    let hex_sig = header.strip_prefix("sha256=").unwrap_or(header);
    let expected = hex::decode(hex_sig).map_err(|_| SignatureError::Malformed)?;
    if hmac_matches(secret.as_bytes(), &[body], &expected) {
        Ok(())
    } else {
        warn!("webhook signature mismatch");
        Err(SignatureError::Mismatch)
    }
}

fn verify_v1(secret: &str, rest: &str, body: &[u8]) -> Result<(), SignatureError> {
    let mut parts = rest.splitn(2, ',');
    let timestamp = parts
        .next()
        .and_then(|p| p.strip_prefix("t="))
        .filter(|t| !t.is_empty())
        .ok_or(SignatureError::Malformed)?;
    let sig_hex = parts.next().ok_or(SignatureError::Malformed)?;
    let expected = hex::decode(sig_hex.trim()).map_err(|_| SignatureError::Malformed)?;

    let hex_secret = hex::decode(secret).unwrap_or_else(|_| secret.as_bytes().to_vec());
    let prefix = format!("{timestamp}.");

    for (encoding, message) in V1_SCHEMES {
        let key = match encoding {
            SecretEncoding::Utf8 => secret.as_bytes(),
            SecretEncoding::Hex => hex_secret.as_slice(),
        };
        let chunks: &[&[u8]] = match message {
            SignedMessage::Body => &[body],
            SignedMessage::TimestampedBody => &[prefix.as_bytes(), body],
        };
        if hmac_matches(key, chunks, &expected) {
            debug!(?encoding, ?message, "webhook signature verified");
            return Ok(());
        }
    }

    warn!("webhook signature mismatch");
    Err(SignatureError::Mismatch)
}

/// Constant-time HMAC-SHA256 comparison over concatenated chunks.
fn hmac_matches(key: &[u8], chunks: &[&[u8]], expected: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    for chunk in chunks {
        mac.update(chunk);
    }
    mac.verify_slice(expected).is_ok()
}

/// Hex HMAC-SHA256 of `message`, as a sender would compute it.
pub fn sign(secret: &[u8], message: &[u8]) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return String::new();
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

// ── Model resolution ─────────────────────────────────────────────────

fn str_at<'a>(payload: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(payload, |v, key| v.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Resolve the configured model a webhook payload refers to.
///
/// Order: `data.model.key` as a configured key; a model listing it in
/// `webhook_model_keys`; a model whose `cms_model_id` matches
/// `data.model.key`, `data.model.id` or `data.item.modelId`; then the
/// legacy fields `data.modelId`, `data.model_id`, `data.modelKey`,
/// `modelId`, `model_id`. Never falls back to "all models".
pub fn resolve_model_id(payload: &Value, models: &IndexMap<String, ModelConfig>) -> Option<String> {
    let model_key = str_at(payload, &["data", "model", "key"]);
    let model_id = str_at(payload, &["data", "model", "id"]);
    let item_model_id = str_at(payload, &["data", "item", "modelId"]);

    if let Some(key) = model_key {
        if models.contains_key(key) {
            return Some(key.to_owned());
        }
        if let Some((id, _)) = models
            .iter()
            .find(|(_, m)| m.webhook_model_keys.iter().any(|k| k == key))
        {
            return Some(id.clone());
        }
    }

    for candidate in [model_key, model_id, item_model_id].into_iter().flatten() {
        if let Some(id) = by_cms_model_id(models, candidate) {
            return Some(id);
        }
    }

    let legacy = [
        &["data", "modelId"][..],
        &["data", "model_id"],
        &["data", "modelKey"],
        &["modelId"],
        &["model_id"],
    ]
    .iter()
    .find_map(|path| str_at(payload, path))?;

    if models.contains_key(legacy) {
        return Some(legacy.to_owned());
    }
    by_cms_model_id(models, legacy)
}

fn by_cms_model_id(models: &IndexMap<String, ModelConfig>, cms_id: &str) -> Option<String> {
    models
        .iter()
        .find(|(_, m)| m.cms_model_id == cms_id)
        .map(|(id, _)| id.clone())
}
