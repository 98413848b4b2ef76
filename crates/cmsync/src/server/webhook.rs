//! CMS webhook endpoint.
//!
//! Checks the signature (when a secret is set), resolves the payload to
//! one configured model and starts a smart sync in the background. The
//! caller never waits for the sync itself.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tracing::{info, warn};

use cmsync_core::webhook::{SIGNATURE_HEADERS, resolve_model_id, verify_signature};
use cmsync_core::{CoreError, SyncJob};

use super::AppState;
use super::error::{AppError, AppResult};

pub const WEBHOOK_PATH: &str = "/api/webhook/cms";

/// GET -- some CMSes probe the endpoint before registering it.
pub async fn verify() -> Json<Value> {
    info!("webhook verification request");
    Json(json!({
        "status": "ok",
        "message": "Webhook endpoint is active",
        "endpoint": WEBHOOK_PATH,
        "method": "POST",
    }))
}

/// First signature header present, in preference order.
fn signature_header(headers: &HeaderMap) -> Option<&str> {
    SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
}

/// POST -- 202 `accepted` when a sync starts, 202 `queued` when one is
/// already running, 400 for unusable payloads, 401 for bad signatures.
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<(StatusCode, Json<Value>)> {
    if let Some(secret) = state.webhook_secret.as_deref() {
        verify_signature(secret.expose_secret(), signature_header(&headers), &body).map_err(
            |e| {
                warn!(error = %e, "webhook signature verification failed");
                AppError::InvalidSignature(e.to_string())
            },
        )?;
    }

    let payload: Value = if body.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body)
            .map_err(|_| AppError::BadRequest("Invalid JSON payload".into()))?
    };
    info!(
        event = payload.get("type").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
        "webhook received"
    );

    let model_id = resolve_model_id(&payload, &state.service.config().models).ok_or_else(|| {
        warn!("webhook payload names no configured model");
        AppError::BadRequest("Could not extract model ID from payload".into())
    })?;

    let job = SyncJob::Smart {
        model_ids: Some(vec![model_id.clone()]),
    };
    let status = match state.service.trigger(job) {
        Ok(()) => {
            info!(model_id = %model_id, "webhook sync started");
            "accepted"
        }
        Err(CoreError::Busy { current }) => {
            info!(model_id = %model_id, ?current, "webhook sync skipped, sync already in progress");
            "queued"
        }
        Err(e) => return Err(e.into()),
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": status, "model_id": model_id })),
    ))
}
