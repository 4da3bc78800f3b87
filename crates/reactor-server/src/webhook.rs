//! Webhook Intake (§4.1): signature verification, payload hashing, two-layer
//! dedup, event classification, and handing a normalised `IntakeEvent` to
//! the Event Router. Never executes workflow nodes itself — the Event
//! Router either resolves synchronously (gate checks, validation replies)
//! or enqueues a Run for the background worker pool.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reactor_core::idempotency::{update_key, UPDATE_TTL};
use reactor_types::{IntakeEvent, IntakeEventKind, ProcessingStatus, WebhookEvent};
use serde_json::{json, Value};
use sha2::Sha256;

use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Sorts object keys recursively and serializes compactly so the same
/// logical payload always hashes/signs the same way regardless of field
/// order on the wire (§4.1 "canonicalised JSON payload").
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, Value> = std::collections::BTreeMap::new();
            for (k, v) in map {
                sorted.insert(k.clone(), canonicalize(v));
            }
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn canonical_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(&canonicalize(value)).unwrap_or_default()
}

fn payload_sha256_hex(value: &Value) -> String {
    use sha2::Digest;
    hex::encode(Sha256::digest(canonical_bytes(value)))
}

/// Constant-time HMAC verification via `Mac::verify_slice`. Returns `Err`
/// only on a genuine mismatch; a missing signature with no configured
/// secret is handled by the caller, not here.
fn verify_signature(secret: &str, payload: &[u8], header_value: &str) -> bool {
    let hex_sig = header_value.strip_prefix("v1=").unwrap_or(header_value);
    let Ok(raw_sig) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&raw_sig).is_ok()
}

fn classify_event_type(event_type: &str) -> Option<IntakeEventKind> {
    match event_type {
        "create_pulse" | "create_item" | "task_create" => Some(IntakeEventKind::TaskCreate),
        "change_status_column_value" | "task_status_change" => Some(IntakeEventKind::TaskStatusChange),
        "update_item" | "create_update" | "item_update" => Some(IntakeEventKind::ItemUpdate),
        "change_column_value" | "column_value_change" => Some(IntakeEventKind::ColumnValueChange),
        _ => None,
    }
}

fn is_outside_board(state: &AppState, event: &Value) -> bool {
    match (&state.config.board_id, event.get("boardId").and_then(Value::as_str)) {
        (Some(configured), Some(actual)) => configured != actual,
        _ => false,
    }
}

fn is_test_item(state: &AppState, item_id: &str) -> bool {
    state.config.test_id_prefixes.iter().any(|prefix| item_id.starts_with(prefix.as_str()))
}

fn extract_item_id(event: &Value) -> Option<String> {
    event
        .get("pulseId")
        .or_else(|| event.get("itemId"))
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_u64().map(|n| n.to_string())))
}

/// Receives the raw body rather than a `Json<T>` extractor so the signature
/// can be checked against exactly the bytes the source sent.
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let envelope: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError(reactor_core::ReactorError::Validation(format!("invalid JSON body: {e}"))))?;

    if let Some(challenge) = envelope.get("challenge") {
        return Ok((StatusCode::OK, Json(json!({ "challenge": challenge }))));
    }

    let Some(event) = envelope.get("event").cloned() else {
        return Ok((
            StatusCode::OK,
            Json(json!({ "status": "ignored", "reason": "no event payload" })),
        ));
    };

    let signature_header = headers.get("X-Monday-Signature").and_then(|v| v.to_str().ok());
    let secret = state.config.webhook_secret.as_ref().or(state.config.monday_signing_secret.as_ref());
    match (secret, signature_header) {
        (Some(secret), Some(sig)) => {
            if !verify_signature(secret.expose(), &body, sig) {
                return Err(ApiError(reactor_core::ReactorError::Auth("signature mismatch".to_string())));
            }
        }
        (Some(_), None) => {
            return Err(ApiError(reactor_core::ReactorError::Auth(
                "missing X-Monday-Signature header".to_string(),
            )));
        }
        (None, _) => {
            tracing::warn!("no webhook signing secret configured, accepting payload unverified");
        }
    }

    let payload_hash = payload_sha256_hex(&event);
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or("unknown").to_string();
    let Some(item_id) = extract_item_id(&event) else {
        return Ok((
            StatusCode::OK,
            Json(json!({ "status": "ignored", "reason": "missing pulseId/itemId" })),
        ));
    };

    let event_id = event
        .get("triggerUuid")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{item_id}:{event_type}:{}", &payload_hash[..16]));

    // In-process dedup (§4.1 "if the hash was seen in the last PROC_WINDOW").
    let proc_key = format!("procwindow:{item_id}:{event_type}:{payload_hash}");
    if !state.idempotency.set_if_not_exists(&proc_key, state.config.proc_window).await {
        return Ok((StatusCode::OK, Json(json!({ "status": "processed", "deduplicated": true }))));
    }

    // Distributed dedup (§4.1 "write update:{event_id} ... set-if-not-exists").
    if !state.idempotency.set_if_not_exists(&update_key(&event_id), UPDATE_TTL).await {
        return Ok((StatusCode::OK, Json(json!({ "status": "duplicate" }))));
    }

    let mut webhook_event = WebhookEvent {
        event_id: event_id.clone(),
        source: "monday".to_string(),
        event_type: event_type.clone(),
        payload: event.clone(),
        payload_hash,
        signature: signature_header.map(str::to_string),
        received_at: Utc::now(),
        processing_status: ProcessingStatus::Pending,
        related_task_id: None,
        error_message: None,
    };
    state.stores.webhook_event_is_new(&webhook_event).await?;

    let Some(kind) = classify_event_type(&event_type) else {
        webhook_event.processing_status = ProcessingStatus::Ignored;
        state.stores.mark_webhook(&event_id, |w| w.processing_status = ProcessingStatus::Ignored).await?;
        return Ok((StatusCode::OK, Json(json!({ "status": "ignored", "reason": "unrecognised event type" }))));
    };
    if is_outside_board(&state, &event) || is_test_item(&state, &item_id) {
        state.stores.mark_webhook(&event_id, |w| w.processing_status = ProcessingStatus::Ignored).await?;
        return Ok((
            StatusCode::OK,
            Json(json!({ "status": "ignored", "reason": "outside configured board or a test item" })),
        ));
    }

    let intake = IntakeEvent {
        task_id: None,
        item_id,
        kind,
        text: event.get("textBody").and_then(Value::as_str).map(str::to_string),
        column: event.get("columnId").and_then(Value::as_str).map(str::to_string),
        new_value: event.get("value").cloned(),
        triggerer_id: event.get("userId").and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_u64().map(|n| n.to_string()))),
    };

    let outcome = state.event_router.route(intake, Utc::now()).await;
    match outcome {
        Ok(routed) => {
            state
                .stores
                .mark_webhook(&event_id, |w| w.processing_status = ProcessingStatus::Processed)
                .await?;
            Ok((StatusCode::OK, Json(json!({ "status": "processed", "outcome": format!("{routed:?}") }))))
        }
        // §5 "If the queue is full -> 503 with Retry-After": this is our own
        // backpressure, not a downstream failure, so §4.1's "never throws a
        // 5xx for downstream errors" absorption does not apply to it. The
        // Run is already persisted; leave the webhook event `Pending` so the
        // source's retry (driven by the 503) re-enters as a fresh attempt.
        Err(err) if err.kind() == reactor_core::ErrorKind::QueueSaturated => Err(ApiError(err)),
        Err(err) => {
            let message = err.to_string();
            state
                .stores
                .mark_webhook(&event_id, |w| {
                    w.processing_status = ProcessingStatus::Failed;
                    w.error_message = Some(message.clone());
                })
                .await?;
            // §4.1 "Failure semantics": downstream errors are captured
            // per-event and returned with status 200, never retried by the
            // source system.
            Ok((StatusCode::OK, Json(json!({ "status": "failed", "error": message }))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalization_sorts_object_keys() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_bytes(&a), canonical_bytes(&b));
    }

    #[test]
    fn signature_round_trips() {
        let payload = b"{\"a\":1}";
        let mut mac = HmacSha256::new_from_slice(b"shh").unwrap();
        mac.update(payload);
        let sig = hex::encode(mac.finalize().into_bytes());
        assert!(verify_signature("shh", payload, &format!("v1={sig}")));
        assert!(!verify_signature("wrong", payload, &format!("v1={sig}")));
    }

    #[test]
    fn classify_unknown_type_is_none() {
        assert!(classify_event_type("some_unmapped_type").is_none());
        assert_eq!(classify_event_type("create_pulse"), Some(IntakeEventKind::TaskCreate));
    }
}
