//! Webhook ingestion endpoint
//!
//! One delivery moves through these stages, recorded on the request span:
//!
//! ```text
//! ReceivingBody → Verifying → Classifying → Normalizing → Merging → Responding
//! ```
//!
//! Any stage may end the request early with an [`ApiError`]. Deliveries that
//! pass signature verification are written to the capture log (when enabled)
//! before parsing, so malformed bodies are captured too.

use axum::{
    body::Body,
    extract::State,
    http::{header::CONTENT_LENGTH, HeaderMap},
    routing::post,
    Json, Router,
};
use http_body_util::LengthLimitError;
use pulse_common::aggregate::CategoryCounts;
use pulse_common::capture::WebhookEventRecord;
use pulse_common::events::payload::external_id_hint;
use pulse_common::events::{EventKind, WebhookEvent, EVENT_TYPE_HEADER, EXTERNAL_ID_HEADER, UNKNOWN_EVENT_TYPE};
use pulse_common::signature::{verify_signature, Verification, SIGNATURE_HEADER};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::{ApiError, ApiResult, AppState};

/// Ingestion stage, carried in the `stage` span field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReceivingBody,
    Verifying,
    Classifying,
    Normalizing,
    Merging,
    Responding,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ReceivingBody => "receiving_body",
            Stage::Verifying => "verifying",
            Stage::Classifying => "classifying",
            Stage::Normalizing => "normalizing",
            Stage::Merging => "merging",
            Stage::Responding => "responding",
        }
    }
}

fn enter(stage: Stage) {
    Span::current().record("stage", stage.as_str());
    debug!("stage: {}", stage.as_str());
}

/// Successful ingestion response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub success: bool,
    pub external_id: String,
    pub event_type: String,
    pub kind: EventKind,
    /// False when the delivery repeated what was already stored
    pub changed: bool,
    pub counts: CategoryCounts,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// POST /api/webhook (alias POST /webhook)
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Json<WebhookResponse>> {
    let span = info_span!("webhook", delivery = %Uuid::new_v4(), stage = field::Empty);
    ingest(state, headers, body).instrument(span).await
}

async fn ingest(state: AppState, headers: HeaderMap, body: Body) -> ApiResult<Json<WebhookResponse>> {
    enter(Stage::ReceivingBody);
    if let Some(length) = declared_length(&headers) {
        if length > state.body_limit {
            warn!("Rejected delivery: declared body of {} bytes exceeds limit", length);
            return Err(ApiError::PayloadTooLarge(state.body_limit));
        }
    }
    // Undeclared (chunked) bodies are cut off at the limit while reading
    let raw = axum::body::to_bytes(body, state.body_limit)
        .await
        .map_err(|e| body_read_error(e, state.body_limit))?;

    enter(Stage::Verifying);
    let secret = state.current_secret().await;
    match verify_signature(&raw, header_str(&headers, SIGNATURE_HEADER), secret.as_deref()) {
        Ok(Verification::Verified) => debug!("Signature verified"),
        Ok(Verification::Skipped) => debug!("No secret configured, signature not checked"),
        Err(e) => {
            warn!("Rejected delivery: {}", e);
            return Err(ApiError::Authentication(e));
        }
    }

    let event_type = header_str(&headers, EVENT_TYPE_HEADER).map(str::to_string);
    let header_external_id = header_str(&headers, EXTERNAL_ID_HEADER).map(str::to_string);
    capture(&state, &headers, event_type.clone(), header_external_id.clone(), &raw).await;

    enter(Stage::Classifying);
    let kind = EventKind::classify(event_type.as_deref());
    if kind == EventKind::Unknown {
        warn!(
            "Unrecognized event type {:?}, storing under unclassified",
            event_type.as_deref().unwrap_or(UNKNOWN_EVENT_TYPE)
        );
    }

    enter(Stage::Normalizing);
    let body: Value = serde_json::from_slice(&raw).map_err(|e| {
        warn!("Rejected delivery: malformed JSON: {}", e);
        ApiError::Validation(format!("Malformed JSON body: {}", e))
    })?;

    let external_id = header_external_id
        .or_else(|| external_id_hint(&body))
        .ok_or_else(|| {
            warn!("Rejected delivery: no external id in header or body");
            ApiError::Validation(
                "Missing subject id: send the X-External-Id header or an externalId field"
                    .to_string(),
            )
        })?;

    let event = WebhookEvent::decode(kind, event_type.as_deref(), &body).map_err(|e| {
        warn!("Rejected {} delivery for {}: {}", kind, external_id, e);
        ApiError::from(e)
    })?;
    let items = event.item_count();
    let patch = event.into_patch();

    enter(Stage::Merging);
    let outcome = state
        .store
        .merge(external_id.clone(), patch)
        .await
        .map_err(|e| {
            error!("Failed to merge {} delivery for {}: {}", kind, external_id, e);
            ApiError::Storage(e)
        })?;

    enter(Stage::Responding);
    info!(
        "Accepted {} delivery for {} ({} item{}, {})",
        kind,
        external_id,
        items,
        if items == 1 { "" } else { "s" },
        if outcome.created {
            "new subject"
        } else if outcome.changed {
            "updated"
        } else {
            "unchanged"
        }
    );

    Ok(Json(WebhookResponse {
        success: true,
        external_id,
        event_type: event_type.unwrap_or_else(|| UNKNOWN_EVENT_TYPE.to_string()),
        kind,
        changed: outcome.changed,
        counts: outcome.counts,
    }))
}

/// 413 only when the limit was hit; disconnects and stream errors are 400
fn body_read_error(err: axum::Error, limit: usize) -> ApiError {
    let inner = err.into_inner();
    if inner.is::<LengthLimitError>() {
        warn!("Rejected delivery: body exceeds {} bytes", limit);
        ApiError::PayloadTooLarge(limit)
    } else {
        warn!("Rejected delivery: failed to read body: {}", inner);
        ApiError::Validation("Failed to read request body".to_string())
    }
}

/// Append the delivery to the capture log; failures only warn
async fn capture(
    state: &AppState,
    headers: &HeaderMap,
    event_type: Option<String>,
    external_id: Option<String>,
    raw: &[u8],
) {
    let Some(log) = &state.capture else {
        return;
    };

    let header_pairs = headers.iter().map(|(name, value)| {
        (
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
    });
    let record = WebhookEventRecord::new(header_pairs, event_type, external_id, raw);

    if let Err(e) = log.append(&record).await {
        warn!("Failed to append to capture log {}: {}", log.path().display(), e);
    }
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/api/webhook", post(receive_webhook))
        .route("/webhook", post(receive_webhook))
}
