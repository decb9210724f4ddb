//! Administrative endpoints
//!
//! - `GET  /api/admin/config` - webhook URL and whether a secret is set
//! - `POST /api/admin/config` - update URL/secret (empty string clears)
//! - `POST /api/admin/clear` - reset the aggregate file to `{}`
//! - `POST /api/admin/sync/:external_id` - backfill one subject from the provider
//! - `POST /api/admin/sync` - backfill every subject the provider lists

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use pulse_common::aggregate::CategoryCounts;
use pulse_common::provider::ProviderClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::settings::{apply_update, save_settings, secret_hint};
use crate::{ApiError, ApiResult, AppState};

/// GET /api/admin/config response; the secret itself is never returned
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub webhook_url: Option<String>,
    pub secret_configured: bool,
    pub secret_hint: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfigRequest {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateConfigResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub success: bool,
    pub removed: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub success: bool,
    pub external_id: String,
    pub created: bool,
    pub changed: bool,
    pub counts: CategoryCounts,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub external_id: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct SyncAllResponse {
    pub success: bool,
    pub synced: usize,
    pub failed: Vec<SyncFailure>,
}

/// GET /api/admin/config
pub async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let settings = state.settings.read().await;
    let secret = settings.effective_secret(&state.fallback);

    Json(ConfigResponse {
        webhook_url: settings.effective_url(&state.fallback).map(str::to_string),
        secret_configured: secret.is_some(),
        secret_hint: secret.map(secret_hint),
    })
}

/// POST /api/admin/config
///
/// **Request:** `{"webhookUrl": "...", "secret": "..."}`, both optional
///
/// **Errors:**
/// - 400 Bad Request: body is not a JSON object of strings, or webhook URL is not http(s)
/// - 500 Internal Server Error: settings file write failure
pub async fn set_config(
    State(state): State<AppState>,
    payload: Result<Json<UpdateConfigRequest>, JsonRejection>,
) -> ApiResult<Json<UpdateConfigResponse>> {
    let Json(payload) = payload.map_err(|rejection| {
        warn!("Rejected admin config update: {}", rejection.body_text());
        ApiError::from(rejection)
    })?;

    if let Some(url) = payload.webhook_url.as_deref().map(str::trim) {
        if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ApiError::BadRequest(
                "webhookUrl must start with http:// or https://".to_string(),
            ));
        }
    }

    let secret_updated = payload.secret.is_some();
    let url_updated = payload.webhook_url.is_some();

    // Write lock held across the file write so updates apply in order
    let mut settings = state.settings.write().await;
    let mut updated = settings.clone();
    apply_update(
        &mut updated.webhook_url,
        payload.webhook_url.map(|url| url.trim().to_string()),
    );
    apply_update(&mut updated.secret, payload.secret);

    save_settings(&state.settings_path, &updated)
        .await
        .map_err(|e| {
            warn!("Failed to save {}: {}", state.settings_path.display(), e);
            ApiError::Common(e)
        })?;
    *settings = updated;

    if secret_updated {
        if settings.secret.is_some() {
            info!("Webhook secret updated via admin endpoint");
        } else {
            info!("Webhook secret cleared via admin endpoint");
        }
    }
    if url_updated {
        info!("Webhook URL set to {:?}", settings.webhook_url);
    }

    Ok(Json(UpdateConfigResponse {
        success: true,
        message: "Webhook settings saved".to_string(),
    }))
}

/// POST /api/admin/clear
pub async fn clear_aggregates(State(state): State<AppState>) -> ApiResult<Json<ClearResponse>> {
    let removed = state.store.clear().await?;
    info!("Cleared aggregate store ({} subjects removed)", removed);
    Ok(Json(ClearResponse {
        success: true,
        removed,
    }))
}

fn provider(state: &AppState) -> ApiResult<Arc<ProviderClient>> {
    state.provider.clone().ok_or(ApiError::ProviderUnavailable)
}

async fn sync_subject(
    state: &AppState,
    client: &ProviderClient,
    external_id: &str,
) -> ApiResult<SyncResponse> {
    let patch = client.fetch_subject_patch(external_id).await?;
    let outcome = state.store.merge(external_id, patch).await?;
    info!(
        "Synced {} from provider ({})",
        external_id,
        if outcome.changed { "updated" } else { "unchanged" }
    );

    Ok(SyncResponse {
        success: true,
        external_id: external_id.to_string(),
        created: outcome.created,
        changed: outcome.changed,
        counts: outcome.counts,
    })
}

/// POST /api/admin/sync/:external_id
pub async fn sync_one(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> ApiResult<Json<SyncResponse>> {
    let client = provider(&state)?;
    let response = sync_subject(&state, &client, &external_id)
        .await
        .map_err(|e| {
            warn!("Provider sync for {} failed: {}", external_id, e);
            e
        })?;
    Ok(Json(response))
}

/// POST /api/admin/sync
///
/// Subjects are synced one at a time; a failing subject does not stop the rest.
pub async fn sync_all(State(state): State<AppState>) -> ApiResult<Json<SyncAllResponse>> {
    let client = provider(&state)?;
    let subjects = client.list_subjects().await.map_err(|e| {
        warn!("Provider subject listing failed: {}", e);
        ApiError::Provider(e)
    })?;
    info!("Syncing {} subjects from provider", subjects.len());

    let mut synced = 0;
    let mut failed = Vec::new();
    for external_id in subjects {
        match sync_subject(&state, &client, &external_id).await {
            Ok(_) => synced += 1,
            Err(e) => {
                warn!("Provider sync for {} failed: {}", external_id, e);
                failed.push(SyncFailure {
                    external_id,
                    error: e.public_message(),
                });
            }
        }
    }

    Ok(Json(SyncAllResponse {
        success: failed.is_empty(),
        synced,
        failed,
    }))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/admin/config", get(get_config).post(set_config))
        .route("/api/admin/clear", post(clear_aggregates))
        .route("/api/admin/sync", post(sync_all))
        .route("/api/admin/sync/:external_id", post(sync_one))
}
