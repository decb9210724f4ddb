//! pulse-hook library - webhook ingestion service
//!
//! Receives provider webhook deliveries, verifies and normalizes them, and
//! merges them into the per-subject aggregate file. Also serves the admin
//! and read endpoints the dashboard polls.

use axum::Router;
use chrono::{DateTime, Utc};
use pulse_common::capture::CaptureLog;
use pulse_common::config::DEFAULT_MAX_BODY_BYTES;
use pulse_common::provider::ProviderClient;
use pulse_common::StoreHandle;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;
pub mod settings;

pub use error::{ApiError, ApiResult};
pub use settings::{SettingsFallback, WebhookSettings};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Handle to the single aggregate writer
    pub store: StoreHandle,
    /// Settings file contents (admin endpoint writes, webhook reads)
    pub settings: Arc<RwLock<WebhookSettings>>,
    /// Env/TOML values used where the settings file is silent
    pub fallback: Arc<SettingsFallback>,
    pub settings_path: PathBuf,
    /// `None` when capture is disabled
    pub capture: Option<Arc<CaptureLog>>,
    /// `None` when provider credentials are not configured
    pub provider: Option<Arc<ProviderClient>>,
    /// Webhook request body cap in bytes
    pub body_limit: usize,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// State with no secret, no capture log and no provider
    pub fn new(store: StoreHandle, settings_path: PathBuf) -> Self {
        Self {
            store,
            settings: Arc::new(RwLock::new(WebhookSettings::default())),
            fallback: Arc::new(SettingsFallback::default()),
            settings_path,
            capture: None,
            provider: None,
            body_limit: DEFAULT_MAX_BODY_BYTES,
            startup_time: Utc::now(),
        }
    }

    pub fn with_settings(mut self, settings: WebhookSettings) -> Self {
        self.settings = Arc::new(RwLock::new(settings));
        self
    }

    pub fn with_fallback(mut self, fallback: SettingsFallback) -> Self {
        self.fallback = Arc::new(fallback);
        self
    }

    pub fn with_capture(mut self, capture: Option<CaptureLog>) -> Self {
        self.capture = capture.map(Arc::new);
        self
    }

    pub fn with_provider(mut self, provider: Option<ProviderClient>) -> Self {
        self.provider = provider.map(Arc::new);
        self
    }

    pub fn with_body_limit(mut self, body_limit: usize) -> Self {
        self.body_limit = body_limit;
        self
    }

    /// Secret in effect for the next delivery
    pub async fn current_secret(&self) -> Option<String> {
        let settings = self.settings.read().await;
        settings.effective_secret(&self.fallback).map(str::to_string)
    }
}

/// Build application router
///
/// Webhook routes read the raw body themselves so the signature is checked
/// over the exact bytes received.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::webhook_routes())
        .merge(api::admin_routes())
        .merge(api::subject_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // Dashboard polls from its own origin
        .layer(CorsLayer::permissive())
}
