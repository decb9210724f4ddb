//! Webhook settings
//!
//! `webhook-settings.json` in the root folder holds the values set through
//! the admin endpoint. It is authoritative; the environment and the TOML
//! file only fill in what it leaves unset.
//!
//! Secret priority: settings file → `PULSE_WEBHOOK_SECRET` → TOML `[webhook].secret`

use pulse_common::config::TomlConfig;
use pulse_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

pub const WEBHOOK_SECRET_ENV: &str = "PULSE_WEBHOOK_SECRET";

/// Contents of `webhook-settings.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Values the settings file falls back to, resolved once at startup
#[derive(Debug, Clone, Default)]
pub struct SettingsFallback {
    pub secret: Option<String>,
    pub webhook_url: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

impl WebhookSettings {
    /// Secret in effect: the file's value, else the fallback
    pub fn effective_secret<'a>(&'a self, fallback: &'a SettingsFallback) -> Option<&'a str> {
        non_blank(self.secret.as_deref()).or_else(|| non_blank(fallback.secret.as_deref()))
    }

    pub fn effective_url<'a>(&'a self, fallback: &'a SettingsFallback) -> Option<&'a str> {
        non_blank(self.webhook_url.as_deref()).or_else(|| non_blank(fallback.webhook_url.as_deref()))
    }
}

/// Load settings; a missing file is empty settings, a bad file is warned about and ignored
pub async fn load_settings(path: &Path) -> WebhookSettings {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return WebhookSettings::default(),
        Err(e) => {
            warn!("Failed to read {}: {} (using empty settings)", path.display(), e);
            return WebhookSettings::default();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Ignoring invalid settings file {}: {}", path.display(), e);
            WebhookSettings::default()
        }
    }
}

/// Write settings atomically (temp file + rename)
pub async fn save_settings(path: &Path, settings: &WebhookSettings) -> Result<()> {
    let json = serde_json::to_vec_pretty(settings)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("{} has no file name", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Resolve the env/TOML fallbacks and report where the secret comes from
///
/// Warns when more than one source sets a secret, since only the highest
/// priority one is used.
pub fn resolve_fallback(settings: &WebhookSettings, toml: &TomlConfig) -> SettingsFallback {
    let env_secret = std::env::var(WEBHOOK_SECRET_ENV).ok();
    let env_secret = non_blank(env_secret.as_deref()).map(str::to_string);
    let toml_secret = non_blank(toml.webhook.secret.as_deref()).map(str::to_string);

    let mut sources = Vec::new();
    if non_blank(settings.secret.as_deref()).is_some() {
        sources.push("settings file");
    }
    if env_secret.is_some() {
        sources.push("environment");
    }
    if toml_secret.is_some() {
        sources.push("TOML");
    }

    if sources.len() > 1 {
        warn!(
            "Webhook secret found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }
    match sources.first() {
        Some(source) => info!("Webhook signature verification enabled (secret from {})", source),
        None => warn!("No webhook secret configured: signature verification is disabled"),
    }

    SettingsFallback {
        secret: env_secret.or(toml_secret),
        webhook_url: non_blank(toml.webhook.url.as_deref()).map(str::to_string),
    }
}

/// First four characters then `****`; never the whole secret
pub fn secret_hint(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{}****", prefix)
}

/// Apply an admin update: blank clears, `None` leaves the field alone
///
/// Values are stored as given, so a secret keeps any surrounding whitespace.
pub fn apply_update(field: &mut Option<String>, update: Option<String>) {
    if let Some(value) = update {
        *field = if value.trim().is_empty() { None } else { Some(value) };
    }
}
