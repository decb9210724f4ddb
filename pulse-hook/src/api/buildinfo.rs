//! `GET /api/buildinfo`: which pulse-hook build is answering, and since when

use axum::{extract::State, response::Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;

pub const MODULE_NAME: &str = "pulse-hook";

#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub module: &'static str,
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub build_profile: &'static str,
}

impl BuildInfo {
    /// Values stamped in by `build.rs`
    pub fn current() -> Self {
        Self {
            module: MODULE_NAME,
            version: env!("CARGO_PKG_VERSION"),
            git_hash: env!("GIT_HASH"),
            build_timestamp: env!("BUILD_TIMESTAMP"),
            build_profile: env!("BUILD_PROFILE"),
        }
    }
}

impl std::fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} v{} [{}] built {} ({})",
            self.module, self.version, self.git_hash, self.build_timestamp, self.build_profile
        )
    }
}

#[derive(Debug, Serialize)]
pub struct BuildInfoResponse {
    #[serde(flatten)]
    pub build: BuildInfo,
    pub started_at: DateTime<Utc>,
}

/// GET /api/buildinfo
pub async fn get_build_info(State(state): State<AppState>) -> Json<BuildInfoResponse> {
    Json(BuildInfoResponse {
        build: BuildInfo::current(),
        started_at: state.startup_time,
    })
}
