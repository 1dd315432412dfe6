//! Health check endpoints
//!
//! - /health - liveness probe, also reports which store backend is active
//! - /version - build information captured by build.rs

use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::routes::helpers::{json_response, FullBody};
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Seconds since startup
    pub uptime: u64,
    /// "mongodb" or "memory"
    pub store: &'static str,
    pub timestamp: String,
    pub mode: &'static str,
}

#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    #[serde(rename = "commitFull")]
    pub commit_full: &'static str,
    #[serde(rename = "buildTime")]
    pub build_time: &'static str,
    pub service: &'static str,
}

pub fn health_check(state: &AppState) -> Response<FullBody> {
    let response = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        store: state.store_backend,
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
    };
    json_response(StatusCode::OK, &response)
}

pub fn version_info() -> Response<FullBody> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "convenios",
    };
    json_response(StatusCode::OK, &response)
}
