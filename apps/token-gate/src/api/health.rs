// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::verifier::Verifier;
use crate::state::AppState;

/// Health check response with the authentication setup.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall health status.
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// Verification strategy (`hmac`, `rsa` or `registry`).
    pub strategy: String,
    /// Number of registry keys currently cached.
    /// Only present for the registry strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_keys: Option<usize>,
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

fn strategy_name(verifier: &Verifier) -> &'static str {
    match verifier {
        Verifier::Symmetric(_) => "hmac",
        Verifier::StaticAsymmetric(_) => "rsa",
        Verifier::Registry(_) => "registry",
    }
}

/// Health check endpoint handler.
///
/// The key registry is not contacted; keys are fetched lazily on first use.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = ReadyResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<ReadyResponse> {
    let verifier = state.pipeline.config().verifier().strategy();
    Json(ReadyResponse {
        status: "ok".to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            strategy: strategy_name(verifier).to_string(),
            cached_keys: state.key_cache.as_ref().map(|cache| cache.len()),
        },
    })
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
