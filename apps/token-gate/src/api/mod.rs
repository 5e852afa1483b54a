// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{middleware, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::middleware::auth_middleware;
use crate::state::AppState;

pub mod health;
pub mod me;

/// Application router. Every route sits behind the authentication pipeline,
/// whose constraints decide which paths are enforced.
pub fn router(state: AppState) -> Router {
    let pipeline = state.pipeline.clone();

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/v1/me", get(me::me))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn_with_state(pipeline, auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(health::health, health::liveness, me::me),
    components(schemas(
        health::ReadyResponse,
        health::HealthChecks,
        health::HealthResponse,
        me::MeResponse
    )),
    tags(
        (name = "Health", description = "Liveness and configuration checks"),
        (name = "Identity", description = "Authenticated caller information")
    )
)]
struct ApiDoc;
