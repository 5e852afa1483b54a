// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{Extension, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::extractor::Auth;
use crate::auth::middleware::AuthType;

/// The caller's identity as established by the authentication pipeline.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user_id: String,
    pub roles: Vec<String>,
    /// Always `TOKEN`.
    pub auth_type: String,
}

#[utoipa::path(
    get,
    path = "/v1/me",
    tag = "Identity",
    responses(
        (status = 200, description = "Authenticated identity", body = MeResponse),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn me(
    Auth(identity): Auth,
    Extension(auth_type): Extension<AuthType>,
) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: identity.user_id,
        roles: identity.roles,
        auth_type: auth_type.as_str().to_string(),
    })
}
