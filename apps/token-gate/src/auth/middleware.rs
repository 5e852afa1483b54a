// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication pipeline and its axum middleware.
//!
//! Per request:
//!
//! 1. Evaluate the security constraints; pass through when not enforced
//! 2. Extract the token (see [`TokenSources`])
//! 3. Verify it with the configured strategy
//! 4. Attach the [`AuthenticatedIdentity`] and [`AuthType::Token`] to the
//!    request extensions
//! 5. Optionally renew the token into the `X-Auth` response header
//! 6. Forward to the next handler
//!
//! A missing token is answered with "Please login first", a failed
//! verification with the failure cause. Both are 401 and never forwarded.
//!
//! ```rust,ignore
//! let pipeline = AuthPipeline::new(
//!     PipelineConfig::new(TokenVerifier::hmac(secret)).with_renewal(true),
//!     PathConstraints::new().protect("/v1"),
//! );
//!
//! let app = Router::new()
//!     .route("/v1/me", get(me))
//!     .layer(axum::middleware::from_fn_with_state(pipeline, auth_middleware));
//! ```

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE},
        request::Parts,
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::builder::TokenBuilder;
use super::claims::AuthenticatedIdentity;
use super::constraints::{evaluate, ConstraintSource, Enforcement};
use super::error::AuthRejection;
use super::extractor::{TokenLocation, TokenSources, AUTH_HEADER};
use super::verifier::{TokenVerifier, VerifiedToken};

/// Largest form body buffered to look for the `auth` parameter.
pub const MAX_FORM_BODY_BYTES: usize = 64 * 1024;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Authentication type recorded on authenticated requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    Token,
}

impl AuthType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthType::Token => "TOKEN",
        }
    }
}

/// Pipeline states, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Passthrough,
    NoToken,
    Extracted,
    Authenticated,
    Rejected,
}

// =============================================================================
// Configuration
// =============================================================================

/// Immutable pipeline configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    verifier: TokenVerifier,
    sources: TokenSources,
    renew_tokens: bool,
}

impl PipelineConfig {
    pub fn new(verifier: TokenVerifier) -> Self {
        Self {
            verifier,
            sources: TokenSources::default(),
            renew_tokens: false,
        }
    }

    pub fn with_sources(mut self, sources: TokenSources) -> Self {
        self.sources = sources;
        self
    }

    /// Enable cookie extraction from the cookie named `cookie_name`.
    pub fn with_cookie_name(mut self, cookie_name: impl Into<String>) -> Self {
        self.sources = self.sources.with_cookie_name(cookie_name);
        self
    }

    /// Send a renewed token in the `X-Auth` response header.
    pub fn with_renewal(mut self, enabled: bool) -> Self {
        self.renew_tokens = enabled;
        self
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    pub fn sources(&self) -> &TokenSources {
        &self.sources
    }

    pub fn renew_tokens(&self) -> bool {
        self.renew_tokens
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// A successfully authenticated request.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub identity: AuthenticatedIdentity,
    pub location: TokenLocation,
    pub renewed_token: Option<String>,
}

/// Shared, cheaply cloneable pipeline: configuration plus constraint source.
#[derive(Clone)]
pub struct AuthPipeline {
    config: Arc<PipelineConfig>,
    constraints: Arc<dyn ConstraintSource>,
}

impl AuthPipeline {
    pub fn new(config: PipelineConfig, constraints: impl ConstraintSource) -> Self {
        Self {
            config: Arc::new(config),
            constraints: Arc::new(constraints),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn enforcement(&self, parts: &Parts) -> Enforcement {
        let constraints = self.constraints.constraints_for(parts);
        let preemptive = self.constraints.preemptive_authentication(parts);
        evaluate(&constraints, preemptive)
    }

    /// Extract, verify and optionally renew the token of an enforced request.
    pub async fn authenticate(
        &self,
        parts: &Parts,
        form: Option<&[u8]>,
    ) -> Result<Authenticated, AuthRejection> {
        let path = parts.uri.path();

        let Some((location, token)) = self.config.sources.extract(parts, form) else {
            tracing::debug!(state = ?PipelineState::NoToken, path, "No token on protected request");
            return Err(AuthRejection::login_required());
        };
        tracing::trace!(state = ?PipelineState::Extracted, ?location, path, "Token extracted");

        let verified = self
            .config
            .verifier
            .verify(&token)
            .await
            .and_then(|verified| verified.identity().map(|identity| (verified, identity)));

        let (verified, identity) = match verified {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!(
                    state = ?PipelineState::Rejected,
                    error = %e,
                    code = e.error_code(),
                    ?location,
                    path,
                    "Token verification failed"
                );
                return Err(AuthRejection::invalid_token(&e));
            }
        };

        tracing::debug!(
            state = ?PipelineState::Authenticated,
            user_id = %identity.user_id,
            algorithm = verified.algorithm().name(),
            path,
            "Request authenticated"
        );

        let renewed_token = if self.config.renew_tokens {
            renew(&verified)
        } else {
            None
        };

        Ok(Authenticated {
            identity,
            location,
            renewed_token,
        })
    }
}

impl std::fmt::Debug for AuthPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Renewal never fails the request; problems are only logged.
fn renew(verified: &VerifiedToken) -> Option<String> {
    match TokenBuilder::from_verified(verified).and_then(TokenBuilder::build) {
        Ok(token) => Some(token),
        Err(e) => {
            tracing::warn!(error = %e, "Token renewal failed");
            None
        }
    }
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

// =============================================================================
// Middleware
// =============================================================================

/// Authentication middleware function.
///
/// Use with `axum::middleware::from_fn_with_state(pipeline, auth_middleware)`.
pub async fn auth_middleware(
    State(pipeline): State<AuthPipeline>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();

    if pipeline.enforcement(&parts) == Enforcement::Passthrough {
        tracing::trace!(state = ?PipelineState::Passthrough, path = parts.uri.path(), "No enforcement");
        return next.run(Request::from_parts(parts, body)).await;
    }

    let needs_form = is_form(&parts.headers) && pipeline.config.sources.needs_form(&parts);
    let (form, body) = if !needs_form {
        (None, body)
    } else if content_length(&parts.headers).is_some_and(|len| len > MAX_FORM_BODY_BYTES) {
        tracing::debug!(path = parts.uri.path(), "Form body too large, auth parameter ignored");
        (None, body)
    } else {
        // Without a usable length the body is consumed while reading it, so a
        // failure here cannot fall through to the next location.
        match to_bytes(body, MAX_FORM_BODY_BYTES).await {
            Ok(bytes) => (Some(bytes.clone()), Body::from(bytes)),
            Err(e) => {
                tracing::warn!(error = %e, path = parts.uri.path(), "Unable to buffer form body");
                return AuthRejection::unreadable_body()
                    .negotiated(&parts.headers)
                    .into_response();
            }
        }
    };

    let authenticated = match pipeline.authenticate(&parts, form.as_deref()).await {
        Ok(authenticated) => authenticated,
        Err(rejection) => return rejection.negotiated(&parts.headers).into_response(),
    };

    let mut request = Request::from_parts(parts, body);
    request.extensions_mut().insert(authenticated.identity);
    request.extensions_mut().insert(AuthType::Token);

    let mut response = next.run(request).await;

    if let Some(token) = authenticated.renewed_token {
        match HeaderValue::from_str(&token) {
            Ok(value) => {
                response.headers_mut().insert(AUTH_HEADER, value);
            }
            Err(e) => tracing::warn!(error = %e, "Renewed token is not a valid header value"),
        }
    }

    response
}
