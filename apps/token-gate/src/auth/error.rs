// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! Lower layers (claims, codec, strategies, key cache) return the typed errors
//! below. Only the pipeline turns them into an [`AuthRejection`] and a log
//! entry.

use axum::{
    http::{header::ACCEPT, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use super::claims::ClaimKind;
use super::render::ResponseFormat;

// =============================================================================
// Claim / codec errors
// =============================================================================

/// A claim could not be stored in a [`ClaimSet`](super::claims::ClaimSet).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    #[error("Cannot handle value of claim '{name}': {reason}")]
    Unsupported { name: String, reason: String },

    #[error("Claim '{name}' already holds a {existing} value, cannot store a {attempted} value")]
    KindMismatch {
        name: String,
        existing: ClaimKind,
        attempted: ClaimKind,
    },
}

/// The token text is not a structurally valid three-part token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("The token is malformed: {0}")]
    Malformed(String),
}

// =============================================================================
// Verification errors
// =============================================================================

/// Failure to fetch a public key from the remote key registry.
///
/// `Clone` so a single in-flight fetch can hand the same outcome to every
/// caller that was coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("No key with id '{key_id}' published by the key registry")]
    NotFound { key_id: String },

    #[error("Key registry request failed: {0}")]
    Http(String),

    #[error("Key registry answered HTTP {0}")]
    Status(u16),

    #[error("Key registry published an unusable key: {0}")]
    InvalidKey(String),
}

/// Token verification failure. Always surfaced to the client as a 401.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error(transparent)]
    Malformed(#[from] DecodeError),

    #[error("Algorithm '{algorithm}' is not supported, only {family} algorithms are accepted")]
    UnsupportedAlgorithm {
        algorithm: String,
        family: &'static str,
    },

    #[error("The Token's Signature resulted invalid when verified using the Algorithm: {algorithm}")]
    SignatureInvalid { algorithm: &'static str },

    #[error("The Token has expired on {expired_at}")]
    TokenExpired { expired_at: chrono::DateTime<chrono::Utc> },

    #[error("The Token can't be used before {not_before}")]
    TokenNotYetValid { not_before: chrono::DateTime<chrono::Utc> },

    #[error("Unable to find a signing key that matches '{}'", .key_id.as_deref().unwrap_or("<no kid>"))]
    KeyNotFound { key_id: Option<String> },

    #[error("Audience claim value '{audience}' not supported")]
    AudienceNotAllowed { audience: String },

    #[error("The Token does not carry the '{claim}' claim")]
    MissingIdentityClaim { claim: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Key material rejected by the signature check: {0}")]
    Key(String),
}

impl VerificationError {
    /// Stable machine-readable code for this failure.
    pub fn error_code(&self) -> &'static str {
        match self {
            VerificationError::Malformed(_) => "malformed_token",
            VerificationError::UnsupportedAlgorithm { .. } => "unsupported_algorithm",
            VerificationError::SignatureInvalid { .. } => "invalid_signature",
            VerificationError::TokenExpired { .. } => "token_expired",
            VerificationError::TokenNotYetValid { .. } => "token_not_yet_valid",
            VerificationError::KeyNotFound { .. } => "key_not_found",
            VerificationError::AudienceNotAllowed { .. } => "audience_not_allowed",
            VerificationError::MissingIdentityClaim { .. } => "missing_identity_claim",
            VerificationError::Fetch(_) => "key_fetch_failed",
            VerificationError::Key(_) => "invalid_key",
        }
    }
}

// =============================================================================
// Build / startup errors
// =============================================================================

/// Misuse of the token builder. Fatal to the call, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("{user_id_claim} and {roles_claim} claims must be added!")]
    MissingClaims {
        user_id_claim: String,
        roles_claim: String,
    },

    #[error("Missing 'iat' value. Unable to restore builder status")]
    MissingIssuedAt,

    #[error("Algorithm {algorithm} has no signing key, tokens cannot be issued with it")]
    MissingSigningKey { algorithm: &'static str },

    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error("Token signing failed: {0}")]
    Signing(String),
}

/// Middleware initialization failure. Prevents the middleware from serving.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Missing configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Invalid key registry URL '{url}': {reason}")]
    RegistryUrl { url: String, reason: String },

    #[error("Unusable key material: {0}")]
    KeyMaterial(String),

    #[error("Unable to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to create HTTP client: {0}")]
    HttpClient(String),
}

// =============================================================================
// HTTP rejection
// =============================================================================

/// Rejection produced by the pipeline: a status, a human-readable message and
/// the body format negotiated from the request's `Accept` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRejection {
    pub status: StatusCode,
    pub message: String,
    pub error_code: &'static str,
    pub format: ResponseFormat,
}

impl AuthRejection {
    /// 401 with the given message, rendered as HTML.
    pub fn unauthorized(message: impl Into<String>, error_code: &'static str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
            error_code,
            format: ResponseFormat::Html,
        }
    }

    /// No token was found in any configured location.
    pub fn login_required() -> Self {
        Self::unauthorized("Please login first", "missing_token")
    }

    /// The token was found but did not verify.
    pub fn invalid_token(cause: &VerificationError) -> Self {
        Self::unauthorized(
            format!("Token not valid. Cause: {cause}"),
            cause.error_code(),
        )
    }

    /// A form body that could not be buffered for parameter extraction.
    pub fn unreadable_body() -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: "Request body is too large or unreadable".to_string(),
            error_code: "unreadable_body",
            format: ResponseFormat::Html,
        }
    }

    /// Render the body according to the request's `Accept` header.
    pub fn negotiated(mut self, headers: &HeaderMap) -> Self {
        let accept = headers.get(ACCEPT).and_then(|v| v.to_str().ok());
        self.format = ResponseFormat::from_accept(accept);
        self
    }
}

impl std::fmt::Display for AuthRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        self.format.render(self.status, &self.message)
    }
}
