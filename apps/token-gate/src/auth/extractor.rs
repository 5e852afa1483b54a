// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token extraction from requests, and the axum extractors for the
//! authenticated identity.
//!
//! Token locations, in default precedence order:
//!
//! 1. `X-Auth: <token>`
//! 2. `Authorization: Bearer <token>` (scheme is case-insensitive)
//! 3. `auth` query parameter, or `auth` field of a form body
//! 4. a named cookie, when one is configured
//!
//! The first non-empty match wins, even if it later fails verification.
//!
//! Handlers read the identity attached by the pipeline:
//!
//! ```rust,ignore
//! async fn me(Auth(identity): Auth) -> impl IntoResponse {
//!     Json(identity)
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
        HeaderMap, HeaderName,
    },
};

use super::claims::AuthenticatedIdentity;
use super::error::AuthRejection;

/// Dedicated request header carrying a token; also the renewal response header.
pub const AUTH_HEADER: HeaderName = HeaderName::from_static("x-auth");

/// Query / form parameter carrying a token.
pub const AUTH_PARAM: &str = "auth";

const BEARER_PREFIX: &str = "bearer ";

/// Where a token was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenLocation {
    Header,
    Bearer,
    Parameter,
    Cookie,
}

/// Token locations in precedence order, plus the cookie name if cookie
/// extraction is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSources {
    precedence: Vec<TokenLocation>,
    cookie_name: Option<String>,
}

impl Default for TokenSources {
    fn default() -> Self {
        Self {
            precedence: vec![
                TokenLocation::Header,
                TokenLocation::Bearer,
                TokenLocation::Parameter,
                TokenLocation::Cookie,
            ],
            cookie_name: None,
        }
    }
}

impl TokenSources {
    pub fn with_precedence(mut self, precedence: Vec<TokenLocation>) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn with_cookie_name(mut self, cookie_name: impl Into<String>) -> Self {
        self.cookie_name = Some(cookie_name.into());
        self
    }

    pub fn precedence(&self) -> &[TokenLocation] {
        &self.precedence
    }

    pub fn cookie_name(&self) -> Option<&str> {
        self.cookie_name.as_deref()
    }

    pub fn reads_parameter(&self) -> bool {
        self.precedence.contains(&TokenLocation::Parameter)
    }

    /// Whether the form body must be read to honour precedence: the `auth`
    /// parameter is listed, and no location ahead of the body (including the
    /// query string) holds a token.
    pub fn needs_form(&self, parts: &Parts) -> bool {
        for &location in &self.precedence {
            if location == TokenLocation::Parameter {
                return parts
                    .uri
                    .query()
                    .and_then(|q| from_form_encoded(q.as_bytes()))
                    .is_none();
            }
            if self.extract_at(location, parts, None).is_some() {
                return false;
            }
        }
        false
    }

    /// Find a token in `parts`. `form` is the buffered url-encoded body, if
    /// the request carried one.
    pub fn extract(&self, parts: &Parts, form: Option<&[u8]>) -> Option<(TokenLocation, String)> {
        self.precedence.iter().find_map(|&location| {
            self.extract_at(location, parts, form)
                .map(|token| (location, token))
        })
    }

    fn extract_at(
        &self,
        location: TokenLocation,
        parts: &Parts,
        form: Option<&[u8]>,
    ) -> Option<String> {
        match location {
            TokenLocation::Header => from_auth_header(&parts.headers),
            TokenLocation::Bearer => from_bearer(&parts.headers),
            TokenLocation::Parameter => parts
                .uri
                .query()
                .and_then(|q| from_form_encoded(q.as_bytes()))
                .or_else(|| form.and_then(from_form_encoded)),
            TokenLocation::Cookie => self
                .cookie_name
                .as_deref()
                .and_then(|name| from_cookie(&parts.headers, name)),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn from_auth_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(AUTH_HEADER)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(non_empty)
}

fn from_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(AUTHORIZATION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|value| {
            let value = value.trim_start();
            let scheme = value.get(..BEARER_PREFIX.len())?;
            if scheme.eq_ignore_ascii_case(BEARER_PREFIX) {
                non_empty(&value[BEARER_PREFIX.len()..])
            } else {
                None
            }
        })
}

fn from_form_encoded(input: &[u8]) -> Option<String> {
    url::form_urlencoded::parse(input)
        .filter(|(name, _)| name == AUTH_PARAM)
        .find_map(|(_, value)| non_empty(&value))
}

fn from_cookie(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.split_once('='))
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case(cookie_name))
        .find_map(|(_, value)| non_empty(value.trim().trim_matches('"')))
}

// =============================================================================
// Identity extractors
// =============================================================================

/// Extractor for the identity attached by the authentication pipeline.
///
/// Rejects with 401 "Please login first" when the pipeline did not
/// authenticate the request (e.g. the route passed through).
#[derive(Debug, Clone)]
pub struct Auth(pub AuthenticatedIdentity);

impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedIdentity>()
            .cloned()
            .map(Auth)
            .ok_or_else(|| AuthRejection::login_required().negotiated(&parts.headers))
    }
}

/// Optional authentication extractor.
///
/// Returns `None` on routes the pipeline passed through.
#[derive(Debug, Clone)]
pub struct OptionalAuth(pub Option<AuthenticatedIdentity>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuth(
            parts.extensions.get::<AuthenticatedIdentity>().cloned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    fn sources() -> TokenSources {
        TokenSources::default().with_cookie_name("AUTH_TOKEN")
    }

    #[test]
    fn header_takes_precedence_over_other_locations() {
        let parts = parts(
            Request::builder()
                .uri("/v1/me?auth=from-param")
                .header("X-Auth", "from-header")
                .header("Authorization", "Bearer from-bearer")
                .header("Cookie", "AUTH_TOKEN=from-cookie"),
        );
        assert_eq!(
            sources().extract(&parts, None),
            Some((TokenLocation::Header, "from-header".to_string()))
        );
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        for value in ["Bearer abc", "bearer abc", "BEARER   abc"] {
            let parts = parts(Request::builder().header("Authorization", value));
            assert_eq!(
                sources().extract(&parts, None),
                Some((TokenLocation::Bearer, "abc".to_string()))
            );
        }

        let parts = parts(Request::builder().header("Authorization", "Basic dXNlcjpwYXNz"));
        assert_eq!(sources().extract(&parts, None), None);
    }

    #[test]
    fn empty_values_fall_through_to_next_location() {
        let parts = parts(
            Request::builder()
                .uri("/v1/me?auth=from-param")
                .header("X-Auth", "  ")
                .header("Authorization", "Bearer "),
        );
        assert_eq!(
            sources().extract(&parts, None),
            Some((TokenLocation::Parameter, "from-param".to_string()))
        );
    }

    #[test]
    fn form_body_parameter_is_read_after_query() {
        let parts = parts(Request::builder().uri("/v1/login"));
        assert_eq!(
            sources().extract(&parts, Some(b"user=x&auth=from%2Dform")),
            Some((TokenLocation::Parameter, "from-form".to_string()))
        );
    }

    #[test]
    fn form_body_is_needed_only_when_nothing_ranks_ahead_of_it() {
        let sources = sources();

        let header = parts(Request::builder().uri("/v1/upload").header("X-Auth", "from-header"));
        assert!(!sources.needs_form(&header));

        let query = parts(Request::builder().uri("/v1/upload?auth=from-param"));
        assert!(!sources.needs_form(&query));

        // A cookie ranks after the form parameter, so the body is still read.
        let cookie = parts(
            Request::builder()
                .uri("/v1/upload")
                .header("Cookie", "AUTH_TOKEN=from-cookie"),
        );
        assert!(sources.needs_form(&cookie));

        let no_param = sources.with_precedence(vec![TokenLocation::Header, TokenLocation::Cookie]);
        assert!(!no_param.needs_form(&cookie));
    }

    #[test]
    fn cookie_name_matches_case_insensitively() {
        let parts = parts(
            Request::builder().header("Cookie", "theme=dark; auth_token=\"from-cookie\""),
        );
        assert_eq!(
            sources().extract(&parts, None),
            Some((TokenLocation::Cookie, "from-cookie".to_string()))
        );

        // Cookie extraction is off without a configured name.
        assert_eq!(TokenSources::default().extract(&parts, None), None);
    }

    #[test]
    fn custom_precedence_is_honoured() {
        let sources = sources().with_precedence(vec![TokenLocation::Cookie, TokenLocation::Header]);
        let parts = parts(
            Request::builder()
                .header("X-Auth", "from-header")
                .header("Cookie", "AUTH_TOKEN=from-cookie"),
        );
        assert_eq!(
            sources.extract(&parts, None),
            Some((TokenLocation::Cookie, "from-cookie".to_string()))
        );
        assert!(!sources.reads_parameter());
    }

    #[tokio::test]
    async fn auth_extractor_reads_extensions() {
        let mut parts = parts(Request::builder().uri("/v1/me"));
        parts
            .extensions
            .insert(AuthenticatedIdentity::new("user_from_pipeline", ["role1"]));

        let Auth(identity) = Auth::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(identity.user_id, "user_from_pipeline");
    }

    #[tokio::test]
    async fn auth_extractor_rejects_without_identity() {
        let mut parts = parts(Request::builder().uri("/v1/me"));
        let rejection = Auth::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert_eq!(rejection.status, StatusCode::UNAUTHORIZED);
        assert_eq!(rejection.message, "Please login first");
    }

    #[tokio::test]
    async fn optional_auth_returns_none_without_identity() {
        let mut parts = parts(Request::builder().uri("/health"));
        let OptionalAuth(identity) = OptionalAuth::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(identity.is_none());
    }
}
