// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token builder with derived time claims, and renewal of verified tokens.
//!
//! The user-id and roles claims are mandatory. Time claims are computed from
//! the builder's "now" when the token is built:
//!
//! - `iat` = now (on by default)
//! - `exp` = now + expiry seconds
//! - `nbf` = now - not-before leeway seconds
//! - `jti` = fresh random UUID
//!
//! [`TokenBuilder::from_verified`] restores a builder from a verified token.
//! Identity and custom claims are copied verbatim, but the time claims are
//! turned back into durations relative to the source `iat`, so a renewed token
//! keeps the length of its validity window and gets a new `jti`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::algorithm::SigningAlgorithm;
use super::claims::{
    ClaimSet, ClaimValue, EXPIRES_AT, ISSUED_AT, JWT_ID, NOT_BEFORE, ROLES_CLAIM, USER_ID_CLAIM,
};
use super::codec;
use super::error::{BuildError, ClaimError};
use super::verifier::VerifiedToken;

#[derive(Debug, Clone)]
pub struct TokenBuilder {
    algorithm: SigningAlgorithm,
    claims: ClaimSet,
    pending_error: Option<ClaimError>,
    now: DateTime<Utc>,
    issued_at: bool,
    expiry_secs: Option<i64>,
    not_before_leeway_secs: Option<i64>,
    jwt_id: bool,
    user_id_claim: String,
    roles_claim: String,
}

impl TokenBuilder {
    /// New builder signing with `algorithm`; `iat` is enabled.
    pub fn new(algorithm: SigningAlgorithm) -> Self {
        Self {
            algorithm,
            claims: ClaimSet::new(),
            pending_error: None,
            now: whole_seconds(Utc::now()),
            issued_at: true,
            expiry_secs: None,
            not_before_leeway_secs: None,
            jwt_id: false,
            user_id_claim: USER_ID_CLAIM.to_string(),
            roles_claim: ROLES_CLAIM.to_string(),
        }
    }

    /// New builder signing with HS256 and `secret`.
    pub fn hs256(secret: impl AsRef<[u8]>) -> Self {
        Self::new(SigningAlgorithm::hs256(secret))
    }

    /// Restore a builder from a verified token.
    ///
    /// The token must carry `iat`; it anchors the `exp` and `nbf` durations.
    /// The builder signs with the algorithm that verified the token.
    /// Fails with [`ClaimError::Unsupported`] when the token carries a claim
    /// kind that cannot be issued (see [`ClaimValue::Json`]).
    pub fn from_verified(verified: &VerifiedToken) -> Result<Self, BuildError> {
        let mut claims = verified.claims().clone();
        if let Some((name, value)) = claims.first_unissuable() {
            return Err(unissuable(name, value).into());
        }

        let issued_at = claims
            .remove(ISSUED_AT)
            .and_then(|v| v.as_epoch_seconds())
            .ok_or(BuildError::MissingIssuedAt)?;

        let mut builder = Self::new(verified.algorithm().clone())
            .identity_claims(verified.user_id_claim(), verified.roles_claim());

        if let Some(expires_at) = claims.remove(EXPIRES_AT).and_then(|v| v.as_epoch_seconds()) {
            builder.expiry_secs = Some(expires_at - issued_at);
        }
        if let Some(not_before) = claims.remove(NOT_BEFORE).and_then(|v| v.as_epoch_seconds()) {
            builder.not_before_leeway_secs = Some(issued_at - not_before);
        }
        if claims.remove(JWT_ID).is_some() {
            builder.jwt_id = true;
        }

        builder.claims = claims;
        Ok(builder)
    }

    /// Use custom names for the mandatory identity claims.
    pub fn identity_claims(
        mut self,
        user_id_claim: impl Into<String>,
        roles_claim: impl Into<String>,
    ) -> Self {
        self.user_id_claim = user_id_claim.into();
        self.roles_claim = roles_claim.into();
        self
    }

    pub fn user_id(self, user_id: impl Into<String>) -> Self {
        let name = self.user_id_claim.clone();
        let user_id: String = user_id.into();
        self.claim(name, user_id)
    }

    pub fn roles<I, S>(self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = self.roles_claim.clone();
        let roles: Vec<String> = roles.into_iter().map(Into::into).collect();
        self.claim(name, roles)
    }

    /// Add a custom claim. A kind conflict is reported by [`build`](Self::build).
    pub fn claim(mut self, name: impl Into<String>, value: impl Into<ClaimValue>) -> Self {
        let name = name.into();
        let value = value.into();
        let result = if value.is_issuable() {
            self.claims.insert(name, value)
        } else {
            Err(unissuable(&name, &value))
        };
        if let Err(e) = result {
            self.pending_error.get_or_insert(e);
        }
        self
    }

    /// Add a custom claim given as JSON. Unsupported kinds are reported by
    /// [`build`](Self::build).
    pub fn json_claim(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        if let Err(e) = self.claims.insert_json(name, value) {
            self.pending_error.get_or_insert(e);
        }
        self
    }

    /// `exp` = now + `seconds`.
    pub fn expiry_secs(mut self, seconds: i64) -> Self {
        self.expiry_secs = Some(seconds);
        self
    }

    /// `nbf` = now - `seconds`.
    pub fn not_before_leeway(mut self, seconds: i64) -> Self {
        self.not_before_leeway_secs = Some(seconds);
        self
    }

    pub fn issued_at(mut self, enabled: bool) -> Self {
        self.issued_at = enabled;
        self
    }

    pub fn generate_jwt_id(mut self, enabled: bool) -> Self {
        self.jwt_id = enabled;
        self
    }

    pub fn algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Compute time claims relative to `now` instead of the creation time.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = whole_seconds(now);
        self
    }

    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    /// Sign a new token.
    pub fn build(self) -> Result<String, BuildError> {
        if let Some(err) = self.pending_error {
            return Err(err.into());
        }
        if !self.claims.contains(&self.user_id_claim) || !self.claims.contains(&self.roles_claim) {
            return Err(BuildError::MissingClaims {
                user_id_claim: self.user_id_claim,
                roles_claim: self.roles_claim,
            });
        }

        let claims = self.materialize()?;
        codec::encode(&claims, &self.algorithm)
    }

    fn materialize(&self) -> Result<ClaimSet, BuildError> {
        let mut claims = self.claims.clone();
        if self.issued_at {
            claims.insert(ISSUED_AT, self.now)?;
        }
        if let Some(secs) = self.expiry_secs {
            claims.insert(EXPIRES_AT, self.offset(EXPIRES_AT, secs)?)?;
        }
        if let Some(secs) = self.not_before_leeway_secs {
            claims.insert(NOT_BEFORE, self.offset(NOT_BEFORE, -secs)?)?;
        }
        if self.jwt_id {
            claims.insert(JWT_ID, Uuid::new_v4().to_string())?;
        }
        Ok(claims)
    }

    fn offset(&self, claim: &str, secs: i64) -> Result<ClaimValue, ClaimError> {
        self.now
            .timestamp()
            .checked_add(secs)
            .and_then(ClaimValue::timestamp)
            .ok_or_else(|| ClaimError::Unsupported {
                name: claim.to_string(),
                reason: format!("{secs} seconds from now is out of range"),
            })
    }
}

fn unissuable(name: &str, value: &ClaimValue) -> ClaimError {
    ClaimError::Unsupported {
        name: name.to_string(),
        reason: format!("{} claims cannot be issued", value.kind()),
    }
}

fn whole_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::codec::decode;
    use crate::auth::verifier::TokenVerifier;
    use chrono::TimeDelta;

    const SECRET: &str = "my secret";

    fn create_token(now: DateTime<Utc>) -> String {
        TokenBuilder::hs256(SECRET)
            .user_id("test")
            .roles(["role1", "role2"])
            .expiry_secs(10_000)
            .not_before_leeway(5_000)
            .at(now)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn built_token_contains_five_claims() {
        let token = create_token(Utc::now());
        let verified = TokenVerifier::hmac(SECRET).verify(&token).await.unwrap();

        let claims = verified.claims();
        assert_eq!(claims.len(), 5);
        assert_eq!(verified.user_id(), Some("test"));
        assert_eq!(verified.roles(), vec!["role1", "role2"]);

        let now = Utc::now().timestamp();
        let time_to_expire = claims.epoch_seconds(EXPIRES_AT).unwrap() - now;
        assert!(time_to_expire > 0 && time_to_expire <= 10_000);
        assert!(claims.epoch_seconds(ISSUED_AT).unwrap() <= now);
    }

    #[test]
    fn empty_builder_is_invalid() {
        let err = TokenBuilder::hs256(SECRET).build().unwrap_err();
        assert_eq!(
            err,
            BuildError::MissingClaims {
                user_id_claim: "userId".to_string(),
                roles_claim: "roles".to_string(),
            }
        );
    }

    #[test]
    fn custom_identity_claim_names_are_required() {
        let err = TokenBuilder::hs256(SECRET)
            .identity_claims("sub", "authorities")
            .user_id("test")
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::MissingClaims { .. }));

        let token = TokenBuilder::hs256(SECRET)
            .identity_claims("sub", "authorities")
            .user_id("test")
            .roles(["admin"])
            .build()
            .unwrap();
        let claims = decode(&token).unwrap().claims().clone();
        assert_eq!(claims.get_str("sub"), Some("test"));
        assert!(!claims.contains("userId"));
    }

    #[test]
    fn unsupported_custom_claim_fails_build() {
        let err = TokenBuilder::hs256(SECRET)
            .user_id("test")
            .roles(["role1"])
            .json_claim("profile", serde_json::json!({"nested": true}))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::Claim(ClaimError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn renewal_preserves_validity_window_length() {
        let t0 = Utc::now() - TimeDelta::seconds(2_000);
        let first = create_token(t0);
        let verifier = TokenVerifier::hmac(SECRET);
        let verified = verifier.verify(&first).await.unwrap();

        let renewed = TokenBuilder::from_verified(&verified)
            .unwrap()
            .at(t0 + TimeDelta::seconds(2_000))
            .build()
            .unwrap();

        let before = decode(&first).unwrap().claims().clone();
        let after = verifier.verify(&renewed).await.unwrap().claims().clone();

        let iat = after.epoch_seconds(ISSUED_AT).unwrap();
        assert_eq!(after.epoch_seconds(EXPIRES_AT).unwrap() - iat, 10_000);
        assert_eq!(iat - after.epoch_seconds(NOT_BEFORE).unwrap(), 5_000);
        assert_eq!(
            after.epoch_seconds(EXPIRES_AT).unwrap() - before.epoch_seconds(EXPIRES_AT).unwrap(),
            2_000
        );
        assert_eq!(after.get_str("userId"), Some("test"));
        assert_eq!(
            after.get_string_array("roles"),
            Some(&["role1".to_string(), "role2".to_string()][..])
        );
    }

    #[tokio::test]
    async fn renewed_builder_accepts_new_durations() {
        let verifier = TokenVerifier::hmac(SECRET);
        let verified = verifier.verify(&create_token(Utc::now())).await.unwrap();

        let renewed = TokenBuilder::from_verified(&verified)
            .unwrap()
            .expiry_secs(20_000)
            .not_before_leeway(10_000)
            .build()
            .unwrap();

        let now = Utc::now().timestamp();
        let claims = decode(&renewed).unwrap().claims().clone();
        let exp = claims.epoch_seconds(EXPIRES_AT).unwrap();
        assert!(exp > now && exp <= now + 20_000);
        let nbf = claims.epoch_seconds(NOT_BEFORE).unwrap();
        assert!(nbf >= now - 10_000 - 1 && nbf < now);
    }

    #[tokio::test]
    async fn renewal_requires_issued_at() {
        let token = TokenBuilder::hs256(SECRET)
            .user_id("test")
            .roles(["role1"])
            .issued_at(false)
            .build()
            .unwrap();
        let verified = TokenVerifier::hmac(SECRET).verify(&token).await.unwrap();

        let err = TokenBuilder::from_verified(&verified).unwrap_err();
        assert_eq!(err, BuildError::MissingIssuedAt);
    }

    #[tokio::test]
    async fn renewal_regenerates_jwt_id() {
        let token = TokenBuilder::hs256(SECRET)
            .user_id("test")
            .roles(["role1"])
            .generate_jwt_id(true)
            .claim("tenant", "acme")
            .build()
            .unwrap();
        let verifier = TokenVerifier::hmac(SECRET);
        let verified = verifier.verify(&token).await.unwrap();
        let old_id = verified.claims().get_str(JWT_ID).unwrap().to_string();

        let renewed = TokenBuilder::from_verified(&verified).unwrap().build().unwrap();
        let claims = decode(&renewed).unwrap().claims().clone();

        let new_id = claims.get_str(JWT_ID).unwrap();
        assert_ne!(new_id, old_id);
        assert!(Uuid::parse_str(new_id).is_ok());
        assert_eq!(claims.get_str("tenant"), Some("acme"));
        assert!(!claims.contains(EXPIRES_AT));
    }

    fn token_with_raw_claims() -> String {
        let claims = serde_json::json!({
            "userId": "test",
            "roles": ["role1"],
            "iat": Utc::now().timestamp(),
            "realm_access": {"roles": ["offline_access"]},
            "nonce": null,
        });
        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256);
        jsonwebtoken::encode(
            &header,
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn raw_json_claims_block_renewal_only() {
        let verified = TokenVerifier::hmac(SECRET)
            .verify(&token_with_raw_claims())
            .await
            .unwrap();

        let err = TokenBuilder::from_verified(&verified).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Claim(ClaimError::Unsupported { ref name, .. }) if name == "nonce"
        ));
    }

    #[test]
    fn raw_json_claim_values_are_not_issued() {
        let err = TokenBuilder::hs256(SECRET)
            .user_id("test")
            .roles(["role1"])
            .claim("profile", ClaimValue::Json(serde_json::json!({"a": 1})))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::Claim(ClaimError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn renewal_keeps_verifying_algorithm() {
        let token = TokenBuilder::new(SigningAlgorithm::hs512(SECRET))
            .user_id("test")
            .roles(["role1"])
            .build()
            .unwrap();
        let verified = TokenVerifier::hmac(SECRET).verify(&token).await.unwrap();

        let renewed = TokenBuilder::from_verified(&verified).unwrap().build().unwrap();
        assert_eq!(decode(&renewed).unwrap().header().alg, "HS512");
    }
}
