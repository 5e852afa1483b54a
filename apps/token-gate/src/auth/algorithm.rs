// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signing algorithms: an algorithm name bound to its key material.
//!
//! Two families are supported, each with three bit strengths:
//!
//! - HMAC with a shared secret: `HS256`, `HS384`, `HS512`
//! - RSA PKCS#1 v1.5: `RS256`, `RS384`, `RS512`

use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use super::claims::{ClaimSet, EXPIRES_AT, NOT_BEFORE};
use super::codec::DecodedToken;
use super::error::{BuildError, DecodeError, VerificationError};

const HMAC_ALGORITHMS: [(&str, Algorithm); 3] = [
    ("HS256", Algorithm::HS256),
    ("HS384", Algorithm::HS384),
    ("HS512", Algorithm::HS512),
];

const RSA_ALGORITHMS: [(&str, Algorithm); 3] = [
    ("RS256", Algorithm::RS256),
    ("RS384", Algorithm::RS384),
    ("RS512", Algorithm::RS512),
];

/// A family of algorithms sharing one kind of key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmFamily {
    Hmac,
    Rsa,
}

impl AlgorithmFamily {
    fn members(self) -> &'static [(&'static str, Algorithm); 3] {
        match self {
            AlgorithmFamily::Hmac => &HMAC_ALGORITHMS,
            AlgorithmFamily::Rsa => &RSA_ALGORITHMS,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AlgorithmFamily::Hmac => "HMAC",
            AlgorithmFamily::Rsa => "RSA",
        }
    }

    /// Algorithm names accepted by this family.
    pub fn names(self) -> [&'static str; 3] {
        let m = self.members();
        [m[0].0, m[1].0, m[2].0]
    }

    /// Look up `name` among the family members. Names outside the family
    /// (including `none`) are rejected.
    pub fn resolve(self, name: &str) -> Result<(&'static str, Algorithm), VerificationError> {
        self.members()
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .copied()
            .ok_or_else(|| VerificationError::UnsupportedAlgorithm {
                algorithm: name.to_string(),
                family: self.label(),
            })
    }
}

/// An algorithm name plus the key material needed to verify (and, when a
/// signing key is present, to issue) tokens. Immutable once built.
#[derive(Clone)]
pub struct SigningAlgorithm {
    name: &'static str,
    algorithm: Algorithm,
    family: AlgorithmFamily,
    key_id: Option<String>,
    signing_key: Option<EncodingKey>,
    verifying_key: DecodingKey,
}

impl SigningAlgorithm {
    /// HMAC algorithm `name` keyed with `secret`.
    pub fn hmac(name: &str, secret: impl AsRef<[u8]>) -> Result<Self, VerificationError> {
        let (name, algorithm) = AlgorithmFamily::Hmac.resolve(name)?;
        let secret = secret.as_ref();
        Ok(Self {
            name,
            algorithm,
            family: AlgorithmFamily::Hmac,
            key_id: None,
            signing_key: Some(EncodingKey::from_secret(secret)),
            verifying_key: DecodingKey::from_secret(secret),
        })
    }

    pub fn hs256(secret: impl AsRef<[u8]>) -> Self {
        Self::hmac_member(0, secret)
    }

    pub fn hs384(secret: impl AsRef<[u8]>) -> Self {
        Self::hmac_member(1, secret)
    }

    pub fn hs512(secret: impl AsRef<[u8]>) -> Self {
        Self::hmac_member(2, secret)
    }

    fn hmac_member(index: usize, secret: impl AsRef<[u8]>) -> Self {
        let (name, algorithm) = HMAC_ALGORITHMS[index];
        let secret = secret.as_ref();
        Self {
            name,
            algorithm,
            family: AlgorithmFamily::Hmac,
            key_id: None,
            signing_key: Some(EncodingKey::from_secret(secret)),
            verifying_key: DecodingKey::from_secret(secret),
        }
    }

    /// RSA algorithm `name` with a public key and, optionally, the private key
    /// needed to issue tokens.
    pub fn rsa(
        name: &str,
        verifying_key: DecodingKey,
        signing_key: Option<EncodingKey>,
    ) -> Result<Self, VerificationError> {
        let (name, algorithm) = AlgorithmFamily::Rsa.resolve(name)?;
        Ok(Self {
            name,
            algorithm,
            family: AlgorithmFamily::Rsa,
            key_id: None,
            signing_key,
            verifying_key,
        })
    }

    /// Key identifier written to the `kid` header of issued tokens.
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Algorithm name as it appears in the token header (e.g. `HS256`).
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn family(&self) -> AlgorithmFamily {
        self.family
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    pub fn can_sign(&self) -> bool {
        self.signing_key.is_some()
    }

    /// Sign `claims` into a compact token.
    pub(crate) fn sign(&self, claims: &ClaimSet) -> Result<String, BuildError> {
        let key = self
            .signing_key
            .as_ref()
            .ok_or(BuildError::MissingSigningKey {
                algorithm: self.name,
            })?;

        let mut header = Header::new(self.algorithm);
        header.kid = self.key_id.clone();

        jsonwebtoken::encode(&header, claims, key).map_err(|e| BuildError::Signing(e.to_string()))
    }

    /// Check the token signature, then its `exp` / `nbf` claims against `now`.
    pub fn verify(&self, decoded: &DecodedToken, now: DateTime<Utc>) -> Result<(), VerificationError> {
        if decoded.header().alg != self.name {
            return Err(VerificationError::UnsupportedAlgorithm {
                algorithm: decoded.header().alg.clone(),
                family: self.family.label(),
            });
        }

        // Time claims are checked below with our own boundaries.
        let mut validation = Validation::new(self.algorithm);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        jsonwebtoken::decode::<serde_json::Value>(decoded.raw(), &self.verifying_key, &validation)
            .map_err(|e| self.map_jwt_error(e))?;

        check_time_claims(decoded.claims(), now)
    }

    fn map_jwt_error(&self, err: jsonwebtoken::errors::Error) -> VerificationError {
        match err.kind() {
            ErrorKind::InvalidSignature => VerificationError::SignatureInvalid {
                algorithm: self.name,
            },
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                VerificationError::UnsupportedAlgorithm {
                    algorithm: self.name.to_string(),
                    family: self.family.label(),
                }
            }
            ErrorKind::InvalidToken => {
                VerificationError::Malformed(DecodeError::Malformed(err.to_string()))
            }
            _ => VerificationError::Key(err.to_string()),
        }
    }
}

impl fmt::Debug for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningAlgorithm")
            .field("name", &self.name)
            .field("key_id", &self.key_id)
            .field("can_sign", &self.can_sign())
            .finish_non_exhaustive()
    }
}

/// Expired once `now >= exp`; not yet valid while `now < nbf`.
fn check_time_claims(claims: &ClaimSet, now: DateTime<Utc>) -> Result<(), VerificationError> {
    let now = now.timestamp();

    if let Some(exp) = claims.epoch_seconds(EXPIRES_AT) {
        if now >= exp {
            return Err(VerificationError::TokenExpired {
                expired_at: DateTime::from_timestamp(exp, 0).unwrap_or_default(),
            });
        }
    }

    if let Some(nbf) = claims.epoch_seconds(NOT_BEFORE) {
        if now < nbf {
            return Err(VerificationError::TokenNotYetValid {
                not_before: DateTime::from_timestamp(nbf, 0).unwrap_or_default(),
            });
        }
    }

    Ok(())
}
