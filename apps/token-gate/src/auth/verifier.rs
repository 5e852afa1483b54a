// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signature verification strategies and the verified-token adapter.
//!
//! Each strategy accepts exactly one algorithm family and picks the bit
//! strength from the token header:
//!
//! | Strategy            | Family | Key                                  |
//! |---------------------|--------|--------------------------------------|
//! | `Symmetric`         | HMAC   | shared secret                        |
//! | `StaticAsymmetric`  | RSA    | public key supplied at construction  |
//! | `Registry`          | RSA    | public key resolved by `kid` from a  |
//! |                     |        | cached remote key registry           |

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};

use super::algorithm::{AlgorithmFamily, SigningAlgorithm};
use super::claims::{
    AuthenticatedIdentity, ClaimSet, ClaimValue, AUDIENCE, ROLES_CLAIM, SUBJECT, USER_ID_CLAIM,
};
use super::codec::{self, DecodedToken};
use super::error::{FetchError, InitError, VerificationError};
use super::jwks::KeyCache;

/// Roles claim used by registry-issued tokens unless configured otherwise.
pub const REGISTRY_ROLES_CLAIM: &str = "authorities";

// =============================================================================
// Strategies
// =============================================================================

/// HMAC verification with a shared secret.
#[derive(Clone)]
pub struct SymmetricVerifier {
    secret: Vec<u8>,
}

impl SymmetricVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }
}

impl fmt::Debug for SymmetricVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricVerifier { secret: <redacted> }")
    }
}

/// RSA verification with a fixed public key. The optional private key lets
/// renewed tokens be signed by the same strategy.
#[derive(Clone)]
pub struct StaticKeyVerifier {
    public_key: DecodingKey,
    private_key: Option<EncodingKey>,
}

impl StaticKeyVerifier {
    pub fn new(public_key: DecodingKey, private_key: Option<EncodingKey>) -> Self {
        Self {
            public_key,
            private_key,
        }
    }

    /// Load the key pair from PEM text.
    pub fn from_rsa_pem(public_pem: &[u8], private_pem: Option<&[u8]>) -> Result<Self, InitError> {
        let public_key = DecodingKey::from_rsa_pem(public_pem)
            .map_err(|e| InitError::KeyMaterial(format!("public key: {e}")))?;
        let private_key = private_pem
            .map(EncodingKey::from_rsa_pem)
            .transpose()
            .map_err(|e| InitError::KeyMaterial(format!("private key: {e}")))?;
        Ok(Self::new(public_key, private_key))
    }

    pub fn can_sign(&self) -> bool {
        self.private_key.is_some()
    }
}

impl fmt::Debug for StaticKeyVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeyVerifier")
            .field("can_sign", &self.can_sign())
            .finish_non_exhaustive()
    }
}

/// RSA verification with keys resolved from a remote registry.
#[derive(Debug, Clone)]
pub struct RegistryVerifier {
    keys: Arc<KeyCache>,
    audiences: HashSet<String>,
}

impl RegistryVerifier {
    pub fn new(keys: Arc<KeyCache>) -> Self {
        Self {
            keys,
            audiences: HashSet::new(),
        }
    }

    /// Accept only tokens whose `aud` matches one of `audiences`.
    /// An empty list accepts any audience.
    pub fn with_audiences<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    pub fn keys(&self) -> &Arc<KeyCache> {
        &self.keys
    }

    fn check_audience(&self, claims: &ClaimSet) -> Result<(), VerificationError> {
        if self.audiences.is_empty() {
            return Ok(());
        }

        let rejected = match claims.get(AUDIENCE) {
            Some(ClaimValue::String(aud)) if self.audiences.contains(aud) => return Ok(()),
            Some(ClaimValue::StringArray(auds)) if auds.iter().any(|a| self.audiences.contains(a)) => {
                return Ok(())
            }
            Some(ClaimValue::String(aud)) => aud.clone(),
            Some(ClaimValue::StringArray(auds)) => auds.join(","),
            Some(ClaimValue::Json(raw)) => raw.to_string(),
            _ => "null".to_string(),
        };
        Err(VerificationError::AudienceNotAllowed { audience: rejected })
    }
}

/// Signature verification strategy.
#[derive(Debug, Clone)]
pub enum Verifier {
    Symmetric(SymmetricVerifier),
    StaticAsymmetric(StaticKeyVerifier),
    Registry(RegistryVerifier),
}

impl Verifier {
    pub fn hmac(secret: impl AsRef<[u8]>) -> Self {
        Verifier::Symmetric(SymmetricVerifier::new(secret))
    }

    pub fn family(&self) -> AlgorithmFamily {
        match self {
            Verifier::Symmetric(_) => AlgorithmFamily::Hmac,
            Verifier::StaticAsymmetric(_) | Verifier::Registry(_) => AlgorithmFamily::Rsa,
        }
    }

    /// Whether verified tokens can be re-signed, which renewal requires.
    /// Registry keys are public keys only.
    pub fn can_sign(&self) -> bool {
        match self {
            Verifier::Symmetric(_) => true,
            Verifier::StaticAsymmetric(s) => s.can_sign(),
            Verifier::Registry(_) => false,
        }
    }

    /// Verify `decoded` now. Returns the algorithm that verified it.
    pub async fn verify(&self, decoded: &DecodedToken) -> Result<SigningAlgorithm, VerificationError> {
        self.verify_at(decoded, Utc::now()).await
    }

    /// Verify `decoded`, checking time claims against `now`.
    pub async fn verify_at(
        &self,
        decoded: &DecodedToken,
        now: DateTime<Utc>,
    ) -> Result<SigningAlgorithm, VerificationError> {
        let alg = decoded.header().alg.as_str();

        let algorithm = match self {
            Verifier::Symmetric(s) => SigningAlgorithm::hmac(alg, &s.secret)?,
            Verifier::StaticAsymmetric(s) => {
                SigningAlgorithm::rsa(alg, s.public_key.clone(), s.private_key.clone())?
            }
            Verifier::Registry(r) => {
                // Pin the family before any network traffic.
                AlgorithmFamily::Rsa.resolve(alg)?;

                let key_id = decoded
                    .key_id()
                    .ok_or(VerificationError::KeyNotFound { key_id: None })?;
                let key = r.keys.get(key_id).await.map_err(|e| match e {
                    FetchError::NotFound { key_id } => VerificationError::KeyNotFound {
                        key_id: Some(key_id),
                    },
                    other => VerificationError::Fetch(other),
                })?;

                if let Some(published) = key.algorithm() {
                    if published != alg {
                        return Err(VerificationError::UnsupportedAlgorithm {
                            algorithm: alg.to_string(),
                            family: published,
                        });
                    }
                }

                SigningAlgorithm::rsa(alg, key.decoding_key().clone(), None)?.with_key_id(key_id)
            }
        };

        algorithm.verify(decoded, now)?;

        if let Verifier::Registry(r) = self {
            r.check_audience(decoded.claims())?;
        }

        Ok(algorithm)
    }
}

// =============================================================================
// Token verifier
// =============================================================================

/// A strategy plus the names of the identity claims it reads.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    strategy: Verifier,
    user_id_claim: String,
    roles_claim: String,
}

impl TokenVerifier {
    /// Registry tokens default to `sub` / `authorities`; the others to
    /// `userId` / `roles`.
    pub fn new(strategy: Verifier) -> Self {
        let (user_id_claim, roles_claim) = match strategy {
            Verifier::Registry(_) => (SUBJECT, REGISTRY_ROLES_CLAIM),
            _ => (USER_ID_CLAIM, ROLES_CLAIM),
        };
        Self {
            strategy,
            user_id_claim: user_id_claim.to_string(),
            roles_claim: roles_claim.to_string(),
        }
    }

    pub fn hmac(secret: impl AsRef<[u8]>) -> Self {
        Self::new(Verifier::hmac(secret))
    }

    pub fn with_identity_claims(
        mut self,
        user_id_claim: impl Into<String>,
        roles_claim: impl Into<String>,
    ) -> Self {
        self.user_id_claim = user_id_claim.into();
        self.roles_claim = roles_claim.into();
        self
    }

    pub fn strategy(&self) -> &Verifier {
        &self.strategy
    }

    pub fn user_id_claim(&self) -> &str {
        &self.user_id_claim
    }

    pub fn roles_claim(&self) -> &str {
        &self.roles_claim
    }

    /// Decode and verify a compact token.
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken, VerificationError> {
        self.verify_at(token, Utc::now()).await
    }

    pub async fn verify_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedToken, VerificationError> {
        let decoded = codec::decode(token)?;
        let algorithm = self.strategy.verify_at(&decoded, now).await?;
        Ok(VerifiedToken {
            decoded,
            algorithm,
            user_id_claim: self.user_id_claim.clone(),
            roles_claim: self.roles_claim.clone(),
        })
    }
}

/// A token whose signature and time claims have been checked, together with
/// the algorithm that verified it.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    decoded: DecodedToken,
    algorithm: SigningAlgorithm,
    user_id_claim: String,
    roles_claim: String,
}

impl VerifiedToken {
    pub fn claims(&self) -> &ClaimSet {
        self.decoded.claims()
    }

    pub fn decoded(&self) -> &DecodedToken {
        &self.decoded
    }

    pub fn algorithm(&self) -> &SigningAlgorithm {
        &self.algorithm
    }

    pub fn user_id_claim(&self) -> &str {
        &self.user_id_claim
    }

    pub fn roles_claim(&self) -> &str {
        &self.roles_claim
    }

    pub fn user_id(&self) -> Option<&str> {
        self.claims().get_str(&self.user_id_claim)
    }

    /// Roles as listed in the token. A single string counts as one role.
    pub fn roles(&self) -> Vec<String> {
        match self.claims().get(&self.roles_claim) {
            Some(ClaimValue::StringArray(roles)) => roles.clone(),
            Some(ClaimValue::String(role)) => vec![role.clone()],
            _ => Vec::new(),
        }
    }

    /// The principal for this token. Fails when the user-id claim is absent.
    pub fn identity(&self) -> Result<AuthenticatedIdentity, VerificationError> {
        let user_id = self
            .user_id()
            .ok_or_else(|| VerificationError::MissingIdentityClaim {
                claim: self.user_id_claim.clone(),
            })?;
        Ok(AuthenticatedIdentity::new(user_id, self.roles()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::builder::TokenBuilder;
    use crate::auth::jwks::tests::{CountingFetcher, TEST_KEY_ID};
    use crate::auth::jwks::{KeyCacheConfig, KeyFetcher};
    use base64ct::{Base64UrlUnpadded, Encoding};
    use chrono::TimeDelta;

    const SECRET: &str = "my secret";
    const PUBLIC_PEM: &[u8] = include_bytes!("testdata/rsa_public.pem");
    const PRIVATE_PEM: &[u8] = include_bytes!("testdata/rsa_private.pem");
    const ROGUE_PEM: &[u8] = include_bytes!("testdata/rogue_private.pem");

    fn rsa_algorithm(name: &str, private_pem: &[u8]) -> SigningAlgorithm {
        SigningAlgorithm::rsa(
            name,
            DecodingKey::from_rsa_pem(PUBLIC_PEM).unwrap(),
            Some(EncodingKey::from_rsa_pem(private_pem).unwrap()),
        )
        .unwrap()
    }

    fn token_with(algorithm: SigningAlgorithm) -> String {
        TokenBuilder::new(algorithm)
            .user_id("test")
            .roles(["role1", "role2"])
            .expiry_secs(10_000)
            .build()
            .unwrap()
    }

    fn static_verifier() -> TokenVerifier {
        TokenVerifier::new(Verifier::StaticAsymmetric(
            StaticKeyVerifier::from_rsa_pem(PUBLIC_PEM, Some(PRIVATE_PEM)).unwrap(),
        ))
    }

    fn registry_verifier(fetcher: &Arc<CountingFetcher>) -> RegistryVerifier {
        let cache = KeyCache::new(
            fetcher.clone() as Arc<dyn KeyFetcher>,
            KeyCacheConfig::default(),
        );
        RegistryVerifier::new(Arc::new(cache))
    }

    fn tamper_signature(token: &str) -> String {
        let (signing_input, signature) = token.rsplit_once('.').unwrap();
        let mut bytes = Base64UrlUnpadded::decode_vec(signature).unwrap();
        bytes[0] ^= 0x01;
        format!("{signing_input}.{}", Base64UrlUnpadded::encode_string(&bytes))
    }

    #[tokio::test]
    async fn end_to_end_identity() {
        let token = token_with(SigningAlgorithm::hs256(SECRET));
        let verified = TokenVerifier::hmac(SECRET).verify(&token).await.unwrap();

        assert_eq!(
            verified.identity().unwrap(),
            AuthenticatedIdentity::new("test", ["role1", "role2"])
        );
        assert_eq!(verified.algorithm().name(), "HS256");
    }

    #[tokio::test]
    async fn symmetric_accepts_every_hmac_strength() {
        let verifier = TokenVerifier::hmac(SECRET);
        for (algorithm, name) in [
            (SigningAlgorithm::hs256(SECRET), "HS256"),
            (SigningAlgorithm::hs384(SECRET), "HS384"),
            (SigningAlgorithm::hs512(SECRET), "HS512"),
        ] {
            let verified = verifier.verify(&token_with(algorithm)).await.unwrap();
            assert_eq!(verified.algorithm().name(), name);
        }
    }

    #[tokio::test]
    async fn wrong_secret_fails_signature_check() {
        let token = token_with(SigningAlgorithm::hs256("another secret"));
        let err = TokenVerifier::hmac(SECRET).verify(&token).await.unwrap_err();
        assert_eq!(err, VerificationError::SignatureInvalid { algorithm: "HS256" });
    }

    #[tokio::test]
    async fn wrong_family_is_unsupported() {
        let rsa_token = token_with(rsa_algorithm("RS256", PRIVATE_PEM));
        let err = TokenVerifier::hmac(SECRET).verify(&rsa_token).await.unwrap_err();
        assert!(matches!(
            err,
            VerificationError::UnsupportedAlgorithm { family: "HMAC", .. }
        ));

        let hmac_token = token_with(SigningAlgorithm::hs256(SECRET));
        let err = static_verifier().verify(&hmac_token).await.unwrap_err();
        assert!(matches!(
            err,
            VerificationError::UnsupportedAlgorithm { family: "RSA", .. }
        ));
    }

    #[tokio::test]
    async fn mutated_signature_byte_is_rejected() {
        let token = tamper_signature(&token_with(SigningAlgorithm::hs512(SECRET)));
        let err = TokenVerifier::hmac(SECRET).verify(&token).await.unwrap_err();
        assert_eq!(err, VerificationError::SignatureInvalid { algorithm: "HS512" });

        let token = tamper_signature(&token_with(rsa_algorithm("RS384", PRIVATE_PEM)));
        let err = static_verifier().verify(&token).await.unwrap_err();
        assert_eq!(err, VerificationError::SignatureInvalid { algorithm: "RS384" });
    }

    #[tokio::test]
    async fn static_key_accepts_every_rsa_strength() {
        let verifier = static_verifier();
        for name in ["RS256", "RS384", "RS512"] {
            let verified = verifier
                .verify(&token_with(rsa_algorithm(name, PRIVATE_PEM)))
                .await
                .unwrap();
            assert_eq!(verified.algorithm().name(), name);
            assert!(verified.algorithm().can_sign());
        }
    }

    #[tokio::test]
    async fn static_key_rejects_other_private_key() {
        let token = token_with(rsa_algorithm("RS256", ROGUE_PEM));
        let err = static_verifier().verify(&token).await.unwrap_err();
        assert_eq!(err, VerificationError::SignatureInvalid { algorithm: "RS256" });
    }

    #[tokio::test]
    async fn time_claims_are_enforced() {
        let verifier = TokenVerifier::hmac(SECRET);
        let issued = Utc::now() - TimeDelta::seconds(100);
        let expired = TokenBuilder::hs256(SECRET)
            .user_id("test")
            .roles(["role1"])
            .expiry_secs(50)
            .at(issued)
            .build()
            .unwrap();
        assert!(matches!(
            verifier.verify(&expired).await,
            Err(VerificationError::TokenExpired { .. })
        ));

        let future = TokenBuilder::hs256(SECRET)
            .user_id("test")
            .roles(["role1"])
            .not_before_leeway(0)
            .at(Utc::now() + TimeDelta::seconds(600))
            .build()
            .unwrap();
        assert!(matches!(
            verifier.verify(&future).await,
            Err(VerificationError::TokenNotYetValid { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_token_is_a_decode_error() {
        let err = TokenVerifier::hmac(SECRET).verify("not_a_token").await.unwrap_err();
        assert_eq!(err.error_code(), "malformed_token");
    }

    #[tokio::test]
    async fn object_and_null_claims_do_not_block_verification() {
        let claims = serde_json::json!({
            "userId": "test",
            "roles": ["role1", "role2"],
            "iat": Utc::now().timestamp(),
            "exp": Utc::now().timestamp() + 600,
            "realm_access": {"roles": ["offline_access"]},
            "nonce": null,
        });
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let verified = TokenVerifier::hmac(SECRET).verify(&token).await.unwrap();
        assert_eq!(
            verified.identity().unwrap(),
            AuthenticatedIdentity::new("test", ["role1", "role2"])
        );
        assert_eq!(
            verified.claims().get("realm_access"),
            Some(&ClaimValue::Json(serde_json::json!({"roles": ["offline_access"]})))
        );
    }

    #[tokio::test]
    async fn expired_token_with_fractional_exp_is_rejected() {
        let claims = serde_json::json!({
            "userId": "test",
            "roles": ["role1"],
            "exp": (Utc::now().timestamp() - 10) as f64 + 0.5,
        });
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            TokenVerifier::hmac(SECRET).verify(&token).await,
            Err(VerificationError::TokenExpired { .. })
        ));
    }

    #[tokio::test]
    async fn missing_user_id_claim_fails_identity() {
        let token = TokenBuilder::hs256(SECRET)
            .identity_claims("sub", "authorities")
            .user_id("test")
            .roles(["role1"])
            .build()
            .unwrap();
        let verified = TokenVerifier::hmac(SECRET).verify(&token).await.unwrap();
        assert_eq!(
            verified.identity().unwrap_err(),
            VerificationError::MissingIdentityClaim {
                claim: "userId".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn registry_resolves_key_by_header_kid() {
        let fetcher = Arc::new(CountingFetcher::new(&[TEST_KEY_ID]));
        let verifier = TokenVerifier::new(Verifier::Registry(registry_verifier(&fetcher)));
        assert_eq!(verifier.user_id_claim(), "sub");
        assert_eq!(verifier.roles_claim(), "authorities");

        let token = TokenBuilder::new(rsa_algorithm("RS256", PRIVATE_PEM).with_key_id(TEST_KEY_ID))
            .identity_claims("sub", "authorities")
            .user_id("registry-user")
            .roles(["admin"])
            .build()
            .unwrap();

        for _ in 0..3 {
            let verified = verifier.verify(&token).await.unwrap();
            assert_eq!(verified.user_id(), Some("registry-user"));
            assert_eq!(verified.algorithm().key_id(), Some(TEST_KEY_ID));
            assert!(!verified.algorithm().can_sign());
        }
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn registry_reports_unknown_or_missing_kid() {
        let fetcher = Arc::new(CountingFetcher::new(&[TEST_KEY_ID]));
        let verifier = TokenVerifier::new(Verifier::Registry(registry_verifier(&fetcher)));

        let unknown = token_with(rsa_algorithm("RS256", PRIVATE_PEM).with_key_id("rotated"));
        assert_eq!(
            verifier.verify(&unknown).await.unwrap_err(),
            VerificationError::KeyNotFound {
                key_id: Some("rotated".to_string())
            }
        );

        let no_kid = token_with(rsa_algorithm("RS256", PRIVATE_PEM));
        assert_eq!(
            verifier.verify(&no_kid).await.unwrap_err(),
            VerificationError::KeyNotFound { key_id: None }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn registry_rejects_hmac_without_fetching() {
        let fetcher = Arc::new(CountingFetcher::new(&[TEST_KEY_ID]));
        let verifier = TokenVerifier::new(Verifier::Registry(registry_verifier(&fetcher)));

        let token = token_with(SigningAlgorithm::hs256(SECRET).with_key_id(TEST_KEY_ID));
        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerificationError::UnsupportedAlgorithm { .. })
        ));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn registry_rejects_algorithm_other_than_published() {
        let fetcher = Arc::new(CountingFetcher::new(&[TEST_KEY_ID]));
        let verifier = TokenVerifier::new(Verifier::Registry(registry_verifier(&fetcher)));

        let token = token_with(rsa_algorithm("RS512", PRIVATE_PEM).with_key_id(TEST_KEY_ID));
        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerificationError::UnsupportedAlgorithm { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn registry_enforces_audience_allow_list() {
        let fetcher = Arc::new(CountingFetcher::new(&[TEST_KEY_ID]));
        let verifier = TokenVerifier::new(Verifier::Registry(
            registry_verifier(&fetcher).with_audiences(["orders-api", "admin-api"]),
        ));
        let signer = rsa_algorithm("RS256", PRIVATE_PEM).with_key_id(TEST_KEY_ID);
        let base = || {
            TokenBuilder::new(signer.clone())
                .identity_claims("sub", "authorities")
                .user_id("test")
                .roles(["role1"])
        };

        let single = base().claim(AUDIENCE, "orders-api").build().unwrap();
        assert!(verifier.verify(&single).await.is_ok());

        let listed = base()
            .claim(AUDIENCE, vec!["other", "admin-api"])
            .build()
            .unwrap();
        assert!(verifier.verify(&listed).await.is_ok());

        let foreign = base().claim(AUDIENCE, "other").build().unwrap();
        assert_eq!(
            verifier.verify(&foreign).await.unwrap_err(),
            VerificationError::AudienceNotAllowed {
                audience: "other".to_string()
            }
        );

        let missing = base().build().unwrap();
        assert!(matches!(
            verifier.verify(&missing).await,
            Err(VerificationError::AudienceNotAllowed { .. })
        ));
    }
}
