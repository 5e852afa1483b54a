// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::path::Path;
use std::sync::Arc;

use url::Url;

use crate::auth::constraints::PathConstraints;
use crate::auth::error::InitError;
use crate::auth::jwks::{JwksFetcher, KeyCache};
use crate::auth::middleware::{AuthPipeline, PipelineConfig};
use crate::auth::verifier::{RegistryVerifier, StaticKeyVerifier, TokenVerifier, Verifier};
use crate::config::{RegistryLocation, Settings, StrategySettings, AUTH_RENEW_TOKENS_ENV};

#[derive(Clone, Debug)]
pub struct AppState {
    pub pipeline: AuthPipeline,
    /// Present for the registry strategy; reported by the health check.
    pub key_cache: Option<Arc<KeyCache>>,
}

impl AppState {
    pub fn new(pipeline: AuthPipeline) -> Self {
        Self {
            pipeline,
            key_cache: None,
        }
    }

    pub fn with_key_cache(mut self, key_cache: Arc<KeyCache>) -> Self {
        self.key_cache = Some(key_cache);
        self
    }

    /// Build the pipeline described by `settings`, loading key material.
    pub fn from_settings(settings: &Settings) -> Result<Self, InitError> {
        let mut key_cache = None;

        let verifier = match &settings.strategy {
            StrategySettings::Hmac { secret } => TokenVerifier::hmac(secret),
            StrategySettings::Rsa {
                public_key_path,
                private_key_path,
            } => {
                let public_pem = read_pem(public_key_path)?;
                let private_pem = private_key_path.as_deref().map(read_pem).transpose()?;
                let strategy = StaticKeyVerifier::from_rsa_pem(&public_pem, private_pem.as_deref())?;
                TokenVerifier::new(Verifier::StaticAsymmetric(strategy))
            }
            StrategySettings::Registry {
                registry,
                audiences,
                cache,
            } => {
                let fetcher = match registry {
                    RegistryLocation::JwksUrl(url) => {
                        let url = Url::parse(url).map_err(|e| InitError::RegistryUrl {
                            url: url.clone(),
                            reason: e.to_string(),
                        })?;
                        JwksFetcher::new(url)?
                    }
                    RegistryLocation::Issuer(issuer) => JwksFetcher::for_issuer(issuer)?,
                };
                tracing::info!(url = %fetcher.jwks_url(), "Using remote key registry");

                let cache = Arc::new(KeyCache::new(Arc::new(fetcher), cache.clone()));
                key_cache = Some(cache.clone());
                TokenVerifier::new(Verifier::Registry(
                    RegistryVerifier::new(cache).with_audiences(audiences.iter().cloned()),
                ))
            }
        };

        let verifier = if settings.user_id_claim.is_some() || settings.roles_claim.is_some() {
            let user_id_claim = settings
                .user_id_claim
                .clone()
                .unwrap_or_else(|| verifier.user_id_claim().to_string());
            let roles_claim = settings
                .roles_claim
                .clone()
                .unwrap_or_else(|| verifier.roles_claim().to_string());
            verifier.with_identity_claims(user_id_claim, roles_claim)
        } else {
            verifier
        };

        if settings.renew_tokens && !verifier.strategy().can_sign() {
            return Err(InitError::Invalid {
                name: AUTH_RENEW_TOKENS_ENV,
                reason: "renewal needs a signing key (hmac, or rsa with a private key)".to_string(),
            });
        }

        let mut config = PipelineConfig::new(verifier).with_renewal(settings.renew_tokens);
        if let Some(cookie_name) = &settings.cookie_name {
            config = config.with_cookie_name(cookie_name.clone());
        }

        let constraints = settings
            .protected_paths
            .iter()
            .fold(PathConstraints::new().preemptive(settings.preemptive), |c, path| {
                c.protect(path.clone())
            });

        let state = Self::new(AuthPipeline::new(config, constraints));
        Ok(match key_cache {
            Some(cache) => state.with_key_cache(cache),
            None => state,
        })
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, InitError> {
    std::fs::read(path).map_err(|source| InitError::Io {
        path: path.display().to_string(),
        source,
    })
}
