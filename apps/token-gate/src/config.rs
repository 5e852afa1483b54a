// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the [`Settings`] resolved from
//! them at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `AUTH_STRATEGY` | `hmac`, `rsa` or `registry` | `hmac` |
//! | `AUTH_SECRET` | Shared secret | Required for `hmac` |
//! | `AUTH_PUBLIC_KEY_PATH` | RSA public key (PEM) | Required for `rsa` |
//! | `AUTH_PRIVATE_KEY_PATH` | RSA private key (PEM), enables renewal | Optional |
//! | `AUTH_JWKS_URL` | Key registry endpoint | One of these two |
//! | `AUTH_ISSUER_URL` | Issuer; registry at `/.well-known/jwks.json` | for `registry` |
//! | `AUTH_AUDIENCES` | Comma-separated accepted audiences | Any audience |
//! | `AUTH_JWKS_CACHE_TTL_SECS` | Key cache TTL | `3600` |
//! | `AUTH_JWKS_CACHE_SIZE` | Key cache capacity | `10` |
//! | `AUTH_JWKS_FAILURE_TTL_SECS` | Replay window for failed key fetches | Off |
//! | `AUTH_USER_ID_CLAIM` | User id claim name | `userId` (`sub` for `registry`) |
//! | `AUTH_ROLES_CLAIM` | Roles claim name | `roles` (`authorities` for `registry`) |
//! | `AUTH_COOKIE_NAME` | Cookie read for tokens | Cookies not read |
//! | `AUTH_RENEW_TOKENS` | Send renewed tokens in `X-Auth` (not for `registry`) | `false` |
//! | `AUTH_PROTECTED_PATHS` | Comma-separated path prefixes requiring auth | `/v1` |
//! | `AUTH_PREEMPTIVE` | Also authenticate unprotected paths | `false` |

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::error::InitError;
use crate::auth::jwks::KeyCacheConfig;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const AUTH_STRATEGY_ENV: &str = "AUTH_STRATEGY";
pub const AUTH_SECRET_ENV: &str = "AUTH_SECRET";
pub const AUTH_PUBLIC_KEY_PATH_ENV: &str = "AUTH_PUBLIC_KEY_PATH";
pub const AUTH_PRIVATE_KEY_PATH_ENV: &str = "AUTH_PRIVATE_KEY_PATH";

/// Explicit key registry endpoint. Takes precedence over the issuer URL.
pub const AUTH_JWKS_URL_ENV: &str = "AUTH_JWKS_URL";
pub const AUTH_ISSUER_URL_ENV: &str = "AUTH_ISSUER_URL";
pub const AUTH_AUDIENCES_ENV: &str = "AUTH_AUDIENCES";
pub const AUTH_JWKS_CACHE_TTL_ENV: &str = "AUTH_JWKS_CACHE_TTL_SECS";
pub const AUTH_JWKS_CACHE_SIZE_ENV: &str = "AUTH_JWKS_CACHE_SIZE";
pub const AUTH_JWKS_FAILURE_TTL_ENV: &str = "AUTH_JWKS_FAILURE_TTL_SECS";

pub const AUTH_USER_ID_CLAIM_ENV: &str = "AUTH_USER_ID_CLAIM";
pub const AUTH_ROLES_CLAIM_ENV: &str = "AUTH_ROLES_CLAIM";
pub const AUTH_COOKIE_NAME_ENV: &str = "AUTH_COOKIE_NAME";
pub const AUTH_RENEW_TOKENS_ENV: &str = "AUTH_RENEW_TOKENS";
pub const AUTH_PROTECTED_PATHS_ENV: &str = "AUTH_PROTECTED_PATHS";
pub const AUTH_PREEMPTIVE_ENV: &str = "AUTH_PREEMPTIVE";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_PROTECTED_PATH: &str = "/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Verification strategy and its key material location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategySettings {
    Hmac {
        secret: String,
    },
    Rsa {
        public_key_path: PathBuf,
        private_key_path: Option<PathBuf>,
    },
    Registry {
        registry: RegistryLocation,
        audiences: Vec<String>,
        cache: KeyCacheConfig,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryLocation {
    JwksUrl(String),
    Issuer(String),
}

/// Settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub strategy: StrategySettings,
    pub user_id_claim: Option<String>,
    pub roles_claim: Option<String>,
    pub cookie_name: Option<String>,
    pub renew_tokens: bool,
    pub protected_paths: Vec<String>,
    pub preemptive: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self, InitError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve settings through `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, InitError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let log_format = match var(LOG_FORMAT_ENV).as_deref() {
            None => LogFormat::default(),
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            Some(v) if v.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            Some(v) => {
                return Err(InitError::Invalid {
                    name: LOG_FORMAT_ENV,
                    reason: format!("expected 'json' or 'pretty', got '{v}'"),
                })
            }
        };

        let strategy_name = var(AUTH_STRATEGY_ENV).unwrap_or_else(|| "hmac".to_string());
        let strategy = match strategy_name.to_ascii_lowercase().as_str() {
            "hmac" => StrategySettings::Hmac {
                secret: var(AUTH_SECRET_ENV).ok_or(InitError::Missing(AUTH_SECRET_ENV))?,
            },
            "rsa" => StrategySettings::Rsa {
                public_key_path: var(AUTH_PUBLIC_KEY_PATH_ENV)
                    .map(PathBuf::from)
                    .ok_or(InitError::Missing(AUTH_PUBLIC_KEY_PATH_ENV))?,
                private_key_path: var(AUTH_PRIVATE_KEY_PATH_ENV).map(PathBuf::from),
            },
            "registry" => {
                let registry = match (var(AUTH_JWKS_URL_ENV), var(AUTH_ISSUER_URL_ENV)) {
                    (Some(url), _) => RegistryLocation::JwksUrl(url),
                    (None, Some(issuer)) => RegistryLocation::Issuer(issuer),
                    (None, None) => return Err(InitError::Missing(AUTH_ISSUER_URL_ENV)),
                };

                let defaults = KeyCacheConfig::default();
                let cache = KeyCacheConfig {
                    ttl: var(AUTH_JWKS_CACHE_TTL_ENV)
                        .map(|v| parse::<u64>(AUTH_JWKS_CACHE_TTL_ENV, &v).map(Duration::from_secs))
                        .transpose()?
                        .unwrap_or(defaults.ttl),
                    max_entries: var(AUTH_JWKS_CACHE_SIZE_ENV)
                        .map(|v| parse::<NonZeroUsize>(AUTH_JWKS_CACHE_SIZE_ENV, &v))
                        .transpose()?
                        .unwrap_or(defaults.max_entries),
                    failure_ttl: var(AUTH_JWKS_FAILURE_TTL_ENV)
                        .map(|v| parse::<u64>(AUTH_JWKS_FAILURE_TTL_ENV, &v).map(Duration::from_secs))
                        .transpose()?,
                };

                StrategySettings::Registry {
                    registry,
                    audiences: var(AUTH_AUDIENCES_ENV).map(|v| parse_list(&v)).unwrap_or_default(),
                    cache,
                }
            }
            other => {
                return Err(InitError::Invalid {
                    name: AUTH_STRATEGY_ENV,
                    reason: format!("expected 'hmac', 'rsa' or 'registry', got '{other}'"),
                })
            }
        };

        Ok(Self {
            host: var(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: var(PORT_ENV)
                .map(|v| parse(PORT_ENV, &v))
                .transpose()?
                .unwrap_or(DEFAULT_PORT),
            log_format,
            strategy,
            user_id_claim: var(AUTH_USER_ID_CLAIM_ENV),
            roles_claim: var(AUTH_ROLES_CLAIM_ENV),
            cookie_name: var(AUTH_COOKIE_NAME_ENV),
            renew_tokens: var(AUTH_RENEW_TOKENS_ENV)
                .map(|v| parse_bool(AUTH_RENEW_TOKENS_ENV, &v))
                .transpose()?
                .unwrap_or(false),
            protected_paths: var(AUTH_PROTECTED_PATHS_ENV)
                .map(|v| parse_list(&v))
                .unwrap_or_else(|| vec![DEFAULT_PROTECTED_PATH.to_string()]),
            preemptive: var(AUTH_PREEMPTIVE_ENV)
                .map(|v| parse_bool(AUTH_PREEMPTIVE_ENV, &v))
                .transpose()?
                .unwrap_or(false),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T>(name: &'static str, value: &str) -> Result<T, InitError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| InitError::Invalid {
        name,
        reason: format!("'{value}': {e}"),
    })
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, InitError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(InitError::Invalid {
            name,
            reason: format!("'{value}' is not a boolean"),
        }),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}
