// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Remote key registry (JWKS) fetching and the in-memory key cache.
//!
//! ## Key cache
//!
//! - Keys are cached per key id for a configurable TTL (default 1 hour)
//! - At most `max_entries` key ids are retained; the oldest fetch is evicted
//! - Concurrent misses for one key id share a single in-flight fetch
//! - Failed fetches are not cached unless `failure_ttl` is configured
//!
//! The cache is an owned component handed to the registry strategy at
//! construction. Two pipelines with different issuers never share keys.
//!
//! ## Security
//!
//! The registry is fetched over HTTPS. Plain HTTP is only accepted for
//! loopback hosts (local development and tests).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::DecodingKey;
use lru::LruCache;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use url::{Host, Url};

use super::error::{FetchError, InitError};

/// Default key cache TTL (1 hour).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Default number of key ids retained by the cache.
pub const DEFAULT_CACHE_SIZE: usize = 10;

/// Path appended to an issuer URL to reach its key registry.
pub const WELL_KNOWN_JWKS_PATH: &str = ".well-known/jwks.json";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Public key
// =============================================================================

/// A public key published by the registry under a key id.
#[derive(Clone)]
pub struct PublicKey {
    key_id: String,
    algorithm: Option<&'static str>,
    decoding_key: DecodingKey,
}

impl PublicKey {
    pub fn new(
        key_id: impl Into<String>,
        algorithm: Option<&'static str>,
        decoding_key: DecodingKey,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            algorithm,
            decoding_key,
        }
    }

    /// Convert a published JWK. Only RSA keys are accepted.
    pub fn from_jwk(key_id: &str, jwk: &Jwk) -> Result<Self, FetchError> {
        let AlgorithmParameters::RSA(rsa) = &jwk.algorithm else {
            return Err(FetchError::InvalidKey(format!(
                "key '{key_id}' is not an RSA key"
            )));
        };

        let decoding_key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e).map_err(|e| {
            FetchError::InvalidKey(format!("key '{key_id}' has bad RSA components: {e}"))
        })?;

        let algorithm = match &jwk.common.key_algorithm {
            None => None,
            Some(KeyAlgorithm::RS256) => Some("RS256"),
            Some(KeyAlgorithm::RS384) => Some("RS384"),
            Some(KeyAlgorithm::RS512) => Some("RS512"),
            Some(other) => {
                return Err(FetchError::InvalidKey(format!(
                    "key '{key_id}' is published for {other:?}"
                )))
            }
        };

        Ok(Self::new(key_id, algorithm, decoding_key))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Algorithm the registry restricts this key to, if any.
    pub fn algorithm(&self) -> Option<&'static str> {
        self.algorithm
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Fetchers
// =============================================================================

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<PublicKey, FetchError>> + Send + 'a>>;

/// Resolves a key id against a remote registry.
pub trait KeyFetcher: Send + Sync {
    fn fetch<'a>(&'a self, key_id: &'a str) -> FetchFuture<'a>;
}

/// Fetches keys from a JWKS endpoint.
#[derive(Debug, Clone)]
pub struct JwksFetcher {
    jwks_url: Url,
    client: reqwest::Client,
}

impl JwksFetcher {
    /// Fetcher for an explicit JWKS URL.
    pub fn new(jwks_url: Url) -> Result<Self, InitError> {
        ensure_secure_transport(&jwks_url)?;

        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| InitError::HttpClient(e.to_string()))?;

        Ok(Self { jwks_url, client })
    }

    /// Fetcher for the registry of `issuer`, at `{issuer}/.well-known/jwks.json`.
    pub fn for_issuer(issuer: &str) -> Result<Self, InitError> {
        let base = issuer.trim_end_matches('/');
        let url = Url::parse(&format!("{base}/{WELL_KNOWN_JWKS_PATH}")).map_err(|e| {
            InitError::RegistryUrl {
                url: issuer.to_string(),
                reason: e.to_string(),
            }
        })?;
        Self::new(url)
    }

    pub fn jwks_url(&self) -> &Url {
        &self.jwks_url
    }

    async fn fetch_key(&self, key_id: &str) -> Result<PublicKey, FetchError> {
        let response = self
            .client
            .get(self.jwks_url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;

        let jwk = jwks
            .keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(key_id))
            .ok_or_else(|| FetchError::NotFound {
                key_id: key_id.to_string(),
            })?;

        tracing::debug!(key_id, url = %self.jwks_url, "Fetched key from registry");
        PublicKey::from_jwk(key_id, jwk)
    }
}

impl KeyFetcher for JwksFetcher {
    fn fetch<'a>(&'a self, key_id: &'a str) -> FetchFuture<'a> {
        Box::pin(self.fetch_key(key_id))
    }
}

fn ensure_secure_transport(url: &Url) -> Result<(), InitError> {
    let loopback = match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    };

    match url.scheme() {
        "https" => Ok(()),
        "http" if loopback => Ok(()),
        scheme => Err(InitError::RegistryUrl {
            url: url.to_string(),
            reason: format!("scheme '{scheme}' is not allowed, use https"),
        }),
    }
}

// =============================================================================
// Key cache
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCacheConfig {
    /// How long a fetched key is served from the cache.
    pub ttl: Duration,
    /// Maximum number of key ids retained.
    pub max_entries: NonZeroUsize,
    /// How long a failed fetch is replayed before retrying. `None` disables
    /// negative caching.
    pub failure_ttl: Option<Duration>,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            max_entries: NonZeroUsize::new(DEFAULT_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            failure_ttl: None,
        }
    }
}

struct CachedKey {
    key: PublicKey,
    fetched_at: Instant,
}

struct CachedFailure {
    error: FetchError,
    failed_at: Instant,
}

struct CacheState {
    // Read with `peek`, so recency order is fetch order.
    keys: LruCache<String, CachedKey>,
    failures: LruCache<String, CachedFailure>,
}

type InFlight = Arc<OnceCell<Result<PublicKey, FetchError>>>;

/// Time-bounded cache of registry keys with per-key single-flight fetching.
pub struct KeyCache {
    fetcher: Arc<dyn KeyFetcher>,
    config: KeyCacheConfig,
    state: Mutex<CacheState>,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl KeyCache {
    pub fn new(fetcher: Arc<dyn KeyFetcher>, config: KeyCacheConfig) -> Self {
        let state = CacheState {
            keys: LruCache::new(config.max_entries),
            failures: LruCache::new(config.max_entries),
        };
        Self {
            fetcher,
            config,
            state: Mutex::new(state),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &KeyCacheConfig {
        &self.config
    }

    /// Return the key for `key_id`, fetching it on a miss or after expiry.
    pub async fn get(&self, key_id: &str) -> Result<PublicKey, FetchError> {
        if let Some(hit) = self.lookup(key_id) {
            return hit;
        }

        let cell = {
            let mut in_flight = lock(&self.in_flight);
            // A fetch may have completed between the first lookup and here.
            if let Some(hit) = self.lookup(key_id) {
                return hit;
            }
            Arc::clone(
                in_flight
                    .entry(key_id.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let result = cell
            .get_or_init(|| async {
                tracing::debug!(key_id, "Key cache miss, fetching from registry");
                let result = self.fetcher.fetch(key_id).await;
                self.store(key_id, &result);
                result
            })
            .await
            .clone();

        let mut in_flight = lock(&self.in_flight);
        if in_flight
            .get(key_id)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            in_flight.remove(key_id);
        }

        result
    }

    /// Whether a fresh key is cached for `key_id`.
    pub fn is_cached(&self, key_id: &str) -> bool {
        matches!(self.lookup(key_id), Some(Ok(_)))
    }

    /// Number of retained keys, fresh or not.
    pub fn len(&self) -> usize {
        lock(&self.state).keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key_id: &str) -> Option<Result<PublicKey, FetchError>> {
        let now = Instant::now();
        let mut state = lock(&self.state);

        let cached = state
            .keys
            .peek(key_id)
            .map(|entry| (now.duration_since(entry.fetched_at) < self.config.ttl, entry.key.clone()));
        match cached {
            Some((true, key)) => return Some(Ok(key)),
            Some((false, _)) => {
                state.keys.pop(key_id);
            }
            None => {}
        }

        let failure_ttl = self.config.failure_ttl?;
        let failed = state
            .failures
            .peek(key_id)
            .map(|entry| (now.duration_since(entry.failed_at) < failure_ttl, entry.error.clone()));
        match failed {
            Some((true, error)) => Some(Err(error)),
            Some((false, _)) => {
                state.failures.pop(key_id);
                None
            }
            None => None,
        }
    }

    fn store(&self, key_id: &str, result: &Result<PublicKey, FetchError>) {
        let now = Instant::now();
        let mut state = lock(&self.state);
        match result {
            Ok(key) => {
                state.failures.pop(key_id);
                let evicted = state.keys.push(
                    key_id.to_string(),
                    CachedKey {
                        key: key.clone(),
                        fetched_at: now,
                    },
                );
                if let Some((evicted_id, _)) = evicted.filter(|(id, _)| id != key_id) {
                    tracing::debug!(key_id = %evicted_id, "Evicted oldest key from cache");
                }
            }
            Err(error) => {
                tracing::warn!(key_id, error = %error, "Key registry fetch failed");
                if self.config.failure_ttl.is_some() {
                    state.failures.push(
                        key_id.to_string(),
                        CachedFailure {
                            error: error.clone(),
                            failed_at: now,
                        },
                    );
                }
            }
        }
    }
}

impl fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCache")
            .field("config", &self.config)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
