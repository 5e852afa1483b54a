// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Token-based request authentication for axum services.
//!
//! ## Auth Flow
//!
//! 1. The pipeline evaluates the security constraints of the request
//! 2. On protected requests it extracts a token from `X-Auth`,
//!    `Authorization: Bearer`, the `auth` parameter or a cookie
//! 3. The configured strategy verifies it:
//!    - HMAC shared secret (`HS256`/`HS384`/`HS512`)
//!    - static RSA key (`RS256`/`RS384`/`RS512`)
//!    - RSA keys from a remote registry, resolved by `kid` and cached
//! 4. The identity (user id + roles) is attached to the request
//! 5. Optionally, a renewed token with the same validity window length is
//!    returned in the `X-Auth` response header
//!
//! ## Security
//!
//! - Each strategy accepts only its own algorithm family; `none` is never
//!   accepted
//! - Registry keys are fetched over HTTPS and cached with a TTL
//! - Expiry and not-before are checked without leeway

pub mod algorithm;
pub mod builder;
pub mod claims;
pub mod codec;
pub mod constraints;
pub mod error;
pub mod extractor;
pub mod jwks;
pub mod middleware;
pub mod render;
pub mod verifier;

pub use algorithm::{AlgorithmFamily, SigningAlgorithm};
pub use builder::TokenBuilder;
pub use claims::{AuthenticatedIdentity, ClaimSet, ClaimValue};
pub use constraints::{ConstraintSource, PathConstraints, SecurityConstraint};
pub use error::{AuthRejection, BuildError, FetchError, InitError, VerificationError};
pub use extractor::{Auth, OptionalAuth, TokenLocation, TokenSources};
pub use jwks::{JwksFetcher, KeyCache, KeyCacheConfig, KeyFetcher};
pub use middleware::{auth_middleware, AuthPipeline, AuthType, PipelineConfig};
pub use verifier::{TokenVerifier, VerifiedToken, Verifier};
