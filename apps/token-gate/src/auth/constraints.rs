// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Security constraints: which requests require authentication.
//!
//! The pipeline asks a [`ConstraintSource`] for the constraints that apply to
//! a request and decides with [`evaluate`]:
//!
//! - no constraint applies: pass through, unless pre-emptive authentication
//!   is requested for the resource
//! - any constraint permits anonymous access: pass through
//! - otherwise (every constraint requires authentication): enforce

use axum::http::request::Parts;

/// Policy attached to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityConstraint {
    pub authentication_required: bool,
}

impl SecurityConstraint {
    pub const fn authenticated() -> Self {
        Self {
            authentication_required: true,
        }
    }

    pub const fn permit_all() -> Self {
        Self {
            authentication_required: false,
        }
    }
}

/// Outcome of constraint evaluation for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enforcement {
    Passthrough,
    Enforce,
}

pub fn evaluate(constraints: &[SecurityConstraint], preemptive: bool) -> Enforcement {
    if constraints.is_empty() {
        return if preemptive {
            Enforcement::Enforce
        } else {
            Enforcement::Passthrough
        };
    }

    if constraints.iter().all(|c| c.authentication_required) {
        Enforcement::Enforce
    } else {
        Enforcement::Passthrough
    }
}

/// Supplies the constraints that apply to a request (the routing/realm side
/// of the host application).
pub trait ConstraintSource: Send + Sync + 'static {
    fn constraints_for(&self, request: &Parts) -> Vec<SecurityConstraint>;

    /// Whether to authenticate a request no constraint applies to.
    fn preemptive_authentication(&self, _request: &Parts) -> bool {
        false
    }
}

/// Path-prefix based constraints.
///
/// A prefix matches a path equal to it or continuing with `/`, so `/v1`
/// covers `/v1` and `/v1/me` but not `/v10`.
#[derive(Debug, Clone, Default)]
pub struct PathConstraints {
    rules: Vec<(String, SecurityConstraint)>,
    preemptive: bool,
}

impl PathConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require authentication under `prefix`.
    pub fn protect(mut self, prefix: impl Into<String>) -> Self {
        self.rules
            .push((normalize(prefix.into()), SecurityConstraint::authenticated()));
        self
    }

    /// Allow anonymous access under `prefix`, even inside a protected prefix.
    pub fn permit(mut self, prefix: impl Into<String>) -> Self {
        self.rules
            .push((normalize(prefix.into()), SecurityConstraint::permit_all()));
        self
    }

    /// Authenticate requests that match no rule.
    pub fn preemptive(mut self, enabled: bool) -> Self {
        self.preemptive = enabled;
        self
    }

    pub fn matching(&self, path: &str) -> Vec<SecurityConstraint> {
        self.rules
            .iter()
            .filter(|(prefix, _)| prefix_matches(prefix, path))
            .map(|(_, constraint)| *constraint)
            .collect()
    }
}

impl ConstraintSource for PathConstraints {
    fn constraints_for(&self, request: &Parts) -> Vec<SecurityConstraint> {
        self.matching(request.uri.path())
    }

    fn preemptive_authentication(&self, _request: &Parts) -> bool {
        self.preemptive
    }
}

fn normalize(prefix: String) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
