// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Token Gate - token authentication middleware for axum
//!
//! Verifies signed tokens on incoming requests, attaches the authenticated
//! identity to the request, and optionally renews tokens on the way out.
//!
//! ## Modules
//!
//! - `auth` - Token codec, verification strategies, key cache and middleware
//! - `api` - Demo HTTP API (Axum) behind the middleware
//! - `config` - Environment configuration
//! - `state` - Shared application state built from the configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod state;
