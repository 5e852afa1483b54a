// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token claims and the authenticated identity derived from them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};

use super::error::ClaimError;

/// Default claim carrying the user identifier.
pub const USER_ID_CLAIM: &str = "userId";
/// Default claim carrying the user roles.
pub const ROLES_CLAIM: &str = "roles";

pub const ISSUED_AT: &str = "iat";
pub const EXPIRES_AT: &str = "exp";
pub const NOT_BEFORE: &str = "nbf";
pub const JWT_ID: &str = "jti";
pub const AUDIENCE: &str = "aud";
pub const SUBJECT: &str = "sub";

/// Registered claims whose integer value is a point in time.
fn is_time_claim(name: &str) -> bool {
    matches!(name, ISSUED_AT | EXPIRES_AT | NOT_BEFORE)
}

/// The value kinds a claim can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimKind {
    String,
    Integer,
    Boolean,
    Timestamp,
    StringArray,
    IntegerArray,
    Json,
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClaimKind::String => "string",
            ClaimKind::Integer => "integer",
            ClaimKind::Boolean => "boolean",
            ClaimKind::Timestamp => "timestamp",
            ClaimKind::StringArray => "string array",
            ClaimKind::IntegerArray => "integer array",
            ClaimKind::Json => "raw JSON",
        };
        f.write_str(name)
    }
}

/// A single claim value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    /// Second precision; serialized as seconds since the Unix epoch.
    Timestamp(DateTime<Utc>),
    StringArray(Vec<String>),
    IntegerArray(Vec<i64>),
    /// A received claim of any other JSON kind (object, float, null, mixed
    /// array). Carried through verification untouched; never issued.
    Json(serde_json::Value),
}

impl ClaimValue {
    pub fn kind(&self) -> ClaimKind {
        match self {
            ClaimValue::String(_) => ClaimKind::String,
            ClaimValue::Integer(_) => ClaimKind::Integer,
            ClaimValue::Boolean(_) => ClaimKind::Boolean,
            ClaimValue::Timestamp(_) => ClaimKind::Timestamp,
            ClaimValue::StringArray(_) => ClaimKind::StringArray,
            ClaimValue::IntegerArray(_) => ClaimKind::IntegerArray,
            ClaimValue::Json(_) => ClaimKind::Json,
        }
    }

    /// Timestamp for seconds since the epoch, truncated to whole seconds.
    pub fn timestamp(secs: i64) -> Option<Self> {
        DateTime::from_timestamp(secs, 0).map(ClaimValue::Timestamp)
    }

    /// Convert a JSON value into a claim value.
    ///
    /// Integers under the registered time claims (`iat`, `exp`, `nbf`) become
    /// timestamps. Objects, floats, nulls and mixed arrays are rejected.
    pub fn from_json(name: &str, value: serde_json::Value) -> Result<Self, ClaimError> {
        use serde_json::Value;

        let unsupported = |reason: &str| ClaimError::Unsupported {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        match value {
            Value::String(s) => Ok(ClaimValue::String(s)),
            Value::Bool(b) => Ok(ClaimValue::Boolean(b)),
            Value::Number(n) => {
                let i = n.as_i64().ok_or_else(|| unsupported("not a 64-bit integer"))?;
                if is_time_claim(name) {
                    ClaimValue::timestamp(i).ok_or_else(|| unsupported("timestamp out of range"))
                } else {
                    Ok(ClaimValue::Integer(i))
                }
            }
            Value::Array(items) => {
                if items.iter().all(Value::is_string) {
                    Ok(ClaimValue::StringArray(
                        items
                            .into_iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect(),
                    ))
                } else if items.iter().all(Value::is_i64) {
                    Ok(ClaimValue::IntegerArray(
                        items.iter().filter_map(Value::as_i64).collect(),
                    ))
                } else {
                    Err(unsupported("array elements must all be strings or all integers"))
                }
            }
            Value::Null => Err(unsupported("null")),
            Value::Object(_) => Err(unsupported("object")),
        }
    }

    /// Convert a claim read from a received token.
    ///
    /// Registered time claims must be numeric dates; fractional seconds are
    /// truncated. Any kind [`from_json`](Self::from_json) refuses elsewhere is
    /// kept as [`ClaimValue::Json`].
    pub fn from_received_json(name: &str, value: serde_json::Value) -> Result<Self, ClaimError> {
        if is_time_claim(name) {
            let secs = match &value {
                serde_json::Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f.floor() as i64)),
                _ => None,
            };
            return secs.and_then(ClaimValue::timestamp).ok_or_else(|| ClaimError::Unsupported {
                name: name.to_string(),
                reason: "not a numeric date".to_string(),
            });
        }

        match ClaimValue::from_json(name, value.clone()) {
            Ok(claim) => Ok(claim),
            Err(_) => Ok(ClaimValue::Json(value)),
        }
    }

    pub fn is_issuable(&self) -> bool {
        !matches!(self, ClaimValue::Json(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ClaimValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Seconds since the epoch for timestamps, the raw value for integers.
    pub fn as_epoch_seconds(&self) -> Option<i64> {
        match self {
            ClaimValue::Timestamp(t) => Some(t.timestamp()),
            ClaimValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl Serialize for ClaimValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ClaimValue::String(v) => serializer.serialize_str(v),
            ClaimValue::Integer(v) => serializer.serialize_i64(*v),
            ClaimValue::Boolean(v) => serializer.serialize_bool(*v),
            ClaimValue::Timestamp(v) => serializer.serialize_i64(v.timestamp()),
            ClaimValue::StringArray(v) => v.serialize(serializer),
            ClaimValue::IntegerArray(v) => v.serialize(serializer),
            ClaimValue::Json(v) => v.serialize(serializer),
        }
    }
}

impl From<String> for ClaimValue {
    fn from(value: String) -> Self {
        ClaimValue::String(value)
    }
}

impl From<&str> for ClaimValue {
    fn from(value: &str) -> Self {
        ClaimValue::String(value.to_string())
    }
}

impl From<i64> for ClaimValue {
    fn from(value: i64) -> Self {
        ClaimValue::Integer(value)
    }
}

impl From<i32> for ClaimValue {
    fn from(value: i32) -> Self {
        ClaimValue::Integer(value.into())
    }
}

impl From<bool> for ClaimValue {
    fn from(value: bool) -> Self {
        ClaimValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for ClaimValue {
    fn from(value: DateTime<Utc>) -> Self {
        ClaimValue::Timestamp(value)
    }
}

impl From<Vec<String>> for ClaimValue {
    fn from(value: Vec<String>) -> Self {
        ClaimValue::StringArray(value)
    }
}

impl From<Vec<&str>> for ClaimValue {
    fn from(value: Vec<&str>) -> Self {
        ClaimValue::StringArray(value.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<i64>> for ClaimValue {
    fn from(value: Vec<i64>) -> Self {
        ClaimValue::IntegerArray(value)
    }
}

/// Ordered mapping from claim name to value.
///
/// Once a name is stored, it keeps its value kind: storing a value of another
/// kind under the same name fails with [`ClaimError::KindMismatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSet {
    claims: BTreeMap<String, ClaimValue>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a claim set from the claims object of a received token (see
    /// [`ClaimValue::from_received_json`]).
    pub fn from_json_map(map: serde_json::Map<String, serde_json::Value>) -> Result<Self, ClaimError> {
        let mut claims = ClaimSet::new();
        for (name, value) in map {
            let value = ClaimValue::from_received_json(&name, value)?;
            claims.insert(name, value)?;
        }
        Ok(claims)
    }

    /// Store a claim, replacing any previous value of the same kind.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ClaimValue>,
    ) -> Result<(), ClaimError> {
        let name = name.into();
        let value = value.into();
        if let Some(existing) = self.claims.get(&name) {
            if existing.kind() != value.kind() {
                return Err(ClaimError::KindMismatch {
                    name,
                    existing: existing.kind(),
                    attempted: value.kind(),
                });
            }
        }
        self.claims.insert(name, value);
        Ok(())
    }

    /// Store a claim given as JSON (see [`ClaimValue::from_json`]).
    pub fn insert_json(
        &mut self,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), ClaimError> {
        let name = name.into();
        let value = ClaimValue::from_json(&name, value)?;
        self.insert(name, value)
    }

    pub fn get(&self, name: &str) -> Option<&ClaimValue> {
        self.claims.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ClaimValue::as_str)
    }

    pub fn get_string_array(&self, name: &str) -> Option<&[String]> {
        match self.get(name) {
            Some(ClaimValue::StringArray(values)) => Some(values),
            _ => None,
        }
    }

    /// Epoch seconds stored under `name` (timestamp or integer claim).
    pub fn epoch_seconds(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ClaimValue::as_epoch_seconds)
    }

    pub fn remove(&mut self, name: &str) -> Option<ClaimValue> {
        self.claims.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.claims.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClaimValue)> {
        self.claims.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// First claim that cannot be written into a new token.
    pub fn first_unissuable(&self) -> Option<(&str, &ClaimValue)> {
        self.iter().find(|(_, value)| !value.is_issuable())
    }
}

impl Serialize for ClaimSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.claims.len()))?;
        for (name, value) in &self.claims {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Authenticated user attached to a request after successful verification.
///
/// This is the principal handed to downstream handlers through request
/// extensions; see [`Auth`](super::extractor::Auth).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedIdentity {
    pub user_id: String,
    /// Roles in token order, without duplicates.
    pub roles: Vec<String>,
}

impl AuthenticatedIdentity {
    pub fn new<I, S>(user_id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for role in roles {
            let role = role.into();
            if !unique.contains(&role) {
                unique.push(role);
            }
        }
        Self {
            user_id: user_id.into(),
            roles: unique,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
