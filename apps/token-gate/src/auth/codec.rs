// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Compact token codec: `base64url(header) "." base64url(claims) "." base64url(signature)`.
//!
//! [`decode`] only parses the token; it never checks the signature. It is used
//! to introspect the header (algorithm, key id) before a strategy verifies it.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};

use super::algorithm::SigningAlgorithm;
use super::claims::ClaimSet;
use super::error::{BuildError, DecodeError};

/// Header segment of a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

/// A parsed, not yet verified token.
#[derive(Debug, Clone)]
pub struct DecodedToken {
    header: TokenHeader,
    claims: ClaimSet,
    signature: Vec<u8>,
    raw: String,
    /// Byte offset of the second `.`; `raw[..signing_input_end]` is the signed part.
    signing_input_end: usize,
}

impl DecodedToken {
    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// The bytes covered by the signature: `header "." claims`.
    pub fn signing_input(&self) -> &[u8] {
        self.raw[..self.signing_input_end].as_bytes()
    }

    /// The token text as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn key_id(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }
}

/// Sign `claims` with `algorithm` into a compact token.
pub fn encode(claims: &ClaimSet, algorithm: &SigningAlgorithm) -> Result<String, BuildError> {
    algorithm.sign(claims)
}

/// Split and parse a compact token without checking its signature.
pub fn decode(token: &str) -> Result<DecodedToken, DecodeError> {
    let token = token.trim();
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(DecodeError::Malformed(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let header_bytes = decode_segment(segments[0], "header")?;
    let claims_bytes = decode_segment(segments[1], "claims")?;
    let signature = decode_segment(segments[2], "signature")?;

    let header: TokenHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| DecodeError::Malformed(format!("header is not valid JSON: {e}")))?;

    let claims_map: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&claims_bytes)
            .map_err(|e| DecodeError::Malformed(format!("claims are not a JSON object: {e}")))?;
    let claims =
        ClaimSet::from_json_map(claims_map).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    Ok(DecodedToken {
        header,
        claims,
        signature,
        signing_input_end: segments[0].len() + 1 + segments[1].len(),
        raw: token.to_string(),
    })
}

fn decode_segment(segment: &str, name: &str) -> Result<Vec<u8>, DecodeError> {
    Base64UrlUnpadded::decode_vec(segment)
        .map_err(|_| DecodeError::Malformed(format!("{name} segment is not base64url")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::{ClaimValue, ROLES_CLAIM, USER_ID_CLAIM};

    fn sample_claims() -> ClaimSet {
        let mut claims = ClaimSet::new();
        claims.insert(USER_ID_CLAIM, "test").unwrap();
        claims.insert(ROLES_CLAIM, vec!["role1", "role2"]).unwrap();
        claims
            .insert("iat", ClaimValue::timestamp(1_700_000_000).unwrap())
            .unwrap();
        claims.insert("level", 3i64).unwrap();
        claims
    }

    #[test]
    fn decode_recovers_encoded_claims() {
        let claims = sample_claims();
        let token = encode(&claims, &SigningAlgorithm::hs384("a secret")).unwrap();

        let decoded = decode(&token).unwrap();
        assert_eq!(decoded.claims(), &claims);
        assert_eq!(decoded.header().alg, "HS384");
        assert_eq!(decoded.header().typ.as_deref(), Some("JWT"));
        assert_eq!(decoded.key_id(), None);
        assert!(!decoded.signature().is_empty());

        let (signing_input, _) = token.rsplit_once('.').unwrap();
        assert_eq!(decoded.signing_input(), signing_input.as_bytes());
    }

    #[test]
    fn encode_is_deterministic_for_identical_input() {
        let claims = sample_claims();
        let alg = SigningAlgorithm::hs256("a secret").with_key_id("k1");
        let first = encode(&claims, &alg).unwrap();
        assert_eq!(first, encode(&claims, &alg).unwrap());
        assert_eq!(decode(&first).unwrap().key_id(), Some("k1"));
    }

    #[test]
    fn decode_rejects_wrong_segment_count() {
        for token in ["not_a_token", "a.b", "a.b.c.d", ""] {
            assert!(matches!(decode(token), Err(DecodeError::Malformed(_))));
        }
    }

    #[test]
    fn decode_rejects_bad_encoding_and_json() {
        let header = Base64UrlUnpadded::encode_string(br#"{"alg":"HS256"}"#);
        let not_json = Base64UrlUnpadded::encode_string(b"plain text");
        let array = Base64UrlUnpadded::encode_string(b"[1,2]");

        assert!(decode(&format!("{header}.!!!.sig")).is_err());
        assert!(decode(&format!("{header}.{not_json}.")).is_err());
        assert!(decode(&format!("{header}.{array}.")).is_err());
        assert!(decode(&format!("{not_json}.{header}.")).is_err());
    }

    #[test]
    fn decode_does_not_check_signature() {
        let header = Base64UrlUnpadded::encode_string(br#"{"alg":"none","typ":"JWT"}"#);
        let claims = Base64UrlUnpadded::encode_string(br#"{"userId":"foo"}"#);

        let decoded = decode(&format!("{header}.{claims}.")).unwrap();
        assert_eq!(decoded.header().alg, "none");
        assert_eq!(decoded.claims().get_str("userId"), Some("foo"));
        assert!(decoded.signature().is_empty());
    }
}
