//! Reading identity claims out of a bearer token.
//!
//! The signature is never checked here: the backend is the authority on
//! validity, the client only needs the subject and the expiry.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Identity derived from the current token. Recomputed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedIdentity {
  /// Username the token was issued for (`sub`)
  pub subject: String,
  /// Expiry as unix seconds (`exp`)
  pub expires_at_epoch_seconds: i64,
  pub issued_at_epoch_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
  #[error("token does not have three dot-separated parts")]
  Malformed,
  #[error("token payload is not base64url: {0}")]
  Encoding(String),
  #[error("token claims are unreadable: {0}")]
  Claims(String),
}

#[derive(Deserialize)]
struct Claims {
  sub: String,
  exp: i64,
  #[serde(default)]
  iat: Option<i64>,
}

impl DecodedIdentity {
  pub fn decode(token: &str) -> Result<Self, TokenError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
      (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
      _ => return Err(TokenError::Malformed),
    };

    // Some issuers keep the padding even though JWT forbids it.
    let bytes = URL_SAFE_NO_PAD
      .decode(payload.trim_end_matches('='))
      .map_err(|e| TokenError::Encoding(e.to_string()))?;

    let claims: Claims =
      serde_json::from_slice(&bytes).map_err(|e| TokenError::Claims(e.to_string()))?;

    Ok(Self {
      subject: claims.sub,
      expires_at_epoch_seconds: claims.exp,
      issued_at_epoch_seconds: claims.iat,
    })
  }

  /// A token expiring exactly at `now` is already expired.
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    self.expires_at_epoch_seconds <= now.timestamp()
  }

  pub fn is_expired(&self) -> bool {
    self.is_expired_at(Utc::now())
  }

  pub fn expires_at(&self) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(self.expires_at_epoch_seconds, 0)
  }
}

/// Short, stable identifier for a token that is safe to log.
pub fn fingerprint(token: &str) -> String {
  let digest = Sha256::digest(token.as_bytes());
  hex::encode(&digest[..6])
}

#[cfg(test)]
pub(crate) fn encode_for_test(subject: &str, exp: i64) -> String {
  let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
  let claims = serde_json::json!({ "sub": subject, "exp": exp, "iat": exp - 3600 });
  let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
  format!("{}.{}.signature", header, payload)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_decode_claims() {
    let token = encode_for_test("alice", 2_000_000_000);
    let identity = DecodedIdentity::decode(&token).unwrap();

    assert_eq!(identity.subject, "alice");
    assert_eq!(identity.expires_at_epoch_seconds, 2_000_000_000);
    assert_eq!(identity.issued_at_epoch_seconds, Some(2_000_000_000 - 3600));
  }

  #[test]
  fn test_expiry_boundary() {
    let token = encode_for_test("alice", 1_700_000_000);
    let identity = DecodedIdentity::decode(&token).unwrap();

    let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    assert!(identity.is_expired_at(at));
    assert!(!identity.is_expired_at(at - chrono::Duration::seconds(1)));
  }

  #[test]
  fn test_padded_payload_accepted() {
    let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"sub":"bob","exp":10}"#);
    let token = format!("h.{}.s", payload);
    assert_eq!(DecodedIdentity::decode(&token).unwrap().subject, "bob");
  }

  #[test]
  fn test_malformed_tokens() {
    assert_eq!(DecodedIdentity::decode("abc"), Err(TokenError::Malformed));
    assert_eq!(DecodedIdentity::decode("a..c"), Err(TokenError::Malformed));
    assert_eq!(DecodedIdentity::decode("a.b.c.d"), Err(TokenError::Malformed));
    assert!(matches!(
      DecodedIdentity::decode("abc.d*f.ghi"),
      Err(TokenError::Encoding(_))
    ));
    // Three parts, but no claims inside.
    assert!(matches!(
      DecodedIdentity::decode("abc.def.ghi"),
      Err(TokenError::Encoding(_)) | Err(TokenError::Claims(_))
    ));
  }

  #[test]
  fn test_fingerprint_hides_token() {
    let fp = fingerprint("abc.def.ghi");
    assert_eq!(fp.len(), 12);
    assert_ne!(fp, "abc.def.ghi");
    assert_eq!(fp, fingerprint("abc.def.ghi"));
  }
}
