//! Client-side inspection of access tokens.
//!
//! Claims are decoded without verifying the signature. The expiry check only
//! decides when to refresh; the server still authorizes every request.

use jsonwebtoken::{DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
#[error("access token could not be decoded")]
pub struct TokenError(#[from] jsonwebtoken::errors::Error);

#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    pub exp: i64,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default, alias = "userType")]
    pub user_type: Option<String>,
}

impl TokenClaims {
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.exp).ok()
    }
}

fn unverified_validation() -> Validation {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}

pub fn decode_claims(token: &str) -> Result<TokenClaims, TokenError> {
    let data = jsonwebtoken::decode::<TokenClaims>(
        token.trim(),
        &DecodingKey::from_secret(&[]),
        &unverified_validation(),
    )?;
    Ok(data.claims)
}

pub fn is_expired_at(token: &str, now: OffsetDateTime) -> bool {
    match decode_claims(token) {
        Ok(claims) => {
            let now_ms = now.unix_timestamp_nanos() / 1_000_000;
            i128::from(claims.exp) * 1000 < now_ms
        }
        Err(e) => {
            tracing::debug!(error = %e, "treating undecodable access token as expired");
            true
        }
    }
}

/// Fails closed: a token whose claims cannot be read counts as expired.
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, OffsetDateTime::now_utc())
}

pub fn rfc3339(dt: OffsetDateTime) -> Option<String> {
    dt.format(&time::format_description::well_known::Rfc3339).ok()
}


#[cfg(test)]
mod tests {
    use super::testing::{token_expiring_in, token_with_exp};
    use super::*;
    use time::macros::datetime;

    #[test]
    fn past_exp_is_expired() {
        for offset in [1, 10, 3600, 86_400 * 365] {
            assert!(is_expired(&token_expiring_in(-offset)), "offset {offset}");
        }
    }

    #[test]
    fn future_exp_is_not_expired() {
        assert!(!is_expired(&token_expiring_in(600)));
    }

    #[test]
    fn malformed_tokens_fail_closed() {
        let unsigned_payload = "eyJhbGciOiJIUzI1NiJ9.not-base64!.sig";
        for s in ["", "   ", "abc", "a.b.c", "a.b", unsigned_payload] {
            assert!(is_expired(s), "{s:?}");
        }
    }

    #[test]
    fn token_without_exp_is_expired() {
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &serde_json::json!({"sub": "u-42"}),
            &jsonwebtoken::EncodingKey::from_secret(b"k"),
        )
        .unwrap();
        assert!(decode_claims(&token).is_err());
        assert!(is_expired(&token));
    }

    #[test]
    fn expiry_boundary_uses_milliseconds() {
        let token = token_with_exp(1_700_000_000);
        assert!(!is_expired_at(&token, datetime!(2023-11-14 22:13:20 UTC)));
        assert!(is_expired_at(&token, datetime!(2023-11-14 22:13:20.001 UTC)));
    }

    #[test]
    fn claims_expose_expiry_timestamp() {
        let claims = decode_claims(&token_with_exp(1_700_000_000)).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("u-42"));
        assert_eq!(
            claims.expires_at().and_then(rfc3339).as_deref(),
            Some("2023-11-14T22:13:20Z")
        );
    }
}
