//! Unverified inspection of JWT access tokens.
//!
//! The client never validates signatures: the backend is the authority on
//! whether a token is acceptable. Claims are only read to report when the
//! current access token is due to expire.

use std::time::SystemTime;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;
use serde_with::{formats::Flexible, serde_as, TimestampSeconds};

use crate::error::{Error, Result};

/// Registered claims of interest.
#[serde_as]
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct Claims {
    /// Subject, usually the member ID
    pub sub: Option<String>,

    /// Expiration time
    #[serde_as(as = "Option<TimestampSeconds<i64, Flexible>>")]
    pub exp: Option<SystemTime>,

    /// Issued-at time
    #[serde_as(as = "Option<TimestampSeconds<i64, Flexible>>")]
    pub iat: Option<SystemTime>,
}

/// Decodes the payload segment of a compact JWT.
///
/// # Errors
///
/// Returns `InvalidArgument` if the token is not three dot-separated
/// segments or its payload is not base64url-encoded JSON.
pub fn decode(token: &str) -> Result<Claims> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(Error::invalid_argument("token is not a compact JWT")),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| Error::invalid_argument(e.to_string()))?;

    serde_json::from_slice(&bytes).map_err(Into::into)
}

/// When `token` expires, if it is a JWT carrying an `exp` claim.
#[must_use]
pub fn expires_at(token: &str) -> Option<SystemTime> {
    decode(token).ok().and_then(|claims| claims.exp)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    fn token(payload: &str) -> String {
        format!("e30.{}.c2ln", URL_SAFE_NO_PAD.encode(payload))
    }

    #[test]
    fn decodes_registered_claims() {
        let claims = decode(&token(r#"{"sub":"u1","exp":1700000000,"iat":"1699990000"}"#)).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("u1"));
        assert_eq!(
            claims.exp,
            Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
        );
        assert_eq!(
            claims.iat,
            Some(UNIX_EPOCH + Duration::from_secs(1_699_990_000))
        );
    }

    #[test]
    fn opaque_tokens_have_no_expiry() {
        assert_eq!(expires_at("A1"), None);
        assert_eq!(expires_at(&token(r#"{"sub":"u1"}"#)), None);
        assert!(decode("a.b").is_err());
    }
}
