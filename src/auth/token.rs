// Access token claim decoding
// Tokens are signed by the backend; the client only reads claims, never verifies

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};

use crate::error::{Result, SessionError};

/// Claims the session manager cares about
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    /// Expiry, seconds since the Unix epoch
    #[serde(deserialize_with = "numeric_date")]
    pub exp: i64,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// NumericDate may carry a fraction; whole seconds are kept
fn numeric_date<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Number::deserialize(deserializer)?;
    if let Some(secs) = value.as_i64() {
        return Ok(secs);
    }
    match value.as_f64() {
        Some(secs) if secs.is_finite() && secs.abs() < i64::MAX as f64 => Ok(secs.floor() as i64),
        _ => Err(serde::de::Error::custom(format!("exp out of range: {}", value))),
    }
}

/// Decode the payload segment of a JWT without verifying its signature
pub fn decode_claims(token: &str) -> Result<Claims> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) if !payload.is_empty() => payload,
        _ => {
            return Err(SessionError::TokenDecode(
                "token must have three dot-separated segments".to_string(),
            ))
        }
    };

    // Some issuers keep the padding; strip it before decoding
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| SessionError::TokenDecode(format!("invalid base64 payload: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| SessionError::TokenDecode(format!("invalid claims: {}", e)))
}

/// Expiry instant of a token
pub fn expires_at(token: &str) -> Result<DateTime<Utc>> {
    let claims = decode_claims(token)?;
    Utc.timestamp_opt(claims.exp, 0)
        .single()
        .ok_or_else(|| SessionError::TokenDecode(format!("exp out of range: {}", claims.exp)))
}

/// True when the token has expired at `now`; undecodable tokens count as expired
pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    match expires_at(token) {
        Ok(exp) => exp <= now,
        Err(e) => {
            tracing::debug!("Treating undecodable token as expired: {}", e);
            true
        }
    }
}

/// Short prefix for logs; full tokens are never logged
pub(crate) fn preview(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    &token[..end]
}

/// Build an unsigned token with the given claims (tests only)
#[cfg(test)]
pub fn encode_unsigned(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

/// Unsigned token expiring `secs` seconds from now (tests only)
#[cfg(test)]
pub fn token_expiring_in(secs: i64) -> String {
    let exp = Utc::now().timestamp() + secs;
    encode_unsigned(&serde_json::json!({ "exp": exp, "sub": "user-1", "role": "ROLE_CUSTOMER" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_decode_claims() {
        let token = encode_unsigned(&json!({"exp": 1_700_000_000, "sub": "42", "scope": "events:write"}));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.exp, 1_700_000_000);
        assert_eq!(claims.sub.as_deref(), Some("42"));
        assert_eq!(claims.scope.as_deref(), Some("events:write"));
        assert!(claims.role.is_none());
    }

    #[test]
    fn test_decode_rejects_wrong_segment_count() {
        assert!(matches!(decode_claims("abc"), Err(SessionError::TokenDecode(_))));
        assert!(matches!(decode_claims("a.b"), Err(SessionError::TokenDecode(_))));
        assert!(matches!(decode_claims("a.b.c.d"), Err(SessionError::TokenDecode(_))));
        assert!(matches!(decode_claims(""), Err(SessionError::TokenDecode(_))));
    }

    #[test]
    fn test_decode_rejects_garbage_payload() {
        assert!(matches!(decode_claims("x.!!!.y"), Err(SessionError::TokenDecode(_))));

        let not_json = format!("x.{}.y", URL_SAFE_NO_PAD.encode("not json"));
        assert!(matches!(decode_claims(&not_json), Err(SessionError::TokenDecode(_))));

        let no_exp = encode_unsigned(&json!({"sub": "1"}));
        assert!(matches!(decode_claims(&no_exp), Err(SessionError::TokenDecode(_))));
    }

    #[test]
    fn test_decode_accepts_padded_payload() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":10}"#);
        assert!(payload.ends_with('='));
        let claims = decode_claims(&format!("h.{}.s", payload)).unwrap();
        assert_eq!(claims.exp, 10);
    }

    #[test]
    fn test_fractional_exp_is_floored() {
        let claims = decode_claims(&encode_unsigned(&json!({"exp": 1_700_000_000.75}))).unwrap();
        assert_eq!(claims.exp, 1_700_000_000);

        let exp = Utc::now().timestamp() as f64 + 600.5;
        let token = encode_unsigned(&json!({ "exp": exp }));
        assert!(!is_expired_at(&token, Utc::now()));
        assert!(expires_at(&token).is_ok());
    }

    #[test]
    fn test_non_numeric_exp_rejected() {
        let token = encode_unsigned(&json!({"exp": "tomorrow"}));
        assert!(matches!(decode_claims(&token), Err(SessionError::TokenDecode(_))));
        let token = encode_unsigned(&json!({"exp": 1e300}));
        assert!(matches!(decode_claims(&token), Err(SessionError::TokenDecode(_))));
    }

    #[test]
    fn test_is_expired_at() {
        let now = Utc::now();
        assert!(!is_expired_at(&token_expiring_in(10), now));
        assert!(is_expired_at(&token_expiring_in(-10), now));
        assert!(is_expired_at("not-a-token", now));
    }

    #[test]
    fn test_expires_at() {
        let token = token_expiring_in(300);
        let exp = expires_at(&token).unwrap();
        let delta = exp - Utc::now();
        assert!(delta > Duration::seconds(295) && delta <= Duration::seconds(300));
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("abcdefghijkl"), "abcdefgh");
        assert_eq!(preview("abc"), "abc");
    }
}
