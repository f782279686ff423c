//! Access/refresh token pair and expiry inspection.
//!
//! The access token is a JWT whose `exp` claim we read client-side to decide
//! when to refresh. The signature is never verified here; only the server
//! can do that, and a token the server rejects just fails the connect.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The credential pair issued by the auth endpoints. The shape matches the
/// server response body, so it doubles as the storage format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn access(&self) -> AccessToken {
        AccessToken::new(self.access_token.clone())
    }
}

/// A bearer token plus its decoded expiry, if the token carries one.
#[derive(Debug, Clone)]
pub struct AccessToken {
    raw: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Opaque tokens (no decodable `exp` claim) get `expires_at = None` and
    /// are treated as non-expiring.
    pub fn new(raw: String) -> Self {
        let expires_at = decode_exp(&raw);
        Self { raw, expires_at }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// True when the token expires within `margin` from now (or already has).
    pub fn expires_within(&self, margin: Duration) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        match chrono::Duration::from_std(margin) {
            Ok(margin) => expires_at - Utc::now() <= margin,
            Err(_) => true,
        }
    }
}

fn decode_exp(raw: &str) -> Option<DateTime<Utc>> {
    let payload = raw.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn forge_jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn decodes_exp_claim() {
        let exp = Utc::now().timestamp() + 900;
        let token = AccessToken::new(forge_jwt(json!({"sub": "user-1", "exp": exp})));
        assert_eq!(token.expires_at().map(|t| t.timestamp()), Some(exp));
    }

    #[test]
    fn expiring_token_is_inside_margin() {
        let exp = Utc::now().timestamp() + 20;
        let token = AccessToken::new(forge_jwt(json!({"exp": exp})));
        assert!(token.expires_within(Duration::from_secs(30)));
        assert!(!token.expires_within(Duration::from_secs(5)));
    }

    #[test]
    fn already_expired_token_is_inside_any_margin() {
        let exp = Utc::now().timestamp() - 60;
        let token = AccessToken::new(forge_jwt(json!({"exp": exp})));
        assert!(token.expires_within(Duration::from_secs(0)));
    }

    #[test]
    fn opaque_token_never_expires() {
        let token = AccessToken::new("not-a-jwt".to_string());
        assert_eq!(token.expires_at(), None);
        assert!(!token.expires_within(Duration::from_secs(u64::MAX / 2)));
    }

    #[test]
    fn garbage_payload_is_treated_as_opaque() {
        let token = AccessToken::new("aaa.%%%.sig".to_string());
        assert_eq!(token.expires_at(), None);

        let no_exp = AccessToken::new(forge_jwt(json!({"sub": "user-1"})));
        assert_eq!(no_exp.expires_at(), None);
    }

    #[test]
    fn pair_round_trips_through_json() {
        let pair = TokenPair {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
        };
        let json = serde_json::to_string(&pair).unwrap();
        assert_eq!(serde_json::from_str::<TokenPair>(&json).unwrap(), pair);
    }
}
