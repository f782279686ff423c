//! HTTP client for the platform auth endpoints.
//!
//! Two calls matter to the realtime client: `POST /auth/refresh` to rotate
//! an expiring pair, and `POST /auth/oauth/{provider}` to establish a
//! session from a provider sign-in.

use crate::error::SessionError;
use crate::token::TokenPair;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Auth calls are short request/response exchanges; a stuck refresh must not
/// hang every transport waiting on the supplier.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct AuthApi {
    http: reqwest::Client,
    base_url: String,
}

/// Profile fields forwarded when linking an OAuth provider sign-in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OauthLink {
    pub provider: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub provider_id: String,
    /// The provider-issued access token, verified server-side.
    pub access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    refresh_token: String,
    /// Account profile, passed through untouched for the embedding app.
    #[serde(default)]
    user: serde_json::Value,
}

impl AuthApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange a refresh token for a fresh pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, SessionError> {
        debug!("requesting token refresh");
        let resp = self
            .http
            .post(format!("{}/auth/refresh", self.base_url))
            .timeout(AUTH_TIMEOUT)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| SessionError::Network(e.to_string()))?;
        let (pair, _user) = parse_auth_response(resp).await?;
        Ok(pair)
    }

    /// Establish or re-establish a session from a provider sign-in. Returns
    /// the issued pair plus the account profile the server sent back.
    pub async fn link_oauth(
        &self,
        link: &OauthLink,
    ) -> Result<(TokenPair, serde_json::Value), SessionError> {
        debug!(provider = %link.provider, "linking oauth sign-in");
        let resp = self
            .http
            .post(format!("{}/auth/oauth/{}", self.base_url, link.provider))
            .timeout(AUTH_TIMEOUT)
            .json(link)
            .send()
            .await
            .map_err(|e| SessionError::Network(e.to_string()))?;
        parse_auth_response(resp).await
    }
}

async fn parse_auth_response(
    resp: reqwest::Response,
) -> Result<(TokenPair, serde_json::Value), SessionError> {
    let status = resp.status();
    if status.is_success() {
        let body: AuthResponse = resp
            .json()
            .await
            .map_err(|e| SessionError::MalformedResponse(e.to_string()))?;
        Ok((
            TokenPair {
                access_token: body.access_token,
                refresh_token: body.refresh_token,
            },
            body.user,
        ))
    } else if status.is_client_error() {
        Err(SessionError::Rejected {
            status: status.as_u16(),
        })
    } else {
        Err(SessionError::Network(format!(
            "server error (http {status})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_link_uses_wire_field_names() {
        let link = OauthLink {
            provider: "google".to_string(),
            email: "pat@example.com".to_string(),
            first_name: "Pat".to_string(),
            last_name: "Doe".to_string(),
            avatar: None,
            provider_id: "g-123".to_string(),
            access_token: "provider-token".to_string(),
        };
        let json = serde_json::to_value(&link).unwrap();
        assert_eq!(json["firstName"], "Pat");
        assert_eq!(json["providerId"], "g-123");
        assert_eq!(json["accessToken"], "provider-token");
        assert!(json.get("avatar").is_none());
    }

    #[test]
    fn refresh_request_uses_wire_field_names() {
        let req = RefreshRequest { refresh_token: "r" };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["refreshToken"], "r");
    }

    #[test]
    fn auth_response_tolerates_missing_user() {
        let body: AuthResponse =
            serde_json::from_str(r#"{"access_token":"a","refresh_token":"r"}"#).unwrap();
        assert_eq!(body.user, serde_json::Value::Null);
    }

    #[test]
    fn base_url_is_normalized() {
        let api = AuthApi::new("http://localhost:3000/");
        assert_eq!(api.base_url(), "http://localhost:3000");
    }
}
