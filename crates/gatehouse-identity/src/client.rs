//! Reqwest-backed identity provider.
//!
//! All provider traffic funnels through one `reqwest::Client` behind a
//! small semaphore: at most [`HTTP_WORKERS`] exchanges are in flight at
//! once, the rest queue on the permit. The session core fires these calls
//! from spawned tasks, so the bound is what keeps a login storm from
//! opening hundreds of sockets to the provider.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Semaphore;
use url::Url;

use crate::provider::{ExternalIdentity, IdentityProvider, ProviderConfig};
use crate::IdentityError;

/// Size of the outbound HTTP worker pool.
const HTTP_WORKERS: usize = 5;

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

/// The slice of the token-endpoint response we use.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// The slice of the identity-endpoint response we use.
#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    username: String,
    avatar: Option<String>,
}

// ---------------------------------------------------------------------------
// HttpIdentityProvider
// ---------------------------------------------------------------------------

/// [`IdentityProvider`] implementation over HTTP.
pub struct HttpIdentityProvider {
    config: ProviderConfig,
    http: reqwest::Client,
    permits: Arc<Semaphore>,
}

impl HttpIdentityProvider {
    /// Creates a provider client from config.
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            permits: Arc::new(Semaphore::new(HTTP_WORKERS)),
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    fn authorization_url(&self, session_token: &str) -> Result<String, IdentityError> {
        let mut url = Url::parse(&self.config.authorize_url)
            .map_err(|e| IdentityError::BadConfig(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", "identify")
            .append_pair("state", session_token);
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<String, IdentityError> {
        // Queue on the worker pool. The semaphore is never closed, so an
        // Err here can only mean shutdown; surface it as a status error.
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| IdentityError::Status(0))?;

        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, "token exchange refused by provider");
            return Err(IdentityError::Status(status.as_u16()));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::MalformedResponse(e.to_string()))?;
        Ok(token.access_token)
    }

    async fn fetch_identity(
        &self,
        access_token: &str,
    ) -> Result<ExternalIdentity, IdentityError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| IdentityError::Status(0))?;

        let response = self
            .http
            .get(&self.config.identity_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, "identity fetch refused by provider");
            return Err(IdentityError::Status(status.as_u16()));
        }

        let user: UserResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::MalformedResponse(e.to_string()))?;
        Ok(ExternalIdentity {
            id: user.id,
            username: user.username,
            avatar: user.avatar,
        })
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> HttpIdentityProvider {
        HttpIdentityProvider::new(ProviderConfig {
            client_id: "cid-123".into(),
            client_secret: "secret".into(),
            redirect_uri: "https://game.example/callback".into(),
            ..ProviderConfig::default()
        })
    }

    #[test]
    fn test_authorization_url_embeds_state_and_client() {
        let url = provider().authorization_url("tok-abc").unwrap();
        let parsed = Url::parse(&url).unwrap();

        let pairs: std::collections::HashMap<_, _> =
            parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "cid-123");
        assert_eq!(pairs["state"], "tok-abc");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["redirect_uri"], "https://game.example/callback");
    }

    #[test]
    fn test_authorization_url_bad_endpoint_is_config_error() {
        let p = HttpIdentityProvider::new(ProviderConfig {
            authorize_url: "not a url".into(),
            ..ProviderConfig::default()
        });

        let result = p.authorization_url("tok");

        assert!(matches!(result, Err(IdentityError::BadConfig(_))));
    }

    #[test]
    fn test_token_response_parses_provider_json() {
        // The provider sends more fields than we need; extras must be
        // ignored, `access_token` extracted.
        let json = r#"{
            "access_token": "at-1",
            "token_type": "Bearer",
            "expires_in": 604800,
            "refresh_token": "rt-1",
            "scope": "identify"
        }"#;
        let parsed: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.access_token, "at-1");
    }

    #[test]
    fn test_user_response_parses_provider_json() {
        let json = r#"{
            "id": "80351110224678912",
            "username": "Nelly",
            "discriminator": "1337",
            "avatar": "8342729096ea3675442027381ff50dfe"
        }"#;
        let parsed: UserResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.id, "80351110224678912");
        assert_eq!(parsed.username, "Nelly");
        assert!(parsed.avatar.is_some());
    }

    #[test]
    fn test_user_response_null_avatar_allowed() {
        let json = r#"{"id": "1", "username": "n", "avatar": null}"#;
        let parsed: UserResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.avatar, None);
    }
}
