//! Provider configuration and the `IdentityProvider` seam.

use async_trait::async_trait;

use crate::IdentityError;

// ---------------------------------------------------------------------------
// ProviderConfig
// ---------------------------------------------------------------------------

/// Configuration for the external identity provider.
///
/// The endpoint URLs default to a Discord-shaped provider; any OAuth2
/// provider with a code-exchange token endpoint and a bearer-authenticated
/// "who am I" endpoint fits.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// OAuth2 client id issued by the provider.
    pub client_id: String,
    /// OAuth2 client secret issued by the provider.
    pub client_secret: String,
    /// The redirect URI registered with the provider.
    pub redirect_uri: String,
    /// The user-facing authorization page.
    pub authorize_url: String,
    /// The code-exchange endpoint.
    pub token_url: String,
    /// The bearer-authenticated identity endpoint.
    pub identity_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            authorize_url: "https://discord.com/api/oauth2/authorize".into(),
            token_url: "https://discord.com/api/oauth2/token".into(),
            identity_url: "https://discord.com/api/users/@me".into(),
        }
    }
}

impl ProviderConfig {
    /// Reads provider settings from `GATEHOUSE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str, fallback: String| {
            std::env::var(name).unwrap_or(fallback)
        };
        Self {
            client_id: var("GATEHOUSE_CLIENT_ID", defaults.client_id),
            client_secret: var("GATEHOUSE_CLIENT_SECRET", defaults.client_secret),
            redirect_uri: var("GATEHOUSE_REDIRECT_URI", defaults.redirect_uri),
            authorize_url: var("GATEHOUSE_AUTHORIZE_URL", defaults.authorize_url),
            token_url: var("GATEHOUSE_TOKEN_URL", defaults.token_url),
            identity_url: var("GATEHOUSE_IDENTITY_URL", defaults.identity_url),
        }
    }
}

// ---------------------------------------------------------------------------
// IdentityProvider
// ---------------------------------------------------------------------------

/// A verified external identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    /// The provider's stable user id. This becomes the play token.
    pub id: String,
    /// Display name at the provider.
    pub username: String,
    /// Provider avatar/icon reference, if any.
    pub avatar: Option<String>,
}

/// The identity-provider seam the session core drives.
///
/// Object-safe so deployments pick an implementation at runtime and tests
/// substitute a scripted one.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The authorization URL the connection holder opens out-of-band.
    /// `session_token` rides along as the provider's `state` parameter
    /// and comes back with the completion event.
    fn authorization_url(&self, session_token: &str) -> Result<String, IdentityError>;

    /// Exchanges a one-time authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<String, IdentityError>;

    /// Fetches the identity behind an access token.
    async fn fetch_identity(
        &self,
        access_token: &str,
    ) -> Result<ExternalIdentity, IdentityError>;
}
