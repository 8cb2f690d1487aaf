//! Error types for the identity-provider boundary.

/// Errors from the identity provider.
///
/// Every variant maps to "kill the authenticate operation" in the session
/// core — there is no retry at this layer.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The HTTP request itself failed (DNS, connect, TLS, timeout).
    #[error("provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("provider returned status {0}")]
    Status(u16),

    /// The provider's JSON did not carry the fields we need.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// The configured endpoint or redirect URI is not a valid URL.
    #[error("invalid provider configuration: {0}")]
    BadConfig(String),
}
