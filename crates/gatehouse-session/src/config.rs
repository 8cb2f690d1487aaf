//! Coordinator configuration.

use gatehouse_protocol::AuthScheme;

/// Configuration for the session coordinator.
///
/// Sensible defaults are provided; deployments usually override from the
/// environment via [`CoordinatorConfig::from_env`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How connections prove identity. Under `ExternalOauth` an identity
    /// provider must be wired in.
    pub auth_scheme: AuthScheme,

    /// How long (in seconds) a started authorization has to complete
    /// before the authenticate operation is killed. Default: 300.
    pub auth_timeout_secs: u64,

    /// Support window (in seconds) during which a removed avatar can be
    /// restored from the removal history. Informational for tooling;
    /// recorded with every removal audit entry. Default: 30 days.
    pub removal_grace_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            auth_scheme: AuthScheme::DevToken,
            auth_timeout_secs: 300,
            removal_grace_secs: 30 * 86_400,
        }
    }
}

impl CoordinatorConfig {
    /// Reads configuration from `GATEHOUSE_*` environment variables.
    ///
    /// Unset or unparseable values fall back to defaults; an unknown
    /// scheme string falls back to `DevToken` (the safe mode — it cannot
    /// silently open an unconfigured OAuth flow).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            auth_scheme: std::env::var("GATEHOUSE_AUTH_SCHEME")
                .map(|s| parse_scheme(&s))
                .unwrap_or(defaults.auth_scheme),
            auth_timeout_secs: std::env::var("GATEHOUSE_AUTH_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.auth_timeout_secs),
            removal_grace_secs: std::env::var("GATEHOUSE_REMOVAL_GRACE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.removal_grace_secs),
        }
    }
}

/// Parses the scheme selector. Unknown values map to `DevToken`.
fn parse_scheme(s: &str) -> AuthScheme {
    match s.trim().to_ascii_uppercase().as_str() {
        "EXTERNAL_OAUTH" => AuthScheme::ExternalOauth,
        _ => AuthScheme::DevToken,
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scheme_recognizes_external_oauth() {
        assert_eq!(parse_scheme("EXTERNAL_OAUTH"), AuthScheme::ExternalOauth);
        assert_eq!(parse_scheme("external_oauth"), AuthScheme::ExternalOauth);
        assert_eq!(parse_scheme(" EXTERNAL_OAUTH "), AuthScheme::ExternalOauth);
    }

    #[test]
    fn test_parse_scheme_unknown_falls_back_to_devtoken() {
        assert_eq!(parse_scheme("DEVTOKEN"), AuthScheme::DevToken);
        assert_eq!(parse_scheme("carrier-pigeon"), AuthScheme::DevToken);
        assert_eq!(parse_scheme(""), AuthScheme::DevToken);
    }

    #[test]
    fn test_default_timeout_is_five_minutes() {
        assert_eq!(CoordinatorConfig::default().auth_timeout_secs, 300);
    }
}
