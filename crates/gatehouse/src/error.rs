//! Unified error type for the Gatehouse meta-crate.

use gatehouse_directory::DirectoryError;
use gatehouse_identity::IdentityError;
use gatehouse_session::SessionError;

/// Top-level error that wraps all crate-specific errors.
///
/// Embedders using the `gatehouse` meta-crate deal with this single
/// type; the `#[from]` attributes let `?` convert sub-crate errors
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum GatehouseError {
    /// A directory-level error (token resolution, record storage).
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// An identity-provider error (exchange, fetch, configuration).
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// A session-level error (coordinator handle mechanics).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The service configuration is unusable as given.
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_directory_error() {
        let err = DirectoryError::Unavailable("gone".into());
        let top: GatehouseError = err.into();
        assert!(matches!(top, GatehouseError::Directory(_)));
        assert!(top.to_string().contains("gone"));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::Closed;
        let top: GatehouseError = err.into();
        assert!(matches!(top, GatehouseError::Session(_)));
    }

    #[test]
    fn test_from_identity_error() {
        let err = IdentityError::Status(502);
        let top: GatehouseError = err.into();
        assert!(matches!(top, GatehouseError::Identity(_)));
        assert!(top.to_string().contains("502"));
    }
}
