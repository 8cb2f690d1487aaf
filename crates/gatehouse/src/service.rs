//! `GatehouseBuilder`: wires configuration, store backends, and the
//! identity provider into a running coordinator.
//!
//! This is the embedding entry point. The transport layer is not built
//! here — the builder hands back the coordinator handle (inputs) and the
//! outbound receiver (directives + replies) and the embedder connects
//! both to its message bus.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use gatehouse_directory::{
    AccountStore, FileAccountStore, MemoryAccountStore, MemoryRecordStore,
    RecordStore,
};
use gatehouse_identity::{
    HttpIdentityProvider, IdentityProvider, ProviderConfig,
};
use gatehouse_protocol::AuthScheme;
use gatehouse_session::{
    Coordinator, CoordinatorConfig, CoordinatorHandle, Outbound,
};

use crate::GatehouseError;

// ---------------------------------------------------------------------------
// Store backend selection
// ---------------------------------------------------------------------------

/// Which account-store backend to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-memory store: development and tests. Nothing survives restart.
    Memory,
    /// JSON-file store at the given path: single-host deployments.
    File(PathBuf),
}

impl StoreBackend {
    /// Parses the `GATEHOUSE_ACCOUNT_STORE` selector:
    /// `memory` or `file:<path>`.
    pub fn parse(s: &str) -> Result<StoreBackend, GatehouseError> {
        if s.eq_ignore_ascii_case("memory") {
            return Ok(StoreBackend::Memory);
        }
        if let Some(path) = s.strip_prefix("file:") {
            if path.is_empty() {
                return Err(GatehouseError::Config(
                    "file store selector is missing a path".into(),
                ));
            }
            return Ok(StoreBackend::File(PathBuf::from(path)));
        }
        Err(GatehouseError::Config(format!(
            "unknown account store backend: {s}"
        )))
    }

    fn from_env() -> Result<StoreBackend, GatehouseError> {
        match std::env::var("GATEHOUSE_ACCOUNT_STORE") {
            Ok(s) => StoreBackend::parse(&s),
            Err(_) => Ok(StoreBackend::Memory),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting the authority service.
///
/// # Example
///
/// ```rust,no_run
/// # async fn run() -> Result<(), gatehouse::GatehouseError> {
/// let (handle, outbound) = gatehouse::GatehouseBuilder::new()
///     .store_backend(gatehouse::StoreBackend::Memory)
///     .build()
///     .await?;
/// # let _ = (handle, outbound);
/// # Ok(())
/// # }
/// ```
pub struct GatehouseBuilder {
    config: CoordinatorConfig,
    backend: StoreBackend,
    provider_config: ProviderConfig,
    records: Option<Arc<dyn RecordStore>>,
    provider: Option<Arc<dyn IdentityProvider>>,
}

impl GatehouseBuilder {
    /// Creates a builder with default settings (direct-token scheme,
    /// in-memory stores).
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
            backend: StoreBackend::Memory,
            provider_config: ProviderConfig::default(),
            records: None,
            provider: None,
        }
    }

    /// Creates a builder configured from `GATEHOUSE_*` environment
    /// variables.
    pub fn from_env() -> Self {
        let mut builder = Self::new();
        builder.config = CoordinatorConfig::from_env();
        builder.provider_config = ProviderConfig::from_env();
        if let Ok(backend) = StoreBackend::from_env() {
            builder.backend = backend;
        }
        builder
    }

    /// Overrides the coordinator configuration.
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Selects the account-store backend.
    pub fn store_backend(mut self, backend: StoreBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Injects a record store (the object-database boundary). Defaults
    /// to an in-memory store when not provided.
    pub fn record_store(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    /// Injects an identity provider, replacing the HTTP one that would
    /// otherwise be built from provider config.
    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Builds the stores, spawns the coordinator, and returns its handle
    /// together with the outbound receiver the transport must drain.
    pub async fn build(
        self,
    ) -> Result<(CoordinatorHandle, mpsc::UnboundedReceiver<Outbound>), GatehouseError>
    {
        tracing::info!(backend = ?self.backend, scheme = ?self.config.auth_scheme, "assembling authority service");
        let accounts: Arc<dyn AccountStore> = match &self.backend {
            StoreBackend::Memory => Arc::new(MemoryAccountStore::new()),
            StoreBackend::File(path) => {
                Arc::new(FileAccountStore::open(path).await?)
            }
        };

        let records = self
            .records
            .unwrap_or_else(|| Arc::new(MemoryRecordStore::new()));

        let provider = match (self.config.auth_scheme, self.provider) {
            (_, Some(provider)) => Some(provider),
            (AuthScheme::ExternalOauth, None) => {
                if self.provider_config.client_id.is_empty() {
                    return Err(GatehouseError::Config(
                        "external OAuth scheme requires a provider client id".into(),
                    ));
                }
                Some(Arc::new(HttpIdentityProvider::new(self.provider_config))
                    as Arc<dyn IdentityProvider>)
            }
            (AuthScheme::DevToken, None) => None,
        };

        let (gateway, outbound) = mpsc::unbounded_channel();
        let handle =
            Coordinator::spawn(self.config, accounts, records, provider, gateway);
        Ok((handle, outbound))
    }
}

impl Default for GatehouseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_memory() {
        assert_eq!(StoreBackend::parse("memory").unwrap(), StoreBackend::Memory);
        assert_eq!(StoreBackend::parse("MEMORY").unwrap(), StoreBackend::Memory);
    }

    #[test]
    fn test_parse_backend_file_with_path() {
        assert_eq!(
            StoreBackend::parse("file:/var/lib/accounts.json").unwrap(),
            StoreBackend::File(PathBuf::from("/var/lib/accounts.json"))
        );
    }

    #[test]
    fn test_parse_backend_file_without_path_is_error() {
        assert!(StoreBackend::parse("file:").is_err());
    }

    #[test]
    fn test_parse_backend_unknown_is_error() {
        assert!(StoreBackend::parse("carrier-pigeon").is_err());
    }

    #[tokio::test]
    async fn test_build_oauth_without_client_id_is_config_error() {
        let builder = GatehouseBuilder::new().config(CoordinatorConfig {
            auth_scheme: AuthScheme::ExternalOauth,
            ..CoordinatorConfig::default()
        });

        let result = builder.build().await;

        assert!(matches!(result, Err(GatehouseError::Config(_))));
    }
}
