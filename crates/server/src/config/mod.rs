mod bridge;
mod cleanup;
mod node;
mod state;
mod storage_api;
mod telemetry;


pub use bridge::*;
pub use cleanup::*;
pub use node::*;
pub use state::*;
pub use storage_api::*;
pub use telemetry::*;

use std::path::Path;

use serde::Deserialize;
use sinkbridge_crypto::EncryptionConfig;

use crate::error::ServerError;

/// Top-level configuration of the server, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct SinkbridgeConfig {
    /// Encryption of tokens and upload credentials.
    #[serde(default)]
    pub encryption: EncryptionConfig,
    /// Sink bridge limits.
    #[serde(default)]
    pub bridge: BridgeServerConfig,
    /// Cleanup operators.
    #[serde(default)]
    pub cleanup: CleanupServerConfig,
    /// Metadata store and lock backend.
    #[serde(default)]
    pub state: StateConfig,
    /// Remote Storage API.
    #[serde(default)]
    pub storage_api: StorageApiConfig,
    /// Cluster membership of this node.
    #[serde(default)]
    pub node: NodeConfig,
    /// Local slice files.
    #[serde(default)]
    pub slices: SlicesConfig,
    /// OpenTelemetry distributed tracing configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl SinkbridgeConfig {
    /// Load the configuration from `path`, or the defaults if the file does
    /// not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let contents = if path.exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };
        Self::parse(&contents)
    }

    /// Parse the configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self, ServerError> {
        toml::from_str(contents).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Check every value against its allowed range.
    pub fn validate(&self) -> Result<(), ServerError> {
        self.encryption
            .validate()
            .map_err(|e| ServerError::Config(format!("encryption: {e}")))?;
        self.bridge.validate().map_err(ServerError::Config)?;
        self.cleanup.validate().map_err(ServerError::Config)?;
        self.state.validate().map_err(ServerError::Config)?;
        self.storage_api.validate().map_err(ServerError::Config)?;
        self.node.validate().map_err(ServerError::Config)?;
        self.telemetry.validate().map_err(ServerError::Config)
    }
}
