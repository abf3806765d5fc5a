use sinkbridge_bridge::BridgeError;
use sinkbridge_crypto::CryptoError;
use sinkbridge_state::StateError;
use sinkbridge_storage_api::StorageApiError;
use thiserror::Error;

/// Errors that can occur when running the sinkbridge server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. reading the configuration file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The metadata store or lock backend failed.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// The encryptor could not be built.
    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),

    /// The Storage API client could not be built.
    #[error("storage api error: {0}")]
    StorageApi(#[from] StorageApiError),

    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),
}
