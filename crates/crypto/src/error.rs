use thiserror::Error;

/// Errors that can occur during encryption/decryption operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The provided key material is not valid (wrong length or encoding).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The ciphertext is malformed.
    #[error("invalid ciphertext: {0}")]
    InvalidFormat(String),

    /// The ciphertext was produced by a different provider.
    #[error("ciphertext is not tagged with the expected prefix \"{expected}\"")]
    ProviderMismatch { expected: String },

    /// The envelope was written by an unknown format version.
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    /// Decryption failed: wrong key, wrong metadata or corrupted data.
    #[error("decryption failed (wrong key, metadata mismatch or corrupted data)")]
    DecryptionFailed,

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// The external key service rejected a wrap or unwrap request.
    #[error("{provider} key service error: {message}")]
    KeyService { provider: String, message: String },

    #[error("invalid encryption configuration: {0}")]
    Configuration(String),
}

impl CryptoError {
    pub(crate) fn key_service(provider: impl Into<String>, message: impl ToString) -> Self {
        Self::KeyService {
            provider: provider.into(),
            message: message.to_string(),
        }
    }
}
