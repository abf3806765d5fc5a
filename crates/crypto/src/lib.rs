//! Pluggable encryption of sink tokens and staging upload credentials.
//!
//! An [`Encryptor`] turns bytes into a self-identifying ciphertext bound to
//! caller metadata (e.g. `{"sink": "<sinkKey>"}`). [`new_encryptor`] builds
//! the stack for the configured [`Provider`]:
//!
//! - `native`: AES-256-GCM with a static 32-byte key.
//! - `aws` / `gcp` / `azure`: envelope encryption, the per-message data key is
//!   wrapped by the provider's [`KeyService`].
//!
//! Both are base64 encoded and tagged with `native::` or `<provider>::aes::`.

#[cfg(feature = "aws-kms")]
pub mod aws;
pub mod config;
pub mod encryptor;
pub mod envelope;
pub mod error;
pub mod factory;
pub mod key;
pub mod testing;

pub use config::{AwsConfig, AzureConfig, EncryptionConfig, GcpConfig, NativeConfig, Provider};
pub use encryptor::{
    AesEncryptor, Base64Encryptor, Encryptor, Metadata, PrefixEncryptor, decrypt_json,
    encrypt_json, metadata,
};
pub use envelope::{EnvelopeEncryptor, KeyService};
pub use error::CryptoError;
pub use factory::{KeyServiceRegistry, new_encryptor};
pub use key::{MasterKey, parse_master_key};

// Re-export for consumers so they don't need a direct `secrecy` dependency.
pub use secrecy::{ExposeSecret, SecretString};
