use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::encryptor::{Encryptor, Metadata, associated_data, open, seal};
use crate::error::CryptoError;
use crate::key::MasterKey;

/// Current envelope format version, written as the first byte.
pub const ENVELOPE_VERSION: u8 = 1;

/// External key-management service that wraps per-message data keys.
///
/// The metadata is forwarded as the service's encryption context, so a
/// wrapped key only unwraps under the same metadata.
#[async_trait]
pub trait KeyService: Send + Sync + fmt::Debug {
    async fn wrap_key(&self, key: &[u8], metadata: &Metadata) -> Result<Vec<u8>, CryptoError>;

    async fn unwrap_key(&self, wrapped: &[u8], metadata: &Metadata)
    -> Result<Vec<u8>, CryptoError>;
}

/// Envelope encryption: a random data key seals the payload and the key
/// service wraps the data key.
///
/// Layout: `version(1) | wrapped_len(u16 BE) | wrapped_key | nonce | ciphertext+tag`.
#[derive(Debug)]
pub struct EnvelopeEncryptor {
    key_service: Arc<dyn KeyService>,
}

impl EnvelopeEncryptor {
    pub fn new(key_service: Arc<dyn KeyService>) -> Self {
        Self { key_service }
    }
}

#[async_trait]
impl Encryptor for EnvelopeEncryptor {
    async fn encrypt(&self, plaintext: &[u8], metadata: &Metadata) -> Result<Vec<u8>, CryptoError> {
        let data_key = MasterKey::generate();
        let sealed = seal(&data_key, plaintext, &associated_data(metadata)?)?;
        let wrapped = self
            .key_service
            .wrap_key(data_key.as_bytes(), metadata)
            .await?;

        let wrapped_len = u16::try_from(wrapped.len()).map_err(|_| {
            CryptoError::EncryptionFailed(format!("wrapped key too long: {} bytes", wrapped.len()))
        })?;

        let mut out = Vec::with_capacity(3 + wrapped.len() + sealed.len());
        out.push(ENVELOPE_VERSION);
        out.extend_from_slice(&wrapped_len.to_be_bytes());
        out.extend_from_slice(&wrapped);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        metadata: &Metadata,
    ) -> Result<Vec<u8>, CryptoError> {
        let [version, hi, lo, rest @ ..] = ciphertext else {
            return Err(CryptoError::InvalidFormat("envelope header truncated".into()));
        };
        if *version != ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedVersion(*version));
        }
        let wrapped_len = usize::from(u16::from_be_bytes([*hi, *lo]));
        if rest.len() < wrapped_len {
            return Err(CryptoError::InvalidFormat("wrapped key truncated".into()));
        }
        let (wrapped, sealed) = rest.split_at(wrapped_len);

        let raw_key = self.key_service.unwrap_key(wrapped, metadata).await?;
        let data_key = MasterKey::from_slice(&raw_key)?;
        open(&data_key, sealed, &associated_data(metadata)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryptor::metadata;
    use crate::testing::StaticKeyService;

    fn envelope() -> EnvelopeEncryptor {
        EnvelopeEncryptor::new(Arc::new(StaticKeyService::new("aws")))
    }

    #[tokio::test]
    async fn roundtrip() {
        let enc = envelope();
        let md = metadata("sink", "1/2/a/b");
        let ciphertext = enc.encrypt(b"token-secret", &md).await.unwrap();
        assert_eq!(ciphertext[0], ENVELOPE_VERSION);
        assert_eq!(enc.decrypt(&ciphertext, &md).await.unwrap(), b"token-secret");
    }

    #[tokio::test]
    async fn metadata_mismatch_fails() {
        let enc = envelope();
        let ciphertext = enc.encrypt(b"x", &metadata("sink", "a")).await.unwrap();
        assert!(enc.decrypt(&ciphertext, &metadata("sink", "b")).await.is_err());
    }

    #[tokio::test]
    async fn unknown_version_is_rejected() {
        let enc = envelope();
        let md = Metadata::new();
        let mut ciphertext = enc.encrypt(b"x", &md).await.unwrap();
        ciphertext[0] = 9;
        let err = enc.decrypt(&ciphertext, &md).await.unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedVersion(9)));
    }

    #[tokio::test]
    async fn truncated_envelope_is_invalid() {
        let enc = envelope();
        let md = Metadata::new();
        assert!(matches!(
            enc.decrypt(&[ENVELOPE_VERSION], &md).await.unwrap_err(),
            CryptoError::InvalidFormat(_)
        ));
        assert!(matches!(
            enc.decrypt(&[ENVELOPE_VERSION, 0xff, 0xff, 1, 2], &md)
                .await
                .unwrap_err(),
            CryptoError::InvalidFormat(_)
        ));
    }
}
