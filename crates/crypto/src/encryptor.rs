use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CryptoError;
use crate::key::MasterKey;

/// AES-GCM nonce length in bytes.
pub(crate) const NONCE_LEN: usize = 12;

/// Opaque string map bound to a ciphertext, e.g. `{"sink": "<sinkKey>"}`.
///
/// It is authenticated as AES-GCM associated data, so decrypting with a
/// different map fails.
pub type Metadata = BTreeMap<String, String>;

/// Build a single-entry [`Metadata`] map.
pub fn metadata(key: impl Into<String>, value: impl ToString) -> Metadata {
    Metadata::from([(key.into(), value.to_string())])
}

/// Symmetric byte-level encryption bound to caller metadata.
#[async_trait]
pub trait Encryptor: Send + Sync + fmt::Debug {
    async fn encrypt(&self, plaintext: &[u8], metadata: &Metadata) -> Result<Vec<u8>, CryptoError>;

    async fn decrypt(&self, ciphertext: &[u8], metadata: &Metadata)
    -> Result<Vec<u8>, CryptoError>;
}

/// Canonical associated data of a metadata map. `BTreeMap` keeps keys sorted.
pub(crate) fn associated_data(metadata: &Metadata) -> Result<Vec<u8>, CryptoError> {
    serde_json::to_vec(metadata).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

/// Seal `plaintext` with `key`. Output is `nonce || ciphertext || tag`.
pub(crate) fn seal(key: &MasterKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(format!("invalid AES key: {e}")))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Inverse of [`seal`].
pub(crate) fn open(key: &MasterKey, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN + 16 {
        return Err(CryptoError::InvalidFormat(format!(
            "sealed payload too short: {} bytes",
            sealed.len()
        )));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(format!("invalid AES key: {e}")))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// AES-256-GCM with a static key (the `native` provider).
pub struct AesEncryptor {
    key: MasterKey,
}

impl AesEncryptor {
    pub fn new(key: MasterKey) -> Self {
        Self { key }
    }
}

impl fmt::Debug for AesEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesEncryptor([REDACTED])")
    }
}

#[async_trait]
impl Encryptor for AesEncryptor {
    async fn encrypt(&self, plaintext: &[u8], metadata: &Metadata) -> Result<Vec<u8>, CryptoError> {
        seal(&self.key, plaintext, &associated_data(metadata)?)
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        metadata: &Metadata,
    ) -> Result<Vec<u8>, CryptoError> {
        open(&self.key, ciphertext, &associated_data(metadata)?)
    }
}

/// Encodes the inner ciphertext with standard base64.
#[derive(Debug)]
pub struct Base64Encryptor {
    inner: Arc<dyn Encryptor>,
}

impl Base64Encryptor {
    pub fn new(inner: Arc<dyn Encryptor>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Encryptor for Base64Encryptor {
    async fn encrypt(&self, plaintext: &[u8], metadata: &Metadata) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = self.inner.encrypt(plaintext, metadata).await?;
        Ok(B64.encode(ciphertext).into_bytes())
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        metadata: &Metadata,
    ) -> Result<Vec<u8>, CryptoError> {
        let decoded = B64
            .decode(ciphertext)
            .map_err(|e| CryptoError::InvalidFormat(format!("invalid base64: {e}")))?;
        self.inner.decrypt(&decoded, metadata).await
    }
}

/// Tags ciphertexts with a provider prefix and refuses foreign ones.
#[derive(Debug)]
pub struct PrefixEncryptor {
    prefix: String,
    inner: Arc<dyn Encryptor>,
}

impl PrefixEncryptor {
    pub fn new(prefix: impl Into<String>, inner: Arc<dyn Encryptor>) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

#[async_trait]
impl Encryptor for PrefixEncryptor {
    async fn encrypt(&self, plaintext: &[u8], metadata: &Metadata) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = self.inner.encrypt(plaintext, metadata).await?;
        let mut out = Vec::with_capacity(self.prefix.len() + ciphertext.len());
        out.extend_from_slice(self.prefix.as_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        metadata: &Metadata,
    ) -> Result<Vec<u8>, CryptoError> {
        let Some(rest) = ciphertext.strip_prefix(self.prefix.as_bytes()) else {
            return Err(CryptoError::ProviderMismatch {
                expected: self.prefix.clone(),
            });
        };
        self.inner.decrypt(rest, metadata).await
    }
}

/// Serialize `value` to JSON and encrypt it into a UTF-8 ciphertext string.
pub async fn encrypt_json<T: Serialize + Sync>(
    encryptor: &dyn Encryptor,
    value: &T,
    metadata: &Metadata,
) -> Result<String, CryptoError> {
    let plain = serde_json::to_vec(value)
        .map_err(|e| CryptoError::EncryptionFailed(format!("JSON serialization failed: {e}")))?;
    let ciphertext = encryptor.encrypt(&plain, metadata).await?;
    String::from_utf8(ciphertext)
        .map_err(|e| CryptoError::InvalidFormat(format!("ciphertext is not UTF-8: {e}")))
}

/// Decrypt a ciphertext string produced by [`encrypt_json`].
pub async fn decrypt_json<T: DeserializeOwned>(
    encryptor: &dyn Encryptor,
    ciphertext: &str,
    metadata: &Metadata,
) -> Result<T, CryptoError> {
    let plain = encryptor.decrypt(ciphertext.as_bytes(), metadata).await?;
    serde_json::from_slice(&plain)
        .map_err(|e| CryptoError::InvalidFormat(format!("JSON parse failed: {e}")))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::key::parse_master_key;

    fn aes() -> Arc<dyn Encryptor> {
        Arc::new(AesEncryptor::new(parse_master_key(&"42".repeat(32)).unwrap()))
    }

    #[tokio::test]
    async fn aes_roundtrip() {
        let enc = aes();
        let md = metadata("sink", "1/2/src/sink");
        let ciphertext = enc.encrypt(b"secret", &md).await.unwrap();
        assert_ne!(ciphertext, b"secret");
        assert_eq!(enc.decrypt(&ciphertext, &md).await.unwrap(), b"secret");
    }

    #[tokio::test]
    async fn aes_uses_fresh_nonce() {
        let enc = aes();
        let md = Metadata::new();
        let a = enc.encrypt(b"same", &md).await.unwrap();
        let b = enc.encrypt(b"same", &md).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn metadata_mismatch_fails() {
        let enc = aes();
        let ciphertext = enc
            .encrypt(b"secret", &metadata("sink", "a"))
            .await
            .unwrap();
        let err = enc
            .decrypt(&ciphertext, &metadata("sink", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed));
    }

    #[tokio::test]
    async fn wrong_key_fails() {
        let md = Metadata::new();
        let ciphertext = aes().encrypt(b"secret", &md).await.unwrap();
        let other = AesEncryptor::new(parse_master_key(&"ab".repeat(32)).unwrap());
        assert!(other.decrypt(&ciphertext, &md).await.is_err());
    }

    #[tokio::test]
    async fn truncated_payload_is_invalid_format() {
        let err = aes().decrypt(&[0u8; 5], &Metadata::new()).await.unwrap_err();
        assert!(matches!(err, CryptoError::InvalidFormat(_)));
    }

    #[tokio::test]
    async fn decorators_compose() {
        let enc = PrefixEncryptor::new("native::", Arc::new(Base64Encryptor::new(aes())));
        let md = metadata("file", "f");
        let ciphertext = enc.encrypt(b"payload", &md).await.unwrap();

        let text = String::from_utf8(ciphertext.clone()).unwrap();
        assert!(text.starts_with("native::"));
        assert!(B64.decode(&text["native::".len()..]).is_ok());

        assert_eq!(enc.decrypt(&ciphertext, &md).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn foreign_prefix_is_rejected() {
        let native = PrefixEncryptor::new("native::", Arc::new(Base64Encryptor::new(aes())));
        let aws = PrefixEncryptor::new("aws::aes::", Arc::new(Base64Encryptor::new(aes())));
        let md = Metadata::new();

        let ciphertext = native.encrypt(b"x", &md).await.unwrap();
        let err = aws.decrypt(&ciphertext, &md).await.unwrap_err();
        assert!(matches!(err, CryptoError::ProviderMismatch { expected } if expected == "aws::aes::"));
    }

    #[tokio::test]
    async fn json_helpers_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Creds {
            id: u64,
            token: String,
        }

        let enc = PrefixEncryptor::new("native::", Arc::new(Base64Encryptor::new(aes())));
        let md = metadata("sink", "s");
        let creds = Creds {
            id: 7,
            token: "t0k3n".into(),
        };

        let ciphertext = encrypt_json(&enc, &creds, &md).await.unwrap();
        assert!(!ciphertext.contains("t0k3n"));
        let back: Creds = decrypt_json(&enc, &ciphertext, &md).await.unwrap();
        assert_eq!(back, creds);
    }
}
