//! AWS KMS key service.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_kms::primitives::Blob;

use crate::config::AwsConfig;
use crate::encryptor::Metadata;
use crate::envelope::KeyService;
use crate::error::CryptoError;

/// Wraps data keys with an AWS KMS key; metadata becomes the KMS
/// encryption context.
#[derive(Debug, Clone)]
pub struct AwsKmsKeyService {
    client: aws_sdk_kms::Client,
    key_id: String,
}

impl AwsKmsKeyService {
    /// Build a client for the configured region from the default credential
    /// chain.
    pub async fn from_config(config: &AwsConfig) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;
        Self {
            client: aws_sdk_kms::Client::new(&sdk_config),
            key_id: config.key_id.clone(),
        }
    }

    pub fn new(client: aws_sdk_kms::Client, key_id: impl Into<String>) -> Self {
        Self {
            client,
            key_id: key_id.into(),
        }
    }
}

#[async_trait]
impl KeyService for AwsKmsKeyService {
    async fn wrap_key(&self, key: &[u8], metadata: &Metadata) -> Result<Vec<u8>, CryptoError> {
        let output = self
            .client
            .encrypt()
            .key_id(&self.key_id)
            .plaintext(Blob::new(key))
            .set_encryption_context(Some(metadata.clone().into_iter().collect()))
            .send()
            .await
            .map_err(|e| CryptoError::key_service("aws", e))?;

        output
            .ciphertext_blob()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| CryptoError::key_service("aws", "response without ciphertext"))
    }

    async fn unwrap_key(
        &self,
        wrapped: &[u8],
        metadata: &Metadata,
    ) -> Result<Vec<u8>, CryptoError> {
        let output = self
            .client
            .decrypt()
            .key_id(&self.key_id)
            .ciphertext_blob(Blob::new(wrapped))
            .set_encryption_context(Some(metadata.clone().into_iter().collect()))
            .send()
            .await
            .map_err(|e| CryptoError::key_service("aws", e))?;

        output
            .plaintext()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| CryptoError::key_service("aws", "response without plaintext"))
    }
}
