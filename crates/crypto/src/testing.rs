//! In-process key services for tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::encryptor::{Metadata, associated_data, open, seal};
use crate::envelope::KeyService;
use crate::error::CryptoError;
use crate::key::MasterKey;

/// Key service that wraps data keys with a fixed local key, binding the
/// metadata the way a cloud KMS binds its encryption context.
#[derive(Debug)]
pub struct StaticKeyService {
    provider: String,
    key: MasterKey,
    wraps: AtomicUsize,
}

impl StaticKeyService {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            key: MasterKey::generate(),
            wraps: AtomicUsize::new(0),
        }
    }

    /// Number of keys wrapped so far.
    pub fn wrap_count(&self) -> usize {
        self.wraps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyService for StaticKeyService {
    async fn wrap_key(&self, key: &[u8], metadata: &Metadata) -> Result<Vec<u8>, CryptoError> {
        self.wraps.fetch_add(1, Ordering::SeqCst);
        seal(&self.key, key, &associated_data(metadata)?)
            .map_err(|e| CryptoError::key_service(&self.provider, e))
    }

    async fn unwrap_key(
        &self,
        wrapped: &[u8],
        metadata: &Metadata,
    ) -> Result<Vec<u8>, CryptoError> {
        open(&self.key, wrapped, &associated_data(metadata)?)
            .map_err(|e| CryptoError::key_service(&self.provider, e))
    }
}
