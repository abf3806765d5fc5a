use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{EncryptionConfig, Provider};
use crate::encryptor::{AesEncryptor, Base64Encryptor, Encryptor, PrefixEncryptor};
use crate::envelope::{EnvelopeEncryptor, KeyService};
use crate::error::CryptoError;

/// Key-service clients of the external providers, injected at wiring time.
#[derive(Debug, Default, Clone)]
pub struct KeyServiceRegistry {
    services: HashMap<Provider, Arc<dyn KeyService>>,
}

impl KeyServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, provider: Provider, service: Arc<dyn KeyService>) -> Self {
        self.register(provider, service);
        self
    }

    pub fn register(&mut self, provider: Provider, service: Arc<dyn KeyService>) {
        self.services.insert(provider, service);
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn KeyService>> {
        self.services.get(&provider).cloned()
    }
}

/// Build the encryptor of the configured provider.
///
/// Returns `None` for the `none` provider. Every other provider is wrapped
/// in base64 encoding and the provider's ciphertext prefix; the external
/// providers additionally use envelope encryption over their key service.
pub fn new_encryptor(
    config: &EncryptionConfig,
    key_services: &KeyServiceRegistry,
) -> Result<Option<Arc<dyn Encryptor>>, CryptoError> {
    config.validate()?;

    let base: Arc<dyn Encryptor> = match config.provider {
        Provider::None => return Ok(None),
        Provider::Native => {
            let native = config.native.as_ref().ok_or_else(|| {
                CryptoError::Configuration("missing [encryption.native] section".into())
            })?;
            Arc::new(AesEncryptor::new(native.master_key()?))
        }
        provider @ (Provider::Aws | Provider::Gcp | Provider::Azure) => {
            let service = key_services.get(provider).ok_or_else(|| {
                CryptoError::Configuration(format!(
                    "no key service client registered for provider \"{provider}\""
                ))
            })?;
            Arc::new(EnvelopeEncryptor::new(service))
        }
    };

    tracing::debug!(provider = %config.provider, "encryption enabled");

    let encoded: Arc<dyn Encryptor> = Arc::new(Base64Encryptor::new(base));
    Ok(Some(Arc::new(PrefixEncryptor::new(
        config.provider.ciphertext_prefix(),
        encoded,
    ))))
}
