use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::CryptoError;
use crate::key::{MasterKey, parse_master_key};

/// Encryption provider of tokens and upload credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Values are stored in plaintext.
    #[default]
    None,
    /// AES-256-GCM with a static key.
    Native,
    Aws,
    Gcp,
    Azure,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Native => "native",
            Self::Aws => "aws",
            Self::Gcp => "gcp",
            Self::Azure => "azure",
        }
    }

    /// Prefix that tags ciphertexts of this provider.
    pub fn ciphertext_prefix(self) -> String {
        match self {
            Self::Native => String::from("native::"),
            other => format!("{}::aes::", other.as_str()),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symmetric key of the `native` provider.
#[derive(Debug, Clone, Deserialize)]
pub struct NativeConfig {
    /// Exactly 32 bytes, raw, hex or base64 encoded.
    pub secret_key: SecretString,
}

impl NativeConfig {
    pub fn master_key(&self) -> Result<MasterKey, CryptoError> {
        parse_master_key(self.secret_key.expose_secret())
            .map_err(|e| CryptoError::Configuration(format!("native.secret_key: {e}")))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub key_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GcpConfig {
    pub key_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AzureConfig {
    pub vault_url: String,
    pub key_name: String,
}

/// Encryption configuration, the `[encryption]` table of the server config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub provider: Provider,
    pub native: Option<NativeConfig>,
    pub aws: Option<AwsConfig>,
    pub gcp: Option<GcpConfig>,
    pub azure: Option<AzureConfig>,
}

fn require<'a, T>(section: Option<&'a T>, provider: Provider) -> Result<&'a T, CryptoError> {
    section.ok_or_else(|| {
        CryptoError::Configuration(format!(
            "provider \"{provider}\" requires the [encryption.{provider}] section"
        ))
    })
}

fn non_empty(value: &str, field: &str) -> Result<(), CryptoError> {
    if value.trim().is_empty() {
        return Err(CryptoError::Configuration(format!("{field} must not be empty")));
    }
    Ok(())
}

impl EncryptionConfig {
    /// Check that the section of the selected provider is present and valid.
    pub fn validate(&self) -> Result<(), CryptoError> {
        match self.provider {
            Provider::None => Ok(()),
            Provider::Native => {
                require(self.native.as_ref(), self.provider)?.master_key()?;
                Ok(())
            }
            Provider::Aws => {
                let aws = require(self.aws.as_ref(), self.provider)?;
                non_empty(&aws.region, "aws.region")?;
                non_empty(&aws.key_id, "aws.key_id")
            }
            Provider::Gcp => {
                let gcp = require(self.gcp.as_ref(), self.provider)?;
                non_empty(&gcp.key_id, "gcp.key_id")
            }
            Provider::Azure => {
                let azure = require(self.azure.as_ref(), self.provider)?;
                non_empty(&azure.key_name, "azure.key_name")?;
                let url = url::Url::parse(&azure.vault_url).map_err(|e| {
                    CryptoError::Configuration(format!("azure.vault_url is not a valid URL: {e}"))
                })?;
                if url.scheme() != "https" || url.host_str().is_none() {
                    return Err(CryptoError::Configuration(format!(
                        "azure.vault_url must be an https URL, got \"{}\"",
                        azure.vault_url
                    )));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> EncryptionConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn default_is_none() {
        let cfg = EncryptionConfig::default();
        assert_eq!(cfg.provider, Provider::None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn native_requires_32_byte_key() {
        let ok = parse(r#"{"provider":"native","native":{"secret_key":"0123456789abcdef0123456789abcdef"}}"#);
        assert!(ok.validate().is_ok());

        let short = parse(r#"{"provider":"native","native":{"secret_key":"short"}}"#);
        assert!(matches!(short.validate(), Err(CryptoError::Configuration(_))));

        let missing = parse(r#"{"provider":"native"}"#);
        let err = missing.validate().unwrap_err();
        assert!(err.to_string().contains("[encryption.native]"));
    }

    #[test]
    fn aws_and_gcp_require_ids() {
        let aws = parse(r#"{"provider":"aws","aws":{"region":"eu-west-1","key_id":""}}"#);
        assert!(aws.validate().is_err());
        let aws = parse(r#"{"provider":"aws","aws":{"region":"eu-west-1","key_id":"alias/x"}}"#);
        assert!(aws.validate().is_ok());

        let gcp = parse(r#"{"provider":"gcp","gcp":{"key_id":" "}}"#);
        assert!(gcp.validate().is_err());
    }

    #[test]
    fn azure_requires_https_vault_url() {
        let plain = parse(
            r#"{"provider":"azure","azure":{"vault_url":"http://vault.example","key_name":"k"}}"#,
        );
        assert!(plain.validate().is_err());

        let garbage =
            parse(r#"{"provider":"azure","azure":{"vault_url":"not a url","key_name":"k"}}"#);
        assert!(garbage.validate().is_err());

        let ok = parse(
            r#"{"provider":"azure","azure":{"vault_url":"https://vault.example","key_name":"k"}}"#,
        );
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn prefixes() {
        assert_eq!(Provider::Native.ciphertext_prefix(), "native::");
        assert_eq!(Provider::Aws.ciphertext_prefix(), "aws::aes::");
        assert_eq!(Provider::Azure.ciphertext_prefix(), "azure::aes::");
    }
}
