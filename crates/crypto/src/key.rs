use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use rand_core::{OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Length of an AES-256 key in bytes.
pub const KEY_LEN: usize = 32;

/// A 32-byte AES-256 key that is zeroized when dropped.
///
/// The [`Debug`] implementation is redacted to avoid accidental logging.
/// Raw bytes are not accessible outside this crate.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    /// Generate a fresh random key, used as a per-message data key.
    pub(crate) fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "key must be exactly {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// Parse a 32-byte key.
///
/// Accepts 64 hex characters, a base64 string that decodes to exactly 32
/// bytes, or a raw 32-byte string.
pub fn parse_master_key(raw: &str) -> Result<MasterKey, CryptoError> {
    let trimmed = raw.trim();
    if trimmed.len() == 2 * KEY_LEN
        && let Ok(bytes) = hex::decode(trimmed)
    {
        return MasterKey::from_slice(&bytes);
    }
    if let Ok(bytes) = B64.decode(trimmed)
        && bytes.len() == KEY_LEN
    {
        return MasterKey::from_slice(&bytes);
    }
    if raw.len() == KEY_LEN {
        return MasterKey::from_slice(raw.as_bytes());
    }
    Err(CryptoError::InvalidKey(format!(
        "must be exactly {KEY_LEN} bytes, given raw, as 64 hex chars or as base64"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_key() {
        let key = parse_master_key(&"aa".repeat(32)).unwrap();
        assert_eq!(key.as_bytes(), &[0xaa; 32]);
    }

    #[test]
    fn parse_base64_key() {
        let b64 = B64.encode([0xbbu8; 32]);
        let key = parse_master_key(&b64).unwrap();
        assert_eq!(key.as_bytes(), &[0xbb; 32]);
    }

    #[test]
    fn parse_raw_key() {
        let raw = "0123456789abcdef0123456789abcdef";
        let key = parse_master_key(raw).unwrap();
        assert_eq!(key.as_bytes(), raw.as_bytes());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            parse_master_key("too-short"),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(parse_master_key(&"x".repeat(33)).is_err());
    }

    #[test]
    fn debug_is_redacted() {
        let key = MasterKey::generate();
        assert_eq!(format!("{key:?}"), "MasterKey([REDACTED])");
    }

    #[test]
    fn generated_keys_differ() {
        assert_ne!(
            MasterKey::generate().as_bytes(),
            MasterKey::generate().as_bytes()
        );
    }
}
