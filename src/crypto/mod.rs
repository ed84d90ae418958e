//! Content encryption at the storage boundary.
//!
//! Entry content and conversation titles are AEAD-encrypted before they
//! reach the datastore. One primary key encrypts; decryption trials the
//! primary and then each configured legacy key in order, which is how key
//! rotation works: promote the new key to primary and keep the old ones in
//! the decryption list until re-encryption catches up.

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::{
    AesGcm, KeyInit, Nonce,
    aead::{Aead, generic_array::typenum::U12},
};
use rand::RngCore;
use thiserror::Error;

use crate::config::EncryptionConfig;

type Aes128Gcm = AesGcm<Aes128, U12>;
type Aes192Gcm = AesGcm<Aes192, U12>;
type Aes256Gcm = AesGcm<Aes256, U12>;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed with all configured keys")]
    Decrypt,

    #[error("Ciphertext too short")]
    Truncated,
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// One AEAD key, sized 16/24/32 bytes for AES-128/192/256-GCM.
enum AeadKey {
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl AeadKey {
    fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        match bytes.len() {
            16 => Ok(AeadKey::Aes128(Box::new(Aes128Gcm::new(bytes.into())))),
            24 => Ok(AeadKey::Aes192(Box::new(Aes192Gcm::new(bytes.into())))),
            32 => Ok(AeadKey::Aes256(Box::new(Aes256Gcm::new(bytes.into())))),
            n => Err(CryptoError::InvalidKey(format!(
                "key must be 16, 24 or 32 bytes, got {}",
                n
            ))),
        }
    }

    fn encrypt(&self, nonce: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            AeadKey::Aes128(c) => c.encrypt(nonce, plaintext),
            AeadKey::Aes192(c) => c.encrypt(nonce, plaintext),
            AeadKey::Aes256(c) => c.encrypt(nonce, plaintext),
        }
        .map_err(|_| CryptoError::Encrypt)
    }

    fn decrypt(&self, nonce: &[u8], ciphertext: &[u8]) -> Option<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            AeadKey::Aes128(c) => c.decrypt(nonce, ciphertext),
            AeadKey::Aes192(c) => c.decrypt(nonce, ciphertext),
            AeadKey::Aes256(c) => c.decrypt(nonce, ciphertext),
        }
        .ok()
    }
}

/// Parse a key given as hex or standard base64.
fn parse_key(encoded: &str) -> CryptoResult<Vec<u8>> {
    if let Ok(bytes) = hex::decode(encoded) {
        return Ok(bytes);
    }
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    STANDARD
        .decode(encoded)
        .map_err(|_| CryptoError::InvalidKey("key is neither hex nor base64".to_string()))
}

/// AEAD wrapper over entry content and conversation titles.
///
/// With no keys configured both directions are a pass-through, which keeps
/// local development and tests free of key management.
pub struct ContentCrypto {
    primary: Option<AeadKey>,
    /// Trial order for decryption after the primary.
    legacy: Vec<AeadKey>,
}

impl ContentCrypto {
    /// Unkeyed pass-through instance.
    pub fn disabled() -> Self {
        Self {
            primary: None,
            legacy: Vec::new(),
        }
    }

    pub fn from_config(config: &EncryptionConfig) -> CryptoResult<Self> {
        let primary = match &config.key {
            Some(encoded) if !encoded.is_empty() => {
                Some(AeadKey::from_bytes(&parse_key(encoded)?)?)
            }
            _ => None,
        };

        if primary.is_none() && !config.decryption_keys.is_empty() {
            return Err(CryptoError::InvalidKey(
                "decryption keys configured without a primary key".to_string(),
            ));
        }

        let legacy = config
            .decryption_keys
            .iter()
            .map(|encoded| AeadKey::from_bytes(&parse_key(encoded)?))
            .collect::<CryptoResult<Vec<_>>>()?;

        Ok(Self { primary, legacy })
    }

    pub fn is_enabled(&self) -> bool {
        self.primary.is_some()
    }

    /// Encrypt with the primary key. Output is `nonce || ciphertext+tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let Some(key) = &self.primary else {
            return Ok(plaintext.to_vec());
        };

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = key.encrypt(&nonce, plaintext)?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Decrypt by trialing the primary key and then each legacy key in
    /// configuration order. Fails only when every key rejects the payload.
    pub fn decrypt(&self, data: &[u8]) -> CryptoResult<Vec<u8>> {
        let Some(primary) = &self.primary else {
            return Ok(data.to_vec());
        };

        if data.len() < NONCE_LEN {
            return Err(CryptoError::Truncated);
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);

        if let Some(plaintext) = primary.decrypt(nonce, ciphertext) {
            return Ok(plaintext);
        }
        for key in &self.legacy {
            if let Some(plaintext) = key.decrypt(nonce, ciphertext) {
                return Ok(plaintext);
            }
        }
        Err(CryptoError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(key: Option<&str>, legacy: &[&str]) -> EncryptionConfig {
        EncryptionConfig {
            key: key.map(|k| k.to_string()),
            decryption_keys: legacy.iter().map(|k| k.to_string()).collect(),
        }
    }

    const KEY_A: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
    const KEY_B: &str = "ffeeddccbbaa99887766554433221100ffeeddccbbaa99887766554433221100";

    #[test]
    fn test_round_trip() {
        let crypto = ContentCrypto::from_config(&config(Some(KEY_A), &[])).unwrap();
        let plaintext = b"[{\"text\":\"hello\",\"role\":\"USER\"}]";
        let sealed = crypto.encrypt(plaintext).unwrap();
        assert_ne!(sealed, plaintext.to_vec());
        assert_eq!(crypto.decrypt(&sealed).unwrap(), plaintext.to_vec());
    }

    #[test]
    fn test_nonce_is_random_per_encryption() {
        let crypto = ContentCrypto::from_config(&config(Some(KEY_A), &[])).unwrap();
        let a = crypto.encrypt(b"same").unwrap();
        let b = crypto.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_legacy_key_rotation() {
        let old = ContentCrypto::from_config(&config(Some(KEY_A), &[])).unwrap();
        let sealed = old.encrypt(b"rotated payload").unwrap();

        // After rotation: B is primary, A is a legacy decryption key.
        let rotated = ContentCrypto::from_config(&config(Some(KEY_B), &[KEY_A])).unwrap();
        assert_eq!(rotated.decrypt(&sealed).unwrap(), b"rotated payload".to_vec());

        // New writes use the primary and old ciphertext still reads.
        let fresh = rotated.encrypt(b"new payload").unwrap();
        assert_eq!(rotated.decrypt(&fresh).unwrap(), b"new payload".to_vec());
    }

    #[test]
    fn test_decrypt_fails_without_matching_key() {
        let a = ContentCrypto::from_config(&config(Some(KEY_A), &[])).unwrap();
        let b = ContentCrypto::from_config(&config(Some(KEY_B), &[])).unwrap();
        let sealed = a.encrypt(b"secret").unwrap();
        assert!(matches!(b.decrypt(&sealed), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_pass_through_without_keys() {
        let crypto = ContentCrypto::disabled();
        assert!(!crypto.is_enabled());
        assert_eq!(crypto.encrypt(b"plain").unwrap(), b"plain".to_vec());
        assert_eq!(crypto.decrypt(b"plain").unwrap(), b"plain".to_vec());
    }

    #[test]
    fn test_base64_key_accepted() {
        // 32 zero bytes, base64-encoded.
        let encoded = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";
        let crypto = ContentCrypto::from_config(&config(Some(encoded), &[])).unwrap();
        assert!(crypto.is_enabled());
    }

    #[test]
    fn test_key_sizes() {
        for hex_len in [32, 48, 64] {
            let key = "ab".repeat(hex_len / 2);
            assert!(ContentCrypto::from_config(&config(Some(&key), &[])).is_ok());
        }
        let bad = "ab".repeat(10);
        assert!(ContentCrypto::from_config(&config(Some(&bad), &[])).is_err());
    }

    #[test]
    fn test_legacy_without_primary_rejected() {
        assert!(ContentCrypto::from_config(&config(None, &[KEY_A])).is_err());
    }

    #[test]
    fn test_truncated_ciphertext() {
        let crypto = ContentCrypto::from_config(&config(Some(KEY_A), &[])).unwrap();
        assert!(matches!(
            crypto.decrypt(&[0u8; 4]),
            Err(CryptoError::Truncated)
        ));
    }
}
