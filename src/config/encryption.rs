use serde::{Deserialize, Serialize};

/// Content encryption keys.
///
/// Keys are hex or base64, 16/24/32 bytes (AES-128/192/256-GCM). With no
/// primary key configured, content is stored in the clear.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptionConfig {
    /// Primary key. Always used for encryption.
    #[serde(default)]
    pub key: Option<String>,

    /// Legacy keys trialed in order during decryption. Keep retired keys
    /// here after a rotation until stored ciphertext has been rewritten.
    #[serde(default)]
    pub decryption_keys: Vec<String>,
}
