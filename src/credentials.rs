//! Provider-credential encryption at rest (spec §6, SPEC_FULL §B).
//!
//! Secrets stored in the `organizations`/`provider_credentials` tables
//! (per-org Twilio/Resend/ElevenLabs keys) are encrypted with AES-256-GCM
//! under a single key derived from `CREDENTIALS_ENCRYPTION_KEY`. Plaintext
//! values never reach a logging macro and never implement `Debug` directly.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use rand::RngCore;
use zeroize::Zeroize;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("ciphertext is malformed")]
    MalformedCiphertext,
    #[error("decryption failed (wrong key or tampered ciphertext)")]
    DecryptFailed,
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A decrypted provider secret. Holds the plaintext only in memory, never
/// logs it, and zeroizes on drop.
pub struct PlaintextSecret(String);

impl PlaintextSecret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PlaintextSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PlaintextSecret(__REDACTED__)")
    }
}

impl Drop for PlaintextSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Derives a 32-byte AES-256 key from the configured encryption key string.
/// Accepts either 64 hex chars or any other string, which is SHA-256 hashed
/// down to 32 bytes (so ops can roll a passphrase instead of a hex key).
fn derive_key(raw: &str) -> [u8; 32] {
    if let Ok(bytes) = hex::decode(raw) {
        if bytes.len() == 32 {
            let mut key = [0u8; 32];
            key.copy_from_slice(&bytes);
            return key;
        }
    }
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// A keyed encryptor/decryptor for provider credentials, built once from
/// config at startup.
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    pub fn new(encryption_key: &str) -> Self {
        let key_bytes = derive_key(encryption_key);
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt a plaintext secret, returning `base64(nonce ‖ ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CredentialError> {
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CredentialError::DecryptFailed)?;
        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(combined))
    }

    /// Decrypt a value produced by [`Self::encrypt`].
    pub fn decrypt(&self, encoded: &str) -> Result<PlaintextSecret, CredentialError> {
        let combined = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        if combined.len() < 12 {
            return Err(CredentialError::MalformedCiphertext);
        }
        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CredentialError::DecryptFailed)?;
        let text = String::from_utf8(plaintext).map_err(|_| CredentialError::DecryptFailed)?;
        Ok(PlaintextSecret(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_secret() {
        let cipher = CredentialCipher::new("a passphrase that is not hex");
        let encrypted = cipher.encrypt("sk_live_abc123").unwrap();
        let decrypted = cipher.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted.expose(), "sk_live_abc123");
    }

    #[test]
    fn hex_key_is_used_directly() {
        let hex_key = hex::encode([7u8; 32]);
        let cipher = CredentialCipher::new(&hex_key);
        let encrypted = cipher.encrypt("secret").unwrap();
        assert_eq!(cipher.decrypt(&encrypted).unwrap().expose(), "secret");
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let cipher = CredentialCipher::new("key-material");
        let mut encrypted = cipher.encrypt("secret").unwrap();
        encrypted.push('x');
        assert!(cipher.decrypt(&encrypted).is_err());
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let cipher_a = CredentialCipher::new("key-a");
        let cipher_b = CredentialCipher::new("key-b");
        let encrypted = cipher_a.encrypt("secret").unwrap();
        assert!(cipher_b.decrypt(&encrypted).is_err());
    }

    #[test]
    fn debug_never_prints_plaintext() {
        let cipher = CredentialCipher::new("key-material");
        let encrypted = cipher.encrypt("super-secret-value").unwrap();
        let decrypted = cipher.decrypt(&encrypted).unwrap();
        let debug_str = format!("{decrypted:?}");
        assert!(!debug_str.contains("super-secret-value"));
    }
}
