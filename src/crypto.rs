//! At-rest encryption for the stored API key.
//!
//! Values are sealed with AES-256-GCM under a random nonce and stored as
//! `ENC$<base64(nonce ‖ ciphertext)>`.  The key either comes from a
//! configured passphrase or from a key file generated on first launch in
//! the data directory.
//!
//! This is obfuscation, not a security boundary: the key lives on the same
//! machine (and usually the same directory) as the ciphertext, so anyone who
//! can read one can read the other.  It keeps the key out of casual view in
//! backups and database dumps, nothing more.

use std::path::Path;

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use data_encoding::{BASE64, HEXLOWER_PERMISSIVE};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{PromptError, Result};

/// Prefix prepended to every encrypted value so legacy plaintext can be
/// told apart.
const ENC_PREFIX: &str = "ENC$";

const KEY_FILE_NAME: &str = "secret.key";

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct SecretCipher {
    key_bytes: [u8; 32],
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Derive the key as SHA-256 of a passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&digest);
        Self { key_bytes }
    }

    /// Load the key from `<data_dir>/secret.key`, generating one on first
    /// launch.  The file holds 64 hex characters and is made owner-only on
    /// Unix.
    pub fn ensure_key(data_dir: &Path) -> Result<Self> {
        let key_path = data_dir.join(KEY_FILE_NAME);

        if key_path.exists() {
            let hex = std::fs::read_to_string(&key_path)?;
            let bytes = HEXLOWER_PERMISSIVE
                .decode(hex.trim().as_bytes())
                .map_err(|e| PromptError::Crypto(format!("key file corrupt: {e}")))?;
            let key_bytes: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
                PromptError::Crypto(format!(
                    "key file corrupt (expected 32 bytes, got {})",
                    b.len()
                ))
            })?;
            return Ok(Self { key_bytes });
        }

        let key = Aes256Gcm::generate_key(OsRng);
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&key);

        std::fs::create_dir_all(data_dir)?;
        std::fs::write(
            &key_path,
            format!("{}\n", HEXLOWER_PERMISSIVE.encode(&key_bytes)),
        )?;

        if let Err(e) = restrict_to_owner(&key_path) {
            warn!(path = %key_path.display(), "could not restrict key file to 0600: {e}");
        }

        info!(path = %key_path.display(), "generated new secret key (first launch)");
        Ok(Self { key_bytes })
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key_bytes))
    }

    /// Encrypt a plaintext string.  Empty and already-encrypted values are
    /// returned unchanged.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() || plaintext.starts_with(ENC_PREFIX) {
            return Ok(plaintext.to_string());
        }

        let nonce = Aes256Gcm::generate_nonce(OsRng);
        let ciphertext = self
            .cipher()
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| PromptError::Crypto("encryption failed".into()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{ENC_PREFIX}{}", BASE64.encode(&combined)))
    }

    /// Decrypt a value produced by [`encrypt`](Self::encrypt).  Values
    /// without the `ENC$` prefix are treated as legacy plaintext.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let Some(encoded) = stored.strip_prefix(ENC_PREFIX) else {
            return Ok(stored.to_string());
        };

        let combined = BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| PromptError::Crypto(format!("bad base64: {e}")))?;

        if combined.len() < NONCE_LEN {
            return Err(PromptError::Crypto("ciphertext too short".into()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| {
                PromptError::Crypto("authentication failed (wrong key or corrupted data)".into())
            })?;

        String::from_utf8(plaintext).map_err(|e| PromptError::Crypto(format!("invalid UTF-8: {e}")))
    }
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
