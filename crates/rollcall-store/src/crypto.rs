//! Embedding encryption at rest.
//!
//! Face embeddings are biometric data, so they are never stored as
//! plaintext: blobs are AES-256-GCM with a random nonce prefixed, keyed by
//! SHA-256 of a key file created on first use.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const KEY_FILE_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key file: {0}")]
    KeyFile(String),
    #[error("embedding blob failed to decrypt")]
    Decrypt,
    #[error("embedding blob has invalid length")]
    BadBlob,
}

/// Symmetric cipher for embedding blobs.
pub struct EmbeddingCipher {
    cipher: Aes256Gcm,
}

impl EmbeddingCipher {
    /// Derive the cipher key as SHA-256 of arbitrary key material, so
    /// operator-supplied key files of any length work.
    pub fn from_key_bytes(material: &[u8]) -> Self {
        let key = Sha256::digest(material);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .expect("SHA-256 output is always a valid AES-256 key");
        Self { cipher }
    }

    /// Load the key file, creating it with fresh random material (mode 0600)
    /// if it does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self, CryptoError> {
        if !path.exists() {
            if let Some(dir) = path.parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir)
                        .map_err(|e| CryptoError::KeyFile(e.to_string()))?;
                }
            }

            let mut material = [0u8; KEY_FILE_LEN];
            OsRng.fill_bytes(&mut material);

            let mut options = std::fs::OpenOptions::new();
            options.write(true).create_new(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options
                .open(path)
                .map_err(|e| CryptoError::KeyFile(e.to_string()))?;
            file.write_all(&material)
                .map_err(|e| CryptoError::KeyFile(e.to_string()))?;

            tracing::info!(path = %path.display(), "created new embedding key file");
        }

        let material =
            std::fs::read(path).map_err(|e| CryptoError::KeyFile(e.to_string()))?;
        if material.is_empty() {
            return Err(CryptoError::KeyFile(format!(
                "{} is empty",
                path.display()
            )));
        }

        Ok(Self::from_key_bytes(&material))
    }

    /// Encrypt an embedding as nonce || ciphertext.
    pub fn encrypt(&self, values: &[f32]) -> Result<Vec<u8>, CryptoError> {
        let mut plaintext = Vec::with_capacity(values.len() * 4);
        for v in values {
            plaintext.extend_from_slice(&v.to_le_bytes());
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| CryptoError::Decrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a nonce-prefixed blob back to embedding values.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<f32>, CryptoError> {
        if blob.len() <= NONCE_LEN {
            return Err(CryptoError::BadBlob);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;

        if plaintext.len() % 4 != 0 {
            return Err(CryptoError::BadBlob);
        }

        Ok(plaintext
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> EmbeddingCipher {
        EmbeddingCipher::from_key_bytes(b"test key material")
    }

    #[test]
    fn test_roundtrip() {
        let values = vec![0.25f32, -1.5, 3.75, 0.0];
        let blob = cipher().encrypt(&values).unwrap();
        assert_eq!(cipher().decrypt(&blob).unwrap(), values);
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let values = vec![1.0f32; 8];
        let c = cipher();
        let a = c.encrypt(&values).unwrap();
        let b = c.encrypt(&values).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_blob_rejected() {
        let mut blob = cipher().encrypt(&[1.0, 2.0]).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        assert!(matches!(cipher().decrypt(&blob), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let blob = cipher().encrypt(&[1.0, 2.0]).unwrap();
        let other = EmbeddingCipher::from_key_bytes(b"different material");
        assert!(other.decrypt(&blob).is_err());
    }

    #[test]
    fn test_truncated_blob_rejected() {
        assert!(matches!(cipher().decrypt(&[0u8; 5]), Err(CryptoError::BadBlob)));
    }

    #[test]
    fn test_load_or_create_persists_key() {
        let dir = std::env::temp_dir().join(format!("rollcall-key-test-{}", std::process::id()));
        let path = dir.join("embeddings.key");

        let first = EmbeddingCipher::load_or_create(&path).unwrap();
        let blob = first.encrypt(&[0.5, 0.25]).unwrap();

        // Reloading the same file must yield the same key.
        let second = EmbeddingCipher::load_or_create(&path).unwrap();
        assert_eq!(second.decrypt(&blob).unwrap(), vec![0.5, 0.25]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
