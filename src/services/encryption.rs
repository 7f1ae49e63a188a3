use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};

const NONCE_LEN: usize = 12;

/// An envelope payload ready for the relay: ciphertext and its nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEnvelope {
    pub cipher: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// AES-256-GCM sealing for mesh envelopes. The relay never sees the key.
pub struct EnvelopeCipher {
    cipher: Aes256Gcm,
}

impl EnvelopeCipher {
    /// Create from a base64-encoded 32-byte key.
    pub fn new(key_base64: &str) -> Result<Self, EncryptionError> {
        use base64::Engine;
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(key_base64)
            .map_err(|_| EncryptionError::InvalidKey)?;

        if key_bytes.len() != 32 {
            return Err(EncryptionError::InvalidKey);
        }

        let cipher =
            Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| EncryptionError::InvalidKey)?;

        Ok(Self { cipher })
    }

    /// Encrypt under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedEnvelope, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let cipher = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| EncryptionError::EncryptFailed)?;

        Ok(SealedEnvelope {
            cipher,
            nonce: nonce.to_vec(),
        })
    }

    pub fn open(&self, cipher: &[u8], nonce: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if nonce.len() != NONCE_LEN {
            return Err(EncryptionError::DecryptFailed);
        }

        self.cipher
            .decrypt(Nonce::from_slice(nonce), cipher)
            .map_err(|_| EncryptionError::DecryptFailed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Invalid envelope key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed")]
    DecryptFailed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    fn key() -> String {
        base64::engine::general_purpose::STANDARD.encode([7u8; 32])
    }

    #[test]
    fn test_open_reverses_seal() {
        let cipher = EnvelopeCipher::new(&key()).unwrap();
        let sealed = cipher.seal(b"dock 4 ready").unwrap();
        assert_eq!(sealed.nonce.len(), NONCE_LEN);
        assert_eq!(cipher.open(&sealed.cipher, &sealed.nonce).unwrap(), b"dock 4 ready");
    }

    #[test]
    fn test_open_rejects_tampered_cipher() {
        let cipher = EnvelopeCipher::new(&key()).unwrap();
        let mut sealed = cipher.seal(b"hello").unwrap();
        sealed.cipher[0] ^= 0xff;
        assert!(matches!(
            cipher.open(&sealed.cipher, &sealed.nonce),
            Err(EncryptionError::DecryptFailed)
        ));
    }

    #[test]
    fn test_short_key_rejected() {
        let short = base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        assert!(matches!(EnvelopeCipher::new(&short), Err(EncryptionError::InvalidKey)));
    }
}
