use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The authentication tag did not verify, the nonce is malformed,
    /// or the plaintext is not valid UTF-8. Call sites degrade to a
    /// placeholder string instead of propagating this.
    #[error("decryption failed")]
    Decryption,

    #[error("encryption failed")]
    Encryption,

    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// Ciphertext plus the nonce it was sealed with. Stored together; a
/// nonce is never reused with the same key.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// AES-256-GCM codec over the deployment's message key.
#[derive(Clone)]
pub struct MessageCodec {
    cipher: Aes256Gcm,
}

impl MessageCodec {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Seal a plaintext body with a fresh random 96-bit nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<Sealed, CryptoError> {
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encryption)?;

        Ok(Sealed {
            ciphertext,
            nonce: nonce_bytes.to_vec(),
        })
    }

    /// Open a sealed body. Fails when the tag does not verify.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<String, CryptoError> {
        if nonce.len() != 12 {
            return Err(CryptoError::Decryption);
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decryption)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Decryption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_key;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let codec = MessageCodec::new(&generate_key());
        let message = "hello from parley";

        let sealed = codec.encrypt(message).unwrap();
        assert_ne!(sealed.ciphertext, message.as_bytes());

        let decrypted = codec.decrypt(&sealed.ciphertext, &sealed.nonce).unwrap();
        assert_eq!(decrypted, message);
    }

    #[test]
    fn fresh_nonce_per_call() {
        let codec = MessageCodec::new(&generate_key());
        let a = codec.encrypt("same plaintext").unwrap();
        let b = codec.encrypt("same plaintext").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let codec = MessageCodec::new(&generate_key());
        let mut sealed = codec.encrypt("secret").unwrap();
        sealed.ciphertext[0] ^= 0xff;

        let result = codec.decrypt(&sealed.ciphertext, &sealed.nonce);
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn wrong_key_fails() {
        let codec1 = MessageCodec::new(&generate_key());
        let codec2 = MessageCodec::new(&generate_key());

        let sealed = codec1.encrypt("secret").unwrap();
        let result = codec2.decrypt(&sealed.ciphertext, &sealed.nonce);
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn mismatched_nonce_fails() {
        let codec = MessageCodec::new(&generate_key());
        let sealed = codec.encrypt("secret").unwrap();
        let other = codec.encrypt("other").unwrap();

        let result = codec.decrypt(&sealed.ciphertext, &other.nonce);
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn truncated_nonce_rejected() {
        let codec = MessageCodec::new(&generate_key());
        let sealed = codec.encrypt("secret").unwrap();

        let result = codec.decrypt(&sealed.ciphertext, &sealed.nonce[..8]);
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }
}
