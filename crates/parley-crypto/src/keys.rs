use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::codec::CryptoError;

/// Generate a random 256-bit message key. Used by deploy tooling to
/// mint the `PARLEY_MESSAGE_KEY` value.
pub fn generate_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encode a key to base64 for configuration.
pub fn key_to_base64(key: &[u8; 32]) -> String {
    BASE64.encode(key)
}

/// Decode a base64-encoded key from configuration.
pub fn key_from_base64(encoded: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("key must be 32 bytes".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_roundtrip() {
        let key = generate_key();
        let encoded = key_to_base64(&key);
        assert_eq!(key_from_base64(&encoded).unwrap(), key);
    }

    #[test]
    fn short_key_rejected() {
        let encoded = BASE64.encode([0u8; 16]);
        assert!(key_from_base64(&encoded).is_err());
    }
}
