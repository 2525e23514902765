//! Pre-shared key handling and authenticated encryption of frames.
//!
//! Every frame crossing the listener is sealed with ChaCha20-Poly1305 under a
//! 32-byte key that reaches the node out of band. Frame layout:
//!
//! ```text
//! | nonce (12 bytes) | ciphertext | tag (16 bytes) |
//! ```
//!
//! A fresh random nonce is drawn for every frame, so the same key can be
//! reused for the whole session in both directions.
//!
//! # Security Properties
//!
//! - Decrypt rejects any frame whose tag does not verify (wrong key, bit flip,
//!   truncation) with `CryptoError::Authentication`
//! - Key bytes are zeroized after the cipher is built and never appear in
//!   `Debug` output
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use secrecy::zeroize::Zeroizing;
use secrecy::{ExposeSecret, SecretString};

use crate::error::CryptoError;

/// Raw key length in bytes.
pub const KEY_LEN: usize = 32;

/// Nonce length prepended to every frame.
pub const NONCE_LEN: usize = 12;

/// Poly1305 tag length appended by the cipher.
pub const TAG_LEN: usize = 16;

/// The session's symmetric key, ready to seal and open frames.
#[derive(Clone)]
pub struct SessionKey {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

impl SessionKey {
    /// Load a key from base64 material. Fails fast on malformed input.
    pub fn load(material: &SecretString) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(STANDARD.decode(material.expose_secret().trim())?);
        Self::from_bytes(&bytes)
    }

    /// Build a key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let cipher = ChaCha20Poly1305::new_from_slice(bytes).map_err(|_| CryptoError::KeyLength {
            expected: KEY_LEN,
            got: bytes.len(),
        })?;
        Ok(Self { cipher })
    }

    /// Generate a fresh random key, returning it with its base64 encoding.
    pub fn generate() -> (Self, SecretString) {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        let encoded = SecretString::from(STANDARD.encode(key.as_slice()));
        (
            Self {
                cipher: ChaCha20Poly1305::new(&key),
            },
            encoded,
        )
    }

    /// Seal a plaintext into a self-contained frame body.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Seal)?;

        let mut frame = Vec::with_capacity(NONCE_LEN + sealed.len());
        frame.extend_from_slice(nonce.as_slice());
        frame.extend_from_slice(&sealed);
        Ok(frame)
    }

    /// Open a frame body produced by `encrypt`.
    pub fn decrypt(&self, frame: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if frame.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Truncated(frame.len()));
        }
        let (nonce, sealed) = frame.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Authentication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SessionKey {
        SessionKey::from_bytes(&[7u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let key = test_key();
        let payloads: [&[u8]; 4] = [b"", b"x", b"{\"mode\":\"keepalive\"}", &[0, 255, 1, 254]];
        for payload in payloads {
            let frame = key.encrypt(payload).unwrap();
            assert_eq!(key.decrypt(&frame).unwrap(), payload);
        }
    }

    #[test]
    fn test_nonce_is_fresh_per_frame() {
        let key = test_key();
        let a = key.encrypt(b"same").unwrap();
        let b = key.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_single_byte_flip_rejected() {
        let key = test_key();
        let frame = key.encrypt(b"hello").unwrap();
        for i in 0..frame.len() {
            let mut tampered = frame.clone();
            tampered[i] ^= 0x01;
            assert!(matches!(
                key.decrypt(&tampered),
                Err(CryptoError::Authentication)
            ));
        }
    }

    #[test]
    fn test_wrong_key_rejected() {
        let frame = test_key().encrypt(b"hello").unwrap();
        let other = SessionKey::from_bytes(&[8u8; KEY_LEN]).unwrap();
        assert!(matches!(other.decrypt(&frame), Err(CryptoError::Authentication)));
    }

    #[test]
    fn test_truncated_frame() {
        let key = test_key();
        assert!(matches!(key.decrypt(&[0u8; 10]), Err(CryptoError::Truncated(10))));
    }

    #[test]
    fn test_load_rejects_bad_material() {
        let not_b64 = SecretString::from("%%%".to_string());
        assert!(matches!(SessionKey::load(&not_b64), Err(CryptoError::KeyEncoding(_))));

        let short = SecretString::from(STANDARD.encode([1u8; 16]));
        assert!(matches!(
            SessionKey::load(&short),
            Err(CryptoError::KeyLength { expected: 32, got: 16 })
        ));
    }

    #[test]
    fn test_generated_key_loads() {
        let (key, material) = SessionKey::generate();
        let loaded = SessionKey::load(&material).unwrap();
        let frame = key.encrypt(b"ping").unwrap();
        assert_eq!(loaded.decrypt(&frame).unwrap(), b"ping");
    }

    #[test]
    fn test_debug_redacts() {
        assert_eq!(format!("{:?}", test_key()), "SessionKey([REDACTED])");
    }
}
