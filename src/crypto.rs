//! Key exchange and payload encryption.
//!
//! A peer that wants an encrypted session sends its X25519 public key. The
//! relay answers with a fresh AES-128 key sealed to that public key:
//!
//! 1. Generate an ephemeral X25519 key pair
//! 2. ECDH with the peer's public key, then HKDF-SHA256
//! 3. Seal the AES key with ChaCha20Poly1305
//!
//! Chat payloads are then transformed with the AES key, zero-padded to the
//! block size.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt};
use aes::Aes128;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

/// HKDF info string for sealing session keys.
const HKDF_INFO: &[u8] = b"PAIRCHAT-SESSION-KEY";

/// Length of an X25519 public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Nonce size for ChaCha20Poly1305.
const NONCE_SIZE: usize = 12;

/// AES-128 key length.
pub const SYMMETRIC_KEY_SIZE: usize = 16;

/// AES block length.
pub const BLOCK_SIZE: usize = 16;

/// Errors that can occur during key exchange or payload encryption.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid public key: expected {} bytes, got {0}", PUBLIC_KEY_SIZE)]
    InvalidPublicKey(usize),

    #[error("sealed key too short")]
    SealedTooShort,

    #[error("sealing failed: {0}")]
    SealFailed(String),

    #[error("opening sealed key failed: {0}")]
    OpenFailed(String),

    #[error("invalid symmetric key length: {0}")]
    InvalidKeyLength(usize),

    #[error("ciphertext length {0} is not a multiple of the block size")]
    InvalidCiphertextLength(usize),

    #[error("key derivation failed")]
    KeyDerivationFailed,
}

fn derive_key(shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; 32];
    hk.expand(HKDF_INFO, &mut key)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(key)
}

/// Asymmetric key pair held by the side requesting a key exchange.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public key as sent on the wire.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// Recover a symmetric key sealed to this key pair.
    pub fn open(&self, sealed: &[u8]) -> Result<SymmetricKey, CryptoError> {
        if sealed.len() < PUBLIC_KEY_SIZE + NONCE_SIZE {
            return Err(CryptoError::SealedTooShort);
        }
        let mut ephemeral = [0u8; PUBLIC_KEY_SIZE];
        ephemeral.copy_from_slice(&sealed[..PUBLIC_KEY_SIZE]);
        let nonce = Nonce::from_slice(&sealed[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + NONCE_SIZE]);
        let ciphertext = &sealed[PUBLIC_KEY_SIZE + NONCE_SIZE..];

        let shared = self.secret.diffie_hellman(&PublicKey::from(ephemeral));
        let key = derive_key(shared.as_bytes())?;
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| CryptoError::OpenFailed(e.to_string()))?;
        let plain = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CryptoError::OpenFailed(e.to_string()))?;

        SymmetricKey::from_slice(&plain)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public.as_bytes())
            .finish_non_exhaustive()
    }
}

/// Seal `key` to the peer's raw public key.
///
/// Output format: ephemeral public (32) || nonce (12) || ciphertext.
pub fn seal_key(key: &SymmetricKey, recipient: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let recipient: [u8; PUBLIC_KEY_SIZE] = recipient
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey(recipient.len()))?;
    let recipient = PublicKey::from(recipient);

    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral_secret);
    let shared = ephemeral_secret.diffie_hellman(&recipient);
    let derived = derive_key(shared.as_bytes())?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = ChaCha20Poly1305::new_from_slice(&derived)
        .map_err(|e| CryptoError::SealFailed(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), key.as_bytes().as_slice())
        .map_err(|e| CryptoError::SealFailed(e.to_string()))?;

    let mut sealed = Vec::with_capacity(PUBLIC_KEY_SIZE + NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(ephemeral_public.as_bytes());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// AES-128 key shared between one peer and its relay-side companion.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    /// Generate a random key.
    pub fn generate() -> Self {
        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Build a key from raw bytes of exactly the key length.
    pub fn from_slice(raw: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; SYMMETRIC_KEY_SIZE] = raw
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(raw.len()))?;
        Ok(Self(key))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }

    fn cipher(&self) -> Aes128 {
        Aes128::new(GenericArray::from_slice(&self.0))
    }

    /// Zero-pad to the next block boundary (always at least one byte) and
    /// encrypt block by block.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let padded_len = BLOCK_SIZE * (plaintext.len() / BLOCK_SIZE + 1);
        let mut buf = plaintext.to_vec();
        buf.resize(padded_len, 0);

        let cipher = self.cipher();
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        buf
    }

    /// Decrypt block by block and strip trailing zero padding.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::InvalidCiphertextLength(ciphertext.len()));
        }

        let mut buf = ciphertext.to_vec();
        let cipher = self.cipher();
        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }

        let end = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        buf.truncate(end);
        Ok(buf)
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Encryption state of one end of a connection.
#[derive(Debug, Default)]
pub enum CryptoChannel {
    /// No key exchange requested.
    #[default]
    None,
    /// Key exchange requested, waiting for the sealed key.
    Pending(KeyPair),
    /// Symmetric key negotiated.
    Established(SymmetricKey),
}

impl CryptoChannel {
    /// Whether any key exchange has started on this channel.
    pub fn is_none(&self) -> bool {
        matches!(self, CryptoChannel::None)
    }

    /// The negotiated key, once established.
    pub fn key(&self) -> Option<&SymmetricKey> {
        match self {
            CryptoChannel::Established(key) => Some(key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let pair = KeyPair::generate();
        let key = SymmetricKey::generate();

        let sealed = seal_key(&key, &pair.public_bytes()).unwrap();
        let opened = pair.open(&sealed).unwrap();
        assert_eq!(opened, key);
    }

    #[test]
    fn test_open_with_wrong_pair_fails() {
        let pair = KeyPair::generate();
        let other = KeyPair::generate();
        let sealed = seal_key(&SymmetricKey::generate(), &pair.public_bytes()).unwrap();

        assert!(other.open(&sealed).is_err());
        assert!(matches!(pair.open(&sealed[..20]), Err(CryptoError::SealedTooShort)));
    }

    #[test]
    fn test_seal_rejects_bad_public_key() {
        let result = seal_key(&SymmetricKey::generate(), b"not a key");
        assert!(matches!(result, Err(CryptoError::InvalidPublicKey(9))));
    }

    #[test]
    fn test_padding_lengths() {
        let key = SymmetricKey::generate();
        assert_eq!(key.encrypt(b"").len(), 16);
        assert_eq!(key.encrypt(b"hello").len(), 16);
        assert_eq!(key.encrypt(&[1u8; 15]).len(), 16);
        assert_eq!(key.encrypt(&[1u8; 16]).len(), 32);
    }

    #[test]
    fn test_decrypt_strips_padding() {
        let key = SymmetricKey::generate();
        let ciphertext = key.encrypt(b"hello");
        assert_ne!(&ciphertext[..5], b"hello");
        assert_eq!(key.decrypt(&ciphertext).unwrap(), b"hello");

        let other = SymmetricKey::generate();
        assert_ne!(other.decrypt(&ciphertext).unwrap(), b"hello");
    }

    #[test]
    fn test_decrypt_rejects_partial_block() {
        let key = SymmetricKey::generate();
        assert!(matches!(
            key.decrypt(&[0u8; 17]),
            Err(CryptoError::InvalidCiphertextLength(17))
        ));
    }
}
