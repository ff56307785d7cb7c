//! Passphrase sealing for exported backups.
//!
//! The key is derived with Argon2id from the passphrase and a random salt;
//! the payload is sealed with ChaCha20-Poly1305.
//!
//! Layout: `MAGIC(4) || salt(16) || nonce(12) || ciphertext+tag`

use argon2::Argon2;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

use crate::error::{Result, StoreError};

const MAGIC: &[u8; 4] = b"AGB1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN + NONCE_LEN;

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| StoreError::Crypto(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

pub fn seal(plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    if passphrase.is_empty() {
        return Err(StoreError::Crypto("passphrase is empty".to_string()));
    }

    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut nonce);

    let key = derive_key(passphrase, &salt)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key)
        .map_err(|_| StoreError::Crypto("invalid key length".to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| StoreError::Crypto("encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Fails on a wrong passphrase and on any tampering.
pub fn open(sealed: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    if sealed.len() <= HEADER_LEN || !sealed.starts_with(MAGIC) {
        return Err(StoreError::Crypto("not an encrypted backup".to_string()));
    }
    let (salt, rest) = sealed[MAGIC.len()..].split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(passphrase, salt)?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key)
        .map_err(|_| StoreError::Crypto("invalid key length".to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| StoreError::Crypto("wrong passphrase or corrupted backup".to_string()))
}
