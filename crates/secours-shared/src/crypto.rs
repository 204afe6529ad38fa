//! Sealed-box encryption for direct messages.
//!
//! Uses anonymous sealed boxes (Curve25519 + XSalsa20-Poly1305): sealing
//! embeds an ephemeral sender key in the ciphertext, so no handshake is
//! needed before first contact. Sender identity is re-attached at the
//! application layer via `sender_id`.

use crypto_box::{aead::OsRng, PublicKey, SecretKey};

use crate::constants::KEY_SIZE;
use crate::error::CryptoError;

/// Decode a hex-encoded 32-byte key.
pub fn decode_key(key_hex: &str) -> Result<[u8; KEY_SIZE], CryptoError> {
    let bytes = hex::decode(key_hex).map_err(|_| CryptoError::InvalidKey)?;
    bytes.try_into().map_err(|_| CryptoError::InvalidKey)
}

/// Seal `plaintext` to the holder of `recipient_pub_hex`.
pub fn seal(recipient_pub_hex: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let public = PublicKey::from(decode_key(recipient_pub_hex)?);
    public.seal(&mut OsRng, plaintext).map_err(|_| CryptoError::SealFailed)
}

/// Open a sealed box with our secret key.
pub fn open(priv_key_hex: &str, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let secret = SecretKey::from(decode_key(priv_key_hex)?);
    secret.unseal(ciphertext).map_err(|_| CryptoError::OpenFailed)
}
