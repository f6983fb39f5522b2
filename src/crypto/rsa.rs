//! Raw RSA decryption of the login key block.
//!
//! The client encrypts a 128-byte block with the server's 1024-bit public
//! key and no padding scheme; the plaintext's structural validity is the
//! caller's problem (its first byte must be zero). Decryption goes through
//! the `hazmat` raw-modpow path, which is exactly RSA_NO_PADDING.
//!
//! The private key is loaded once at startup, before any listener binds.
//! A mutex serializes decryption so the key handle is shared safely across
//! every handshake task.

use crate::error::CryptoError;
use parking_lot::Mutex;
use rsa::hazmat::rsa_decrypt;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey};
use std::path::Path;
use zeroize::Zeroize;

/// Size in bytes of the encrypted login block: a 1024-bit modulus.
pub const RSA_BLOCK_SIZE: usize = 128;

/// Startup-loaded private key with serialized raw decryption.
pub struct RsaDecryptor {
    key: Mutex<RsaPrivateKey>,
}

impl RsaDecryptor {
    /// Load a PEM private key (PKCS#1 or PKCS#8) from `path`, typically
    /// `key.pem` next to the server binary.
    pub fn from_pem_file<P: AsRef<Path>>(path: P) -> Result<Self, CryptoError> {
        let pem = std::fs::read_to_string(path.as_ref())
            .map_err(|e| CryptoError::KeyLoad(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_pem(&pem)
    }

    /// Load a PEM private key from a string.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| CryptoError::KeyLoad(e.to_string()))?;
        Self::from_key(key)
    }

    /// Wrap an already-parsed private key.
    pub fn from_key(key: RsaPrivateKey) -> Result<Self, CryptoError> {
        if key.size() != RSA_BLOCK_SIZE {
            return Err(CryptoError::KeyLoad(format!(
                "expected a 1024-bit modulus, got {} bits",
                key.size() * 8
            )));
        }

        Ok(Self {
            key: Mutex::new(key),
        })
    }

    /// Decrypt a 128-byte block in place with no padding. The caller must
    /// verify the plaintext's leading zero byte before trusting it.
    pub fn decrypt_in_place(&self, block: &mut [u8]) -> Result<(), CryptoError> {
        if block.len() != RSA_BLOCK_SIZE {
            return Err(CryptoError::RsaBlockLength {
                expected: RSA_BLOCK_SIZE,
                got: block.len(),
            });
        }

        let ciphertext = BigUint::from_bytes_be(block);
        let plaintext = {
            let key = self.key.lock();
            if ciphertext >= *key.n() {
                return Err(CryptoError::RsaDecrypt);
            }
            rsa_decrypt(Some(&mut rand::rngs::OsRng), &*key, &ciphertext)
                .map_err(|_| CryptoError::RsaDecrypt)?
        };

        // Restore the fixed block width; the big-endian bytes of the
        // plaintext integer drop leading zeros.
        let mut bytes = plaintext.to_bytes_be();
        if bytes.len() > RSA_BLOCK_SIZE {
            bytes.zeroize();
            return Err(CryptoError::RsaDecrypt);
        }
        let offset = RSA_BLOCK_SIZE - bytes.len();
        block[..offset].fill(0);
        block[offset..].copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(())
    }
}
