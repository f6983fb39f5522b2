//! # Cryptography
//!
//! In-band cryptography for the wire protocol.
//!
//! - [`xtea`]: the payload block cipher, matching the client bit-for-bit.
//! - [`rsa`]: raw no-padding decryption of the 128-byte login key block.
//! - [`checksum`]: Adler-32, the legacy payload integrity mode.
//! - [`totp`]: time-based one-time passwords for the login service.
//!
//! Randomness comes from the OS entropy source.

pub mod checksum;
pub mod rsa;
pub mod totp;
pub mod xtea;

use rand::rngs::OsRng;
use rand::RngCore;

/// Fill `out` with cryptographically secure random bytes.
pub fn fill_random(out: &mut [u8]) {
    OsRng.fill_bytes(out);
}

/// One cryptographically secure random byte.
pub fn random_byte() -> u8 {
    let mut byte = [0u8; 1];
    OsRng.fill_bytes(&mut byte);
    byte[0]
}
