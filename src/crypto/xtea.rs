//! XTEA in ECB mode: 64-bit blocks, 128-bit key, 64 Feistel rounds.
//!
//! ECB means blocks are independent, which is weaker than a chained mode,
//! but the mode is fixed by the client and cannot change. Both directions
//! operate in place on buffers whose length is a multiple of 8; words are
//! little-endian on the wire.

use crate::error::CryptoError;

/// 128-bit key as four little-endian words, exactly as extracted from the
/// decrypted login block.
pub type XteaKey = [u32; 4];

const DELTA: u32 = 0x9E37_79B9;
const ROUNDS: u32 = 32;
const FINAL_SUM: u32 = 0xC6EF_3720; // DELTA * ROUNDS

/// Encrypt `data` in place.
pub fn encrypt(key: &XteaKey, data: &mut [u8]) -> Result<(), CryptoError> {
    if data.len() % 8 != 0 {
        return Err(CryptoError::XteaLength(data.len()));
    }

    for block in data.chunks_exact_mut(8) {
        let mut v0 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        let mut v1 = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
        let mut sum = 0u32;
        for _ in 0..ROUNDS {
            v0 = v0.wrapping_add(
                (((v1 << 4) ^ (v1 >> 5)).wrapping_add(v1))
                    ^ sum.wrapping_add(key[(sum & 3) as usize]),
            );
            sum = sum.wrapping_add(DELTA);
            v1 = v1.wrapping_add(
                (((v0 << 4) ^ (v0 >> 5)).wrapping_add(v0))
                    ^ sum.wrapping_add(key[((sum >> 11) & 3) as usize]),
            );
        }
        block[..4].copy_from_slice(&v0.to_le_bytes());
        block[4..].copy_from_slice(&v1.to_le_bytes());
    }
    Ok(())
}

/// Decrypt `data` in place.
pub fn decrypt(key: &XteaKey, data: &mut [u8]) -> Result<(), CryptoError> {
    if data.len() % 8 != 0 {
        return Err(CryptoError::XteaLength(data.len()));
    }

    for block in data.chunks_exact_mut(8) {
        let mut v0 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        let mut v1 = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
        let mut sum = FINAL_SUM;
        for _ in 0..ROUNDS {
            v1 = v1.wrapping_sub(
                (((v0 << 4) ^ (v0 >> 5)).wrapping_add(v0))
                    ^ sum.wrapping_add(key[((sum >> 11) & 3) as usize]),
            );
            sum = sum.wrapping_sub(DELTA);
            v0 = v0.wrapping_sub(
                (((v1 << 4) ^ (v1 >> 5)).wrapping_add(v1))
                    ^ sum.wrapping_add(key[(sum & 3) as usize]),
            );
        }
        block[..4].copy_from_slice(&v0.to_le_bytes());
        block[4..].copy_from_slice(&v1.to_le_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_multiple_blocks() {
        let key: XteaKey = [0x0123_4567, 0x89AB_CDEF, 0xFEDC_BA98, 0x7654_3210];
        let original: Vec<u8> = (0..64u8).collect();
        let mut data = original.clone();

        encrypt(&key, &mut data).unwrap();
        assert_ne!(data, original);
        decrypt(&key, &mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn ecb_blocks_are_independent() {
        let key: XteaKey = [1, 2, 3, 4];
        let mut data = [0xAAu8; 16];
        encrypt(&key, &mut data).unwrap();
        // Identical plaintext blocks produce identical ciphertext blocks.
        assert_eq!(&data[..8], &data[8..]);
    }

    #[test]
    fn wrong_key_does_not_decrypt() {
        let key: XteaKey = [1, 2, 3, 4];
        let wrong: XteaKey = [1, 2, 3, 5];
        let original = [0x42u8; 8];
        let mut data = original;
        encrypt(&key, &mut data).unwrap();
        decrypt(&wrong, &mut data).unwrap();
        assert_ne!(data, original);
    }

    #[test]
    fn rejects_unaligned_length() {
        let key: XteaKey = [0; 4];
        let mut data = [0u8; 7];
        assert_eq!(
            encrypt(&key, &mut data),
            Err(CryptoError::XteaLength(7))
        );
        assert_eq!(
            decrypt(&key, &mut data),
            Err(CryptoError::XteaLength(7))
        );
    }
}
