//! Time-based one-time passwords for two-factor login.
//!
//! HMAC-SHA1 with a 30-second period and 6-digit codes. The login service
//! accepts the current window plus one either side to tolerate clock
//! drift. Secrets arrive as raw key bytes; any column encoding (base32 in
//! most account panels) is the account store's concern.

use hmac::{Hmac, Mac};
use sha1::Sha1;

/// Code validity window in seconds.
pub const AUTHENTICATOR_PERIOD: i64 = 30;

const DIGITS: u32 = 1_000_000;

/// 6-digit token for one time step.
pub fn generate_token(secret: &[u8], ticks: i64) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&ticks.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // RFC 4226 dynamic truncation.
    let offset = (digest[19] & 0xF) as usize;
    let code = u32::from_be_bytes([
        digest[offset] & 0x7F,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);

    format!("{:06}", code % DIGITS)
}

/// Check a submitted token against the step for `timestamp` and one step
/// either side.
pub fn verify_token(secret: &[u8], token: &str, timestamp: i64) -> bool {
    let ticks = timestamp / AUTHENTICATOR_PERIOD;
    (-1..=1).any(|skew| token == generate_token(secret, ticks + skew))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_six_digits_and_stable() {
        let token = generate_token(b"12345678901234567890", 1);
        assert_eq!(token.len(), 6);
        assert!(token.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(token, generate_token(b"12345678901234567890", 1));
    }

    #[test]
    fn adjacent_windows_are_tolerated() {
        let secret = b"worldgate-secret";
        let timestamp = 59_000_000;
        let ticks = timestamp / AUTHENTICATOR_PERIOD;

        assert!(verify_token(secret, &generate_token(secret, ticks), timestamp));
        assert!(verify_token(secret, &generate_token(secret, ticks - 1), timestamp));
        assert!(verify_token(secret, &generate_token(secret, ticks + 1), timestamp));
        assert!(!verify_token(secret, &generate_token(secret, ticks + 2), timestamp));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let timestamp = 1_700_000_000;
        let token = generate_token(b"secret-a", timestamp / AUTHENTICATOR_PERIOD);
        assert!(!verify_token(b"secret-b", &token, timestamp));
    }
}
