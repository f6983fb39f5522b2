//! # Error Types
//!
//! Error handling for the gateway.
//!
//! Every fault that can terminate a connection is represented here, from
//! low-level I/O failures to framing and cryptographic violations. Fatal
//! errors never propagate past the per-connection loops; they are logged
//! with the peer address and abort that connection alone. Acceptor errors
//! are the exception: they bubble out of the service future and stop the
//! process.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Logged when a peer exceeds the per-connection receive rate cap.
    pub const ERR_PACKET_RATE: &str = "exceeded packet per second limit";

    /// Login refusals sent to the client verbatim.
    pub const ERR_MALFORMED_SESSION: &str = "Malformed session data.";
    pub const ERR_BAD_SESSION: &str = "Account name or password is not correct.";
    pub const ERR_SESSION_IP_LOCK: &str =
        "Your game session is already locked to a different IP. Please log in again.";
    pub const ERR_CHARACTER_LOAD: &str = "Your character could not be loaded.";
    pub const ERR_NAMELOCKED: &str = "Your character has been namelocked.";
    pub const ERR_STARTING_UP: &str = "Gameworld is starting up. Please wait.";
    pub const ERR_MAINTENANCE: &str =
        "Gameworld is under maintenance. Please re-connect in a while.";
    pub const ERR_CLOSING: &str = "The game is just going down.\nPlease try again later.";
    pub const ERR_CLOSED: &str = "Server is currently closed.\nPlease try again later.";
    pub const ERR_ONE_PER_ACCOUNT: &str =
        "You may only login with one character\nof your account at the same time.";
    pub const ERR_ALREADY_LOGGED_IN: &str = "You are already logged in.";
    pub const ERR_TEMPLE_POSITION: &str =
        "Temple position is wrong. Contact the administrator.";

    /// HTTP login service error bodies.
    pub const ERR_HTTP_INVALID_REQUEST: &str = "Invalid request.";
    pub const ERR_HTTP_INVALID_TYPE: &str = "Invalid request type.";
    pub const ERR_HTTP_BAD_CREDENTIALS: &str = "Email address or password is not correct.";
    pub const ERR_HTTP_TOKEN_REQUIRED: &str = "Two-factor token required for authentication.";
    pub const ERR_HTTP_INTERNAL: &str = "Internal error.";
}

/// Wire framing violations. Any of these aborts the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("frame declares zero XTEA blocks")]
    ZeroBlockCount,

    #[error("frame of {blocks} XTEA blocks exceeds buffer capacity")]
    Oversized { blocks: u16 },

    #[error("sequence skew: expected {expected}, got {got}")]
    SequenceSkew { expected: u32, got: u32 },

    #[error("padding count exceeds decrypted length")]
    BadPadding,

    #[error("message cursor overran the buffer")]
    Overrun,

    #[error("payload does not fit a framed packet")]
    PayloadTooLarge,
}

/// Cryptographic faults. Any of these aborts the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("RSA block length mismatch (expected {expected}, got {got})")]
    RsaBlockLength { expected: usize, got: usize },

    #[error("RSA decryption failed")]
    RsaDecrypt,

    #[error("RSA plaintext does not begin with a zero byte")]
    RsaLeadingByte,

    #[error("XTEA buffer length {0} is not a multiple of 8")]
    XteaLength(usize),

    #[error("failed to load RSA private key: {0}")]
    KeyLoad(String),
}

/// Primary error type for gateway operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("{0} deadline exceeded")]
    DeadlineExceeded(&'static str),

    #[error("packet rate limit exceeded")]
    RateLimited,

    #[error("handshake rejected: {0}")]
    Handshake(&'static str),

    #[error("game thread is gone")]
    GameThreadClosed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("malformed HTTP request: {0}")]
    Http(&'static str),

    #[error("account store error: {0}")]
    Store(#[from] StoreError),
}

/// Failure reported by an [`AccountStore`](crate::game::AccountStore)
/// implementation. Maps to the DownstreamError disposition: HTTP requests
/// answer with `errorCode: 2`, game logins with a login-error packet.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        StoreError(message.into())
    }
}

/// Type alias for Results using GatewayError.
pub type Result<T> = std::result::Result<T, GatewayError>;
