//! # Wire Protocol
//!
//! Translation between byte streams and discrete packets.
//!
//! Outbound frame layout, all integers little-endian:
//!
//! ```text
//! [0..2]   u16 xtea_block_count        payload length is 4 + 8 * count
//! [2..6]   u32 checksum_or_sequence    absent in the Disabled mode
//! [6..]    encrypted region: u8 padding count, payload, padding bytes
//! ```
//!
//! Inbound frames are identical; the sequence is verified against the
//! per-direction monotonic counter, the region is decrypted, and the
//! declared padding is discarded from the tail.
//!
//! The two most significant sequence bits are reserved. The high bit on a
//! server frame signals a raw-deflated payload; the second-highest is sent
//! clear and tolerated on receive (its meaning is undocumented upstream,
//! so an observation is logged for investigation).

pub mod deflate;
pub mod dispatcher;

use crate::core::output::OutputMessage;
use crate::core::packet::{NetworkMessage, NETWORK_MESSAGE_MAXSIZE};
use crate::crypto::checksum::adler32;
use crate::crypto::xtea::{self, XteaKey};
use crate::error::{FramingError, Result};
#[cfg(test)]
use crate::error::GatewayError;
use deflate::{Deflater, DEFLATE_MIN_PAYLOAD};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// High sequence bit: payload is raw-deflated.
pub const SEQUENCE_DEFLATED: u32 = 0x8000_0000;
/// Reserved second-highest bit: sent clear, tolerated on receive.
pub const SEQUENCE_RESERVED: u32 = 0x4000_0000;
/// Mask selecting the 30 counter bits.
pub const SEQUENCE_MASK: u32 = 0x3FFF_FFFF;

/// Terminal versions accepted by the handshake.
pub const CLIENT_VERSION_MIN: u16 = 1310;
pub const CLIENT_VERSION_MAX: u16 = 1340;
pub const CLIENT_VERSION_STR: &str = "13.10";

/// Integrity mode of a connection, fixed once the handshake settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMode {
    /// No checksum field. Handshake-internal; never negotiated on the wire.
    Disabled,
    /// Adler-32 over the plaintext payload.
    Adler,
    /// Monotonic per-direction sequence number, the post-handshake default.
    Sequence,
}

/// Apply framing headers to a finished payload: optional deflate, random
/// padding up to the block size, XTEA, and the checksum or sequence field.
///
/// Returns whether the payload went out compressed.
pub fn wrap_message(
    out: &mut OutputMessage,
    mode: ChecksumMode,
    sequence: u32,
    key: Option<&XteaKey>,
    deflater: &mut Deflater,
) -> Result<bool> {
    if out.is_overrun() {
        return Err(FramingError::Overrun.into());
    }

    let mut compressed = false;
    let checksum = match mode {
        ChecksumMode::Disabled => None,
        ChecksumMode::Adler => Some(adler32(out.output_buffer())),
        ChecksumMode::Sequence => {
            let mut field = sequence & SEQUENCE_MASK;
            if out.output_len() >= DEFLATE_MIN_PAYLOAD {
                if let Some(small) = deflater.deflate(out.output_buffer()) {
                    let len = small.len();
                    out.output_buffer_mut()[..len].copy_from_slice(small);
                    out.truncate_output(len);
                    field |= SEQUENCE_DEFLATED;
                    compressed = true;
                }
            }
            Some(field)
        }
    };

    let mut padding: u8 = 0;
    while (out.output_len() + 1) % 8 != 0 {
        out.put_u8(crate::crypto::random_byte());
        padding += 1;
    }
    out.add_header_u8(padding);
    if out.is_overrun() {
        return Err(FramingError::Overrun.into());
    }

    let blocks = out.output_len() / 8;
    if blocks == 0 || blocks > usize::from(u16::MAX) {
        return Err(FramingError::PayloadTooLarge.into());
    }

    if let Some(key) = key {
        xtea::encrypt(key, out.output_buffer_mut())?;
    }

    if let Some(value) = checksum {
        out.add_header_u32(value);
    }
    out.add_header_u16(blocks as u16);
    Ok(compressed)
}

/// Read one frame into `msg`, verify its sequence, decrypt, and strip the
/// padding. On success the message cursor sits on the first payload byte.
pub async fn read_frame<R: AsyncRead + Unpin>(
    rd: &mut R,
    msg: &mut NetworkMessage,
    expected_sequence: u32,
    key: Option<&XteaKey>,
) -> Result<()> {
    let mut prelude = [0u8; 2];
    rd.read_exact(&mut prelude).await?;
    let blocks = u16::from_le_bytes(prelude);
    if blocks == 0 {
        return Err(FramingError::ZeroBlockCount.into());
    }

    let packet_len = 4 + usize::from(blocks) * 8;
    if packet_len > NETWORK_MESSAGE_MAXSIZE {
        return Err(FramingError::Oversized { blocks }.into());
    }

    rd.read_exact(&mut msg.raw_mut()[..packet_len]).await?;
    msg.set_span(0, packet_len);

    let raw_sequence = msg.get_u32();
    if raw_sequence & SEQUENCE_RESERVED != 0 {
        // Meaning unknown upstream; tolerated but worth surfacing.
        debug!(sequence = raw_sequence, "reserved sequence bit observed on inbound frame");
    }
    let sequence = raw_sequence & SEQUENCE_MASK;
    let expected = expected_sequence & SEQUENCE_MASK;
    if sequence != expected {
        return Err(FramingError::SequenceSkew {
            expected,
            got: sequence,
        }
        .into());
    }

    if let Some(key) = key {
        xtea::decrypt(key, msg.remaining_buffer_mut())?;
    }

    let padding = usize::from(msg.get_u8());
    if !msg.discard_padding(padding) {
        return Err(FramingError::BadPadding.into());
    }

    Ok(())
}

/// Wrap `out` and write the finished frame to the stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    wr: &mut W,
    out: &mut OutputMessage,
    mode: ChecksumMode,
    sequence: u32,
    key: Option<&XteaKey>,
    deflater: &mut Deflater,
) -> Result<bool> {
    let compressed = wrap_message(out, mode, sequence, key, deflater)?;
    wr.write_all(out.output_buffer()).await?;
    Ok(compressed)
}
