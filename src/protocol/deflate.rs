//! Raw-deflate helpers for large server frames.
//!
//! The wire uses a raw deflate stream (window −15, level 6) with no zlib
//! header. Compression is only kept when the result is strictly smaller
//! than the input; high-entropy payloads go out uncompressed. Each
//! connection keeps one [`Deflater`] so the underlying stream state is
//! allocated once.

use crate::core::packet::NETWORK_MESSAGE_MAXSIZE;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use tracing::warn;

/// Smallest payload worth attempting to compress.
pub const DEFLATE_MIN_PAYLOAD: usize = 128;

/// Per-connection deflate stream with a reusable scratch buffer.
pub struct Deflater {
    stream: Compress,
    scratch: Box<[u8; NETWORK_MESSAGE_MAXSIZE]>,
}

impl Default for Deflater {
    fn default() -> Self {
        Self::new()
    }
}

impl Deflater {
    pub fn new() -> Self {
        Self {
            // `false` selects a raw stream with no zlib header.
            stream: Compress::new(Compression::new(6), false),
            scratch: Box::new([0u8; NETWORK_MESSAGE_MAXSIZE]),
        }
    }

    /// Compress `data`, returning the result only when strictly smaller.
    pub fn deflate(&mut self, data: &[u8]) -> Option<&[u8]> {
        if data.is_empty() {
            warn!("refusing to compress an empty payload");
            return None;
        }

        self.stream.reset();
        let status = match self
            .stream
            .compress(data, &mut self.scratch[..], FlushCompress::Finish)
        {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "deflate failed");
                return None;
            }
        };

        // Ok instead of StreamEnd means the scratch buffer was too small,
        // which already implies the compressed form is not worth keeping.
        if status != Status::StreamEnd {
            return None;
        }

        let compressed = self.stream.total_out() as usize;
        if compressed >= data.len() {
            return None;
        }
        Some(&self.scratch[..compressed])
    }
}

/// Inflate a raw-deflate stream, bounded by the frame buffer size.
pub fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut stream = Decompress::new(false);
    let mut out = vec![0u8; NETWORK_MESSAGE_MAXSIZE];
    match stream.decompress(data, &mut out, FlushDecompress::Finish) {
        Ok(Status::StreamEnd) => {
            out.truncate(stream.total_out() as usize);
            Some(out)
        }
        _ => None,
    }
}
