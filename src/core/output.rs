//! # Output Messages
//!
//! Outbound buffers that leave room for lazily-prepended framing headers.
//!
//! The logical payload of an [`OutputMessage`] starts at offset
//! [`MAX_HEADER_SIZE`]; each `add_header_*` call moves the start cursor
//! backwards. The layout the room accounts for:
//!
//! ```text
//! PLAINTEXT:
//!     0 .. 2 => u16 XTEA block count
//!     2 .. 6 => u32 checksum or sequence number
//! ENCRYPTED:
//!     6 .. 7 => u8 padding count
//!     7 ..   => payload + padding
//! ```
//!
//! Messages are pooled through [`OutputArena`], a lock-free bounded free
//! list. Dropping a message returns its buffer to the arena; once the
//! arena is full the buffer is simply freed.

use crate::core::packet::{NetworkMessage, MAX_HEADER_SIZE};
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;

/// Free-list capacity. Oversubscription falls back to heap allocation.
const ARENA_CAPACITY: usize = 2048;

pub(crate) struct OutputBuf {
    pub(crate) msg: NetworkMessage,
    pub(crate) start: usize,
}

impl OutputBuf {
    fn new() -> Box<Self> {
        let mut buf = Box::new(OutputBuf {
            msg: NetworkMessage::new(),
            start: MAX_HEADER_SIZE,
        });
        buf.reset();
        buf
    }

    fn reset(&mut self) {
        self.start = MAX_HEADER_SIZE;
        self.msg.set_span(MAX_HEADER_SIZE, MAX_HEADER_SIZE);
    }
}

/// Bounded lock-free pool of output buffers.
pub struct OutputArena {
    slots: ArrayQueue<Box<OutputBuf>>,
}

impl OutputArena {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: ArrayQueue::new(ARENA_CAPACITY),
        })
    }

    /// Take a pooled buffer, or allocate when the pool is dry.
    pub fn acquire(self: &Arc<Self>) -> OutputMessage {
        let mut buf = self.slots.pop().unwrap_or_else(OutputBuf::new);
        buf.reset();
        OutputMessage {
            buf: Some(buf),
            arena: Arc::clone(self),
        }
    }

    fn recycle(&self, buf: Box<OutputBuf>) {
        // Push failure means the pool is full; drop the buffer instead.
        let _ = self.slots.push(buf);
    }

    #[cfg(test)]
    pub(crate) fn pooled(&self) -> usize {
        self.slots.len()
    }
}

/// A pooled outbound message. Returns its buffer to the arena on drop.
pub struct OutputMessage {
    buf: Option<Box<OutputBuf>>,
    arena: Arc<OutputArena>,
}

impl Drop for OutputMessage {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.arena.recycle(buf);
        }
    }
}

impl OutputMessage {
    fn buf(&self) -> &OutputBuf {
        self.buf.as_ref().expect("output buffer present until drop")
    }

    fn buf_mut(&mut self) -> &mut OutputBuf {
        self.buf.as_mut().expect("output buffer present until drop")
    }

    /// Length of the payload plus any headers prepended so far.
    pub fn output_len(&self) -> usize {
        let buf = self.buf();
        debug_assert!(buf.msg.written_len() == 0 || buf.msg.written_len() >= buf.start);
        if buf.msg.is_overrun() {
            0
        } else {
            buf.msg.written_len() - buf.start
        }
    }

    pub fn output_buffer(&self) -> &[u8] {
        let buf = self.buf();
        if buf.msg.is_overrun() {
            return &[];
        }
        &buf.msg.written_buffer()[buf.start..]
    }

    pub fn output_buffer_mut(&mut self) -> &mut [u8] {
        let start = self.buf().start;
        let end = start + self.output_len();
        &mut self.buf_mut().msg.raw_mut()[start..end]
    }

    pub fn is_overrun(&self) -> bool {
        self.buf().msg.is_overrun()
    }

    pub fn can_add(&self, n: usize) -> bool {
        self.buf().msg.can_add(n)
    }

    /// Prepend a header byte in front of the current start cursor.
    /// The start cursor must never move past the front of the buffer.
    pub fn add_header_u8(&mut self, value: u8) {
        let buf = self.buf_mut();
        assert!(buf.start >= 1, "output header room exhausted");
        buf.start -= 1;
        buf.msg.raw_mut()[buf.start] = value;
    }

    pub fn add_header_u16(&mut self, value: u16) {
        let buf = self.buf_mut();
        assert!(buf.start >= 2, "output header room exhausted");
        buf.start -= 2;
        buf.msg.raw_mut()[buf.start..buf.start + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn add_header_u32(&mut self, value: u32) {
        let buf = self.buf_mut();
        assert!(buf.start >= 4, "output header room exhausted");
        buf.start -= 4;
        buf.msg.raw_mut()[buf.start..buf.start + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Shrink the payload to `len` bytes (after in-place compression).
    pub(crate) fn truncate_output(&mut self, len: usize) {
        let buf = self.buf_mut();
        debug_assert!(len <= buf.msg.written_len() - buf.start);
        let start = buf.start;
        buf.msg.set_span(start, start + len);
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf_mut().msg.put_u8(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf_mut().msg.put_u16(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf_mut().msg.put_u32(value);
    }

    pub fn put_string(&mut self, value: &str) {
        self.buf_mut().msg.put_string(value);
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf_mut().msg.put_bytes(bytes);
    }

    /// Append the written region of a finished message.
    pub fn append(&mut self, msg: &NetworkMessage) {
        if !msg.is_overrun() {
            self.put_bytes(msg.written_buffer());
        }
    }
}
