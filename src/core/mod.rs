//! # Core Buffer Types
//!
//! Packet buffers shared by every protocol layer.
//!
//! - [`NetworkMessage`](packet::NetworkMessage): a fixed-capacity message
//!   with independent read and write cursors and saturating accessors.
//! - [`OutputMessage`](output::OutputMessage): an outbound message that
//!   reserves room for lazily-prepended framing headers, pooled through
//!   [`OutputArena`](output::OutputArena).

pub mod output;
pub mod packet;
