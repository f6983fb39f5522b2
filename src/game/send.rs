//! # Connection-Owned Outbound Packets
//!
//! The handful of server packets the front-end itself produces: login
//! refusals, wait-list notices, session lifecycle markers, and pings.
//! Everything else the client sees is built by the game layer and handed
//! over as opaque payloads through [`Connection::enqueue_output`].
//!
//! All of these run on the game-logic thread.

use crate::core::packet::NetworkMessage;
use crate::game::{Direction, SessionEndReason};
use crate::service::game::{Connection, ConnectionState};

/// Refuse a login and schedule a graceful close behind the packet.
pub fn login_error(connection: &Connection, message: &str) {
    let mut msg = NetworkMessage::new();
    msg.put_u8(0x14);
    msg.put_string(message);
    connection.enqueue_output(&msg);
    connection.resolve_login(ConnectionState::Close);
}

/// Tell an overload-refused client its place in line and when to retry.
pub fn login_wait_list(connection: &Connection, slot: u32, retry_seconds: u32) {
    let mut msg = NetworkMessage::new();
    msg.put_u8(0x16);
    msg.put_string(&format!(
        "Too many players online.\nYou are at place {slot} on the waiting list."
    ));
    msg.put_u8(retry_seconds.min(u32::from(u8::MAX)) as u8);
    connection.enqueue_output(&msg);
    connection.resolve_login(ConnectionState::Close);
}

pub fn session_end(connection: &Connection, reason: SessionEndReason) {
    let mut msg = NetworkMessage::new();
    msg.put_u8(0x18);
    msg.put_u8(reason as u8);
    connection.enqueue_output(&msg);
}

pub fn pending_state(connection: &Connection) {
    let mut msg = NetworkMessage::new();
    msg.put_u8(0x0A);
    connection.enqueue_output(&msg);
}

pub fn enter_world(connection: &Connection) {
    let mut msg = NetworkMessage::new();
    msg.put_u8(0x0F);
    connection.enqueue_output(&msg);
}

pub fn ping(connection: &Connection) {
    let mut msg = NetworkMessage::new();
    msg.put_u8(0x1D);
    connection.enqueue_output(&msg);
}

pub fn ping_back(connection: &Connection) {
    let mut msg = NetworkMessage::new();
    msg.put_u8(0x1E);
    connection.enqueue_output(&msg);
}

/// Abort a client-side walk; carries the direction the player is actually
/// facing so the client can resync.
pub fn cancel_walk(connection: &Connection, facing: Direction) {
    let mut msg = NetworkMessage::new();
    msg.put_u8(0xB5);
    msg.put_u8(facing.client_byte());
    connection.enqueue_output(&msg);
}

/// Opens the extended-opcode side channel for OTClient-style terminals.
pub fn enable_extended_opcode(connection: &Connection) {
    let mut msg = NetworkMessage::new();
    msg.put_u8(0x32);
    msg.put_u8(0x00);
    msg.put_u16(0x00);
    connection.enqueue_output(&msg);
}
