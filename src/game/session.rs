//! # Login Resolution
//!
//! Runs on the game-logic thread once the handshake has posted a session
//! handoff. Applies every admission gate in order: client version, world
//! state, IP ban, session token and IP lock, namelock, clone and
//! one-per-account rules, account ban, and finally the wait list. Each
//! refusal sends its packet and resolves the connection to CLOSE; success
//! attaches the player and resolves to OK.

use crate::error::constants;
use crate::game::send;
use crate::game::thread::GameState;
use crate::game::{BanRecord, GameWorld, PlayerId, WorldState};
use crate::protocol::{CLIENT_VERSION_MAX, CLIENT_VERSION_MIN, CLIENT_VERSION_STR};
use crate::service::game::{Connection, ConnectionState};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Terminal kinds at or above this value are OTClient-style and get the
/// extended-opcode channel enabled after login.
pub const TERMINAL_OTCLIENT_LINUX: u16 = 10;

struct WaitEntry {
    deadline: Instant,
    guid: u32,
    premium: bool,
}

/// FIFO admission queue consulted when the world is full.
///
/// Holds at most one entry per character; expired entries are purged from
/// the head before every decision and skipped elsewhere.
pub struct WaitList {
    entries: VecDeque<WaitEntry>,
}

impl Default for WaitList {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitList {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Compute the wait slot for a login attempt. `None` admits the
    /// player (their entry, if any, is removed); `Some((slot, retry))`
    /// refreshes or inserts an entry expiring `retry + 15` seconds out.
    pub fn slot_for(
        &mut self,
        guid: u32,
        premium: bool,
        bypass: bool,
        players_online: u32,
        max_players: u32,
        now: Instant,
    ) -> Option<(u32, u32)> {
        if bypass {
            return None;
        }

        let free_slots = i64::from(max_players) - i64::from(players_online);
        if max_players == 0 || (self.entries.is_empty() && free_slots > 0) {
            return None;
        }

        while self
            .entries
            .front()
            .is_some_and(|entry| entry.deadline <= now)
        {
            self.entries.pop_front();
        }

        let mut premium_ahead: u32 = 0;
        let mut free_ahead: u32 = 0;
        let mut own_index = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.deadline <= now {
                continue;
            }
            if entry.guid == guid {
                own_index = Some(index);
                break;
            }
            if entry.premium {
                premium_ahead += 1;
            } else {
                free_ahead += 1;
            }
        }

        let mut slot = premium_ahead + 1;
        if !premium {
            slot += free_ahead;
        }

        let retry = (((slot / 5) + 1) * 5).min(60);

        if i64::from(slot) <= free_slots {
            if let Some(index) = own_index {
                self.entries.remove(index);
            }
            return None;
        }

        let deadline = now + Duration::from_secs(u64::from(retry) + 15);
        match own_index {
            Some(index) => self.entries[index].deadline = deadline,
            None => self.entries.push_back(WaitEntry {
                deadline,
                guid,
                premium,
            }),
        }
        Some((slot, retry))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn format_ban_date(expires_at: i64) -> String {
    // Short date without pulling in a calendar dependency; operators see
    // the same value they stored.
    format!("timestamp {expires_at}")
}

fn ip_ban_message(ban: &BanRecord) -> String {
    format!(
        "Your IP has been banned until {} by {}.\n\nReason specified:\n{}",
        format_ban_date(ban.expires_at),
        ban.banned_by,
        ban.reason
    )
}

fn account_ban_message(ban: &BanRecord) -> String {
    if ban.expires_at > 0 {
        format!(
            "Your account has been banned until {} by {}.\n\nReason specified:\n{}",
            format_ban_date(ban.expires_at),
            ban.banned_by,
            ban.reason
        )
    } else {
        format!(
            "Your account has been permanently banned by {}.\n\nReason specified:\n{}",
            ban.banned_by, ban.reason
        )
    }
}

/// Null the player/connection back-references and release the world's
/// share. Safe to call repeatedly; runs only on the game thread so both
/// sides change under one critical section.
pub fn detach(world: &mut dyn GameWorld, connection: &Arc<Connection>) {
    connection.transition(ConnectionState::Ok, ConnectionState::Close);
    if let Some(player) = connection.take_player() {
        world.release_player(player);
    }
}

/// Resolve a handshake's session handoff.
///
/// The client-declared gamemaster flag is carried for completeness but
/// trust comes from the account store, not the client.
pub fn perform_login(
    state: &mut GameState,
    connection: &Arc<Connection>,
    _client_gamemaster: bool,
    session_token: Vec<u8>,
    character_name: String,
) {
    if session_token.is_empty() || character_name.is_empty() {
        send::login_error(connection, constants::ERR_MALFORMED_SESSION);
        return;
    }

    let terminal = connection.terminal();
    if terminal.version < CLIENT_VERSION_MIN || terminal.version > CLIENT_VERSION_MAX {
        send::login_error(
            connection,
            &format!("Only clients with protocol {CLIENT_VERSION_STR} allowed!"),
        );
        return;
    }

    match state.world.world_state() {
        WorldState::Startup => {
            send::login_error(connection, constants::ERR_STARTING_UP);
            return;
        }
        WorldState::Maintain => {
            send::login_error(connection, constants::ERR_MAINTENANCE);
            return;
        }
        _ => {}
    }

    let peer_ip = connection.peer_ip();
    match state.store.ip_ban(peer_ip) {
        Ok(Some(ban)) => {
            send::login_error(connection, &ip_ban_message(&ban));
            return;
        }
        Ok(None) => {}
        Err(e) => {
            warn!(peer = %peer_ip, error = %e, "ip ban lookup failed");
            send::login_error(connection, constants::ERR_HTTP_INTERNAL);
            return;
        }
    }

    let session = match state.store.load_session(&session_token, &character_name) {
        Ok(Some(session)) if session.account_id != 0 => session,
        Ok(_) => {
            send::login_error(connection, constants::ERR_BAD_SESSION);
            return;
        }
        Err(e) => {
            warn!(peer = %peer_ip, error = %e, "session lookup failed");
            send::login_error(connection, constants::ERR_HTTP_INTERNAL);
            return;
        }
    };

    if session.ip != peer_ip {
        send::login_error(connection, constants::ERR_SESSION_IP_LOCK);
        return;
    }

    let guid = session.character_id;
    if state.world.player_by_guid(guid).is_some() && !state.config().allow_clones {
        send::login_error(connection, constants::ERR_ALREADY_LOGGED_IN);
        return;
    }

    let Some(preview) = state.world.preload_player(guid) else {
        send::login_error(connection, constants::ERR_CHARACTER_LOAD);
        return;
    };

    match state.store.is_namelocked(guid) {
        Ok(true) => {
            send::login_error(connection, constants::ERR_NAMELOCKED);
            return;
        }
        Ok(false) => {}
        Err(e) => {
            warn!(peer = %peer_ip, error = %e, "namelock lookup failed");
            send::login_error(connection, constants::ERR_HTTP_INTERNAL);
            return;
        }
    }

    match state.world.world_state() {
        WorldState::Closing if !preview.can_always_login => {
            send::login_error(connection, constants::ERR_CLOSING);
            return;
        }
        WorldState::Closed if !preview.can_always_login => {
            send::login_error(connection, constants::ERR_CLOSED);
            return;
        }
        _ => {}
    }

    if state.config().one_player_per_account
        && !preview.gamemaster
        && state.world.player_by_account(preview.account_id).is_some()
    {
        send::login_error(connection, constants::ERR_ONE_PER_ACCOUNT);
        return;
    }

    if !preview.cannot_be_banned {
        match state.store.account_ban(preview.account_id) {
            Ok(Some(ban)) => {
                send::login_error(connection, &account_ban_message(&ban));
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(peer = %peer_ip, error = %e, "account ban lookup failed");
                send::login_error(connection, constants::ERR_HTTP_INTERNAL);
                return;
            }
        }
    }

    let premium = preview.premium || state.config().free_premium;
    let bypass = preview.can_always_login || preview.gamemaster;
    let players_online = state.world.player_count();
    let max_players = state.config().max_players;
    if let Some((slot, retry)) =
        state
            .wait_list
            .slot_for(guid, premium, bypass, players_online, max_players, Instant::now())
    {
        debug!(peer = %peer_ip, guid, slot, retry, "login deferred to wait list");
        send::login_wait_list(connection, slot, retry);
        return;
    }

    let Some(player) = state.world.load_player(guid) else {
        send::login_error(connection, constants::ERR_CHARACTER_LOAD);
        return;
    };

    if !place_player(state.world.as_mut(), player) {
        state.world.release_player(player);
        send::login_error(connection, constants::ERR_TEMPLE_POSITION);
        return;
    }

    connection.attach_player(player);
    state.world.on_player_attach(connection, player);

    if terminal.kind >= TERMINAL_OTCLIENT_LINUX {
        send::enable_extended_opcode(connection);
    }

    info!(peer = %peer_ip, guid, "player logged in");
    connection.resolve_login(ConnectionState::Ok);
}

fn place_player(world: &mut dyn GameWorld, player: PlayerId) -> bool {
    let login_pos = world.login_position(player);
    if world.place_creature(player, login_pos, false) {
        return true;
    }
    let temple = world.temple_position(player);
    world.place_creature(player, temple, true)
}
