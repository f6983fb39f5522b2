//! # Game Interfaces
//!
//! The seams between the protocol front-end and its collaborators.
//!
//! [`GameWorld`] is the simulation: the front-end decodes client commands
//! into calls on it and notifies it about attach/detach. [`AccountStore`]
//! is persistent storage: accounts, characters, bans, and the one-shot
//! session rows minted by the login service. Both are driven through
//! trait objects so tests can observe every interaction.
//!
//! All `GameWorld` calls happen on the game-logic thread
//! ([`thread::GameHandle`]); `AccountStore` calls may block inline, which
//! mirrors how the server has always done its database access.

pub mod send;
pub mod session;
pub mod thread;

#[cfg(test)]
pub(crate) mod tests_support;

use crate::error::StoreError;
use crate::service::game::Connection;
use std::net::IpAddr;
use std::sync::Arc;

pub type PlayerId = u32;

/// Map coordinates as carried on the wire: `{u16 x, u16 y, u8 z}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub x: u16,
    pub y: u16,
    pub z: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    East,
    South,
    West,
    NorthEast,
    SouthEast,
    SouthWest,
    NorthWest,
}

impl Direction {
    /// Direction byte used in server packets.
    pub fn client_byte(self) -> u8 {
        match self {
            Direction::North => 0,
            Direction::East => 1,
            Direction::South => 2,
            Direction::West => 3,
            Direction::SouthWest => 4,
            Direction::SouthEast => 5,
            Direction::NorthWest => 6,
            Direction::NorthEast => 7,
        }
    }

    /// Autowalk path step encoding. Zero and anything above 8 are skipped.
    pub fn from_walk_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Direction::East),
            2 => Some(Direction::NorthEast),
            3 => Some(Direction::North),
            4 => Some(Direction::NorthWest),
            5 => Some(Direction::West),
            6 => Some(Direction::SouthWest),
            7 => Some(Direction::South),
            8 => Some(Direction::SouthEast),
            _ => None,
        }
    }
}

/// Raw speak class byte. The front-end only needs to know which classes
/// carry a receiver name or a channel id; everything else is the world's
/// business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeakClass(pub u8);

impl SpeakClass {
    pub const SAY: SpeakClass = SpeakClass(1);
    pub const WHISPER: SpeakClass = SpeakClass(2);
    pub const YELL: SpeakClass = SpeakClass(3);
    pub const PRIVATE_TO: SpeakClass = SpeakClass(5);
    pub const CHANNEL_YELLOW: SpeakClass = SpeakClass(7);
    pub const CHANNEL_ORANGE: SpeakClass = SpeakClass(8);
    pub const PRIVATE_RED_TO: SpeakClass = SpeakClass(10);
    pub const CHANNEL_RED: SpeakClass = SpeakClass(13);

    pub fn carries_receiver(self) -> bool {
        self == Self::PRIVATE_TO || self == Self::PRIVATE_RED_TO
    }

    pub fn carries_channel(self) -> bool {
        self == Self::CHANNEL_YELLOW || self == Self::CHANNEL_RED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FightMode {
    Attack,
    Balanced,
    Defense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FightModes {
    pub fight: FightMode,
    pub chase: bool,
    pub secure: bool,
}

/// Outfit selection as decoded from set-outfit and podium commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outfit {
    pub look_type: u16,
    pub head: u8,
    pub body: u8,
    pub legs: u8,
    pub feet: u8,
    pub addons: u8,
    pub mount: u16,
    pub mount_head: u8,
    pub mount_body: u8,
    pub mount_legs: u8,
    pub mount_feet: u8,
}

/// Rule violation report categories that carry extra fields.
pub const REPORT_TYPE_NAME: u8 = 0;
pub const REPORT_TYPE_STATEMENT: u8 = 1;

/// Market browse verbs that address the player's own data.
pub const MARKET_BROWSE_OWN_OFFERS: u8 = 3;
pub const MARKET_BROWSE_OWN_HISTORY: u8 = 4;

/// Reason byte of the session-end packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    Logout = 0,
    Unknown = 1,
    ForceClose = 2,
    Unknown2 = 3,
}

/// Coarse world lifecycle, gating logins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldState {
    Startup,
    Open,
    Closing,
    Closed,
    Maintain,
    Shutdown,
}

/// Account-level facts needed before a character is fully loaded.
#[derive(Debug, Clone, Default)]
pub struct PlayerPreview {
    pub account_id: u32,
    pub gamemaster: bool,
    pub premium: bool,
    pub can_always_login: bool,
    pub cannot_be_banned: bool,
}

/// One-shot session row minted by the login service and consumed by the
/// game handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub account_id: u32,
    pub character_id: u32,
    pub ip: IpAddr,
}

#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub id: u32,
    /// Raw SHA-1 digest of the password (the hex column, decoded).
    pub password_sha1: Vec<u8>,
    /// Raw TOTP key bytes; `None` disables two-factor for the account.
    pub totp_secret: Option<Vec<u8>>,
    /// Unix timestamp; premium while >= now.
    pub premium_ends_at: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CharacterRecord {
    pub world_id: u32,
    pub name: String,
    pub level: u32,
    pub vocation: String,
    pub last_login: u64,
    pub is_male: bool,
    pub look_type: u32,
    pub look_head: u32,
    pub look_body: u32,
    pub look_legs: u32,
    pub look_feet: u32,
    pub look_addons: u32,
}

#[derive(Debug, Clone)]
pub struct BanRecord {
    /// Unix timestamp; zero means permanent.
    pub expires_at: i64,
    pub banned_by: String,
    pub reason: String,
}

/// Persistent account storage.
pub trait AccountStore: Send + Sync {
    fn account_by_email(&self, email: &str) -> Result<Option<AccountRecord>, StoreError>;
    fn create_session(&self, token: &[u8], account_id: u32, ip: IpAddr)
        -> Result<(), StoreError>;
    fn characters(&self, account_id: u32) -> Result<Vec<CharacterRecord>, StoreError>;
    fn online_count(&self) -> Result<u32, StoreError>;

    /// Look up (and burn) the session matching a token and character name.
    fn load_session(
        &self,
        token: &[u8],
        character_name: &str,
    ) -> Result<Option<SessionRecord>, StoreError>;
    fn ip_ban(&self, addr: IpAddr) -> Result<Option<BanRecord>, StoreError>;
    fn account_ban(&self, account_id: u32) -> Result<Option<BanRecord>, StoreError>;
    fn is_namelocked(&self, guid: u32) -> Result<bool, StoreError>;
}

/// The game-world simulation, driven from the game-logic thread.
///
/// Lifecycle methods are required; per-command operations default to
/// no-ops so a world only implements what it consumes.
#[allow(unused_variables)]
pub trait GameWorld: Send {
    // Lifecycle -----------------------------------------------------------

    fn world_state(&self) -> WorldState;
    fn player_count(&self) -> u32;

    fn player_by_guid(&self, guid: u32) -> Option<PlayerId>;
    fn player_by_account(&self, account_id: u32) -> Option<PlayerId>;

    /// Account facts for a character, before the full load.
    fn preload_player(&mut self, guid: u32) -> Option<PlayerPreview>;

    /// Fully load the character and create a live player.
    fn load_player(&mut self, guid: u32) -> Option<PlayerId>;

    /// Put the player on the map at `pos`. `forced` ignores blocking
    /// creatures, as the temple fallback does.
    fn place_creature(&mut self, player: PlayerId, pos: Position, forced: bool) -> bool;
    fn login_position(&self, player: PlayerId) -> Position;
    fn temple_position(&self, player: PlayerId) -> Position;

    /// The connection now carries this player; the world keeps the handle
    /// for its own outbound traffic.
    fn on_player_attach(&mut self, connection: &Arc<Connection>, player: PlayerId);

    /// The connection side has been nulled; drop the world's reference.
    fn release_player(&mut self, player: PlayerId);

    fn player_is_dead_or_removed(&self, player: PlayerId) -> bool {
        false
    }

    fn player_direction(&self, player: PlayerId) -> Direction {
        Direction::South
    }

    /// Current outfit, consulted to preserve mount colors when the client
    /// clears the mount in a set-outfit command.
    fn player_current_outfit(&self, player: PlayerId) -> Outfit {
        Outfit::default()
    }

    /// Whether a market offer for this item carries a tier byte.
    fn market_offer_needs_tier(&self, sprite_id: u16) -> bool {
        false
    }

    // Session -------------------------------------------------------------

    fn player_logout(&mut self, player: PlayerId, forced: bool) {}
    fn player_enter_world(&mut self, player: PlayerId) {}
    fn player_receive_ping(&mut self, player: PlayerId) {}
    fn player_receive_ping_back(&mut self, player: PlayerId) {}
    fn player_extended_opcode(&mut self, player: PlayerId, opcode: u8, payload: String) {}

    // Movement ------------------------------------------------------------

    fn player_walk(&mut self, player: PlayerId, direction: Direction) {}
    fn player_auto_walk(&mut self, player: PlayerId, path: Vec<Direction>) {}
    fn player_stop_auto_walk(&mut self, player: PlayerId) {}
    fn player_turn(&mut self, player: PlayerId, direction: Direction) {}

    // Items and containers ------------------------------------------------

    fn player_equip_item(&mut self, player: PlayerId, sprite_id: u16) {}
    fn player_move_thing(
        &mut self,
        player: PlayerId,
        from: Position,
        sprite_id: u16,
        from_stackpos: u8,
        to: Position,
        count: u8,
    ) {
    }
    fn player_use_item(
        &mut self,
        player: PlayerId,
        pos: Position,
        stackpos: u8,
        index: u8,
        sprite_id: u16,
    ) {
    }
    fn player_use_item_ex(
        &mut self,
        player: PlayerId,
        from: Position,
        from_stackpos: u8,
        from_sprite_id: u16,
        to: Position,
        to_stackpos: u8,
        to_sprite_id: u16,
    ) {
    }
    fn player_use_with_creature(
        &mut self,
        player: PlayerId,
        from: Position,
        from_stackpos: u8,
        creature_id: u32,
        sprite_id: u16,
    ) {
    }
    fn player_rotate_item(&mut self, player: PlayerId, pos: Position, stackpos: u8, sprite_id: u16) {
    }
    fn player_wrap_item(&mut self, player: PlayerId, pos: Position, stackpos: u8, sprite_id: u16) {}
    fn player_close_container(&mut self, player: PlayerId, container_id: u8) {}
    fn player_move_up_container(&mut self, player: PlayerId, container_id: u8) {}
    fn player_update_container(&mut self, player: PlayerId, container_id: u8) {}
    fn player_browse_field(&mut self, player: PlayerId, pos: Position) {}
    fn player_seek_in_container(&mut self, player: PlayerId, container_id: u8, index: u16) {}
    fn player_quick_loot(
        &mut self,
        player: PlayerId,
        pos: Position,
        stackpos: u8,
        sprite_id: u16,
        all_corpses: bool,
    ) {
    }

    // Shop and trade ------------------------------------------------------

    fn player_look_in_shop(&mut self, player: PlayerId, item_id: u16, count: u8) {}
    fn player_purchase_item(
        &mut self,
        player: PlayerId,
        item_id: u16,
        count: u8,
        amount: u16,
        ignore_cap: bool,
        in_backpacks: bool,
    ) {
    }
    fn player_sell_item(
        &mut self,
        player: PlayerId,
        item_id: u16,
        count: u8,
        amount: u16,
        ignore_equipped: bool,
    ) {
    }
    fn player_close_shop(&mut self, player: PlayerId) {}
    fn player_request_trade(
        &mut self,
        player: PlayerId,
        pos: Position,
        stackpos: u8,
        partner_id: u32,
        sprite_id: u16,
    ) {
    }
    fn player_look_in_trade(&mut self, player: PlayerId, counter_offer: bool, index: u8) {}
    fn player_accept_trade(&mut self, player: PlayerId) {}
    fn player_close_trade(&mut self, player: PlayerId) {}

    // Windows and looks ---------------------------------------------------

    fn player_write_item(&mut self, player: PlayerId, window_id: u32, text: String) {}
    fn player_update_house_window(&mut self, player: PlayerId, door_id: u8, id: u32, text: String) {
    }
    fn player_look_at(&mut self, player: PlayerId, pos: Position, stackpos: u8) {}
    fn player_look_in_battle_list(&mut self, player: PlayerId, creature_id: u32) {}
    fn player_request_edit_podium(
        &mut self,
        player: PlayerId,
        pos: Position,
        stackpos: u8,
        sprite_id: u16,
    ) {
    }
    fn player_request_outfit(&mut self, player: PlayerId) {}
    fn player_change_outfit(&mut self, player: PlayerId, outfit: Outfit, randomize_mount: bool) {}
    fn player_edit_podium(
        &mut self,
        player: PlayerId,
        outfit: Outfit,
        pos: Position,
        stackpos: u8,
        sprite_id: u16,
        visible: bool,
        direction: u8,
    ) {
    }

    // Chat ----------------------------------------------------------------

    fn player_say(
        &mut self,
        player: PlayerId,
        channel_id: u16,
        class: SpeakClass,
        receiver: String,
        text: String,
    ) {
    }
    fn player_request_channels(&mut self, player: PlayerId) {}
    fn player_open_channel(&mut self, player: PlayerId, channel_id: u16) {}
    fn player_close_channel(&mut self, player: PlayerId, channel_id: u16) {}
    fn player_open_private_channel(&mut self, player: PlayerId, receiver: String) {}
    fn player_close_npc_channel(&mut self, player: PlayerId) {}
    fn player_create_private_channel(&mut self, player: PlayerId) {}
    fn player_channel_invite(&mut self, player: PlayerId, name: String) {}
    fn player_channel_exclude(&mut self, player: PlayerId, name: String) {}

    // Combat --------------------------------------------------------------

    fn player_set_fight_modes(&mut self, player: PlayerId, modes: FightModes) {}
    fn player_set_attacked_creature(&mut self, player: PlayerId, creature_id: u32) {}
    fn player_follow_creature(&mut self, player: PlayerId, creature_id: u32) {}
    fn player_cancel_attack_and_follow(&mut self, player: PlayerId) {}

    // Party ---------------------------------------------------------------

    fn player_invite_to_party(&mut self, player: PlayerId, target_id: u32) {}
    fn player_join_party(&mut self, player: PlayerId, target_id: u32) {}
    fn player_revoke_party_invite(&mut self, player: PlayerId, target_id: u32) {}
    fn player_pass_party_leadership(&mut self, player: PlayerId, target_id: u32) {}
    fn player_leave_party(&mut self, player: PlayerId) {}
    fn player_enable_shared_party_experience(&mut self, player: PlayerId, active: bool) {}

    // VIP -----------------------------------------------------------------

    fn player_add_vip(&mut self, player: PlayerId, name: String) {}
    fn player_remove_vip(&mut self, player: PlayerId, guid: u32) {}
    fn player_edit_vip(
        &mut self,
        player: PlayerId,
        guid: u32,
        description: String,
        icon: u32,
        notify: bool,
    ) {
    }

    // Market --------------------------------------------------------------

    fn player_leave_market(&mut self, player: PlayerId) {}
    fn player_browse_market(&mut self, player: PlayerId, sprite_id: u16) {}
    fn player_browse_market_own_offers(&mut self, player: PlayerId) {}
    fn player_browse_market_own_history(&mut self, player: PlayerId) {}
    fn player_create_market_offer(
        &mut self,
        player: PlayerId,
        offer_type: u8,
        sprite_id: u16,
        amount: u16,
        price: u64,
        anonymous: bool,
    ) {
    }
    fn player_cancel_market_offer(&mut self, player: PlayerId, timestamp: u32, counter: u16) {}
    fn player_accept_market_offer(
        &mut self,
        player: PlayerId,
        timestamp: u32,
        counter: u16,
        amount: u16,
    ) {
    }

    // Reports and misc ----------------------------------------------------

    fn player_debug_assert(
        &mut self,
        player: PlayerId,
        assert_line: String,
        date: String,
        description: String,
        comment: String,
    ) {
    }
    fn player_report_rule_violation(
        &mut self,
        player: PlayerId,
        target_name: String,
        report_type: u8,
        reason: u8,
        comment: String,
        translation: String,
    ) {
    }
    fn player_answer_modal_window(&mut self, player: PlayerId, id: u32, button: u8, choice: u8) {}

    /// Commands without a table entry are forwarded for logging.
    fn player_unhandled_command(&mut self, player: PlayerId, command: u8, data: &[u8]) {}
}
