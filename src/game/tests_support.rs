//! Shared doubles for unit tests: a call-recording world and an inert
//! account store.
#![allow(dead_code)]

use crate::error::StoreError;
use crate::game::{
    AccountRecord, AccountStore, BanRecord, CharacterRecord, GameWorld, PlayerId, PlayerPreview,
    Position, SessionRecord, WorldState,
};
use crate::service::game::Connection;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

pub(crate) struct RecordingWorld {
    calls: Arc<Mutex<Vec<String>>>,
    pub state: WorldState,
    pub players_online: u32,
    pub previews: HashMap<u32, PlayerPreview>,
    pub online_guids: HashMap<u32, PlayerId>,
    next_player: PlayerId,
}

impl RecordingWorld {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            state: WorldState::Open,
            players_online: 0,
            previews: HashMap::new(),
            online_guids: HashMap::new(),
            next_player: 1,
        }
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl GameWorld for RecordingWorld {
    fn world_state(&self) -> WorldState {
        self.state
    }

    fn player_count(&self) -> u32 {
        self.players_online
    }

    fn player_by_guid(&self, guid: u32) -> Option<PlayerId> {
        self.online_guids.get(&guid).copied()
    }

    fn player_by_account(&self, _account_id: u32) -> Option<PlayerId> {
        None
    }

    fn preload_player(&mut self, guid: u32) -> Option<PlayerPreview> {
        self.previews.get(&guid).cloned()
    }

    fn load_player(&mut self, guid: u32) -> Option<PlayerId> {
        let player = self.next_player;
        self.next_player += 1;
        self.record(format!("load:{guid}->{player}"));
        Some(player)
    }

    fn place_creature(&mut self, player: PlayerId, _pos: Position, _forced: bool) -> bool {
        self.record(format!("place:{player}"));
        true
    }

    fn login_position(&self, _player: PlayerId) -> Position {
        Position::default()
    }

    fn temple_position(&self, _player: PlayerId) -> Position {
        Position::default()
    }

    fn on_player_attach(&mut self, _connection: &Arc<Connection>, player: PlayerId) {
        self.record(format!("attach:{player}"));
    }

    fn release_player(&mut self, player: PlayerId) {
        self.record(format!("release:{player}"));
    }

    fn player_receive_ping(&mut self, player: PlayerId) {
        self.record(format!("ping:{player}"));
    }

    fn player_logout(&mut self, player: PlayerId, forced: bool) {
        self.record(format!("logout:{player}:{forced}"));
    }
}

pub(crate) struct NullStore;

impl AccountStore for NullStore {
    fn account_by_email(&self, _email: &str) -> Result<Option<AccountRecord>, StoreError> {
        Ok(None)
    }

    fn create_session(
        &self,
        _token: &[u8],
        _account_id: u32,
        _ip: IpAddr,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    fn characters(&self, _account_id: u32) -> Result<Vec<CharacterRecord>, StoreError> {
        Ok(Vec::new())
    }

    fn online_count(&self) -> Result<u32, StoreError> {
        Ok(0)
    }

    fn load_session(
        &self,
        _token: &[u8],
        _character_name: &str,
    ) -> Result<Option<SessionRecord>, StoreError> {
        Ok(None)
    }

    fn ip_ban(&self, _addr: IpAddr) -> Result<Option<BanRecord>, StoreError> {
        Ok(None)
    }

    fn account_ban(&self, _account_id: u32) -> Result<Option<BanRecord>, StoreError> {
        Ok(None)
    }

    fn is_namelocked(&self, _guid: u32) -> Result<bool, StoreError> {
        Ok(false)
    }
}
