//! Shared harness for the end-to-end tests: a scripted world and store,
//! a running game service on an ephemeral port, and a minimal client
//! side of the wire protocol.
#![allow(dead_code)]

use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use worldgate::config::Config;
use worldgate::core::packet::NetworkMessage;
use worldgate::crypto::rsa::RsaDecryptor;
use worldgate::crypto::xtea::{self, XteaKey};
use worldgate::error::StoreError;
use worldgate::game::thread::{self, GameHandle, GameState};
use worldgate::game::{
    AccountRecord, AccountStore, BanRecord, CharacterRecord, GameWorld, PlayerId, PlayerPreview,
    Position, SessionRecord, WorldState,
};
use worldgate::service::game::{game_service_on, Connection};
use worldgate::service::ServerContext;

pub const TEST_GUID: u32 = 777;
pub const TEST_TOKEN: &[u8] = b"0123456789abcdef";
pub const TEST_CHARACTER: &str = "Bob";
pub const TEST_XTEA_KEY: XteaKey = [0x0302_0100, 0x0706_0504, 0x0B0A_0908, 0x0F0E_0D0C];

pub type Events = Arc<Mutex<Vec<String>>>;

pub fn record(events: &Events, event: impl Into<String>) {
    events.lock().unwrap().push(event.into());
}

pub async fn wait_for_event(events: &Events, needle: &str) -> bool {
    for _ in 0..200 {
        if events
            .lock()
            .unwrap()
            .iter()
            .any(|event| event.contains(needle))
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub fn count_events(events: &Events, needle: &str) -> usize {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| event.contains(needle))
        .count()
}

/// World double: admits the configured character and records calls.
pub struct TestWorld {
    pub events: Events,
    pub players_online: u32,
    pub premium: bool,
    /// Enqueued to the connection the moment the player attaches.
    pub attach_payloads: Vec<Vec<u8>>,
    next_player: AtomicU32,
}

impl TestWorld {
    pub fn new(events: Events) -> Self {
        Self {
            events,
            players_online: 0,
            premium: false,
            attach_payloads: Vec::new(),
            next_player: AtomicU32::new(1),
        }
    }
}

impl GameWorld for TestWorld {
    fn world_state(&self) -> WorldState {
        WorldState::Open
    }

    fn player_count(&self) -> u32 {
        self.players_online
    }

    fn player_by_guid(&self, _guid: u32) -> Option<PlayerId> {
        None
    }

    fn player_by_account(&self, _account_id: u32) -> Option<PlayerId> {
        None
    }

    fn preload_player(&mut self, guid: u32) -> Option<PlayerPreview> {
        (guid == TEST_GUID).then(|| PlayerPreview {
            account_id: 1,
            premium: self.premium,
            ..PlayerPreview::default()
        })
    }

    fn load_player(&mut self, guid: u32) -> Option<PlayerId> {
        let player = self.next_player.fetch_add(1, Ordering::Relaxed);
        record(&self.events, format!("load:{guid}->{player}"));
        Some(player)
    }

    fn place_creature(&mut self, _player: PlayerId, _pos: Position, _forced: bool) -> bool {
        true
    }

    fn login_position(&self, _player: PlayerId) -> Position {
        Position::default()
    }

    fn temple_position(&self, _player: PlayerId) -> Position {
        Position::default()
    }

    fn on_player_attach(&mut self, connection: &Arc<Connection>, player: PlayerId) {
        record(&self.events, format!("attach:{player}"));
        for payload in &self.attach_payloads {
            connection.enqueue_output(&NetworkMessage::from_bytes(payload));
        }
    }

    fn release_player(&mut self, player: PlayerId) {
        record(&self.events, format!("release:{player}"));
    }

    fn player_receive_ping(&mut self, player: PlayerId) {
        record(&self.events, format!("ping:{player}"));
    }

    fn player_logout(&mut self, player: PlayerId, forced: bool) {
        record(&self.events, format!("logout:{player}:{forced}"));
    }
}

/// Store double holding exactly one session row.
pub struct TestStore {
    pub events: Events,
    pub session: Option<SessionRecord>,
}

impl AccountStore for TestStore {
    fn account_by_email(&self, _email: &str) -> Result<Option<AccountRecord>, StoreError> {
        Ok(None)
    }

    fn create_session(&self, _token: &[u8], _account_id: u32, _ip: IpAddr) -> Result<(), StoreError> {
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
        token: &[u8],
        character_name: &str,
    ) -> Result<Option<SessionRecord>, StoreError> {
        record(
            &self.events,
            format!(
                "load_session:{}:{}",
                String::from_utf8_lossy(token),
                character_name
            ),
        );
        if token == TEST_TOKEN && character_name == TEST_CHARACTER {
            Ok(self.session.clone())
        } else {
            Ok(None)
        }
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

pub struct Harness {
    pub addr: std::net::SocketAddr,
    pub ctx: Arc<ServerContext>,
    pub game: GameHandle,
    pub events: Events,
    pub public_key: (BigUint, BigUint),
}

/// Boot a game service on an ephemeral port with the given doubles.
pub async fn start_game_service(
    config: Config,
    mut build: impl FnMut(Events) -> TestWorld,
) -> Harness {
    let events: Events = Arc::new(Mutex::new(Vec::new()));

    let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).expect("generate key");
    let public_key = (key.e().clone(), key.n().clone());
    let rsa = RsaDecryptor::from_key(key).expect("wrap key");
    let ctx = ServerContext::new(config, rsa).expect("context");

    let world = build(Arc::clone(&events));
    let store = TestStore {
        events: Arc::clone(&events),
        session: Some(SessionRecord {
            account_id: 1,
            character_id: TEST_GUID,
            ip: IpAddr::from([127, 0, 0, 1]),
        }),
    };
    let state = GameState::new(Box::new(world), Arc::new(store), Arc::clone(&ctx));
    let (game, _join) = thread::spawn(state, 256);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(game_service_on(listener, Arc::clone(&ctx), game.clone()));

    Harness {
        addr,
        ctx,
        game,
        events,
        public_key,
    }
}

/// Frame a payload the way the client does: padding count first, random
/// tail padding, optional XTEA, sequence field, block count.
pub fn client_frame(payload: &[u8], sequence: u32, key: Option<&XteaKey>) -> Vec<u8> {
    let mut inner = Vec::with_capacity(payload.len() + 8);
    inner.push(0u8); // padding count, patched below
    inner.extend_from_slice(payload);
    let padding = (8 - inner.len() % 8) % 8;
    inner[0] = padding as u8;
    inner.extend(std::iter::repeat(0xAA).take(padding));

    if let Some(key) = key {
        xtea::encrypt(key, &mut inner).expect("aligned");
    }

    let blocks = (inner.len() / 8) as u16;
    let mut frame = Vec::with_capacity(inner.len() + 6);
    frame.extend_from_slice(&blocks.to_le_bytes());
    frame.extend_from_slice(&sequence.to_le_bytes());
    frame.extend_from_slice(&inner);
    frame
}

/// Read one server frame; returns the raw sequence field and the payload
/// with padding stripped (but not inflated).
pub async fn read_server_frame(
    stream: &mut TcpStream,
    key: Option<&XteaKey>,
) -> (u32, Vec<u8>) {
    let mut prelude = [0u8; 2];
    stream.read_exact(&mut prelude).await.expect("frame prelude");
    let blocks = u16::from_le_bytes(prelude) as usize;
    assert!(blocks > 0, "server sent a zero-block frame");

    let mut body = vec![0u8; 4 + blocks * 8];
    stream.read_exact(&mut body).await.expect("frame body");
    let sequence = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);

    let mut inner = body.split_off(4);
    if let Some(key) = key {
        xtea::decrypt(key, &mut inner).expect("aligned");
    }
    let padding = inner[0] as usize;
    assert!(padding + 1 <= inner.len());
    inner.truncate(inner.len() - padding);
    inner.remove(0);
    (sequence, inner)
}

pub struct Challenge {
    pub uptime: u32,
    pub random: u8,
}

/// Drive the client side of the handshake up to the challenge.
pub async fn client_hello(harness: &Harness) -> (TcpStream, Challenge) {
    let mut stream = TcpStream::connect(harness.addr).await.expect("connect");
    stream
        .write_all(format!("{}\n", harness.ctx.config.server_name).as_bytes())
        .await
        .expect("world name");

    let (sequence, payload) = read_server_frame(&mut stream, None).await;
    assert_eq!(sequence, 0);
    assert_eq!(payload[0], 0x1F);
    let uptime = u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
    let random = payload[5];
    (stream, Challenge { uptime, random })
}

fn put_string(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u16).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
}

/// Build the 252-byte login payload, RSA block included.
pub fn login_payload(
    harness: &Harness,
    challenge: &Challenge,
    token: &[u8],
    character: &str,
) -> Vec<u8> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let mut rsa_plain = Vec::with_capacity(128);
    rsa_plain.push(0u8);
    for word in TEST_XTEA_KEY {
        rsa_plain.extend_from_slice(&word.to_le_bytes());
    }
    rsa_plain.push(0); // gamemaster flag
    put_string(&mut rsa_plain, &STANDARD.encode(token));
    put_string(&mut rsa_plain, character);
    rsa_plain.extend_from_slice(&challenge.uptime.to_le_bytes());
    rsa_plain.push(challenge.random);
    assert!(rsa_plain.len() <= 128, "rsa block overflow");
    rsa_plain.resize(128, 0);

    let (e, n) = &harness.public_key;
    let cipher = BigUint::from_bytes_be(&rsa_plain).modpow(e, n);
    let mut rsa_block = cipher.to_bytes_be();
    let mut padded = vec![0u8; 128 - rsa_block.len()];
    padded.append(&mut rsa_block);

    let mut payload = Vec::with_capacity(252);
    payload.push(0x0A);
    payload.extend_from_slice(&2u16.to_le_bytes()); // terminal kind
    payload.extend_from_slice(&1321u16.to_le_bytes()); // terminal version
    payload.extend_from_slice(&0u32.to_le_bytes());
    put_string(&mut payload, "13.21");
    let filler = "0".repeat(252 - payload.len() - 2 - 1 - 128);
    put_string(&mut payload, &filler);
    payload.push(0);
    payload.extend_from_slice(&padded);
    assert_eq!(payload.len(), 252);
    payload
}

/// Full handshake as the scripted character; returns the stream ready
/// for encrypted traffic (client sequence 1, server sequence 1).
pub async fn client_login(harness: &Harness) -> TcpStream {
    let (mut stream, challenge) = client_hello(harness).await;
    let payload = login_payload(harness, &challenge, TEST_TOKEN, TEST_CHARACTER);
    stream
        .write_all(&client_frame(&payload, 0, None))
        .await
        .expect("login frame");
    stream
}

/// True once the peer has closed: a read returns EOF within the window.
pub async fn expect_eof(stream: &mut TcpStream) -> bool {
    let mut byte = [0u8; 1];
    match tokio::time::timeout(Duration::from_secs(6), stream.read(&mut byte)).await {
        Ok(Ok(0)) => true,
        Ok(Err(_)) => true,
        _ => false,
    }
}
