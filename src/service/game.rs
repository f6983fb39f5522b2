//! # Game Service
//!
//! Long-lived encrypted sessions carrying gameplay traffic.
//!
//! Every accepted socket gets a handshake task with a five-second login
//! deadline: world-name line, 14-byte challenge, 252-byte RSA login
//! frame, then a session handoff to the game-logic thread. Once the
//! login resolves, a reader task and a writer task take over the two
//! halves of the stream; both watch the connection state and the shared
//! cancellation token, so any transition into ABORT unwinds them
//! promptly. CLOSE lets the writer drain its queue before shutting the
//! socket down.

use crate::core::output::{OutputArena, OutputMessage};
use crate::core::packet::NetworkMessage;
use crate::crypto;
use crate::crypto::rsa::RSA_BLOCK_SIZE;
use crate::crypto::xtea::XteaKey;
use crate::error::{GatewayError, Result};
use crate::game::session::perform_login;
use crate::game::thread::GameHandle;
use crate::game::PlayerId;
use crate::protocol::deflate::Deflater;
use crate::protocol::dispatcher::parse_packet;
use crate::protocol::{read_frame, write_frame, ChecksumMode};
use crate::service::ServerContext;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::time::{sleep, sleep_until, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOGIN_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(15);
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);
const WRITER_POLL: Duration = Duration::from_millis(10);

/// Longest world-name line accepted before the handshake gives up.
const MAX_WORLD_NAME: usize = 64;

/// Headroom kept when growing a queued output buffer: the next append
/// must still fit its payload plus worst-case padding.
const MAX_PADDING: usize = 8;

/// Connection lifecycle. Transitions only move forward; CLOSE and ABORT
/// are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Login = 0,
    Ok = 1,
    Close = 2,
    Abort = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Login,
            1 => ConnectionState::Ok,
            2 => ConnectionState::Close,
            _ => ConnectionState::Abort,
        }
    }
}

/// Client-declared terminal identity, fixed during the handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct Terminal {
    pub kind: u16,
    pub version: u16,
}

#[derive(Default)]
struct GameSide {
    player: Option<PlayerId>,
    debug_assert_received: bool,
}

/// One client session, shared by the handshake, the reader, the writer,
/// and the game thread while a player is attached.
pub struct Connection {
    peer: SocketAddr,
    arena: Arc<OutputArena>,
    state: AtomicU8,
    cancel: CancellationToken,
    login_notify: Notify,
    server_sequence: AtomicU32,
    client_sequence: AtomicU32,
    xtea_key: OnceLock<XteaKey>,
    terminal: OnceLock<Terminal>,
    // Shared with the game thread; held briefly for append/pop.
    output: Mutex<VecDeque<OutputMessage>>,
    // Game-thread data, behind its own lock so detach nulls the player
    // reference in one critical section.
    game_side: Mutex<GameSide>,
}

impl Connection {
    pub fn new(peer: SocketAddr, arena: Arc<OutputArena>) -> Arc<Self> {
        Arc::new(Self {
            peer,
            arena,
            state: AtomicU8::new(ConnectionState::Login as u8),
            cancel: CancellationToken::new(),
            login_notify: Notify::new(),
            server_sequence: AtomicU32::new(0),
            client_sequence: AtomicU32::new(0),
            xtea_key: OnceLock::new(),
            terminal: OnceLock::new(),
            output: Mutex::new(VecDeque::new()),
            game_side: Mutex::new(GameSide::default()),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn peer_ip(&self) -> IpAddr {
        self.peer.ip()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Compare-and-swap transition so concurrent actors agree on who
    /// executes teardown.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Jump to ABORT from any state and wake every pending suspension.
    pub fn force_abort(&self) {
        self.state
            .fetch_max(ConnectionState::Abort as u8, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Game-thread request to tear the connection down. A graceful close
    /// lets the writer drain its queue first.
    pub fn close(&self, force: bool) {
        if force {
            self.force_abort();
        } else {
            self.transition(ConnectionState::Ok, ConnectionState::Close);
        }
    }

    /// Settle the login phase. Only the first resolution wins.
    pub fn resolve_login(&self, to: ConnectionState) -> bool {
        if self.transition(ConnectionState::Login, to) {
            self.login_notify.notify_one();
            true
        } else {
            false
        }
    }

    async fn wait_login_resolved(&self) {
        self.login_notify.notified().await;
    }

    pub fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }

    fn next_server_sequence(&self) -> u32 {
        self.server_sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn client_sequence(&self) -> u32 {
        self.client_sequence.load(Ordering::SeqCst)
    }

    fn bump_client_sequence(&self) {
        self.client_sequence.fetch_add(1, Ordering::SeqCst);
    }

    fn set_xtea_key(&self, key: XteaKey) {
        // Written exactly once, during the handshake.
        let _ = self.xtea_key.set(key);
    }

    pub fn xtea_key(&self) -> Option<XteaKey> {
        self.xtea_key.get().copied()
    }

    fn set_terminal(&self, terminal: Terminal) {
        let _ = self.terminal.set(terminal);
    }

    pub fn terminal(&self) -> Terminal {
        self.terminal.get().copied().unwrap_or_default()
    }

    /// Append a finished game-layer message to the write queue, growing
    /// the tail buffer until it cannot take the payload plus worst-case
    /// padding, then chaining a fresh one.
    pub fn enqueue_output(&self, msg: &NetworkMessage) {
        let needed = msg.written_len() + MAX_PADDING;
        let mut queue = self.output.lock();
        let fits = queue.back().is_some_and(|tail| tail.can_add(needed));
        if !fits {
            queue.push_back(self.arena.acquire());
        }
        queue
            .back_mut()
            .expect("queue has a tail after push")
            .append(msg);
    }

    fn pop_output(&self) -> Option<OutputMessage> {
        self.output.lock().pop_front()
    }

    fn discard_output(&self) {
        self.output.lock().clear();
    }

    pub(crate) fn attach_player(&self, player: PlayerId) {
        self.game_side.lock().player = Some(player);
    }

    pub fn player(&self) -> Option<PlayerId> {
        self.game_side.lock().player
    }

    pub(crate) fn take_player(&self) -> Option<PlayerId> {
        self.game_side.lock().player.take()
    }

    /// First call wins; the debug-assert report is one-shot per
    /// connection.
    pub(crate) fn latch_debug_assert(&self) -> bool {
        let mut side = self.game_side.lock();
        if side.debug_assert_received {
            false
        } else {
            side.debug_assert_received = true;
            true
        }
    }
}

/// Per-connection receive rate accounting. The counter divides by the
/// elapsed window (plus one, so the first second is not a free-for-all)
/// and resets once the window has run past two seconds.
struct PacketRate {
    window_start: std::time::Instant,
    packets: u32,
}

impl PacketRate {
    fn new() -> Self {
        Self {
            window_start: std::time::Instant::now(),
            packets: 0,
        }
    }

    fn allow(&mut self, limit: u32) -> bool {
        let time_passed = self.window_start.elapsed().as_secs() + 1;
        self.packets += 1;
        let allowed = u64::from(self.packets) / time_passed <= u64::from(limit);
        if time_passed > 2 {
            self.window_start = std::time::Instant::now();
            self.packets = 0;
        }
        allowed
    }
}

/// Force ABORT and hand cleanup to the game thread.
async fn abort(conn: &Arc<Connection>, game: &GameHandle) {
    conn.force_abort();
    conn.discard_output();
    post_detach(conn, game).await;
}

/// Ordered shutdown: stop reading, let the writer drain, then detach.
async fn close_graceful(conn: &Arc<Connection>, game: &GameHandle) {
    conn.transition(ConnectionState::Ok, ConnectionState::Close);
    post_detach(conn, game).await;
}

async fn post_detach(conn: &Arc<Connection>, game: &GameHandle) {
    let conn = Arc::clone(conn);
    let _ = game
        .post(Box::new(move |state| {
            crate::game::session::detach(state.world.as_mut(), &conn);
        }))
        .await;
}

/// Drive one accepted socket through handshake, reader, and writer.
pub(crate) async fn handle_connection<S>(
    stream: S,
    conn: Arc<Connection>,
    ctx: Arc<ServerContext>,
    game: GameHandle,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut rd, mut wr) = tokio::io::split(stream);
    let mut deflater = Deflater::new();
    let deadline = Instant::now() + LOGIN_TIMEOUT;

    let handshake = run_handshake(&mut rd, &mut wr, &conn, &ctx, &game, &mut deflater);
    match timeout_at(deadline, handshake).await {
        Err(_) => {
            debug!(peer = %conn.peer(), "login deadline expired during handshake");
            abort(&conn, &game).await;
            return;
        }
        Ok(Err(e)) => {
            debug!(peer = %conn.peer(), error = %e, "handshake failed");
            abort(&conn, &game).await;
            return;
        }
        Ok(Ok(())) => {}
    }

    // Stay in LOGIN until the game thread resolves the session or the
    // deadline fires.
    tokio::select! {
        _ = sleep_until(deadline) => {}
        _ = conn.wait_login_resolved() => {}
        _ = conn.cancelled().cancelled() => {}
    }

    match conn.state() {
        ConnectionState::Login => {
            debug!(peer = %conn.peer(), "login unresolved at deadline");
            abort(&conn, &game).await;
        }
        ConnectionState::Ok => {
            let reader = tokio::spawn(reader_loop(rd, conn.clone(), ctx, game.clone()));
            writer_loop(wr, conn, game, deflater).await;
            let _ = reader.await;
        }
        ConnectionState::Close => {
            writer_loop(wr, conn, game, deflater).await;
        }
        ConnectionState::Abort => {}
    }
}

async fn run_handshake<S>(
    rd: &mut ReadHalf<S>,
    wr: &mut WriteHalf<S>,
    conn: &Arc<Connection>,
    ctx: &Arc<ServerContext>,
    game: &GameHandle,
    deflater: &mut Deflater,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    // SERVER <- CLIENT: a line-terminated world name, and nothing else.
    let mut world_name = Vec::new();
    loop {
        let byte = rd.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        world_name.push(byte);
        if world_name.len() > MAX_WORLD_NAME {
            return Err(GatewayError::Handshake("world name too long"));
        }
    }
    if world_name != ctx.config.server_name.as_bytes() {
        return Err(GatewayError::Handshake("world name mismatch"));
    }

    // SERVER -> CLIENT: challenge carrying uptime and a random byte.
    let challenge_uptime = ctx.uptime_seconds() as u32;
    let challenge_random = crypto::random_byte();
    {
        let mut out = ctx.arena.acquire();
        out.put_u8(0x1F);
        out.put_u32(challenge_uptime);
        out.put_u8(challenge_random);
        let sequence = conn.next_server_sequence();
        write_frame(wr, &mut out, ChecksumMode::Sequence, sequence, None, deflater).await?;
    }

    // SERVER <- CLIENT: the framed login, plaintext outside the RSA block.
    let mut input = NetworkMessage::new();
    read_frame(rd, &mut input, conn.client_sequence(), None).await?;
    conn.bump_client_sequence();

    if input.remaining_len() != 252 {
        return Err(GatewayError::Handshake("unexpected login frame length"));
    }
    if input.get_u8() != 0x0A {
        return Err(GatewayError::Handshake("unexpected login command"));
    }

    let terminal = Terminal {
        kind: input.get_u16(),
        version: input.get_u16(),
    };
    input.get_u32(); // extended version
    input.get_string(None); // version string
    input.get_string(None); // assets checksum
    input.get_u8(); // reserved

    if input.remaining_len() != RSA_BLOCK_SIZE {
        return Err(GatewayError::Handshake("login key block truncated"));
    }
    ctx.rsa.decrypt_in_place(input.remaining_buffer_mut())?;
    if input.get_u8() != 0 {
        return Err(crate::error::CryptoError::RsaLeadingByte.into());
    }

    let key: XteaKey = [
        input.get_u32(),
        input.get_u32(),
        input.get_u32(),
        input.get_u32(),
    ];
    conn.set_xtea_key(key);

    let client_gamemaster = input.get_u8() != 0;
    let session_token = BASE64.decode(input.get_string(None)).unwrap_or_default();
    let character_name = input.get_string(None);

    // Consistency check: the challenge must echo back exactly.
    if input.get_u32() != challenge_uptime
        || input.get_u8() != challenge_random
        || input.is_overrun()
    {
        return Err(GatewayError::Handshake("challenge echo mismatch"));
    }

    conn.set_terminal(terminal);

    let handoff = Arc::clone(conn);
    game.post(Box::new(move |state| {
        perform_login(state, &handoff, client_gamemaster, session_token, character_name);
    }))
    .await
}

async fn reader_loop<S>(
    mut rd: ReadHalf<S>,
    conn: Arc<Connection>,
    ctx: Arc<ServerContext>,
    game: GameHandle,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let Some(key) = conn.xtea_key() else {
        abort(&conn, &game).await;
        return;
    };
    let limit = ctx.config.max_packets_per_second;
    let mut rate = PacketRate::new();
    let mut input = NetworkMessage::new();

    while conn.state() == ConnectionState::Ok {
        let read = tokio::select! {
            _ = conn.cancelled().cancelled() => return,
            read = timeout(
                READ_TIMEOUT,
                read_frame(&mut rd, &mut input, conn.client_sequence(), Some(&key)),
            ) => read,
        };

        match read {
            Err(_) => {
                debug!(peer = %conn.peer(), "read deadline expired");
                abort(&conn, &game).await;
                return;
            }
            Ok(Err(GatewayError::Io(e))) if e.kind() == ErrorKind::UnexpectedEof => {
                close_graceful(&conn, &game).await;
                return;
            }
            Ok(Err(e)) => {
                debug!(peer = %conn.peer(), error = %e, "read failed");
                abort(&conn, &game).await;
                return;
            }
            Ok(Ok(())) => {}
        }
        conn.bump_client_sequence();

        if !rate.allow(limit) {
            info!(
                peer = %conn.peer(),
                "disconnected: {}",
                crate::error::constants::ERR_PACKET_RATE
            );
            close_graceful(&conn, &game).await;
            return;
        }

        let payload = Bytes::copy_from_slice(input.remaining_buffer());
        if payload.is_empty() {
            continue;
        }
        let handoff = Arc::clone(&conn);
        let posted = game
            .post(Box::new(move |state| {
                parse_packet(state, &handoff, &payload);
            }))
            .await;
        if posted.is_err() {
            abort(&conn, &game).await;
            return;
        }
    }
}

async fn writer_loop<S>(
    mut wr: WriteHalf<S>,
    conn: Arc<Connection>,
    game: GameHandle,
    mut deflater: Deflater,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let key = conn.xtea_key();

    loop {
        let state = conn.state();
        if state != ConnectionState::Ok && state != ConnectionState::Close {
            break;
        }

        let Some(mut output) = conn.pop_output() else {
            if state == ConnectionState::Close {
                // Queue drained in CLOSE: finish the shutdown and unwind
                // the reader as well.
                let _ = wr.shutdown().await;
                conn.force_abort();
                post_detach(&conn, &game).await;
                break;
            }
            tokio::select! {
                _ = conn.cancelled().cancelled() => break,
                _ = sleep(WRITER_POLL) => {}
            }
            continue;
        };

        let sequence = conn.next_server_sequence();
        let written = tokio::select! {
            _ = conn.cancelled().cancelled() => break,
            written = timeout(
                WRITE_TIMEOUT,
                write_frame(
                    &mut wr,
                    &mut output,
                    ChecksumMode::Sequence,
                    sequence,
                    key.as_ref(),
                    &mut deflater,
                ),
            ) => written,
        };

        match written {
            Err(_) => {
                debug!(peer = %conn.peer(), "write deadline expired");
                abort(&conn, &game).await;
                break;
            }
            Ok(Err(e)) => {
                debug!(peer = %conn.peer(), error = %e, "write failed");
                abort(&conn, &game).await;
                break;
            }
            Ok(Ok(_compressed)) => {}
        }
    }
}

/// Accept loop bound to the configured game port.
pub async fn game_service(ctx: Arc<ServerContext>, game: GameHandle) -> Result<()> {
    let addr = ctx.bind_addr(ctx.config.game_port)?;
    let listener = TcpListener::bind(addr).await?;
    game_service_on(listener, ctx, game).await
}

/// Accept loop over an already-bound listener (tests bind port zero).
pub async fn game_service_on(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    game: GameHandle,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!(addr = %local, "game service listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "game service accept failed");
                return Err(e.into());
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "failed to set nodelay");
        }
        let conn = Connection::new(peer, Arc::clone(&ctx.arena));
        tokio::spawn(handle_connection(stream, conn, Arc::clone(&ctx), game.clone()));
    }
}
