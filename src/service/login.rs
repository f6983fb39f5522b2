//! # HTTP Login Service
//!
//! JSON request/response exchange that authenticates a player and mints
//! the one-time session token the game handshake consumes.
//!
//! The HTTP surface is deliberately small: POST bodies with a
//! Content-Length, keep-alive by HTTP/1.1 defaults, a five-second
//! per-exchange deadline. Requests dispatch on the JSON `type` field;
//! `login` and `cacheinfo` are recognized, anything else is a 400.
//!
//! Account-store calls run inline and may block the worker briefly,
//! which mirrors how this server has always done database access.

use crate::error::{constants, GatewayError, Result};
use crate::game::AccountStore;
use crate::service::ServerContext;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_HEADER_LINE: usize = 2048;
const MAX_HEADERS: usize = 64;
const MAX_BODY: usize = 64 * 1024;

/// Bytes of entropy in a session token.
const SESSION_TOKEN_LEN: usize = 16;

struct HttpRequest {
    keep_alive: bool,
    body: Vec<u8>,
}

struct HttpResponse {
    status: u16,
    body: Value,
}

fn bad_request(code: i64, message: &str) -> HttpResponse {
    HttpResponse {
        status: 400,
        body: json!({
            "errorCode": code,
            "errorMessage": message,
        }),
    }
}

fn ok(body: Value) -> HttpResponse {
    HttpResponse { status: 200, body }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

async fn read_request(rd: &mut BufReader<ReadHalf<TcpStream>>) -> Result<Option<HttpRequest>> {
    let mut line = String::new();

    // Request line; EOF here is a clean end of the keep-alive session.
    if rd.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    if line.len() > MAX_HEADER_LINE || line.trim().is_empty() {
        return Err(GatewayError::Http("bad request line"));
    }
    let version_keep_alive = !line.trim_end().ends_with("HTTP/1.0");

    let mut keep_alive = version_keep_alive;
    let mut content_length: usize = 0;
    for _ in 0..MAX_HEADERS {
        line.clear();
        if rd.read_line(&mut line).await? == 0 {
            return Err(GatewayError::Http("truncated headers"));
        }
        if line.len() > MAX_HEADER_LINE {
            return Err(GatewayError::Http("oversized header"));
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            let body = read_body(rd, content_length).await?;
            return Ok(Some(HttpRequest { keep_alive, body }));
        }

        let Some((name, value)) = trimmed.split_once(':') else {
            return Err(GatewayError::Http("malformed header"));
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value
                .parse()
                .map_err(|_| GatewayError::Http("bad content-length"))?;
            if content_length > MAX_BODY {
                return Err(GatewayError::Http("oversized body"));
            }
        } else if name.eq_ignore_ascii_case("connection") {
            keep_alive = if value.eq_ignore_ascii_case("close") {
                false
            } else if value.eq_ignore_ascii_case("keep-alive") {
                true
            } else {
                keep_alive
            };
        }
    }

    Err(GatewayError::Http("too many headers"))
}

async fn read_body(
    rd: &mut BufReader<ReadHalf<TcpStream>>,
    content_length: usize,
) -> Result<Vec<u8>> {
    let mut body = vec![0u8; content_length];
    rd.read_exact(&mut body).await?;
    Ok(body)
}

async fn write_response(
    wr: &mut WriteHalf<TcpStream>,
    response: &HttpResponse,
    keep_alive: bool,
) -> Result<()> {
    let body = response.body.to_string();
    let reason = match response.status {
        200 => "OK",
        _ => "Bad Request",
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: {}\r\n\r\n",
        response.status,
        reason,
        body.len(),
        if keep_alive { "keep-alive" } else { "close" },
    );
    wr.write_all(head.as_bytes()).await?;
    wr.write_all(body.as_bytes()).await?;
    Ok(())
}

fn handle_login(
    ctx: &ServerContext,
    store: &dyn AccountStore,
    peer: IpAddr,
    request: &Value,
) -> HttpResponse {
    let (Some(email), Some(password)) = (
        request.get("email").and_then(Value::as_str),
        request.get("password").and_then(Value::as_str),
    ) else {
        return bad_request(3, constants::ERR_HTTP_BAD_CREDENTIALS);
    };

    let account = match store.account_by_email(email) {
        Ok(Some(account)) => account,
        Ok(None) => return bad_request(3, constants::ERR_HTTP_BAD_CREDENTIALS),
        Err(e) => {
            warn!(error = %e, "account lookup failed");
            return bad_request(2, constants::ERR_HTTP_INTERNAL);
        }
    };

    let digest = Sha1::digest(password.as_bytes());
    if digest.as_slice() != account.password_sha1.as_slice() {
        return bad_request(3, constants::ERR_HTTP_BAD_CREDENTIALS);
    }

    let now = unix_now();
    if let Some(secret) = account.totp_secret.as_deref().filter(|s| !s.is_empty()) {
        let Some(token) = request.get("token").and_then(Value::as_str) else {
            return bad_request(6, constants::ERR_HTTP_TOKEN_REQUIRED);
        };
        if !crate::crypto::totp::verify_token(secret, token, now) {
            return bad_request(6, constants::ERR_HTTP_TOKEN_REQUIRED);
        }
    }

    let mut session_key = [0u8; SESSION_TOKEN_LEN];
    crate::crypto::fill_random(&mut session_key);
    if let Err(e) = store.create_session(&session_key, account.id, peer) {
        warn!(error = %e, "session insert failed");
        return bad_request(2, constants::ERR_HTTP_INTERNAL);
    }

    let characters = match store.characters(account.id) {
        Ok(characters) => characters,
        Err(e) => {
            warn!(error = %e, "character list failed");
            return bad_request(2, constants::ERR_HTTP_INTERNAL);
        }
    };

    let mut last_login: u64 = 0;
    let character_list: Vec<Value> = characters
        .iter()
        .map(|c| {
            last_login = last_login.max(c.last_login);
            json!({
                "worldid": c.world_id,
                "name": c.name,
                "level": c.level,
                "vocation": c.vocation,
                "lastlogin": c.last_login,
                "ismale": c.is_male,
                "ishidden": false,
                "ismaincharacter": false,
                "tutorial": false,
                "outfitid": c.look_type,
                "headcolor": c.look_head,
                "torsocolor": c.look_body,
                "legscolor": c.look_legs,
                "detailcolor": c.look_feet,
                "addonsflags": c.look_addons,
                "dailyrewardstate": 0,
            })
        })
        .collect();

    let config = &ctx.config;
    let worlds = json!([{
        "id": 0,
        "name": config.server_name,
        "externaladdressprotected": config.ip,
        "externalportprotected": config.game_port,
        "externaladdressunprotected": config.ip,
        "externalportunprotected": config.game_port,
        "previewstate": 0,
        "location": config.location,
        "anticheatprotection": false,
        "pvptype": 0,
    }]);

    let premium = config.free_premium || account.premium_ends_at >= now;
    ok(json!({
        "session": {
            "sessionkey": BASE64.encode(session_key),
            "lastlogintime": last_login,
            "ispremium": premium,
            "premiumuntil": account.premium_ends_at,
            "status": "active",
            "returnernotification": false,
            "showrewardnews": true,
            "isreturner": true,
            "recoverysetupcomplete": true,
            "fpstracking": false,
            "optiontracking": false,
        },
        "playdata": {
            "worlds": worlds,
            "characters": character_list,
        },
    }))
}

fn handle_cache_info(store: &dyn AccountStore) -> HttpResponse {
    match store.online_count() {
        Ok(count) => ok(json!({ "playersonline": count })),
        Err(e) => {
            warn!(error = %e, "online count failed");
            bad_request(2, constants::ERR_HTTP_INTERNAL)
        }
    }
}

fn handle_request(
    ctx: &ServerContext,
    store: &dyn AccountStore,
    peer: IpAddr,
    body: &[u8],
) -> HttpResponse {
    let Ok(request) = serde_json::from_slice::<Value>(body) else {
        return bad_request(2, constants::ERR_HTTP_INVALID_REQUEST);
    };

    match request.get("type").and_then(Value::as_str) {
        Some("login") => handle_login(ctx, store, peer, &request),
        Some("cacheinfo") => handle_cache_info(store),
        Some(_) => bad_request(2, constants::ERR_HTTP_INVALID_TYPE),
        None => bad_request(2, constants::ERR_HTTP_INVALID_REQUEST),
    }
}

async fn http_session(
    stream: TcpStream,
    peer: IpAddr,
    ctx: Arc<ServerContext>,
    store: Arc<dyn AccountStore>,
) {
    let (rd, mut wr) = tokio::io::split(stream);
    let mut rd = BufReader::new(rd);
    let mut keep_alive = true;

    while keep_alive {
        let request = match timeout(EXCHANGE_TIMEOUT, read_request(&mut rd)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                debug!(peer = %peer, error = %e, "http request rejected");
                break;
            }
            Ok(Ok(None)) => break,
            Ok(Ok(Some(request))) => request,
        };
        keep_alive = request.keep_alive;

        let response = handle_request(&ctx, &*store, peer, &request.body);
        let write = timeout(
            EXCHANGE_TIMEOUT,
            write_response(&mut wr, &response, keep_alive),
        )
        .await;
        match write {
            Ok(Ok(())) => {}
            _ => break,
        }
    }
}

/// Accept loop bound to the configured HTTP port.
pub async fn login_service(ctx: Arc<ServerContext>, store: Arc<dyn AccountStore>) -> Result<()> {
    let addr = ctx.bind_addr(ctx.config.http_port)?;
    let listener = TcpListener::bind(addr).await?;
    login_service_on(listener, ctx, store).await
}

/// Accept loop over an already-bound listener (tests bind port zero).
pub async fn login_service_on(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    store: Arc<dyn AccountStore>,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!(addr = %local, "http login service listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "http login service accept failed");
                return Err(e.into());
            }
        };
        tokio::spawn(http_session(
            stream,
            peer.ip(),
            Arc::clone(&ctx),
            Arc::clone(&store),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::StoreError;
    use crate::game::{AccountRecord, BanRecord, CharacterRecord, SessionRecord};
    use parking_lot::Mutex;

    struct FakeStore {
        account: Option<AccountRecord>,
        characters: Vec<CharacterRecord>,
        sessions: Mutex<Vec<(Vec<u8>, u32, IpAddr)>>,
    }

    impl FakeStore {
        fn with_account(account: AccountRecord) -> Self {
            Self {
                account: Some(account),
                characters: Vec::new(),
                sessions: Mutex::new(Vec::new()),
            }
        }
    }

    impl AccountStore for FakeStore {
        fn account_by_email(&self, email: &str) -> std::result::Result<Option<AccountRecord>, StoreError> {
            Ok(self.account.clone().filter(|_| email == "bob@example.com"))
        }

        fn create_session(
            &self,
            token: &[u8],
            account_id: u32,
            ip: IpAddr,
        ) -> std::result::Result<(), StoreError> {
            self.sessions.lock().push((token.to_vec(), account_id, ip));
            Ok(())
        }

        fn characters(&self, _account_id: u32) -> std::result::Result<Vec<CharacterRecord>, StoreError> {
            Ok(self.characters.clone())
        }

        fn online_count(&self) -> std::result::Result<u32, StoreError> {
            Ok(42)
        }

        fn load_session(
            &self,
            _token: &[u8],
            _character_name: &str,
        ) -> std::result::Result<Option<SessionRecord>, StoreError> {
            Ok(None)
        }

        fn ip_ban(&self, _addr: IpAddr) -> std::result::Result<Option<BanRecord>, StoreError> {
            Ok(None)
        }

        fn account_ban(&self, _account_id: u32) -> std::result::Result<Option<BanRecord>, StoreError> {
            Ok(None)
        }

        fn is_namelocked(&self, _guid: u32) -> std::result::Result<bool, StoreError> {
            Ok(false)
        }
    }

    fn account_with_password(password: &str) -> AccountRecord {
        AccountRecord {
            id: 11,
            password_sha1: Sha1::digest(password.as_bytes()).to_vec(),
            totp_secret: None,
            premium_ends_at: i64::MAX,
        }
    }

    fn peer() -> IpAddr {
        IpAddr::from([127, 0, 0, 1])
    }

    #[test]
    fn login_mints_a_session_scoped_to_the_peer() {
        let ctx = ServerContext::for_tests(Config::default());
        let store = FakeStore::with_account(account_with_password("hunter2"));

        let body = json!({"type": "login", "email": "bob@example.com", "password": "hunter2"});
        let response = handle_request(&ctx, &store, peer(), body.to_string().as_bytes());

        assert_eq!(response.status, 200);
        let sessions = store.sessions.lock();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].1, 11);
        assert_eq!(sessions[0].2, peer());
        assert_eq!(sessions[0].0.len(), SESSION_TOKEN_LEN);

        // The response encodes the very same token in base64.
        let encoded = response.body["session"]["sessionkey"].as_str().unwrap();
        assert_eq!(BASE64.decode(encoded).unwrap(), sessions[0].0);
        assert_eq!(response.body["session"]["ispremium"], json!(true));
    }

    #[test]
    fn wrong_password_yields_error_code_three() {
        let ctx = ServerContext::for_tests(Config::default());
        let store = FakeStore::with_account(account_with_password("hunter2"));

        let body = json!({"type": "login", "email": "bob@example.com", "password": "wrong"});
        let response = handle_request(&ctx, &store, peer(), body.to_string().as_bytes());
        assert_eq!(response.status, 400);
        assert_eq!(response.body["errorCode"], json!(3));
    }

    #[test]
    fn missing_totp_token_yields_error_code_six() {
        let ctx = ServerContext::for_tests(Config::default());
        let mut account = account_with_password("hunter2");
        account.totp_secret = Some(b"topsecret".to_vec());
        let store = FakeStore::with_account(account);

        let body = json!({"type": "login", "email": "bob@example.com", "password": "hunter2"});
        let response = handle_request(&ctx, &store, peer(), body.to_string().as_bytes());
        assert_eq!(response.status, 400);
        assert_eq!(response.body["errorCode"], json!(6));
    }

    #[test]
    fn valid_totp_token_is_accepted() {
        let ctx = ServerContext::for_tests(Config::default());
        let mut account = account_with_password("hunter2");
        account.totp_secret = Some(b"topsecret".to_vec());
        let store = FakeStore::with_account(account);

        let ticks = unix_now() / crate::crypto::totp::AUTHENTICATOR_PERIOD;
        let token = crate::crypto::totp::generate_token(b"topsecret", ticks);
        let body = json!({
            "type": "login",
            "email": "bob@example.com",
            "password": "hunter2",
            "token": token,
        });
        let response = handle_request(&ctx, &store, peer(), body.to_string().as_bytes());
        assert_eq!(response.status, 200);
    }

    #[test]
    fn cacheinfo_reports_online_count() {
        let ctx = ServerContext::for_tests(Config::default());
        let store = FakeStore::with_account(account_with_password("x"));

        let body = json!({"type": "cacheinfo"});
        let response = handle_request(&ctx, &store, peer(), body.to_string().as_bytes());
        assert_eq!(response.status, 200);
        assert_eq!(response.body["playersonline"], json!(42));
    }

    #[test]
    fn unknown_type_and_bad_json_yield_error_code_two() {
        let ctx = ServerContext::for_tests(Config::default());
        let store = FakeStore::with_account(account_with_password("x"));

        let response =
            handle_request(&ctx, &store, peer(), br#"{"type": "news"}"#);
        assert_eq!(response.status, 400);
        assert_eq!(response.body["errorCode"], json!(2));

        let response = handle_request(&ctx, &store, peer(), b"not json");
        assert_eq!(response.status, 400);
        assert_eq!(response.body["errorCode"], json!(2));
    }
}
