//! # worldgate
//!
//! Protocol front-end for a persistent multiplayer game server.
//!
//! Three cooperating listeners share one tokio reactor:
//!
//! - **game** — long-lived encrypted sessions: RSA-1024 key exchange,
//!   XTEA-ECB payload cipher, sequence-numbered length-prefixed frames,
//!   optional raw-deflate for large server packets;
//! - **status** — rate-limited `info` queries answered with the
//!   published status string;
//! - **login** — HTTP/JSON authentication minting the one-shot session
//!   tokens the game handshake consumes.
//!
//! The game world and persistent storage stay outside this crate; they
//! plug in through [`game::GameWorld`] and [`game::AccountStore`]. All
//! gameplay state changes are serialized on a dedicated game-logic
//! thread ([`game::thread::GameHandle`]).
//!
//! ## Bringing a server up
//!
//! ```no_run
//! use std::sync::Arc;
//! use worldgate::crypto::rsa::RsaDecryptor;
//! use worldgate::game::thread::{self, GameState, DEFAULT_QUEUE_DEPTH};
//! use worldgate::{serve, Config, ServerContext};
//! # struct World; impl worldgate::game::GameWorld for World {
//! #     fn world_state(&self) -> worldgate::game::WorldState { worldgate::game::WorldState::Open }
//! #     fn player_count(&self) -> u32 { 0 }
//! #     fn player_by_guid(&self, _: u32) -> Option<u32> { None }
//! #     fn player_by_account(&self, _: u32) -> Option<u32> { None }
//! #     fn preload_player(&mut self, _: u32) -> Option<worldgate::game::PlayerPreview> { None }
//! #     fn load_player(&mut self, _: u32) -> Option<u32> { None }
//! #     fn place_creature(&mut self, _: u32, _: worldgate::game::Position, _: bool) -> bool { false }
//! #     fn login_position(&self, _: u32) -> worldgate::game::Position { Default::default() }
//! #     fn temple_position(&self, _: u32) -> worldgate::game::Position { Default::default() }
//! #     fn on_player_attach(&mut self, _: &Arc<worldgate::service::game::Connection>, _: u32) {}
//! #     fn release_player(&mut self, _: u32) {}
//! # }
//! # struct Store;
//! # impl worldgate::game::AccountStore for Store {
//! #     fn account_by_email(&self, _: &str) -> Result<Option<worldgate::game::AccountRecord>, worldgate::error::StoreError> { Ok(None) }
//! #     fn create_session(&self, _: &[u8], _: u32, _: std::net::IpAddr) -> Result<(), worldgate::error::StoreError> { Ok(()) }
//! #     fn characters(&self, _: u32) -> Result<Vec<worldgate::game::CharacterRecord>, worldgate::error::StoreError> { Ok(vec![]) }
//! #     fn online_count(&self) -> Result<u32, worldgate::error::StoreError> { Ok(0) }
//! #     fn load_session(&self, _: &[u8], _: &str) -> Result<Option<worldgate::game::SessionRecord>, worldgate::error::StoreError> { Ok(None) }
//! #     fn ip_ban(&self, _: std::net::IpAddr) -> Result<Option<worldgate::game::BanRecord>, worldgate::error::StoreError> { Ok(None) }
//! #     fn account_ban(&self, _: u32) -> Result<Option<worldgate::game::BanRecord>, worldgate::error::StoreError> { Ok(None) }
//! #     fn is_namelocked(&self, _: u32) -> Result<bool, worldgate::error::StoreError> { Ok(false) }
//! # }
//!
//! # async fn run() -> worldgate::Result<()> {
//! let config = Config::from_file("config.toml")?;
//! let rsa = RsaDecryptor::from_pem_file("key.pem")?;
//! let ctx = ServerContext::new(config, rsa)?;
//!
//! let store = Arc::new(Store);
//! let state = GameState::new(Box::new(World), store.clone(), ctx.clone());
//! let (game, _join) = thread::spawn(state, DEFAULT_QUEUE_DEPTH);
//!
//! serve(ctx, game, store).await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod game;
pub mod protocol;
pub mod service;

pub use config::Config;
pub use error::{GatewayError, Result};
pub use service::{serve, ServerContext};
