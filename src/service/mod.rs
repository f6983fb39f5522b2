//! # Services
//!
//! The three listeners and the process-wide state they share.
//!
//! [`ServerContext`] is built once, before any listener binds: config,
//! RSA key, output arena, status board, and the start instant that backs
//! the uptime challenge. [`serve`] runs all three acceptors on the tokio
//! reactor; an acceptor failure is logged and re-raised, stopping every
//! service (by contract this takes the process down — a supervisor may
//! restart it).

pub mod game;
pub mod login;
pub mod status;

use crate::config::Config;
use crate::core::output::OutputArena;
use crate::crypto::rsa::RsaDecryptor;
use crate::error::{GatewayError, Result};
use crate::game::thread::GameHandle;
use crate::game::AccountStore;
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

/// Largest status string the status service will answer with.
pub const STATUS_MAX_LEN: usize = 1024;

/// The published status string, replaced wholesale by the game layer and
/// copied out under the same lock by the status service.
#[derive(Default)]
pub struct StatusBoard {
    status: Mutex<Vec<u8>>,
}

impl StatusBoard {
    pub fn set_status_string(&self, status: impl Into<Vec<u8>>) {
        *self.status.lock() = status.into();
    }

    /// Current status string, or `None` when unset or over `max` bytes.
    pub fn status_string(&self, max: usize) -> Option<Vec<u8>> {
        let status = self.status.lock();
        if status.is_empty() || status.len() > max {
            None
        } else {
            Some(status.clone())
        }
    }
}

/// Process-wide state, initialized during startup. No lazy initialization
/// happens after the first listener binds.
pub struct ServerContext {
    pub config: Config,
    pub rsa: RsaDecryptor,
    pub arena: Arc<OutputArena>,
    pub status: StatusBoard,
    started: Instant,
}

impl ServerContext {
    pub fn new(config: Config, rsa: RsaDecryptor) -> Result<Arc<Self>> {
        config.validate_strict()?;
        Ok(Arc::new(Self {
            config,
            rsa,
            arena: OutputArena::new(),
            status: StatusBoard::default(),
            started: Instant::now(),
        }))
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Listener address for one of the configured ports. Unless the
    /// operator pinned the global address, services bind the IPv6
    /// any-address (dual-stack where the OS default allows it).
    pub fn bind_addr(&self, port: u16) -> Result<SocketAddr> {
        let ip = if self.config.bind_only_global_address {
            self.config
                .ip
                .parse::<IpAddr>()
                .map_err(|e| GatewayError::Config(format!("ip: {e}")))?
        } else {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        };
        Ok(SocketAddr::new(ip, port))
    }

    #[cfg(test)]
    pub(crate) fn for_tests(config: Config) -> Arc<Self> {
        use rsa::RsaPrivateKey;

        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).expect("generate test key");
        let rsa = RsaDecryptor::from_key(key).expect("wrap test key");
        Self::new(config, rsa).expect("test context")
    }
}

/// Run the game, status, and HTTP login services until one of them
/// fails. Individual connections never take a service down; acceptor
/// errors do.
pub async fn serve(
    ctx: Arc<ServerContext>,
    game: GameHandle,
    store: Arc<dyn AccountStore>,
) -> Result<()> {
    let result = tokio::try_join!(
        game::game_service(ctx.clone(), game),
        status::status_service(ctx.clone()),
        login::login_service(ctx, store),
    );

    if let Err(e) = &result {
        error!(error = %e, "service acceptor failed, shutting down");
    }
    result.map(|_| ())
}
