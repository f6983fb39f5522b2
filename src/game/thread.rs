//! # Game-Logic Thread
//!
//! All gameplay state changes run serialized on one dedicated OS thread,
//! fed by a bounded task queue. Network tasks post closures and never
//! touch the world directly; because each connection's reader awaits its
//! own sends, packets from a single client reach the world in arrival
//! order. There is no cross-connection ordering guarantee.

use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::game::session::WaitList;
use crate::game::{AccountStore, GameWorld};
use crate::service::ServerContext;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Default depth of the task queue shared by every connection.
pub const DEFAULT_QUEUE_DEPTH: usize = 4096;

/// Everything the game thread owns.
pub struct GameState {
    pub world: Box<dyn GameWorld>,
    pub store: Arc<dyn AccountStore>,
    pub ctx: Arc<ServerContext>,
    pub wait_list: WaitList,
}

impl GameState {
    pub fn new(
        world: Box<dyn GameWorld>,
        store: Arc<dyn AccountStore>,
        ctx: Arc<ServerContext>,
    ) -> Self {
        Self {
            world,
            store,
            ctx,
            wait_list: WaitList::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }
}

/// A unit of work executed on the game thread.
pub type GameTask = Box<dyn FnOnce(&mut GameState) + Send + 'static>;

/// Clonable sender of game-thread tasks.
#[derive(Clone)]
pub struct GameHandle {
    tx: mpsc::Sender<GameTask>,
}

impl GameHandle {
    /// Queue a task, waiting for room when the queue is full. Fails only
    /// once the game thread has shut down.
    pub async fn post(&self, task: GameTask) -> Result<()> {
        self.tx
            .send(task)
            .await
            .map_err(|_| GatewayError::GameThreadClosed)
    }

    /// Best-effort post from synchronous contexts. A full queue drops the
    /// task; callers use this only for idempotent cleanup work.
    pub fn try_post(&self, task: GameTask) -> bool {
        match self.tx.try_send(task) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("game task queue full, dropping non-critical task");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Start the game-logic thread. The thread exits once every handle has
/// been dropped and the queue has drained.
pub fn spawn(mut state: GameState, queue_depth: usize) -> (GameHandle, thread::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<GameTask>(queue_depth);

    let join = thread::Builder::new()
        .name("game-logic".into())
        .spawn(move || {
            info!("game-logic thread running");
            while let Some(task) = rx.blocking_recv() {
                task(&mut state);
            }
            info!("game-logic thread stopped");
        })
        .expect("spawn game-logic thread");

    (GameHandle { tx }, join)
}
