//! # Status Service
//!
//! Short query-response exchange over TCP: a 6-byte `info` request gets
//! the current status string back, nothing else. Admission is per peer
//! address: a peer that asked within the configured interval is accepted
//! and immediately dropped without a reply. Each admitted exchange races
//! a five-second alarm.

use crate::error::Result;
use crate::service::{ServerContext, STATUS_MAX_LEN};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing::{debug, info, warn};

const EXCHANGE_ALARM: Duration = Duration::from_secs(5);

pub(crate) struct StatusRecord {
    address: IpAddr,
    timestamp: Instant,
}

/// Admission check: prune records older than the interval, deny peers
/// with a fresh record, and record admitted peers.
pub(crate) fn allow_status_request(
    records: &mut Vec<StatusRecord>,
    address: IpAddr,
    min_request_interval: Duration,
    now: Instant,
) -> bool {
    let cutoff = now.checked_sub(min_request_interval);
    let mut recent = false;
    records.retain(|record| {
        let live = match cutoff {
            Some(cutoff) => record.timestamp >= cutoff,
            // The process is younger than the interval; nothing expires.
            None => true,
        };
        if live && record.address == address {
            recent = true;
        }
        live
    });

    if recent {
        false
    } else {
        records.push(StatusRecord {
            address,
            timestamp: now,
        });
        true
    }
}

async fn status_exchange(mut socket: TcpStream, ctx: Arc<ServerContext>) -> Result<()> {
    let mut buffer = [0u8; STATUS_MAX_LEN];

    socket.read_exact(&mut buffer[..2]).await?;
    let request_len = usize::from(u16::from_le_bytes([buffer[0], buffer[1]]));
    if request_len != 6 {
        debug!(request_len, "invalid status request length");
        return Ok(());
    }

    socket.read_exact(&mut buffer[..request_len]).await?;
    if buffer[0] != 0xFF || buffer[1] != 0xFF {
        debug!(
            first = buffer[0],
            second = buffer[1],
            "expected status request type (255, 255)"
        );
        return Ok(());
    }
    if &buffer[2..6] != b"info" {
        debug!("unknown status request verb");
        return Ok(());
    }

    if let Some(status) = ctx.status.status_string(STATUS_MAX_LEN) {
        socket.write_all(&status).await?;
    }
    Ok(())
}

async fn status_handler(socket: TcpStream, peer: IpAddr, ctx: Arc<ServerContext>) {
    tokio::select! {
        _ = sleep(EXCHANGE_ALARM) => {
            debug!(peer = %peer, "status exchange timed out");
        }
        result = status_exchange(socket, ctx) => {
            if let Err(e) = result {
                debug!(peer = %peer, error = %e, "status exchange failed");
            }
        }
    }
}

/// Accept loop bound to the configured status port.
pub async fn status_service(ctx: Arc<ServerContext>) -> Result<()> {
    let addr = ctx.bind_addr(ctx.config.status_port)?;
    let listener = TcpListener::bind(addr).await?;
    status_service_on(listener, ctx).await
}

/// Accept loop over an already-bound listener (tests bind port zero).
pub async fn status_service_on(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<()> {
    let local = listener.local_addr()?;
    info!(addr = %local, "status service listening");

    let min_interval = ctx.config.status_request_interval();
    let mut records: Vec<StatusRecord> = Vec::new();

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "status service accept failed");
                return Err(e.into());
            }
        };

        // Denied peers are accepted and dropped without a reply.
        if allow_status_request(&mut records, peer.ip(), min_interval, Instant::now()) {
            tokio::spawn(status_handler(socket, peer.ip(), Arc::clone(&ctx)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(500);

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[test]
    fn first_request_is_admitted_second_is_denied() {
        let mut records = Vec::new();
        let now = Instant::now();
        assert!(allow_status_request(&mut records, ip(1), INTERVAL, now));
        assert!(!allow_status_request(&mut records, ip(1), INTERVAL, now));
    }

    #[test]
    fn distinct_peers_do_not_interfere() {
        let mut records = Vec::new();
        let now = Instant::now();
        assert!(allow_status_request(&mut records, ip(1), INTERVAL, now));
        assert!(allow_status_request(&mut records, ip(2), INTERVAL, now));
    }

    #[test]
    fn records_expire_after_the_interval() {
        let mut records = Vec::new();
        let now = Instant::now();
        assert!(allow_status_request(&mut records, ip(1), INTERVAL, now));

        let later = now + INTERVAL + Duration::from_millis(1);
        assert!(allow_status_request(&mut records, ip(1), INTERVAL, later));
        // The expired record was pruned, not accumulated.
        assert_eq!(records.len(), 1);
    }
}
