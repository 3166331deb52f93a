//! Map delivery phase
//!
//! Opens a fresh connection to every worker, in rank order, and sends the
//! shared global map followed by that worker's local map. Any failure here
//! leaves a worker without its addressing data, so it is fatal.

use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpSocket;
use tracing::{debug, warn};

use super::listener::Collected;
use crate::codec;
use crate::error::{RendezvousError, Result};
use crate::map::{build_global_map, build_local_map};

/// Compose the full map message for every rank, rank-ascending
pub fn compose_all(collected: &Collected) -> Result<Vec<String>> {
    let global = build_global_map(&collected.registry)?.encode();
    let task_count = collected.registry.task_count() as u32;

    (0..task_count)
        .map(|rank| {
            let local = build_local_map(&collected.registry, &collected.addresses, rank)?;
            Ok(codec::compose_map_message(&global, &local.encode()))
        })
        .collect()
}

/// Where rank `rank` waits for its map
fn worker_addr(collected: &Collected, rank: u32) -> Result<SocketAddr> {
    let ip = collected
        .addresses
        .get(rank)
        .ok_or(crate::map::MapError::MissingAddress { rank })?;
    let announced = collected
        .registry
        .identity(rank)
        .ok_or(crate::map::MapError::Incomplete { missing: vec![rank] })?
        .remote_port;
    let port = u16::try_from(announced)
        .ok()
        .filter(|p| *p != 0)
        .ok_or(RendezvousError::InvalidPort { rank, port: announced })?;
    Ok(SocketAddr::new(ip, port))
}

async fn send_one(rank: u32, addr: SocketAddr, message: &str) -> Result<()> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(|source| RendezvousError::Connect { rank, addr, source })?;

    if let Err(e) = socket.set_reuseaddr(true) {
        warn!(rank, error = %e, "setsockopt in GMPI master");
    }

    let mut stream = socket
        .connect(addr)
        .await
        .map_err(|source| RendezvousError::Connect { rank, addr, source })?;

    let send_err = |source| RendezvousError::Send { rank, addr, source };
    stream.write_all(message.as_bytes()).await.map_err(send_err)?;
    stream.shutdown().await.map_err(send_err)?;
    Ok(())
}

/// Deliver each worker its map
pub async fn respond(collected: &Collected) -> Result<()> {
    let messages = compose_all(collected)?;

    for (rank, message) in messages.iter().enumerate() {
        let rank = rank as u32;
        let addr = worker_addr(collected, rank)?;
        debug!(rank, %addr, bytes = message.len(), "respond: sending map");
        send_one(rank, addr, message).await?;
    }

    debug!(tasks = messages.len(), "GMPI master responded to all GMPI processes");
    Ok(())
}
