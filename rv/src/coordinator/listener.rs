//! Rendezvous collection phase
//!
//! Accepts one connection per report until every rank has announced itself.
//! Bad reports are logged and dropped; a report that means the session itself
//! is broken (rank out of range, no GM port) ends the coordinator.

use std::net::IpAddr;

use tokio::net::TcpListener;
use tracing::{debug, error};

use super::config::RendezvousConfig;
use crate::codec;
use crate::context::JobStepContext;
use crate::error::{RendezvousError, Result};
use crate::net::{REQUEST_TERMINATOR, read_payload};
use crate::registry::{AddressTable, RegistryError, SlaveIdentity, SlaveRegistry};

/// Everything gathered by a completed rendezvous
#[derive(Debug, Clone)]
pub struct Collected {
    pub registry: SlaveRegistry,
    pub addresses: AddressTable,
}

impl Collected {
    pub fn new(task_count: usize) -> Self {
        Self {
            registry: SlaveRegistry::new(task_count),
            addresses: AddressTable::new(task_count),
        }
    }

    /// Validate one init payload from `peer` and record it
    ///
    /// Returns the rank that was recorded.
    pub fn accept_init(&mut self, ctx: &JobStepContext, payload: &[u8], peer: IpAddr, max: usize) -> Result<u32> {
        if payload.is_empty() {
            return Err(RendezvousError::EmptyMessage);
        }

        let msg = codec::parse_init_with_limit(payload, max)?;
        if msg.magic != ctx.magic() {
            return Err(RendezvousError::MagicMismatch {
                expected: ctx.magic(),
                got: msg.magic,
            });
        }
        if msg.rank as usize >= ctx.task_count() {
            return Err(RendezvousError::RankOutOfRange {
                rank: msg.rank,
                task_count: ctx.task_count(),
            });
        }
        if msg.port_board_id == 0 {
            return Err(RendezvousError::PortNotOpened { rank: msg.rank });
        }

        match self.registry.record_init(msg.rank, SlaveIdentity::from(&msg)) {
            Ok(()) => {}
            Err(RegistryError::AlreadyDefined { rank }) => return Err(RendezvousError::DuplicateReport { rank }),
            Err(RegistryError::OutOfRange { rank, task_count }) => {
                return Err(RendezvousError::RankOutOfRange { rank, task_count });
            }
        }
        self.addresses.record(msg.rank, peer);

        debug!(
            rank = msg.rank,
            %peer,
            board = msg.port_board_id,
            high = msg.unique_high_id,
            low = msg.unique_low_id,
            numa = msg.numa_node,
            pid = msg.remote_pid,
            port = msg.remote_port,
            "Recorded slave data"
        );
        Ok(msg.rank)
    }

    pub fn is_complete(&self) -> bool {
        self.registry.is_complete()
    }
}

/// Collect init reports from every rank
///
/// Never returns until all ranks have reported or a fatal report arrives.
pub async fn collect(listener: &TcpListener, ctx: &JobStepContext, config: &RendezvousConfig) -> Result<Collected> {
    let mut collected = Collected::new(ctx.task_count());
    debug!(tasks = ctx.task_count(), "collect: waiting for GMPI processes");

    while !collected.is_complete() {
        let (mut stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "accept(2) in GMPI master task");
                tokio::time::sleep(config.accept_retry_delay()).await;
                continue;
            }
        };

        let payload = match read_payload(&mut stream, config.max_message_len, REQUEST_TERMINATOR).await {
            Ok(p) => p,
            Err(e) => {
                error!(%peer, error = %e, "GMPI master recv failed");
                continue;
            }
        };
        drop(stream);

        match collected.accept_init(ctx, &payload, peer.ip(), config.max_message_len) {
            Ok(rank) => {
                debug!(
                    rank,
                    defined = collected.registry.defined_count(),
                    tasks = ctx.task_count(),
                    "collect: report accepted"
                );
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => error!(%peer, error = %e, "GMPI master received invalid init message"),
        }
    }

    debug!(tasks = ctx.task_count(), "Received data from all GMPI processes");
    Ok(collected)
}
