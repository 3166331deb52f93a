//! Coordinator error types

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::codec::ParseError;
use crate::map::MapError;

/// Errors raised while running the rendezvous protocol
#[derive(Debug, Error)]
pub enum RendezvousError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ParseError),

    #[error("Bad magic number {got} (expected {expected})")]
    MagicMismatch { expected: u32, got: u32 },

    #[error("Ignoring the message from MPI id={rank}")]
    DuplicateReport { rank: u32 },

    #[error("GMPI id {rank} is out of range (task count {task_count})")]
    RankOutOfRange { rank: u32, task_count: usize },

    #[error("MPI id={rank} was unable to open a GM port")]
    PortNotOpened { rank: u32 },

    #[error("Unable to create GMPI listen port: {0}")]
    ListenSetup(#[source] io::Error),

    #[error("Accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("Receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("Empty message received")]
    EmptyMessage,

    #[error("Rank {rank} announced invalid remote port {port}")]
    InvalidPort { rank: u32, port: u32 },

    #[error("Failed to connect to rank {rank} at {addr}: {source}")]
    Connect {
        rank: u32,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Failed to send map to rank {rank} at {addr}: {source}")]
    Send {
        rank: u32,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Map construction failed: {0}")]
    Map(#[from] MapError),
}

impl RendezvousError {
    /// Whether this error ends the coordinator
    ///
    /// Accept failures are not fatal during collection; the abort monitor
    /// escalates them itself.
    pub fn is_fatal(&self) -> bool {
        match self {
            RendezvousError::Protocol(_)
            | RendezvousError::MagicMismatch { .. }
            | RendezvousError::DuplicateReport { .. }
            | RendezvousError::Accept(_)
            | RendezvousError::Receive(_)
            | RendezvousError::EmptyMessage => false,
            RendezvousError::RankOutOfRange { .. }
            | RendezvousError::PortNotOpened { .. }
            | RendezvousError::ListenSetup(_)
            | RendezvousError::InvalidPort { .. }
            | RendezvousError::Connect { .. }
            | RendezvousError::Send { .. }
            | RendezvousError::Map(_) => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, RendezvousError>;
