//! Global and local map construction
//!
//! Pure functions over a completed registry. The global map lists every
//! rank's interconnect identity; a rank's local map lists the ranks that share
//! both its host address and its NUMA node.

use thiserror::Error;
use tracing::debug;

use crate::codec::{self, MapEntry};
use crate::registry::{AddressTable, SlaveRegistry};

/// Errors from building maps
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("Registry incomplete, missing ranks {missing:?}")]
    Incomplete { missing: Vec<u32> },

    #[error("Rank {rank} has no recorded address")]
    MissingAddress { rank: u32 },
}

/// Every rank's identity, rank-ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalMap {
    entries: Vec<MapEntry>,
}

impl GlobalMap {
    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wire prefix shared by every worker's message
    pub fn encode(&self) -> String {
        codec::format_global_map(&self.entries)
    }
}

/// Ranks co-located with one rank (same address, same NUMA node)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMap {
    pub rank: u32,
    pub ranks: Vec<u32>,
}

impl LocalMap {
    pub fn contains(&self, rank: u32) -> bool {
        self.ranks.binary_search(&rank).is_ok()
    }

    pub fn encode(&self) -> String {
        codec::format_local_map(&self.ranks)
    }
}

fn ensure_complete(registry: &SlaveRegistry) -> Result<(), MapError> {
    if registry.is_complete() {
        Ok(())
    } else {
        Err(MapError::Incomplete {
            missing: registry.missing(),
        })
    }
}

/// Build the global map from a complete registry
pub fn build_global_map(registry: &SlaveRegistry) -> Result<GlobalMap, MapError> {
    ensure_complete(registry)?;
    let entries: Vec<MapEntry> = registry.records().iter().map(|r| r.identity.map_entry()).collect();
    debug!(entries = entries.len(), "build_global_map: built");
    Ok(GlobalMap { entries })
}

/// Build `rank`'s local map from a complete registry and its address table
pub fn build_local_map(registry: &SlaveRegistry, addresses: &AddressTable, rank: u32) -> Result<LocalMap, MapError> {
    ensure_complete(registry)?;
    let own_addr = addresses.get(rank).ok_or(MapError::MissingAddress { rank })?;
    let own_numa = registry
        .identity(rank)
        .ok_or(MapError::Incomplete { missing: vec![rank] })?
        .numa_node;

    let mut ranks = Vec::new();
    for (j, record) in registry.records().iter().enumerate() {
        let j = j as u32;
        let addr = addresses.get(j).ok_or(MapError::MissingAddress { rank: j })?;
        if addr == own_addr && record.identity.numa_node == own_numa {
            ranks.push(j);
        }
    }

    debug!(rank, local = ranks.len(), "build_local_map: built");
    Ok(LocalMap { rank, ranks })
}
