//! Per-rank slave table filled during rendezvous
//!
//! One slot per rank. A slot becomes defined on the first valid report for
//! its rank and never changes afterwards. Only the coordinator task touches
//! the registry, so there is no locking here.

use std::net::IpAddr;

use thiserror::Error;
use tracing::debug;

use crate::codec::{InitMessage, MapEntry};

/// Errors from recording a report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Rank {rank} is out of range (task count {task_count})")]
    OutOfRange { rank: u32, task_count: usize },

    #[error("Rank {rank} already reported")]
    AlreadyDefined { rank: u32 },
}

/// Identity a worker announces in its init message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlaveIdentity {
    pub port_board_id: u32,
    pub unique_high_id: u32,
    pub unique_low_id: u32,
    pub numa_node: u32,
    pub remote_pid: u32,
    pub remote_port: u32,
}

impl From<&InitMessage> for SlaveIdentity {
    fn from(msg: &InitMessage) -> Self {
        Self {
            port_board_id: msg.port_board_id,
            unique_high_id: msg.unique_high_id,
            unique_low_id: msg.unique_low_id,
            numa_node: msg.numa_node,
            remote_pid: msg.remote_pid,
            remote_port: msg.remote_port,
        }
    }
}

impl SlaveIdentity {
    /// The part of the identity published in the global map
    pub fn map_entry(&self) -> MapEntry {
        MapEntry {
            port_board_id: self.port_board_id,
            unique_high_id: self.unique_high_id,
            unique_low_id: self.unique_low_id,
            numa_node: self.numa_node,
        }
    }
}

/// One registry slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlaveRecord {
    pub defined: bool,
    pub identity: SlaveIdentity,
}

/// Fixed-size table of slave records indexed by rank
#[derive(Debug, Clone)]
pub struct SlaveRegistry {
    slots: Vec<SlaveRecord>,
    defined: usize,
}

impl SlaveRegistry {
    /// Create a registry with `task_count` zeroed slots
    pub fn new(task_count: usize) -> Self {
        debug!(task_count, "SlaveRegistry::new: called");
        Self {
            slots: vec![SlaveRecord::default(); task_count],
            defined: 0,
        }
    }

    /// Record the first report for `rank`
    pub fn record_init(&mut self, rank: u32, identity: SlaveIdentity) -> Result<(), RegistryError> {
        let task_count = self.slots.len();
        let slot = self
            .slots
            .get_mut(rank as usize)
            .ok_or(RegistryError::OutOfRange { rank, task_count })?;

        if slot.defined {
            debug!(rank, "SlaveRegistry::record_init: duplicate report");
            return Err(RegistryError::AlreadyDefined { rank });
        }

        *slot = SlaveRecord {
            defined: true,
            identity,
        };
        self.defined += 1;
        debug!(rank, defined = self.defined, task_count, "SlaveRegistry::record_init: recorded");
        Ok(())
    }

    /// True once every slot is defined
    pub fn is_complete(&self) -> bool {
        self.defined == self.slots.len()
    }

    pub fn defined_count(&self) -> usize {
        self.defined
    }

    pub fn task_count(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, rank: u32) -> Option<&SlaveRecord> {
        self.slots.get(rank as usize)
    }

    /// Identity of a defined rank
    pub fn identity(&self, rank: u32) -> Option<&SlaveIdentity> {
        self.get(rank).filter(|r| r.defined).map(|r| &r.identity)
    }

    /// Ranks not yet reported, ascending
    pub fn missing(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.defined)
            .map(|(i, _)| i as u32)
            .collect()
    }

    pub fn records(&self) -> &[SlaveRecord] {
        &self.slots
    }
}

/// Peer address each rank reported from
#[derive(Debug, Clone)]
pub struct AddressTable {
    addrs: Vec<Option<IpAddr>>,
}

impl AddressTable {
    pub fn new(task_count: usize) -> Self {
        Self {
            addrs: vec![None; task_count],
        }
    }

    /// Record the source address for `rank`; out-of-range ranks are ignored
    pub fn record(&mut self, rank: u32, addr: IpAddr) {
        if let Some(slot) = self.addrs.get_mut(rank as usize) {
            *slot = Some(addr);
        }
    }

    pub fn get(&self, rank: u32) -> Option<IpAddr> {
        self.addrs.get(rank as usize).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn identity(board: u32) -> SlaveIdentity {
        SlaveIdentity {
            port_board_id: board,
            unique_high_id: 1,
            unique_low_id: 2,
            numa_node: 0,
            remote_pid: 100,
            remote_port: 5000,
        }
    }

    #[test]
    fn test_new_registry_is_empty() {
        let reg = SlaveRegistry::new(3);
        assert!(!reg.is_complete());
        assert_eq!(reg.defined_count(), 0);
        assert_eq!(reg.missing(), vec![0, 1, 2]);
        assert!(reg.identity(0).is_none());
    }

    #[test]
    fn test_record_until_complete() {
        let mut reg = SlaveRegistry::new(2);
        reg.record_init(1, identity(7)).unwrap();
        assert!(!reg.is_complete());
        reg.record_init(0, identity(5)).unwrap();
        assert!(reg.is_complete());
        assert_eq!(reg.identity(0).unwrap().port_board_id, 5);
        assert_eq!(reg.identity(1).unwrap().port_board_id, 7);
    }

    #[test]
    fn test_duplicate_does_not_overwrite() {
        let mut reg = SlaveRegistry::new(2);
        reg.record_init(0, identity(5)).unwrap();
        let err = reg.record_init(0, identity(9)).unwrap_err();
        assert_eq!(err, RegistryError::AlreadyDefined { rank: 0 });
        assert_eq!(reg.identity(0).unwrap().port_board_id, 5);
        assert_eq!(reg.defined_count(), 1);
    }

    #[test]
    fn test_out_of_range() {
        let mut reg = SlaveRegistry::new(2);
        let err = reg.record_init(2, identity(5)).unwrap_err();
        assert_eq!(err, RegistryError::OutOfRange { rank: 2, task_count: 2 });
        assert_eq!(reg.defined_count(), 0);
    }

    #[test]
    fn test_zero_task_registry_is_complete() {
        let reg = SlaveRegistry::new(0);
        assert!(reg.is_complete());
    }

    #[test]
    fn test_address_table() {
        let mut table = AddressTable::new(2);
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        table.record(1, addr);
        table.record(5, addr);
        assert_eq!(table.get(0), None);
        assert_eq!(table.get(1), Some(addr));
        assert_eq!(table.get(5), None);
    }
}
