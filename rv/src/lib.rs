//! gmpi-rendezvous - GMPI master for GM interconnect MPI job steps
//!
//! Workers of an MPICH-GM job step need each other's GM port identities
//! before they can open direct channels. Each worker connects to the master,
//! announces its identity, and gets back the full map plus the ranks it shares
//! a host and NUMA node with. After that the master stays up and turns any
//! worker's abort notification into a kill of the whole step.
//!
//! # Modules
//!
//! - [`codec`] - Wire grammars for init, map and abort messages
//! - [`registry`] - Per-rank slave table and address table
//! - [`map`] - Global and local map construction
//! - [`coordinator`] - Master task: collect, respond, monitor
//! - [`client`] - Worker side of the protocol
//! - [`env`] - Environment published to workers
//! - [`signal`] - Job step signal delivery
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod env;
pub mod error;
pub mod map;
pub mod net;
pub mod registry;
pub mod signal;

// Re-export commonly used types
pub use client::WorkerClient;
pub use codec::{InitMessage, MapEntry, MapMessage, ParseError};
pub use config::Config;
pub use context::JobStepContext;
pub use coordinator::{Coordinator, CoordinatorHandle, Phase, RendezvousConfig};
pub use env::{EnvTable, Environment, ProcessEnv};
pub use error::RendezvousError;
pub use map::{GlobalMap, LocalMap, build_global_map, build_local_map};
pub use registry::{AddressTable, SlaveIdentity, SlaveRecord, SlaveRegistry};
pub use signal::{ChildSignaler, StepSignaler};
