//! GMPI master coordinator
//!
//! One background task per job step runs three phases in order:
//! - **Collect:** accept an init report from every rank
//! - **Respond:** send each rank the global map plus its local map
//! - **Monitor:** turn abort notifications into job step kills

mod abort_monitor;
mod config;
mod core;
mod handle;
mod listener;
mod responder;

pub use abort_monitor::{check_abort, monitor};
pub use config::RendezvousConfig;
pub use core::Coordinator;
pub use handle::{CoordinatorHandle, Phase};
pub use listener::{Collected, collect};
pub use responder::{compose_all, respond};
