//! Job step signal delivery

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eyre::Result;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

/// Delivers a signal to every task of a job step
#[async_trait]
pub trait StepSignaler: Send + Sync {
    async fn signal_step(&self, job_id: u32, step_id: u32, signal: Signal) -> Result<()>;
}

/// Signals the worker processes this launcher spawned
#[derive(Debug, Default, Clone)]
pub struct ChildSignaler {
    pids: Arc<Mutex<Vec<Pid>>>,
}

impl ChildSignaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a spawned worker
    pub fn track(&self, pid: u32) {
        debug!(pid, "ChildSignaler::track: called");
        if let Ok(mut pids) = self.pids.lock() {
            pids.push(Pid::from_raw(pid as i32));
        }
    }

    pub fn tracked(&self) -> usize {
        self.pids.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl StepSignaler for ChildSignaler {
    async fn signal_step(&self, job_id: u32, step_id: u32, signal: Signal) -> Result<()> {
        let pids = self
            .pids
            .lock()
            .map_err(|_| eyre::eyre!("Child pid table poisoned"))?
            .clone();
        info!(job_id, step_id, ?signal, tasks = pids.len(), "Signaling job step");

        let mut failures = 0;
        for pid in pids {
            // ESRCH just means the worker already exited
            match kill(pid, signal) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => {
                    warn!(%pid, error = %e, "Failed to signal worker");
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            return Err(eyre::eyre!(
                "Failed to signal step {}.{}: {} worker(s) could not be signaled",
                job_id,
                step_id,
                failures
            ));
        }
        Ok(())
    }
}
