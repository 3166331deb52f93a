//! Handle to a running coordinator task

use eyre::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::RendezvousError;

/// Where the coordinator task currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for init reports
    Collecting,
    /// Sending maps to workers
    Responding,
    /// Waiting for abort notifications
    Monitoring,
    /// Ended by a stop request
    Stopped,
    /// Ended by a fatal error
    Failed,
}

/// Handle returned by `Coordinator::start`
///
/// Dropping the handle does not stop the task; it keeps running for the life
/// of the process.
#[derive(Debug)]
pub struct CoordinatorHandle {
    port: u16,
    stop_tx: watch::Sender<bool>,
    phase_rx: watch::Receiver<Phase>,
    task: JoinHandle<std::result::Result<(), RendezvousError>>,
}

impl CoordinatorHandle {
    pub(crate) fn new(
        port: u16,
        stop_tx: watch::Sender<bool>,
        phase_rx: watch::Receiver<Phase>,
        task: JoinHandle<std::result::Result<(), RendezvousError>>,
    ) -> Self {
        Self {
            port,
            stop_tx,
            phase_rx,
            task,
        }
    }

    /// Port the master listens on
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn phase(&self) -> Phase {
        *self.phase_rx.borrow()
    }

    /// Wait until the task reaches `phase`, or any terminal phase
    pub async fn wait_for_phase(&mut self, phase: Phase) -> Phase {
        debug!(?phase, "CoordinatorHandle::wait_for_phase: called");
        match self
            .phase_rx
            .wait_for(|p| *p == phase || matches!(p, Phase::Stopped | Phase::Failed))
            .await
        {
            Ok(p) => *p,
            Err(_) => Phase::Failed,
        }
    }

    /// Ask the task to stop at its next stop point
    ///
    /// Stop points are the phase boundaries and the abort wait.
    pub fn stop(&self) {
        debug!("CoordinatorHandle::stop: called");
        let _ = self.stop_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to end and return its outcome
    pub async fn join(self) -> Result<()> {
        debug!("CoordinatorHandle::join: called");
        let outcome = self
            .task
            .await
            .map_err(|e| eyre::eyre!("Coordinator task panicked or was cancelled: {}", e))?;
        outcome.map_err(eyre::Report::new)
    }
}
