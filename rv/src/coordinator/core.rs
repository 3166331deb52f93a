//! Coordinator task: collect, respond, then watch for aborts

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::config::RendezvousConfig;
use super::handle::{CoordinatorHandle, Phase};
use super::{abort_monitor, listener, responder};
use crate::context::JobStepContext;
use crate::env::{self, Environment};
use crate::error::Result;
use crate::net::bind_listener;
use crate::signal::StepSignaler;

/// The GMPI master for one job step
pub struct Coordinator {
    ctx: Arc<JobStepContext>,
    config: RendezvousConfig,
    signaler: Arc<dyn StepSignaler>,
}

impl Coordinator {
    pub fn new(ctx: Arc<JobStepContext>, config: RendezvousConfig, signaler: Arc<dyn StepSignaler>) -> Self {
        debug!(job_id = ctx.job_id, step_id = ctx.step_id, "Coordinator::new: called");
        Self { ctx, config, signaler }
    }

    /// Start the master task in the background
    ///
    /// Returns `Ok(None)` without touching anything when `GMPI_PORT` is
    /// already set in `process_env`: the worker-side launcher then handles
    /// rendezvous itself. Otherwise binds the listening port, spawns the
    /// task, and publishes the GMPI variables into both environments. Does
    /// not wait for rendezvous.
    pub async fn start(
        self,
        process_env: &mut dyn Environment,
        child_env: &mut dyn Environment,
    ) -> Result<Option<CoordinatorHandle>> {
        if env::is_bypassed(process_env) {
            info!("GMPI_PORT already set, not starting GMPI master");
            return Ok(None);
        }

        let (listener, port) = bind_listener(&self.config).await.inspect_err(|e| {
            error!(error = %e, "Unable to create GMPI listen port");
        })?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let (phase_tx, phase_rx) = watch::channel(Phase::Collecting);

        let ctx = self.ctx.clone();
        let task = tokio::spawn(supervise(listener, ctx, self.config, self.signaler, stop_rx, phase_tx));

        let magic = self.ctx.magic();
        let task_count = self.ctx.task_count();
        env::publish(process_env, port, magic, task_count);
        env::publish(child_env, port, magic, task_count);

        info!(port, magic, task_count, "Started GMPI master task");
        Ok(Some(CoordinatorHandle::new(port, stop_tx, phase_rx, task)))
    }
}

/// Run the phases and apply the fatal-error policy
async fn supervise(
    listener: TcpListener,
    ctx: Arc<JobStepContext>,
    config: RendezvousConfig,
    signaler: Arc<dyn StepSignaler>,
    mut stop: watch::Receiver<bool>,
    phase: watch::Sender<Phase>,
) -> Result<()> {
    let exit_on_fatal = config.exit_on_fatal;
    let result = run(&listener, &ctx, &config, signaler, &mut stop, &phase).await;

    match &result {
        Ok(()) => {
            debug!("GMPI master task stopped");
            phase.send_replace(Phase::Stopped);
        }
        Err(e) => {
            error!(error = %e, job_id = ctx.job_id, step_id = ctx.step_id, "GMPI master task failed");
            phase.send_replace(Phase::Failed);
            if exit_on_fatal {
                std::process::exit(1);
            }
        }
    }
    result
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}

async fn run(
    listener: &TcpListener,
    ctx: &JobStepContext,
    config: &RendezvousConfig,
    signaler: Arc<dyn StepSignaler>,
    stop: &mut watch::Receiver<bool>,
    phase: &watch::Sender<Phase>,
) -> Result<()> {
    debug!(pid = std::process::id(), "GMPI master task started");

    let collected = listener::collect(listener, ctx, config).await?;
    if stop_requested(stop) {
        return Ok(());
    }

    phase.send_replace(Phase::Responding);
    responder::respond(&collected).await?;
    drop(collected);
    if stop_requested(stop) {
        return Ok(());
    }

    phase.send_replace(Phase::Monitoring);
    abort_monitor::monitor(listener, ctx, config, signaler, stop).await
}
