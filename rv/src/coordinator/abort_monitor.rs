//! Abort monitoring phase
//!
//! After every worker has its map, the master keeps listening for
//! `<<<ABORT_M_ABORT>>>` notifications and turns each valid one into a kill
//! request for the job step. The loop does not end on a successful abort.

use std::sync::Arc;

use nix::sys::signal::Signal;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error};

use super::config::RendezvousConfig;
use crate::codec;
use crate::context::JobStepContext;
use crate::error::{RendezvousError, Result};
use crate::net::{REQUEST_TERMINATOR, read_payload};
use crate::signal::StepSignaler;

/// Check an abort payload against the job's magic
pub fn check_abort(ctx: &JobStepContext, payload: &[u8], max: usize) -> Result<()> {
    if payload.is_empty() {
        return Err(RendezvousError::EmptyMessage);
    }
    let magic = codec::parse_abort_with_limit(payload, max)?;
    if magic != ctx.magic() {
        return Err(RendezvousError::MagicMismatch {
            expected: ctx.magic(),
            got: magic,
        });
    }
    Ok(())
}

/// Run the abort loop until `stop` is raised
///
/// If the stop sender is dropped the loop runs for the rest of the process.
pub async fn monitor(
    listener: &TcpListener,
    ctx: &JobStepContext,
    config: &RendezvousConfig,
    signaler: Arc<dyn StepSignaler>,
    stop: &mut watch::Receiver<bool>,
) -> Result<()> {
    debug!("GMPI master task is waiting for ABORT message");
    let mut stop_open = true;

    loop {
        let accepted = tokio::select! {
            changed = stop.changed(), if stop_open => {
                match changed {
                    Ok(()) if *stop.borrow() => {
                        debug!("monitor: stop requested");
                        return Ok(());
                    }
                    Ok(()) => {}
                    Err(_) => stop_open = false,
                }
                continue;
            }
            accepted = listener.accept() => accepted,
        };

        let (mut stream, peer) = accepted.map_err(RendezvousError::Accept)?;

        let payload = match read_payload(&mut stream, config.max_message_len, REQUEST_TERMINATOR).await {
            Ok(p) => p,
            Err(e) => {
                error!(%peer, error = %e, "GMPI recv (abort-wait) failed");
                continue;
            }
        };
        drop(stream);

        match check_abort(ctx, &payload, config.max_message_len) {
            Ok(()) => {
                debug!(%peer, "Received ABORT message from an MPI process");
                if let Err(e) = signaler.signal_step(ctx.job_id, ctx.step_id, Signal::SIGKILL).await {
                    error!(error = %e, job_id = ctx.job_id, step_id = ctx.step_id, "Failed to kill job step");
                }
            }
            Err(RendezvousError::MagicMismatch { got, .. }) => {
                error!(%peer, got, "GMPI (abort-wait) received bad magic number");
            }
            Err(e) => error!(%peer, error = %e, "GMPI (abort-wait) received spurious message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::mock::RecordingSignaler;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    #[test]
    fn test_check_abort() {
        let ctx = JobStepContext::new(42, 1, 2);
        assert!(check_abort(&ctx, b"<<<ABORT_42_ABORT>>>", 1024).is_ok());
        assert!(matches!(
            check_abort(&ctx, b"<<<ABORT_43_ABORT>>>", 1024),
            Err(RendezvousError::MagicMismatch { expected: 42, got: 43 })
        ));
        assert!(matches!(
            check_abort(&ctx, b"<<<42:0:1:1:1:0:1::1>>>", 1024),
            Err(RendezvousError::Protocol(_))
        ));
        assert!(matches!(check_abort(&ctx, b"", 1024), Err(RendezvousError::EmptyMessage)));
    }

    async fn send(addr: std::net::SocketAddr, payload: &[u8]) {
        let mut s = TcpStream::connect(addr).await.unwrap();
        s.write_all(payload).await.unwrap();
        s.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_monitor_signals_once_per_valid_abort() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = JobStepContext::new(42, 3, 2);
        let (signaler, mut kills) = RecordingSignaler::new();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            monitor(
                &listener,
                &ctx,
                &RendezvousConfig::default(),
                Arc::new(signaler),
                &mut stop_rx,
            )
            .await
        });

        send(addr, b"<<<ABORT_42_ABORT>>>").await;
        let kill = tokio::time::timeout(Duration::from_secs(5), kills.recv()).await.unwrap();
        assert_eq!(kill, Some((42, 3, Signal::SIGKILL)));

        send(addr, b"<<<ABORT_41_ABORT>>>").await;
        send(addr, b"nonsense").await;
        // The loop is still alive and still honors valid aborts
        send(addr, b"<<<ABORT_42_ABORT>>>").await;
        let kill = tokio::time::timeout(Duration::from_secs(5), kills.recv()).await.unwrap();
        assert_eq!(kill, Some((42, 3, Signal::SIGKILL)));
        assert!(kills.try_recv().is_err());

        stop_tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_monitor_keeps_running_when_stop_sender_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ctx = JobStepContext::new(7, 0, 1);
        let (signaler, mut kills) = RecordingSignaler::new();
        let (stop_tx, mut stop_rx) = watch::channel(false);
        drop(stop_tx);

        let task = tokio::spawn(async move {
            monitor(
                &listener,
                &ctx,
                &RendezvousConfig::default(),
                Arc::new(signaler),
                &mut stop_rx,
            )
            .await
        });

        send(addr, b"<<<ABORT_7_ABORT>>>").await;
        let kill = tokio::time::timeout(Duration::from_secs(5), kills.recv()).await.unwrap();
        assert_eq!(kill, Some((7, 0, Signal::SIGKILL)));
        assert!(!task.is_finished());
        task.abort();
    }
}
