//! rv - GMPI rendezvous master
//!
//! CLI entry point for serving a job step, launching workers, and worker-side
//! diagnostics.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::unix::process::ExitStatusExt;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use gmpi_rendezvous::cli::{Cli, Command, StepArgs, WorkerCommand};
use gmpi_rendezvous::config::Config;
use gmpi_rendezvous::env::GMPI_ID;
use gmpi_rendezvous::{
    ChildSignaler, Coordinator, CoordinatorHandle, EnvTable, InitMessage, JobStepContext, Phase, ProcessEnv,
    RendezvousConfig, WorkerClient,
};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // stdout belongs to the workers and to `serve` output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install log subscriber: {}", e))?;

    debug!(?level, "Logging initialized");
    Ok(())
}

// The process environment is written while starting the master, so keep the
// runtime on one thread.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { step, kill_pids } => {
            debug!(?step, ?kill_pids, "main: matched Serve command");
            cmd_serve(config.rendezvous, &step, &kill_pids).await
        }
        Command::Run { step, command } => {
            debug!(?step, ?command, "main: matched Run command");
            let code = cmd_run(config.rendezvous, &step, &command).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Command::Worker { command } => {
            debug!(?command, "main: matched Worker command");
            cmd_worker(command).await
        }
    }
}

fn context_for(step: &StepArgs) -> Arc<JobStepContext> {
    Arc::new(JobStepContext::new(step.job_id, step.step_id, step.ntasks))
}

/// Start the master and print the environment for externally launched workers
async fn cmd_serve(config: RendezvousConfig, step: &StepArgs, kill_pids: &[u32]) -> Result<()> {
    let signaler = ChildSignaler::new();
    for pid in kill_pids {
        signaler.track(*pid);
    }

    // SAFETY: the runtime is current-thread and no other thread is running
    let mut process_env = unsafe { ProcessEnv::new() };
    let mut child_env = EnvTable::new();
    let coordinator = Coordinator::new(context_for(step), config, Arc::new(signaler));
    let Some(mut handle) = coordinator
        .start(&mut process_env, &mut child_env)
        .await
        .context("Failed to start GMPI master")?
    else {
        println!("{} GMPI_PORT already set, master not started", "!".yellow());
        return Ok(());
    };

    for (key, value) in child_env.iter() {
        println!("export {}={}", key.cyan(), value);
    }

    if wait_or_interrupt(&mut handle).await {
        handle.join().await?;
    }
    Ok(())
}

/// Wait for the master to end; Ctrl-C requests a stop instead
async fn wait_or_interrupt(handle: &mut CoordinatorHandle) -> bool {
    let phase = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        phase = handle.wait_for_phase(Phase::Stopped) => Some(phase),
    };

    match phase {
        None => {
            info!("Interrupted, stopping GMPI master");
            handle.stop();
            false
        }
        Some(phase) => {
            debug!(?phase, "wait_or_interrupt: master ended");
            true
        }
    }
}

/// Exit code for a finished worker
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}

/// Start the master, launch `ntasks` workers, and wait for them
async fn cmd_run(config: RendezvousConfig, step: &StepArgs, command: &[String]) -> Result<i32> {
    let (program, args) = command.split_first().ok_or_else(|| eyre::eyre!("No worker command given"))?;

    let signaler = ChildSignaler::new();
    // SAFETY: the runtime is current-thread and no other thread is running
    let mut process_env = unsafe { ProcessEnv::new() };
    let mut child_env = EnvTable::new();
    let coordinator = Coordinator::new(context_for(step), config, Arc::new(signaler.clone()));
    let handle = coordinator
        .start(&mut process_env, &mut child_env)
        .await
        .context("Failed to start GMPI master")?;
    if handle.is_none() {
        info!("GMPI_PORT already set, launching workers without a master");
    }

    let mut children = Vec::with_capacity(step.ntasks as usize);
    for rank in 0..step.ntasks {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);
        child_env.apply(&mut cmd);
        cmd.env(GMPI_ID, rank.to_string());

        let child = cmd
            .spawn()
            .context(format!("Failed to spawn worker {} ({})", rank, program))?;
        if let Some(pid) = child.id() {
            signaler.track(pid);
        }
        debug!(rank, pid = ?child.id(), "cmd_run: worker spawned");
        children.push((rank, child));
    }

    let mut first_failure = 0;
    for (rank, mut child) in children {
        let status = child.wait().await.context(format!("Failed to wait for worker {}", rank))?;
        let code = exit_code(status);
        if code != 0 {
            warn!(rank, code, "Worker exited with failure");
            if first_failure == 0 {
                first_failure = code;
            }
        } else {
            debug!(rank, "cmd_run: worker finished");
        }
    }

    if let Some(handle) = handle {
        handle.stop();
    }
    Ok(first_failure)
}

async fn cmd_worker(command: WorkerCommand) -> Result<()> {
    match command {
        WorkerCommand::Announce {
            master,
            magic,
            rank,
            board,
            high,
            low,
            numa,
            listen_port,
            timeout_secs,
        } => {
            let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), listen_port);
            let listener = TcpListener::bind(bind).await.context("Failed to bind worker port")?;
            let port = listener.local_addr()?.port();

            let init = InitMessage {
                magic,
                rank,
                port_board_id: board,
                unique_high_id: high,
                unique_low_id: low,
                numa_node: numa,
                remote_pid: std::process::id(),
                remote_port: u32::from(port),
            };

            let client = WorkerClient::new(master).with_timeout(Duration::from_secs(timeout_secs));
            let map = client.announce(&init, &listener).await?;

            println!("{} Received map ({} ranks)", "✓".green(), map.global.len());
            for (i, entry) in map.global.iter().enumerate() {
                println!(
                    "  {} board={} high={} low={} numa={}",
                    format!("[{}]", i).yellow(),
                    entry.port_board_id,
                    entry.unique_high_id,
                    entry.unique_low_id,
                    entry.numa_node
                );
            }
            println!("  local: {:?}", map.local);
            Ok(())
        }
        WorkerCommand::Abort { master, magic } => {
            WorkerClient::new(master).abort(magic).await?;
            println!("{} Abort sent to {}", "✓".green(), master);
            Ok(())
        }
    }
}
