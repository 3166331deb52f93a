//! CLI command definitions and subcommands

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// rv - GMPI rendezvous master and test worker
#[derive(Parser)]
#[command(
    name = "rv",
    about = "Rendezvous master for GM interconnect MPI job steps",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Job step identification shared by `serve` and `run`
#[derive(Debug, Clone, clap::Args)]
pub struct StepArgs {
    /// Job id, also used as the magic token
    #[arg(short, long)]
    pub job_id: u32,

    /// Step id within the job
    #[arg(short, long, default_value = "0")]
    pub step_id: u32,

    /// Number of tasks (ranks) in the step
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub ntasks: u32,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a master and print the worker environment
    Serve {
        #[command(flatten)]
        step: StepArgs,

        /// Process to kill when a worker aborts (repeatable)
        #[arg(short = 'k', long = "kill-pid")]
        kill_pids: Vec<u32>,
    },

    /// Start a master and launch the workers
    Run {
        #[command(flatten)]
        step: StepArgs,

        /// Worker command and its arguments
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },

    /// Act as a worker (diagnostics)
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },
}

/// Worker-side diagnostics
#[derive(Debug, Subcommand)]
pub enum WorkerCommand {
    /// Announce an identity and print the map received
    Announce {
        /// Master address (HOST:PORT)
        #[arg(short, long)]
        master: SocketAddr,

        /// Magic token (the job id)
        #[arg(long)]
        magic: u32,

        /// Rank of this worker
        #[arg(short, long)]
        rank: u32,

        /// GM port board id (must be non-zero)
        #[arg(short, long, default_value = "1")]
        board: u32,

        /// Unique id, high word
        #[arg(long, default_value = "0")]
        high: u32,

        /// Unique id, low word
        #[arg(long, default_value = "0")]
        low: u32,

        /// NUMA node
        #[arg(long, default_value = "0")]
        numa: u32,

        /// Local port to receive the map on (0 picks one)
        #[arg(long, default_value = "0")]
        listen_port: u16,

        /// Seconds to wait for the map
        #[arg(long, default_value = "60")]
        timeout_secs: u64,
    },

    /// Send an abort notification
    Abort {
        /// Master address (HOST:PORT)
        #[arg(short, long)]
        master: SocketAddr,

        /// Magic token (the job id)
        #[arg(long)]
        magic: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["rv", "run", "-j", "42", "-n", "2", "--", "hostname", "-f"]);
        match cli.command {
            Command::Run { step, command } => {
                assert_eq!(step.job_id, 42);
                assert_eq!(step.step_id, 0);
                assert_eq!(step.ntasks, 2);
                assert_eq!(command, vec!["hostname", "-f"]);
            }
            other => panic!("Expected Run, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_serve_with_kill_pids() {
        let cli = Cli::parse_from(["rv", "serve", "-j", "7", "-s", "3", "-n", "4", "-k", "100", "-k", "200"]);
        match cli.command {
            Command::Serve { step, kill_pids } => {
                assert_eq!(step.step_id, 3);
                assert_eq!(kill_pids, vec![100, 200]);
            }
            other => panic!("Expected Serve, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_tasks_rejected() {
        assert!(Cli::try_parse_from(["rv", "serve", "-j", "7", "-n", "0"]).is_err());
    }

    #[test]
    fn test_parse_worker_abort() {
        let cli = Cli::parse_from(["rv", "worker", "abort", "-m", "127.0.0.1:9000", "--magic", "42"]);
        match cli.command {
            Command::Worker {
                command: WorkerCommand::Abort { master, magic },
            } => {
                assert_eq!(master.port(), 9000);
                assert_eq!(magic, 42);
            }
            other => panic!("Expected worker abort, got {:?}", other),
        }
    }
}
