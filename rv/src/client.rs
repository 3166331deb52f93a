//! Worker side of the rendezvous protocol
//!
//! A worker announces its identity to the master, then waits on its own port
//! for the map. Used by the `rv worker` subcommands and the integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::codec::{self, DEFAULT_MAX_MESSAGE_LEN, InitMessage, MapMessage};
use crate::net::{MAP_TERMINATOR, read_payload};

/// Default timeout for waiting on the map
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for talking to a GMPI master
#[derive(Debug, Clone)]
pub struct WorkerClient {
    master: SocketAddr,
    timeout: Duration,
    max_message_len: usize,
}

impl WorkerClient {
    pub fn new(master: SocketAddr) -> Self {
        Self {
            master,
            timeout: DEFAULT_TIMEOUT,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }

    /// Set a custom timeout for the map wait
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send one message on a fresh connection
    async fn send(&self, payload: &str) -> Result<()> {
        debug!(master = %self.master, payload, "WorkerClient: sending");
        let mut stream = TcpStream::connect(self.master)
            .await
            .context("Failed to connect to GMPI master")?;
        stream
            .write_all(payload.as_bytes())
            .await
            .context("Failed to send message")?;
        stream.shutdown().await.context("Failed to close connection")?;
        Ok(())
    }

    /// Announce `init` and wait on `listener` for the map
    ///
    /// `init.remote_port` should be the port `listener` is bound to.
    pub async fn announce(&self, init: &InitMessage, listener: &TcpListener) -> Result<MapMessage> {
        self.send(&codec::format_init(init)).await?;

        let receive = async {
            let (mut stream, peer) = listener.accept().await.context("Failed to accept map connection")?;
            debug!(%peer, "WorkerClient: map connection accepted");
            read_payload(&mut stream, self.max_message_len, MAP_TERMINATOR)
                .await
                .context("Failed to read map")
        };

        let payload = tokio::time::timeout(self.timeout, receive)
            .await
            .map_err(|_| eyre::eyre!("Timed out waiting for map after {:?}", self.timeout))??;

        let map = MapMessage::parse(&payload).context("Received malformed map")?;
        debug!(global = map.global.len(), local = ?map.local, "WorkerClient: map received");
        Ok(map)
    }

    /// Report a fatal condition for the job step
    pub async fn abort(&self, magic: u32) -> Result<()> {
        self.send(&codec::format_abort(magic)).await
    }
}
