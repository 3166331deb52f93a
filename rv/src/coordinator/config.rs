//! Coordinator configuration

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::DEFAULT_MAX_MESSAGE_LEN;

/// Rendezvous coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendezvousConfig {
    /// Address the master listens on
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Listening port (0 picks an ephemeral port)
    #[serde(default)]
    pub port: u16,

    /// Largest inbound message accepted, in bytes
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,

    /// Pause between accept retries during collection
    #[serde(default = "default_accept_retry_delay_ms")]
    pub accept_retry_delay_ms: u64,

    /// Terminate the hosting process on a fatal protocol error
    #[serde(default = "default_exit_on_fatal")]
    pub exit_on_fatal: bool,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_max_message_len() -> usize {
    debug!("default_max_message_len: called");
    DEFAULT_MAX_MESSAGE_LEN
}

fn default_accept_retry_delay_ms() -> u64 {
    debug!("default_accept_retry_delay_ms: called");
    10
}

fn default_exit_on_fatal() -> bool {
    true
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        debug!("RendezvousConfig::default: called");
        Self {
            bind_address: default_bind_address(),
            port: 0,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            accept_retry_delay_ms: 10,
            exit_on_fatal: true,
        }
    }
}

impl RendezvousConfig {
    /// Accept retry pause as a Duration
    pub fn accept_retry_delay(&self) -> Duration {
        Duration::from_millis(self.accept_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RendezvousConfig::default();
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.port, 0);
        assert_eq!(config.max_message_len, 65536);
        assert_eq!(config.accept_retry_delay_ms, 10);
        assert!(config.exit_on_fatal);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: RendezvousConfig = serde_yaml::from_str("port: 7000\nexit_on_fatal: false\n").unwrap();
        assert_eq!(config.port, 7000);
        assert!(!config.exit_on_fatal);
        assert_eq!(config.max_message_len, 65536);
    }

    #[test]
    fn test_accept_retry_delay() {
        let config = RendezvousConfig {
            accept_retry_delay_ms: 250,
            ..Default::default()
        };
        assert_eq!(config.accept_retry_delay(), Duration::from_millis(250));
    }
}
