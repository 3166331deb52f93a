//! TCP plumbing for the master endpoint
//!
//! Provides helpers for creating the listening socket and reading one
//! message off an accepted connection.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;
use tracing::debug;

use crate::coordinator::RendezvousConfig;
use crate::error::{RendezvousError, Result};

/// Terminator of worker -> master messages
pub const REQUEST_TERMINATOR: &[u8] = b">>>";

/// Terminator of master -> worker messages
pub const MAP_TERMINATOR: &[u8] = b"]]]";

/// Bind the master's listening socket
///
/// Returns the listener and the port actually assigned.
pub async fn bind_listener(config: &RendezvousConfig) -> Result<(TcpListener, u16)> {
    let addr = SocketAddr::new(config.bind_address, config.port);
    debug!(%addr, "bind_listener: binding");

    let listener = TcpListener::bind(addr).await.map_err(RendezvousError::ListenSetup)?;
    let port = listener.local_addr().map_err(RendezvousError::ListenSetup)?.port();

    debug!(port, "bind_listener: bound");
    Ok((listener, port))
}

/// True when `buf` ends with `terminator`, ignoring trailing NUL bytes and
/// ASCII whitespace
fn has_terminator(buf: &[u8], terminator: &[u8]) -> bool {
    let end = buf
        .iter()
        .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    buf[..end].ends_with(terminator)
}

/// Read one message from `stream`
///
/// Stops at `terminator` (trailing NUL or whitespace after it is allowed), at
/// EOF, or once more than `max` bytes arrived. Reading one byte past `max`
/// lets the codec report an oversize message as such.
pub async fn read_payload<R>(stream: &mut R, max: usize, terminator: &[u8]) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let limit = max.saturating_add(1);
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    while buf.len() < limit {
        let want = chunk.len().min(limit - buf.len());
        let n = stream.read(&mut chunk[..want]).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if has_terminator(&buf, terminator) {
            break;
        }
    }

    debug!(bytes = buf.len(), "read_payload: done");
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::AsyncWriteExt;

    fn loopback_config() -> RendezvousConfig {
        RendezvousConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bind_listener_assigns_port() {
        let (listener, port) = bind_listener(&loopback_config()).await.unwrap();
        assert_ne!(port, 0);
        assert_eq!(listener.local_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn test_bind_listener_port_in_use() {
        let (_listener, port) = bind_listener(&loopback_config()).await.unwrap();
        let config = RendezvousConfig {
            port,
            ..loopback_config()
        };
        let err = bind_listener(&config).await.unwrap_err();
        assert!(matches!(err, RendezvousError::ListenSetup(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_read_payload_stops_at_terminator() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"<<<ABORT_1_ABORT>>>").await.unwrap();
        // Connection stays open; the terminator alone ends the read
        let payload = read_payload(&mut server, 1024, REQUEST_TERMINATOR).await.unwrap();
        assert_eq!(payload, b"<<<ABORT_1_ABORT>>>");
        drop(client);
    }

    #[tokio::test]
    async fn test_read_payload_split_writes() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            client.write_all(b"[[[<1:2:3:4>").await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(b"|||<0>]]]").await.unwrap();
        });
        let payload = read_payload(&mut server, 1024, MAP_TERMINATOR).await.unwrap();
        assert_eq!(payload, b"[[[<1:2:3:4>|||<0>]]]");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_payload_eof_and_limit() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"abcdefgh").await.unwrap();
        drop(client);
        // One byte over the limit so the codec can tell the message is too long
        let payload = read_payload(&mut server, 4, REQUEST_TERMINATOR).await.unwrap();
        assert_eq!(payload, b"abcde");

        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let payload = read_payload(&mut server, 4, REQUEST_TERMINATOR).await.unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_read_payload_exact_limit_fits() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"<<<ABORT_1_ABORT>>>").await.unwrap();
        let payload = read_payload(&mut server, 19, REQUEST_TERMINATOR).await.unwrap();
        assert_eq!(payload, b"<<<ABORT_1_ABORT>>>");
        drop(client);
    }

    #[tokio::test]
    async fn test_read_payload_trailing_newline_with_peer_open() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"<<<42:0:5:1:2:0:10::6000>>>\n").await.unwrap();

        let payload = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            read_payload(&mut server, 65536, REQUEST_TERMINATOR),
        )
        .await
        .expect("read should end at the terminator")
        .unwrap();
        assert_eq!(payload, b"<<<42:0:5:1:2:0:10::6000>>>\n");
        assert!(crate::codec::parse_init(&payload).is_ok());
        drop(client);
    }

    #[tokio::test]
    async fn test_read_payload_trailing_nul_with_peer_open() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"<<<ABORT_7_ABORT>>>\0\0").await.unwrap();

        let payload = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            read_payload(&mut server, 1024, REQUEST_TERMINATOR),
        )
        .await
        .expect("read should end at the terminator")
        .unwrap();
        assert_eq!(crate::codec::parse_abort(&payload).unwrap(), 7);
        drop(client);
    }

    #[test]
    fn test_has_terminator() {
        assert!(has_terminator(b"<<<x>>>", REQUEST_TERMINATOR));
        assert!(has_terminator(b"<<<x>>>\r\n\0", REQUEST_TERMINATOR));
        assert!(!has_terminator(b"<<<x>>", REQUEST_TERMINATOR));
        assert!(!has_terminator(b"\n\0", REQUEST_TERMINATOR));
        assert!(!has_terminator(b"", REQUEST_TERMINATOR));
    }
}
