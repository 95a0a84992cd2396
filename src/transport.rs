//! Request/reply over TCP, one connection per exchange.
//!
//! A message ends where its sender half-closes the stream, so neither side
//! needs a length prefix. Readers stop at `max_len` bytes; anything past the
//! ceiling is discarded rather than treated as an error.

use crate::error::TransportError;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Reads one message: everything up to EOF, capped at `max_len` bytes.
pub async fn read_message<R>(reader: &mut R, max_len: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut message = Vec::new();
    reader.take(max_len as u64).read_to_end(&mut message).await?;
    Ok(message)
}

/// Writes `message` and signals its end by shutting down the write side.
pub async fn write_message(stream: &mut TcpStream, message: &[u8]) -> std::io::Result<()> {
    stream.write_all(message).await?;
    stream.shutdown().await
}

async fn bounded<T, F>(limit: Option<Duration>, addr: &str, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match limit {
        Some(limit) => timeout(limit, fut)
            .await
            .map_err(|_| TransportError::Timeout {
                addr: addr.to_string(),
            })?,
        None => fut.await,
    }
}

/// Sends one request to `addr` and waits for its reply.
pub async fn request(
    addr: &str,
    message: &[u8],
    max_reply_len: usize,
    limit: Option<Duration>,
) -> Result<Vec<u8>, TransportError> {
    bounded(limit, addr, async {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        write_message(&mut stream, message)
            .await
            .map_err(|source| TransportError::Send {
                addr: addr.to_string(),
                source,
            })?;
        read_message(&mut stream, max_reply_len)
            .await
            .map_err(|source| TransportError::Receive {
                addr: addr.to_string(),
                source,
            })
    })
    .await
}

/// Like [`request`], but a failed exchange is logged and yields None. Callers
/// treat it as an empty reply and carry on without retrying.
pub async fn request_or_empty(
    addr: &str,
    message: &[u8],
    max_reply_len: usize,
    limit: Option<Duration>,
) -> Option<Vec<u8>> {
    match request(addr, message, max_reply_len, limit).await {
        Ok(reply) => {
            debug!(addr, sent = message.len(), received = reply.len(), "reply");
            Some(reply)
        }
        Err(e) => {
            warn!("{}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn echo_once(max_len: usize) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let message = read_message(&mut stream, max_len).await.unwrap();
            let mut reply = message.clone();
            reply.reverse();
            write_message(&mut stream, &reply).await.unwrap();
            message
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn request_round_trips_one_message() {
        let (addr, server) = echo_once(1500).await;
        let reply = request(&addr, b"mapabc", 1500, None).await.unwrap();
        assert_eq!(reply, b"cbapam".to_vec());
        assert_eq!(server.await.unwrap(), b"mapabc".to_vec());
    }

    #[tokio::test]
    async fn reply_is_capped_at_ceiling() {
        let (addr, _server) = echo_once(1500).await;
        let reply = request(&addr, b"0123456789", 4, None).await.unwrap();
        assert_eq!(reply, b"9876".to_vec());
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = request(&addr, b"rip", 1500, None).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert_eq!(request_or_empty(&addr, b"rip", 1500, None).await, None);
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _hold = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let err = request(&addr, b"map", 1500, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
    }
}
