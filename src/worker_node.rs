use crate::config::{bind_address, Limits, WorkerConfig};
use crate::encoding::{map_encode, reduce_aggregate, reduce_encode};
use crate::error::{MrError, Result};
use crate::transport::{read_message, write_message};
use crate::{Command, Request, SHUTDOWN_ACK};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Result of handling one request.
#[derive(Debug, PartialEq, Eq)]
pub struct Response {
    pub body: Vec<u8>,
    /// Set once a shutdown request has been acknowledged.
    pub stop: bool,
}

/// Dispatches one raw request message by its command tag.
pub fn respond(message: &[u8], limits: &Limits) -> Response {
    let request = Request::decode(message);
    let body = match request.command {
        Some(Command::Map) => map_encode(request.payload, limits),
        Some(Command::Reduce) => {
            let table = reduce_aggregate(request.payload, limits);
            reduce_encode(&table, limits)
        }
        Some(Command::Shutdown) => {
            return Response {
                body: SHUTDOWN_ACK.to_vec(),
                stop: true,
            }
        }
        None => Vec::new(),
    };
    Response { body, stop: false }
}

/// Cooperative stop signal for a single server; servers never share one.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One request/reply endpoint. Serves requests one at a time until it
/// acknowledges a shutdown or its stop handle fires, then drops the listener
/// so later connections are refused.
pub struct WorkerServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    recv_timeout: Duration,
    io_timeout: Duration,
    limits: Limits,
}

impl WorkerServer {
    pub async fn bind(addr: &str, config: &WorkerConfig) -> Result<WorkerServer> {
        let addr = bind_address(addr)?;
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| MrError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(WorkerServer {
            listener,
            local_addr,
            running: Arc::new(AtomicBool::new(true)),
            recv_timeout: config.recv_timeout(),
            io_timeout: config.io_timeout(),
            limits: config.limits,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.running.clone())
    }

    /// Returns the number of requests served.
    pub async fn serve(self) -> usize {
        info!(addr = %self.local_addr, "worker serving");
        let mut served = 0;

        while self.running.load(Ordering::Acquire) {
            let accepted =
                next_connection(self.listener.accept(), self.recv_timeout, self.local_addr).await;
            let stream = match accepted {
                Some((stream, peer)) => {
                    debug!(addr = %self.local_addr, %peer, "connection");
                    stream
                }
                // re-check the flag
                None => continue,
            };

            match self.handle(stream).await {
                Ok(stop) => {
                    served += 1;
                    if stop {
                        self.running.store(false, Ordering::Release);
                        info!(addr = %self.local_addr, "shutdown acknowledged");
                    }
                }
                Err(e) => warn!(addr = %self.local_addr, "request dropped: {}", e),
            }
        }

        info!(addr = %self.local_addr, served, "worker stopped");
        served
    }

    async fn handle(&self, mut stream: TcpStream) -> std::io::Result<bool> {
        let message = timeout(
            self.io_timeout,
            read_message(&mut stream, self.limits.max_message_len),
        )
        .await
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;

        let response = respond(&message, &self.limits);
        debug!(
            addr = %self.local_addr,
            request = message.len(),
            reply = response.body.len(),
            "handled"
        );

        timeout(self.io_timeout, write_message(&mut stream, &response.body))
            .await
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;
        Ok(response.stop)
    }
}

/// Waits at most `wait` for `accept`. A failed accept is logged and followed
/// by a pause of the same length, so a listener that keeps failing (out of
/// file descriptors, say) does not spin.
async fn next_connection<T, F>(accept: F, wait: Duration, addr: SocketAddr) -> Option<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match timeout(wait, accept).await {
        Err(_) => None,
        Ok(Err(e)) => {
            warn!(%addr, "accept failed: {}", e);
            sleep(wait).await;
            None
        }
        Ok(Ok(conn)) => Some(conn),
    }
}

/// A server running on its own task.
pub struct RunningWorker {
    pub addr: SocketAddr,
    pub stop: StopHandle,
    pub handle: JoinHandle<usize>,
}

/// Binds every configured address and spawns one independent server per
/// address. Addresses that fail to bind are logged and skipped.
pub async fn spawn_workers(config: &WorkerConfig) -> Result<Vec<RunningWorker>> {
    config.validate()?;

    let mut running = Vec::new();
    for addr in &config.addresses {
        match WorkerServer::bind(addr, config).await {
            Ok(server) => {
                let addr = server.local_addr();
                let stop = server.stop_handle();
                let handle = tokio::spawn(server.serve());
                running.push(RunningWorker { addr, stop, handle });
            }
            Err(e) => error!("{}", e),
        }
    }
    Ok(running)
}
