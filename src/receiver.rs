//! Identity-tagging TCP backend.
//!
//! Every chunk read from a connection is written back as
//! `"<server_id>:<chunk>"`, which is the response convention
//! [`extract_identity`](crate::identity::extract_identity) parses. Without a
//! server id the chunk is echoed verbatim.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use crate::control::{BackendHandle, WorkloadControl};
use crate::endpoint::Endpoint;
use crate::error::ControlError;
use crate::probe::BUFFER_SIZE;
use crate::verify::poll::{poll_until, PollError, PollPolicy, Step};

/// A running sample receiver. Dropping it stops the listener and closes
/// every open connection.
pub struct SampleReceiver {
    local_addr: SocketAddr,
    server_id: Option<String>,
    accepted: Arc<AtomicU64>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SampleReceiver {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        server_id: Option<String>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let accepted = Arc::new(AtomicU64::new(0));
        let (tx, rx) = oneshot::channel();

        let prefix = server_id.as_ref().map(|id| format!("{id}:"));
        let task = tokio::spawn(serve(listener, prefix, Arc::clone(&accepted), rx));

        tracing::info!(addr = %local_addr, server_id = ?server_id, "receiver listening");
        Ok(Self {
            local_addr,
            server_id,
            accepted,
            shutdown: Some(tx),
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::from(self.local_addr)
    }

    pub fn server_id(&self) -> Option<&str> {
        self.server_id.as_deref()
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Stop accepting, close open connections and wait for the listener to shut down.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for SampleReceiver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    listener: TcpListener,
    prefix: Option<String>,
    accepted: Arc<AtomicU64>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            res = listener.accept() => match res {
                Ok((stream, peer)) => {
                    accepted.fetch_add(1, Ordering::Relaxed);
                    stream.set_nodelay(true).ok();
                    tracing::debug!(%peer, "accepted connection");
                    connections.spawn(handle(stream, prefix.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            },
        }
    }
    connections.shutdown().await;
}

async fn handle(mut stream: TcpStream, prefix: Option<String>) {
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut out = BytesMut::new();
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "closing connection");
                break;
            }
        };

        out.clear();
        if let Some(prefix) = &prefix {
            out.put_slice(prefix.as_bytes());
        }
        out.put_slice(&buf[..n]);
        if let Err(e) = stream.write_all(&out).await {
            tracing::debug!(error = %e, "closing connection");
            break;
        }
    }
}

/// [`WorkloadControl`] backed by in-process receivers.
///
/// Useful for exercising routing scenarios on one host without a scheduler.
pub struct LocalBackends {
    host: String,
    next_id: AtomicU64,
    receivers: Mutex<HashMap<String, SampleReceiver>>,
}

impl LocalBackends {
    /// Receivers will bind on `host`; a `listen_port` of 0 picks a free port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            next_id: AtomicU64::new(1),
            receivers: Mutex::new(HashMap::new()),
        }
    }

    /// Endpoint a backend is reachable on.
    pub fn endpoint(&self, handle: &BackendHandle) -> Endpoint {
        Endpoint::new(self.host.clone(), handle.listen_port)
    }
}

#[async_trait]
impl WorkloadControl for LocalBackends {
    async fn create_backend(
        &self,
        identity: &str,
        listen_port: u16,
    ) -> Result<BackendHandle, ControlError> {
        let receiver =
            SampleReceiver::bind((self.host.as_str(), listen_port), Some(identity.to_string()))
                .await?;
        let id = format!("local-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = BackendHandle {
            id: id.clone(),
            identity: identity.to_string(),
            listen_port: receiver.local_addr().port(),
        };
        self.receivers.lock().await.insert(id, receiver);
        Ok(handle)
    }

    async fn delete_backend(&self, handle: &BackendHandle) -> Result<(), ControlError> {
        let receiver = self
            .receivers
            .lock()
            .await
            .remove(&handle.id)
            .ok_or_else(|| ControlError::UnknownBackend(handle.id.clone()))?;
        receiver.shutdown().await;
        Ok(())
    }

    async fn wait_running(
        &self,
        handle: &BackendHandle,
        budget: Duration,
    ) -> Result<bool, ControlError> {
        if !self.receivers.lock().await.contains_key(&handle.id) {
            return Err(ControlError::UnknownBackend(handle.id.clone()));
        }
        let addr = (self.host.as_str(), handle.listen_port);
        let policy = PollPolicy::fixed(Duration::from_millis(50));
        let res: Result<((), _), PollError<std::convert::Infallible>> =
            poll_until(&policy, budget, |_| async move {
                match TcpStream::connect(addr).await {
                    Ok(_) => Step::Done(()),
                    Err(e) => Step::Retry(Some(e.to_string())),
                }
            })
            .await;
        Ok(res.is_ok())
    }
}
