//! Single-shot TCP exchange with a routed endpoint.
//!
//! A probe connects, writes one nonce-tagged payload, reads at most
//! [`BUFFER_SIZE`] bytes and drops the socket. It never retries and never
//! interprets the response; both are the verifier's job.

use std::future::Future;
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::endpoint::Endpoint;
use crate::error::ProbeError;

/// Maximum number of response bytes read per probe.
pub const BUFFER_SIZE: usize = 1024;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for each of the write and read phases.
pub const DEFAULT_RW_TIMEOUT: Duration = Duration::from_secs(2);

/// Socket timeouts applied to every probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    pub connect_timeout: Duration,
    pub rw_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            rw_timeout: DEFAULT_RW_TIMEOUT,
        }
    }
}

/// One probe attempt. Built fresh for every attempt so each carries its own nonce.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub endpoint: Endpoint,
    pub payload: Bytes,
    pub connect_timeout: Duration,
    pub rw_timeout: Duration,
}

impl ProbeRequest {
    /// A request whose payload is `"Time is <nanos since epoch>"`.
    pub fn tagged(endpoint: Endpoint, config: ProbeConfig) -> Self {
        Self {
            endpoint,
            payload: nonce_payload(),
            connect_timeout: config.connect_timeout,
            rw_timeout: config.rw_timeout,
        }
    }

    /// Perform the exchange.
    pub async fn send(&self) -> Result<Bytes, ProbeError> {
        let endpoint = &self.endpoint;

        let connect = TcpStream::connect((endpoint.host(), endpoint.port()));
        let mut stream = bounded(self.connect_timeout, connect)
            .await
            .map_err(|source| ProbeError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;
        stream.set_nodelay(true).ok();
        tracing::trace!(%endpoint, "connected");

        bounded(self.rw_timeout, stream.write_all(&self.payload))
            .await
            .map_err(|source| ProbeError::Write {
                endpoint: endpoint.clone(),
                source,
            })?;
        tracing::trace!(%endpoint, len = self.payload.len(), "wrote payload");

        let mut buf = vec![0u8; BUFFER_SIZE];
        let n = bounded(self.rw_timeout, stream.read(&mut buf))
            .await
            .and_then(|n| match n {
                0 => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before any response",
                )),
                n => Ok(n),
            })
            .map_err(|source| ProbeError::Read {
                endpoint: endpoint.clone(),
                source,
            })?;
        buf.truncate(n);
        tracing::trace!(%endpoint, len = n, "read response");

        Ok(Bytes::from(buf))
    }
}

/// Build a payload tagged with the current wall-clock time in nanoseconds.
pub fn nonce_payload() -> Bytes {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    Bytes::from(format!("Time is {nanos}"))
}

async fn bounded<F, T>(limit: Duration, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("timed out after {limit:?}"),
        )),
    }
}

/// Something that can perform one probe against an endpoint.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, endpoint: &Endpoint) -> Result<Bytes, ProbeError>;
}

/// Prober over real TCP sockets.
#[derive(Debug, Clone, Default)]
pub struct TcpProber {
    config: ProbeConfig,
}

impl TcpProber {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ProbeConfig {
        self.config
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, endpoint: &Endpoint) -> Result<Bytes, ProbeError> {
        ProbeRequest::tagged(endpoint.clone(), self.config).send().await
    }
}
