//! Connection load generator for a range of routed ports.
//!
//! `virtual_users` × `port_span` × `concurrent_connections` tasks each
//! repeatedly connect, send one line, linger briefly and disconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinSet;

use crate::endpoint::Endpoint;

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub host: String,
    pub start_port: u16,
    pub port_span: u16,
    pub concurrent_connections: u32,
    pub virtual_users: u32,
    /// Connect/send/close cycles per connection task.
    pub rounds: u32,
    /// Connect attempts per cycle before the cycle is counted as failed.
    pub connect_retries: u32,
    pub connect_timeout: Duration,
    /// How long each connection stays open after writing.
    pub linger: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            start_port: 3333,
            port_span: 1,
            concurrent_connections: 1,
            virtual_users: 1,
            rounds: 100,
            connect_retries: 10,
            connect_timeout: Duration::from_secs(1),
            linger: Duration::from_millis(100),
        }
    }
}

/// Totals across every connection task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderReport {
    pub connected: u64,
    pub failed_connects: u64,
    pub write_errors: u64,
}

#[derive(Default)]
struct Counters {
    connected: AtomicU64,
    failed_connects: AtomicU64,
    write_errors: AtomicU64,
}

/// Run the configured load to completion.
pub async fn run(config: SenderConfig) -> SenderReport {
    let config = Arc::new(config);
    let counters = Arc::new(Counters::default());
    let mut tasks = JoinSet::new();

    for user in 0..config.virtual_users {
        for offset in 0..config.port_span {
            let Some(port) = config.start_port.checked_add(offset) else {
                tracing::warn!(start = config.start_port, offset, "port span past 65535, truncating");
                break;
            };
            for client in 0..config.concurrent_connections {
                let endpoint = Endpoint::new(config.host.clone(), port);
                tasks.spawn(connect_loop(
                    Arc::clone(&config),
                    Arc::clone(&counters),
                    endpoint,
                    user,
                    client,
                ));
            }
        }
    }

    while tasks.join_next().await.is_some() {}

    SenderReport {
        connected: counters.connected.load(Ordering::Relaxed),
        failed_connects: counters.failed_connects.load(Ordering::Relaxed),
        write_errors: counters.write_errors.load(Ordering::Relaxed),
    }
}

async fn connect_loop(
    config: Arc<SenderConfig>,
    counters: Arc<Counters>,
    endpoint: Endpoint,
    user: u32,
    client: u32,
) {
    let message = format!("VUserID:{user} client{client} {endpoint}\n");

    for round in 0..config.rounds {
        let Some(mut stream) = connect(&config, &endpoint, user, client).await else {
            counters.failed_connects.fetch_add(1, Ordering::Relaxed);
            continue;
        };
        counters.connected.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(user, client, round, %endpoint, "connected");

        if let Err(e) = stream.write_all(message.as_bytes()).await {
            counters.write_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(user, client, %endpoint, error = %e, "write failed");
        }
        tokio::time::sleep(config.linger).await;
    }
}

async fn connect(
    config: &SenderConfig,
    endpoint: &Endpoint,
    user: u32,
    client: u32,
) -> Option<TcpStream> {
    for attempt in 0..config.connect_retries.max(1) {
        let connect = TcpStream::connect((endpoint.host(), endpoint.port()));
        match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(Ok(stream)) => return Some(stream),
            Ok(Err(e)) => {
                tracing::debug!(user, client, %endpoint, attempt, error = %e, "unable to connect, trying again")
            }
            Err(_) => {
                tracing::debug!(user, client, %endpoint, attempt, "connect timed out, trying again")
            }
        }
    }
    None
}
