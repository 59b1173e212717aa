//! Shared fixtures: an in-process TCP router with switchable backends and a
//! prober that replays a fixed script.

#![allow(dead_code)]

pub mod http_stub;

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

use tcp_routing_verify::error::{ControlError, ProbeError};
use tcp_routing_verify::receiver::SampleReceiver;
use tcp_routing_verify::{Endpoint, Prober, RouteSpec, RoutingControl, VerifierConfig};

/// Fast polling so scenario tests finish in well under a second.
pub fn fast_config() -> VerifierConfig {
    VerifierConfig::builder()
        .poll_interval(Duration::from_millis(20))
        .connect_timeout(Duration::from_millis(500))
        .rw_timeout(Duration::from_millis(500))
        .build()
        .unwrap()
}

pub async fn backend(identity: &str) -> SampleReceiver {
    SampleReceiver::bind("127.0.0.1:0", Some(identity.to_string()))
        .await
        .unwrap()
}

/// A port nothing is listening on.
pub async fn closed_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Endpoint::from(addr)
}

// ---------------------------------------------------------------------------
// In-process router
// ---------------------------------------------------------------------------

type Backends = Arc<Mutex<Vec<Endpoint>>>;

struct Route {
    backends: Backends,
    task: JoinHandle<()>,
}

/// Relays each accepted connection to the next mapped backend, round robin.
/// A route with no backends accepts and immediately closes connections.
#[derive(Default)]
pub struct TestRouter {
    routes: tokio::sync::Mutex<HashMap<u16, Route>>,
}

impl TestRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn backends(&self, frontend: &Endpoint) -> Vec<Endpoint> {
        let routes = self.routes.lock().await;
        routes
            .get(&frontend.port())
            .map(|r| r.backends.lock().unwrap().clone())
            .unwrap_or_default()
    }
}

async fn relay(listener: TcpListener, backends: Backends) {
    let mut connections = JoinSet::new();
    let mut next = 0usize;
    loop {
        let Ok((mut inbound, _)) = listener.accept().await else {
            continue;
        };
        let target = {
            let backends = backends.lock().unwrap();
            if backends.is_empty() {
                None
            } else {
                Some(backends[next % backends.len()].clone())
            }
        };
        next = next.wrapping_add(1);

        let Some(target) = target else {
            drop(inbound);
            continue;
        };
        connections.spawn(async move {
            if let Ok(mut outbound) = TcpStream::connect((target.host(), target.port())).await {
                let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
            }
        });
    }
}

#[async_trait]
impl RoutingControl for TestRouter {
    async fn create_route(&self, spec: &RouteSpec) -> Result<Endpoint, ControlError> {
        let listener =
            TcpListener::bind((spec.router_host.as_str(), spec.external_port.unwrap_or(0)))
                .await?;
        let port = listener.local_addr()?.port();
        let backends = Backends::default();
        let task = tokio::spawn(relay(listener, Arc::clone(&backends)));
        self.routes
            .lock()
            .await
            .insert(port, Route { backends, task });
        Ok(Endpoint::new(spec.router_host.clone(), port))
    }

    async fn map_route(&self, frontend: &Endpoint, backend: &Endpoint) -> Result<(), ControlError> {
        let routes = self.routes.lock().await;
        let route = routes
            .get(&frontend.port())
            .ok_or_else(|| ControlError::UnknownRoute(frontend.clone()))?;
        let mut backends = route.backends.lock().unwrap();
        if !backends.contains(backend) {
            backends.push(backend.clone());
        }
        Ok(())
    }

    async fn unmap_route(
        &self,
        frontend: &Endpoint,
        backend: &Endpoint,
    ) -> Result<(), ControlError> {
        let routes = self.routes.lock().await;
        let route = routes
            .get(&frontend.port())
            .ok_or_else(|| ControlError::UnknownRoute(frontend.clone()))?;
        route.backends.lock().unwrap().retain(|b| b != backend);
        Ok(())
    }

    async fn delete_route(&self, frontend: &Endpoint) -> Result<(), ControlError> {
        let route = self
            .routes
            .lock()
            .await
            .remove(&frontend.port())
            .ok_or_else(|| ControlError::UnknownRoute(frontend.clone()))?;
        route.task.abort();
        let _ = route.task.await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted prober
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(&'static str),
    Refuse,
    Drop,
}

/// Replays `script` in order, then repeats `fallback` forever.
pub struct ScriptedProber {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    calls: AtomicU32,
}

impl ScriptedProber {
    pub fn new(script: Vec<Scripted>, fallback: Scripted) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
        })
    }

    pub fn always(step: Scripted) -> Arc<Self> {
        Self::new(Vec::new(), step)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, endpoint: &Endpoint) -> Result<Bytes, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Scripted::Respond(body) => Ok(Bytes::from_static(body.as_bytes())),
            Scripted::Refuse => Err(ProbeError::Connect {
                endpoint: endpoint.clone(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }),
            Scripted::Drop => Err(ProbeError::Read {
                endpoint: endpoint.clone(),
                source: io::Error::from(io::ErrorKind::UnexpectedEof),
            }),
        }
    }
}
