//! Client for the TCP router's external port mapping API.
//!
//! Every change re-posts the full backend set for the external port, which
//! replaces whatever mapping the router held before.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{RouteSpec, RoutingControl};
use crate::endpoint::Endpoint;
use crate::error::ControlError;
use crate::port::PortAllocator;

/// Path of the mapping endpoint relative to the router API base URL.
pub const EXTERNAL_PORTS_PATH: &str = "/v0/external_ports";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHostInfo {
    pub ip: String,
    pub port: u16,
}

impl From<&Endpoint> for BackendHostInfo {
    fn from(e: &Endpoint) -> Self {
        Self {
            ip: e.host().to_string(),
            port: e.port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRequest {
    pub external_port: u16,
    pub backends: Vec<BackendHostInfo>,
}

impl MappingRequest {
    pub fn new(external_port: u16, backends: &[Endpoint]) -> Self {
        Self {
            external_port,
            backends: backends.iter().map(BackendHostInfo::from).collect(),
        }
    }
}

pub struct TcpRouterClient {
    http: reqwest::Client,
    base_url: String,
    allocator: Arc<dyn PortAllocator>,
    mappings: Mutex<BTreeMap<u16, Vec<Endpoint>>>,
}

impl TcpRouterClient {
    pub fn new(base_url: impl Into<String>, allocator: Arc<dyn PortAllocator>) -> Self {
        Self::with_http(reqwest::Client::new(), base_url, allocator)
    }

    pub fn with_http(
        http: reqwest::Client,
        base_url: impl Into<String>,
        allocator: Arc<dyn PortAllocator>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            allocator,
            mappings: Mutex::new(BTreeMap::new()),
        }
    }

    /// Backends currently mapped to `external_port`, as last configured.
    pub fn backends(&self, external_port: u16) -> Option<Vec<Endpoint>> {
        self.lock().get(&external_port).cloned()
    }

    /// Replace the mapping for `external_port` with `backends`.
    pub async fn configure(
        &self,
        external_port: u16,
        backends: &[Endpoint],
    ) -> Result<(), ControlError> {
        let url = format!("{}{}", self.base_url, EXTERNAL_PORTS_PATH);
        let body = vec![MappingRequest::new(external_port, backends)];

        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ControlError::Status {
                method: "POST",
                url,
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(external_port, backends = backends.len(), "configured tcp mapping");
        Ok(())
    }

    /// Backends recorded for `frontend`. The table only changes after the
    /// router has accepted the new mapping.
    fn mapped(&self, frontend: &Endpoint) -> Result<Vec<Endpoint>, ControlError> {
        self.lock()
            .get(&frontend.port())
            .cloned()
            .ok_or_else(|| ControlError::UnknownRoute(frontend.clone()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u16, Vec<Endpoint>>> {
        self.mappings.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RoutingControl for TcpRouterClient {
    async fn create_route(&self, spec: &RouteSpec) -> Result<Endpoint, ControlError> {
        let port = match spec.external_port {
            Some(port) => port,
            None => self.allocator.next()?,
        };
        self.lock().entry(port).or_default();
        Ok(Endpoint::new(spec.router_host.clone(), port))
    }

    async fn map_route(&self, frontend: &Endpoint, backend: &Endpoint) -> Result<(), ControlError> {
        let mut backends = self.mapped(frontend)?;
        if !backends.contains(backend) {
            backends.push(backend.clone());
        }
        self.configure(frontend.port(), &backends).await?;
        self.lock().insert(frontend.port(), backends);
        Ok(())
    }

    async fn unmap_route(
        &self,
        frontend: &Endpoint,
        backend: &Endpoint,
    ) -> Result<(), ControlError> {
        let mut backends = self.mapped(frontend)?;
        let before = backends.len();
        backends.retain(|b| b != backend);
        if backends.len() == before {
            return Err(ControlError::UnknownBackend(backend.to_string()));
        }
        self.configure(frontend.port(), &backends).await?;
        self.lock().insert(frontend.port(), backends);
        Ok(())
    }

    async fn delete_route(&self, frontend: &Endpoint) -> Result<(), ControlError> {
        self.mapped(frontend)?;
        self.configure(frontend.port(), &[]).await?;
        self.lock().remove(&frontend.port());
        Ok(())
    }
}
