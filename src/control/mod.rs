//! Control-plane collaborators: who publishes routes and who runs backends.
//!
//! Verification never talks to these directly; test scenarios mutate routing
//! state through them between verifier calls.

#[cfg(feature = "control")]
pub mod lrp;
#[cfg(feature = "control")]
pub mod receptor;
#[cfg(feature = "control")]
pub mod router_api;

use std::time::Duration;

use async_trait::async_trait;

use crate::endpoint::Endpoint;
use crate::error::ControlError;

/// Request for a new front-end route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    /// Router host the route is published on.
    pub router_host: String,
    /// Fixed external port, or `None` to allocate one.
    pub external_port: Option<u16>,
}

impl RouteSpec {
    pub fn allocate(router_host: impl Into<String>) -> Self {
        Self {
            router_host: router_host.into(),
            external_port: None,
        }
    }

    pub fn fixed(router_host: impl Into<String>, external_port: u16) -> Self {
        Self {
            router_host: router_host.into(),
            external_port: Some(external_port),
        }
    }
}

/// A running (or desired) backend process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendHandle {
    /// Scheduler-specific id, e.g. an LRP process guid.
    pub id: String,
    /// Identity the backend prefixes its responses with.
    pub identity: String,
    pub listen_port: u16,
}

/// Publishes and withdraws front-end → backend mappings.
#[async_trait]
pub trait RoutingControl: Send + Sync {
    async fn create_route(&self, spec: &RouteSpec) -> Result<Endpoint, ControlError>;

    async fn map_route(&self, frontend: &Endpoint, backend: &Endpoint) -> Result<(), ControlError>;

    async fn unmap_route(&self, frontend: &Endpoint, backend: &Endpoint)
        -> Result<(), ControlError>;

    async fn delete_route(&self, frontend: &Endpoint) -> Result<(), ControlError>;
}

/// Starts and stops identity-tagged backends.
#[async_trait]
pub trait WorkloadControl: Send + Sync {
    async fn create_backend(
        &self,
        identity: &str,
        listen_port: u16,
    ) -> Result<BackendHandle, ControlError>;

    async fn delete_backend(&self, handle: &BackendHandle) -> Result<(), ControlError>;

    /// True once the backend is running, false if `budget` elapsed first.
    async fn wait_running(
        &self,
        handle: &BackendHandle,
        budget: Duration,
    ) -> Result<bool, ControlError>;
}
