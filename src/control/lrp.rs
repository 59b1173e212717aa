//! Desired LRP payloads for running the sample receiver under the scheduler.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// Routes key consumed by the TCP route emitter.
pub const TCP_ROUTER_KEY: &str = "tcp-router";

pub const DEFAULT_DOMAIN: &str = "tcp-routing-domain";
pub const DEFAULT_LOG_GUID: &str = "log-guid";
pub const DEFAULT_ROOTFS: &str = "preloaded:cflinuxfs2";
pub const DEFAULT_START_TIMEOUT_SECS: u32 = 60;
pub const DEFAULT_MEMORY_MB: i32 = 128;
pub const DEFAULT_DISK_MB: i32 = 128;

const RECEIVER_PATH: &str = "/tmp/tcp-sample-receiver";
const RECEIVER_URL: &str =
    "https://s3.amazonaws.com/router-release-blobs/tcp-sample-receiver.linux";

/// Scheduler routing info, keyed by router kind.
pub type Routes = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpRoute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_group_guid: Option<String>,
    pub external_port: u16,
    pub container_port: u16,
}

impl TcpRoute {
    pub fn new(external_port: u16, container_port: u16) -> Self {
        Self {
            router_group_guid: None,
            external_port,
            container_port,
        }
    }

    pub fn in_router_group(mut self, guid: impl Into<String>) -> Self {
        self.router_group_guid = Some(guid.into());
        self
    }
}

/// Encode TCP routes under the [`TCP_ROUTER_KEY`].
pub fn tcp_routes(routes: &[TcpRoute]) -> Result<Routes, ControlError> {
    let mut info = Routes::new();
    info.insert(TCP_ROUTER_KEY.to_string(), serde_json::to_value(routes)?);
    Ok(info)
}

/// Decode the TCP routes from scheduler routing info, if present.
pub fn parse_tcp_routes(routes: &Routes) -> Result<Vec<TcpRoute>, ControlError> {
    match routes.get(TCP_ROUTER_KEY) {
        Some(value) => Ok(serde_json::from_value(value.clone())?),
        None => Ok(Vec::new()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAction {
    pub path: String,
    pub args: Vec<String>,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub run: RunAction,
}

impl Action {
    /// `sh -c <script>` as the `vcap` user.
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            run: RunAction {
                path: "sh".into(),
                args: vec!["-c".into(), script.into()],
                user: "vcap".into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    pub protocol: String,
    pub destinations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range: Option<PortRange>,
}

impl SecurityGroupRule {
    /// Outbound HTTP(S) and DNS, enough to download the receiver.
    pub fn download_defaults() -> Vec<Self> {
        vec![
            Self {
                protocol: "tcp".into(),
                destinations: vec!["0.0.0.0-255.255.255.255".into()],
                ports: Some(vec![80, 443]),
                port_range: None,
            },
            Self {
                protocol: "udp".into(),
                destinations: vec!["0.0.0.0/0".into()],
                ports: None,
                port_range: Some(PortRange { start: 53, end: 53 }),
            },
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredLrp {
    pub process_guid: String,
    pub log_guid: String,
    pub domain: String,
    pub instances: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup: Option<Action>,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<Action>,
    pub start_timeout: u32,
    pub rootfs: String,
    pub memory_mb: i32,
    pub disk_mb: i32,
    pub ports: Vec<u16>,
    #[serde(default)]
    pub routes: Routes,
    #[serde(default)]
    pub egress_rules: Vec<SecurityGroupRule>,
}

impl DesiredLrp {
    /// An LRP that downloads and runs the sample receiver on every
    /// `container_ports` entry, tagging responses with `server_id`.
    pub fn tcp_receiver(
        process_guid: impl Into<String>,
        container_ports: &[u16],
        routes: &[TcpRoute],
        server_id: &str,
        instances: i32,
    ) -> Result<Self, ControlError> {
        let first_port = *container_ports
            .first()
            .ok_or_else(|| ControlError::InvalidRequest("at least one container port".into()))?;
        if instances < 0 {
            return Err(ControlError::InvalidRequest(format!(
                "instances must be >= 0, got {instances}"
            )));
        }

        let addresses = container_ports
            .iter()
            .map(|p| format!("0.0.0.0:{p}"))
            .collect::<Vec<_>>()
            .join(",");

        Ok(Self {
            process_guid: process_guid.into(),
            log_guid: DEFAULT_LOG_GUID.into(),
            domain: DEFAULT_DOMAIN.into(),
            instances,
            setup: Some(Action::shell(format!(
                "curl {RECEIVER_URL} -o {RECEIVER_PATH} && chmod +x {RECEIVER_PATH}"
            ))),
            action: Action::shell(format!(
                "{RECEIVER_PATH} --address {addresses} --server-id {server_id}"
            )),
            monitor: Some(Action::shell(format!("nc -z 0.0.0.0 {first_port}"))),
            start_timeout: DEFAULT_START_TIMEOUT_SECS,
            rootfs: DEFAULT_ROOTFS.into(),
            memory_mb: DEFAULT_MEMORY_MB,
            disk_mb: DEFAULT_DISK_MB,
            ports: container_ports.to_vec(),
            routes: tcp_routes(routes)?,
            egress_rules: SecurityGroupRule::download_defaults(),
        })
    }
}

/// Partial update of a desired LRP. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredLrpUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<Routes>,
}

impl DesiredLrpUpdate {
    pub fn instances(mut self, instances: i32) -> Self {
        self.instances = Some(instances);
        self
    }

    pub fn tcp_routes(mut self, routes: &[TcpRoute]) -> Result<Self, ControlError> {
        self.routes = Some(tcp_routes(routes)?);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_none() && self.routes.is_none()
    }
}
