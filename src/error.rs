use std::io;
use std::time::Duration;

use crate::endpoint::Endpoint;

/// Errors from a single probe attempt, tagged by the phase that failed.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    #[error("write to {endpoint} failed: {source}")]
    Write {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    #[error("read from {endpoint} failed: {source}")]
    Read {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
}

impl ProbeError {
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            Self::Connect { endpoint, .. }
            | Self::Write { endpoint, .. }
            | Self::Read { endpoint, .. } => endpoint,
        }
    }

    /// True when no connection was established at all.
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}

/// Errors from parsing a backend response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("malformed response: {reason} (response: {response:?})")]
    MalformedResponse {
        reason: &'static str,
        response: String,
    },
}

/// Errors from verifier operations. Every variant carries enough context to
/// diagnose a failing run from its message alone.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error(
        "{endpoint} not reachable after {attempts} attempts in {elapsed:?} (last observed: {})",
        .last_observed.as_deref().unwrap_or("nothing")
    )]
    Timeout {
        endpoint: Endpoint,
        attempts: u32,
        elapsed: Duration,
        last_observed: Option<String>,
    },

    #[error(
        "{endpoint} answered with identity {last_observed:?}, expected {expected:?} \
         ({attempts} attempts in {elapsed:?})"
    )]
    IdentityMismatch {
        endpoint: Endpoint,
        expected: String,
        last_observed: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("{endpoint} answered with identity {observed:?}, not one of {expected:?}")]
    UnexpectedIdentity {
        endpoint: Endpoint,
        observed: String,
        expected: Vec<String>,
    },

    #[error("{endpoint} routed all {samples} samples to {observed:?}, expected distribution over {expected:?}")]
    NotDistributed {
        endpoint: Endpoint,
        observed: String,
        expected: Vec<String>,
        samples: usize,
    },

    #[error(
        "{endpoint} answered {response:?} after {attempts} attempts in {elapsed:?}, expected the route to be withdrawn"
    )]
    UnexpectedSuccess {
        endpoint: Endpoint,
        response: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error(
        "{endpoint} accepted a connection after {attempts} attempts in {elapsed:?}, expected the route to be withdrawn: {cause}"
    )]
    StillAccepting {
        endpoint: Endpoint,
        attempts: u32,
        elapsed: Duration,
        #[source]
        cause: ProbeError,
    },

    #[error("sample count must be at least 2, got {0}")]
    InvalidSampleCount(usize),

    #[error("sample task failed: {0}")]
    SampleTask(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration {0}")]
    Missing(&'static str),

    #[error("invalid configuration {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("must set ${0} to point to an integration config .json file")]
    EnvNotSet(&'static str),

    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("config JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the port allocator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("worker {worker} exhausted its port range {start}..={end}")]
    Exhausted { worker: u16, start: u16, end: u16 },

    #[error("invalid port range: {0}")]
    InvalidRange(String),
}

/// Errors from the routing-control and workload-control collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[cfg(feature = "control")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    #[error("no route registered for {0}")]
    UnknownRoute(Endpoint),

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
