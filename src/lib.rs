//! Connection-level verification of TCP routing.
//!
//! A [`Verifier`] drives raw TCP probes against routed front-end ports and
//! turns them into assertions: the route becomes reachable, the right
//! backend answers, connections are spread over several backends, or a
//! withdrawn route stops answering. Backends tag responses as
//! `"<identity>:<echo>"`; see [`receiver::SampleReceiver`].

pub mod config;
pub mod control;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod port;
pub mod probe;
pub mod receiver;
pub mod sender;
pub mod verify;

// Re-export key types at crate root for convenience.
pub use config::{RoutingConfig, Timeouts, ValidatedConfig};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use identity::extract_identity;
pub use port::{PortAllocator, WorkerPortAllocator};
pub use probe::{ProbeConfig, ProbeRequest, Prober, TcpProber};
pub use verify::poll::PollPolicy;
pub use verify::{LoadBalanced, Outcome, Verifier, VerifierConfig};

pub use control::{BackendHandle, RouteSpec, RoutingControl, WorkloadControl};
