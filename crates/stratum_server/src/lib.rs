//! STRATUM Server
//!
//! Node daemon serving the service enablement protocol: a TCP listener in
//! front of the node's enablement engine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod daemon;

pub use api::{NodeServer, ServerConfig};
pub use daemon::{NodeDaemon, NodeOptions, SupervisorKind};
