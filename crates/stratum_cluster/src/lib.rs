//! STRATUM Cluster
//!
//! The service enablement protocol: dispatching requests to cluster
//! members, applying them on each node through a persisted state machine,
//! and waiting for the service to report ready.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod membership;
pub mod node;
pub mod supervisor;
pub mod transport;
pub mod waiter;
pub mod wire;

pub use config::{ClusterConfig, DispatchConfig, EngineConfig, MemberConfig, WaitConfig};
pub use dispatch::{
    AggregationPolicy, AllMustSucceed, BestEffort, DispatchError, DispatchReport, Dispatcher,
    NodeOutcome, TargetSelector,
};
pub use engine::{ApplyOutcome, EnablementEngine, EnablementError, RecoverySummary};
pub use membership::{Member, Membership};
pub use node::{NodeService, RequestHandler};
pub use supervisor::{HookSupervisor, ServiceHealth, ServiceSupervisor, SimulatedSupervisor, SupervisorError};
pub use transport::{InProcessTransport, TcpTransport, Transport, TransportError};
pub use waiter::{ReadinessWaiter, WaitError};
pub use wire::{Acknowledgment, NodeRequest, NodeResponse, ReadinessReport, RemoteError, ServiceState};
