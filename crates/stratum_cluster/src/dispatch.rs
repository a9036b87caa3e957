//! Request dispatch.
//!
//! Resolves a target against the membership view, sends the request with a
//! per-call deadline and turns node responses into typed results. Dispatch
//! never retries and never mutates local state.

use crate::config::DispatchConfig;
use crate::membership::{Member, Membership};
use crate::transport::{Transport, TransportError};
use crate::wire::{Acknowledgment, NodeRequest, NodeResponse, ReadinessReport, RemoteError};
use futures::future::join_all;
use std::sync::Arc;
use stratum_core::NodeName;
use stratum_placement::EnablementRequest;
use tracing::{debug, info, warn};

/// Which node a request is for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetSelector {
    /// The node the caller is attached to
    Local,
    /// A named member
    Node(NodeName),
}

impl TargetSelector {
    /// Interpret a `--target` flag; absent or empty means local
    ///
    /// # Errors
    ///
    /// Returns error if the name is not a valid node name
    pub fn from_flag(flag: Option<&str>) -> Result<Self, stratum_core::CoreError> {
        match flag.map(str::trim) {
            None | Some("") => Ok(Self::Local),
            Some(name) => Ok(Self::Node(NodeName::new(name)?)),
        }
    }
}

impl std::fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local node"),
            Self::Node(name) => write!(f, "{}", name),
        }
    }
}

/// Dispatch errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Target is not a cluster member; nothing was sent
    #[error("Target node not found: {node}")]
    TargetNotFound {
        /// Requested target
        node: String,
    },

    /// Transport failure talking to a node
    #[error("Dispatch to {node} failed: {source}")]
    Transport {
        /// Target node
        node: NodeName,
        /// Cause
        source: TransportError,
    },

    /// Node did not answer within the deadline
    #[error("Dispatch to {node} timed out after {timeout_ms}ms")]
    Timeout {
        /// Target node
        node: NodeName,
        /// Deadline that expired
        timeout_ms: u64,
    },

    /// Node rejected the payload
    #[error("Node {node} rejected {service} configuration: {reason}")]
    InvalidConfig {
        /// Target node
        node: NodeName,
        /// Service
        service: String,
        /// Decode failure
        reason: String,
    },

    /// Node rejected the request for another reason
    #[error("Node {node} rejected the request: {reason}")]
    Rejected {
        /// Target node
        node: NodeName,
        /// Reason
        reason: String,
    },

    /// Node answered with the wrong kind of response
    #[error("Unexpected response from {node}: {response}")]
    UnexpectedResponse {
        /// Target node
        node: NodeName,
        /// What came back
        response: String,
    },

    /// Membership is empty
    #[error("No cluster members to dispatch to")]
    NoMembers,

    /// Some nodes failed under an all-must-succeed policy
    #[error("Dispatch failed on {} of {} nodes", .0.failed().len(), .0.outcomes.len())]
    Partial(Box<DispatchReport>),
}

impl DispatchError {
    /// Node the error concerns, if any
    #[must_use]
    pub fn node(&self) -> Option<&NodeName> {
        match self {
            Self::Transport { node, .. }
            | Self::Timeout { node, .. }
            | Self::InvalidConfig { node, .. }
            | Self::Rejected { node, .. }
            | Self::UnexpectedResponse { node, .. } => Some(node),
            _ => None,
        }
    }
}

/// Result of dispatching to one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOutcome {
    /// Node
    pub node: NodeName,
    /// Acknowledgment or failure
    pub result: Result<Acknowledgment, DispatchError>,
}

/// Per-node results of a broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// One outcome per member, in membership order
    pub outcomes: Vec<NodeOutcome>,
}

impl DispatchReport {
    /// Acknowledgments from nodes that accepted
    #[must_use]
    pub fn succeeded(&self) -> Vec<&Acknowledgment> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok()).collect()
    }

    /// Nodes that failed and why
    #[must_use]
    pub fn failed(&self) -> Vec<(&NodeName, &DispatchError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.node, e)))
            .collect()
    }

    /// Whether every node accepted
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

/// Decides whether a broadcast succeeded overall
pub trait AggregationPolicy: Send + Sync {
    /// Judge a report
    ///
    /// # Errors
    ///
    /// Returns error if the report does not meet the policy
    fn aggregate(&self, report: DispatchReport) -> Result<DispatchReport, DispatchError>;
}

/// Every member must accept
#[derive(Debug, Clone, Copy, Default)]
pub struct AllMustSucceed;

impl AggregationPolicy for AllMustSucceed {
    fn aggregate(&self, report: DispatchReport) -> Result<DispatchReport, DispatchError> {
        if report.is_complete() {
            Ok(report)
        } else {
            Err(DispatchError::Partial(Box::new(report)))
        }
    }
}

/// At least one member must accept
#[derive(Debug, Clone, Copy, Default)]
pub struct BestEffort;

impl AggregationPolicy for BestEffort {
    fn aggregate(&self, report: DispatchReport) -> Result<DispatchReport, DispatchError> {
        if report.succeeded().is_empty() {
            Err(DispatchError::Partial(Box::new(report)))
        } else {
            Ok(report)
        }
    }
}

/// Sends requests to cluster members
pub struct Dispatcher {
    membership: Arc<Membership>,
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a new dispatcher
    #[must_use]
    pub fn new(membership: Arc<Membership>, transport: Arc<dyn Transport>, config: DispatchConfig) -> Self {
        Self {
            membership,
            transport,
            config,
        }
    }

    /// Membership view used for resolution
    #[must_use]
    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    /// Send an enablement request to one node
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::TargetNotFound`] without any network I/O if
    /// the target is not a member, or an error naming the node if the
    /// exchange fails or the node rejects the request
    pub async fn dispatch(
        &self,
        request: &EnablementRequest,
        target: &TargetSelector,
    ) -> Result<Acknowledgment, DispatchError> {
        let member = self.resolve(target).await?;
        info!(node = %member.name, service = %request.name, "dispatching enablement request");
        self.send_enable(&member, request).await
    }

    /// Send an enablement request to every member in parallel
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoMembers`] for an empty membership, or
    /// whatever `policy` returns for the collected report
    pub async fn broadcast(
        &self,
        request: &EnablementRequest,
        policy: &dyn AggregationPolicy,
    ) -> Result<DispatchReport, DispatchError> {
        let members = self.membership.members().await;
        if members.is_empty() {
            return Err(DispatchError::NoMembers);
        }
        info!(nodes = members.len(), service = %request.name, "broadcasting enablement request");

        let calls = members.iter().map(|member| async move {
            NodeOutcome {
                node: member.name.clone(),
                result: self.send_enable(member, request).await,
            }
        });
        let report = DispatchReport {
            outcomes: join_all(calls).await,
        };

        for (node, err) in report.failed() {
            warn!(node = %node, error = %err, "broadcast leg failed");
        }
        policy.aggregate(report)
    }

    /// Query a node for the readiness of `service`
    ///
    /// # Errors
    ///
    /// Returns error if the target cannot be resolved or reached, or the
    /// node does not know the service
    pub async fn status(&self, service: &str, target: &TargetSelector) -> Result<ReadinessReport, DispatchError> {
        let member = self.resolve(target).await?;
        let request = NodeRequest::Status {
            service: service.to_string(),
        };
        match self.exchange(&member, request).await? {
            NodeResponse::Status { report } => Ok(report),
            NodeResponse::Rejected { error } => Err(rejection(&member.name, error)),
            other => Err(unexpected(&member.name, &other)),
        }
    }

    async fn resolve(&self, target: &TargetSelector) -> Result<Member, DispatchError> {
        self.membership
            .resolve(target)
            .await
            .map_err(|_| DispatchError::TargetNotFound {
                node: match target {
                    TargetSelector::Local => self.membership.local().to_string(),
                    TargetSelector::Node(name) => name.to_string(),
                },
            })
    }

    async fn send_enable(&self, member: &Member, request: &EnablementRequest) -> Result<Acknowledgment, DispatchError> {
        let message = NodeRequest::Enable {
            request: request.clone(),
        };
        match self.exchange(member, message).await? {
            NodeResponse::Accepted { ack } => {
                debug!(node = %member.name, attempt = ack.attempt, already_enabled = ack.already_enabled, "request accepted");
                Ok(ack)
            }
            NodeResponse::Rejected { error } => Err(rejection(&member.name, error)),
            other => Err(unexpected(&member.name, &other)),
        }
    }

    async fn exchange(&self, member: &Member, request: NodeRequest) -> Result<NodeResponse, DispatchError> {
        match tokio::time::timeout(self.config.timeout(), self.transport.call(member, request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(source)) => Err(DispatchError::Transport {
                node: member.name.clone(),
                source,
            }),
            Err(_) => Err(DispatchError::Timeout {
                node: member.name.clone(),
                timeout_ms: self.config.timeout_ms,
            }),
        }
    }
}

fn rejection(node: &NodeName, error: RemoteError) -> DispatchError {
    match error {
        RemoteError::InvalidConfig { service, reason } => DispatchError::InvalidConfig {
            node: node.clone(),
            service,
            reason,
        },
        other => DispatchError::Rejected {
            node: node.clone(),
            reason: other.to_string(),
        },
    }
}

fn unexpected(node: &NodeName, response: &NodeResponse) -> DispatchError {
    DispatchError::UnexpectedResponse {
        node: node.clone(),
        response: format!("{:?}", response),
    }
}
