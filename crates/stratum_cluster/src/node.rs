//! Node-side request handling.

use crate::engine::{EnablementEngine, EnablementError};
use crate::wire::{NodeRequest, NodeResponse, RemoteError};
use async_trait::async_trait;
use std::sync::Arc;
use stratum_placement::ServiceName;
use tracing::warn;

/// Answers protocol requests addressed to this node
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one request
    async fn handle(&self, request: NodeRequest) -> NodeResponse;
}

/// Serves the enablement protocol from a node's engine
#[derive(Clone)]
pub struct NodeService {
    engine: Arc<EnablementEngine>,
}

impl NodeService {
    /// Create a new node service
    #[must_use]
    pub fn new(engine: Arc<EnablementEngine>) -> Self {
        Self { engine }
    }

    /// The engine behind this service
    #[must_use]
    pub fn engine(&self) -> &Arc<EnablementEngine> {
        &self.engine
    }
}

#[async_trait]
impl RequestHandler for NodeService {
    async fn handle(&self, request: NodeRequest) -> NodeResponse {
        match request {
            NodeRequest::Enable { request } => match self.engine.submit(request.clone()).await {
                Ok(ack) => NodeResponse::Accepted { ack },
                Err(err) => {
                    warn!(service = %request.name, error = %err, "rejected enablement request");
                    NodeResponse::Rejected {
                        error: to_remote(&request.name, err),
                    }
                }
            },
            NodeRequest::Status { service } => match service.parse::<ServiceName>() {
                Ok(name) => NodeResponse::Status {
                    report: self.engine.status(name).await,
                },
                Err(_) => NodeResponse::Rejected {
                    error: RemoteError::UnknownService { name: service },
                },
            },
        }
    }
}

fn to_remote(name: &str, err: EnablementError) -> RemoteError {
    match err {
        EnablementError::UnknownService(name) => RemoteError::UnknownService { name },
        EnablementError::InvalidConfig { reason, .. } => RemoteError::InvalidConfig {
            service: name.to_string(),
            reason,
        },
        other => RemoteError::Internal {
            message: other.to_string(),
        },
    }
}
