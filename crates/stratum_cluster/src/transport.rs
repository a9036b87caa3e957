//! Cluster transport.
//!
//! The transport delivers one [`NodeRequest`] to one member and returns its
//! response. It does no retrying and knows nothing about deadlines; the
//! dispatcher bounds every call.

use crate::membership::Member;
use crate::node::RequestHandler;
use crate::wire::{self, NodeRequest, NodeResponse};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use stratum_core::NodeName;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tracing::debug;

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Timeout
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid response
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Node unavailable
    #[error("Node unavailable: {0}")]
    NodeUnavailable(NodeName),
}

/// Request/response delivery to a single member
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` to `member` and wait for its response
    ///
    /// # Errors
    ///
    /// Returns error if the member cannot be reached or answers garbage
    async fn call(&self, member: &Member, request: NodeRequest) -> Result<NodeResponse, TransportError>;
}

/// Length-delimited JSON over TCP, one exchange per connection
#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

impl TcpTransport {
    /// Create a new TCP transport
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn call(&self, member: &Member, request: NodeRequest) -> Result<NodeResponse, TransportError> {
        let stream = TcpStream::connect(&member.address)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{} ({}): {}", member.name, member.address, e)))?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(node = %member.name, error = %err, "could not set TCP_NODELAY");
        }

        let mut framed = wire::framed(stream);
        wire::send_frame(&mut framed, &request).await?;
        let response = wire::recv_frame(&mut framed).await?;
        debug!(node = %member.name, address = %member.address, "exchange complete");
        Ok(response)
    }
}

/// Transport that calls handlers in the same process
///
/// Members can be partitioned away to simulate unreachable nodes.
#[derive(Default)]
pub struct InProcessTransport {
    handlers: RwLock<HashMap<NodeName, Arc<dyn RequestHandler>>>,
    partitioned: RwLock<HashSet<NodeName>>,
    calls: AtomicU64,
}

impl InProcessTransport {
    /// Create an empty transport
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route requests for `node` to `handler`
    pub async fn register(&self, node: NodeName, handler: Arc<dyn RequestHandler>) {
        self.handlers.write().await.insert(node, handler);
    }

    /// Make `node` unreachable
    pub async fn partition(&self, node: NodeName) {
        self.partitioned.write().await.insert(node);
    }

    /// Make `node` reachable again
    pub async fn heal(&self, node: &NodeName) {
        self.partitioned.write().await.remove(node);
    }

    /// Number of calls attempted through this transport
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn call(&self, member: &Member, request: NodeRequest) -> Result<NodeResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.partitioned.read().await.contains(&member.name) {
            return Err(TransportError::NodeUnavailable(member.name.clone()));
        }
        let handler = self
            .handlers
            .read()
            .await
            .get(&member.name)
            .cloned()
            .ok_or_else(|| TransportError::ConnectionFailed(format!("no listener for {}", member.name)))?;

        Ok(handler.handle(request).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::RemoteError;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, request: NodeRequest) -> NodeResponse {
            let message = match request {
                NodeRequest::Enable { request } => request.name,
                NodeRequest::Status { service } => service,
            };
            NodeResponse::Rejected {
                error: RemoteError::Internal { message },
            }
        }
    }

    fn member(name: &str, address: &str) -> Member {
        Member::new(NodeName::new(name).unwrap(), address)
    }

    fn status(service: &str) -> NodeRequest {
        NodeRequest::Status {
            service: service.to_string(),
        }
    }

    #[tokio::test]
    async fn test_in_process_routes_to_handler() {
        let transport = InProcessTransport::new();
        transport.register(NodeName::new("node-a").unwrap(), Arc::new(Echo)).await;

        let response = transport.call(&member("node-a", "mem"), status("mds")).await.unwrap();
        assert_eq!(
            response,
            NodeResponse::Rejected {
                error: RemoteError::Internal {
                    message: "mds".to_string()
                }
            }
        );
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_in_process_partition_and_heal() {
        let transport = InProcessTransport::new();
        let name = NodeName::new("node-a").unwrap();
        transport.register(name.clone(), Arc::new(Echo)).await;
        transport.partition(name.clone()).await;

        let err = transport.call(&member("node-a", "mem"), status("mon")).await.unwrap_err();
        assert_eq!(err, TransportError::NodeUnavailable(name.clone()));

        transport.heal(&name).await;
        assert!(transport.call(&member("node-a", "mem"), status("mon")).await.is_ok());
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_in_process_unregistered_node() {
        let transport = InProcessTransport::new();
        let err = transport.call(&member("node-z", "mem"), status("mon")).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_tcp_exchange() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = wire::framed(stream);
            let request: NodeRequest = wire::recv_frame(&mut framed).await.unwrap();
            let response = Echo.handle(request).await;
            wire::send_frame(&mut framed, &response).await.unwrap();
        });

        let response = TcpTransport::new()
            .call(&member("node-a", &address), status("rgw"))
            .await
            .unwrap();
        assert!(matches!(response, NodeResponse::Rejected { .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = TcpTransport::new()
            .call(&member("node-a", &address), status("rgw"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
    }
}
