//! Protocol listener.
//!
//! Each accepted connection is served on its own task: read one request
//! frame, hand it to the node's handler, write one response frame. The
//! whole exchange is bounded by the request timeout; a peer that stalls is
//! dropped.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use stratum_cluster::wire::{self, NodeRequest};
use stratum_cluster::{RequestHandler, TransportError};
use stratum_core::{CoreError, CoreResult};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub bind: String,
    /// Upper bound on one exchange (read, handle, reply) in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl ServerConfig {
    /// Create a config bound to `bind`
    #[must_use]
    pub fn new(bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    /// Set the per-exchange bound
    #[must_use]
    pub fn with_request_timeout(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("127.0.0.1:7443")
    }
}

/// TCP server for the node protocol
pub struct NodeServer {
    listener: TcpListener,
    handler: Arc<dyn RequestHandler>,
    request_timeout_ms: u64,
}

impl NodeServer {
    /// Bind the listener
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn bind(config: &ServerConfig, handler: Arc<dyn RequestHandler>) -> CoreResult<Self> {
        let listener = TcpListener::bind(&config.bind).await.map_err(|e| CoreError::Io {
            reason: format!("bind {}: {}", config.bind, e),
        })?;
        Ok(Self {
            listener,
            handler,
            request_timeout_ms: config.request_timeout_ms,
        })
    }

    /// Address actually bound
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address
    pub fn local_addr(&self) -> CoreResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` fires
    ///
    /// Connections already accepted run to completion on their own tasks.
    ///
    /// # Errors
    ///
    /// Returns error only if the listener address cannot be read
    pub async fn serve(self, shutdown: CancellationToken) -> CoreResult<()> {
        info!(address = %self.local_addr()?, "serving enablement protocol");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("listener shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&self.handler);
                        let timeout_ms = self.request_timeout_ms;
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, handler, timeout_ms).await {
                                warn!(peer = %peer, error = %err, "connection failed");
                            }
                        });
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    handler: Arc<dyn RequestHandler>,
    timeout_ms: u64,
) -> Result<(), TransportError> {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(error = %err, "could not set TCP_NODELAY");
    }
    let exchange = async move {
        let mut framed = wire::framed(stream);
        let request: NodeRequest = wire::recv_frame(&mut framed).await?;
        debug!(request = ?request, "received request");
        let response = handler.handle(request).await;
        wire::send_frame(&mut framed, &response).await
    };
    tokio::time::timeout(Duration::from_millis(timeout_ms), exchange)
        .await
        .map_err(|_| TransportError::Timeout(timeout_ms))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stratum_cluster::NodeResponse;
    use stratum_cluster::wire::RemoteError;
    use tokio::io::AsyncReadExt;

    struct Static(NodeResponse);

    #[async_trait]
    impl RequestHandler for Static {
        async fn handle(&self, _request: NodeRequest) -> NodeResponse {
            self.0.clone()
        }
    }

    fn internal(message: &str) -> NodeResponse {
        NodeResponse::Rejected {
            error: RemoteError::Internal {
                message: message.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_serves_one_exchange_per_connection() {
        let server = NodeServer::bind(&ServerConfig::new("127.0.0.1:0"), Arc::new(Static(internal("hello"))))
            .await
            .unwrap();
        let address = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.serve(shutdown.clone()));

        for _ in 0..2 {
            let stream = TcpStream::connect(address).await.unwrap();
            let mut framed = wire::framed(stream);
            let request = NodeRequest::Status {
                service: "mon".to_string(),
            };
            wire::send_frame(&mut framed, &request).await.unwrap();
            let response: NodeResponse = wire::recv_frame(&mut framed).await.unwrap();
            assert_eq!(response, internal("hello"));
        }

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_silent_peer_is_dropped() {
        let config = ServerConfig::new("127.0.0.1:0").with_request_timeout(100);
        let server = NodeServer::bind(&config, Arc::new(Static(internal("hello"))))
            .await
            .unwrap();
        let address = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.serve(shutdown.clone()));

        let mut stream = TcpStream::connect(address).await.unwrap();
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("server kept the idle connection open");
        assert_eq!(read.unwrap(), 0);

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[test]
    fn test_request_timeout_defaults() {
        let config: ServerConfig = serde_json::from_str(r#"{"bind":"0.0.0.0:7443"}"#).unwrap();
        assert_eq!(config.request_timeout_ms, 30_000);
        assert_eq!(config, ServerConfig::new("0.0.0.0:7443"));
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let result = NodeServer::bind(&ServerConfig::new("not-an-address"), Arc::new(Static(internal("x")))).await;
        assert!(matches!(result, Err(CoreError::Io { .. })));
    }
}
