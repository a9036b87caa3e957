//! Node daemon assembly.

use crate::api::{NodeServer, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stratum_cluster::{
    ClusterConfig, EnablementEngine, HookSupervisor, NodeService, RecoverySummary, ServiceSupervisor,
    SimulatedSupervisor,
};
use stratum_core::{CoreError, CoreResult};
use stratum_storage::{RedbRecordStore, StoreConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// How the daemon drives services
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorKind {
    /// External hook program
    Hook(PathBuf),
    /// In-process simulation, live after `startup_delay`
    Simulated {
        /// Time from activation to live
        startup_delay: Duration,
    },
}

/// Everything needed to start a node
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Cluster file contents
    pub cluster: ClusterConfig,
    /// Record store location
    pub store: StoreConfig,
    /// Supervisor choice
    pub supervisor: SupervisorKind,
    /// Listen address; defaults to the local member's address
    pub bind: Option<String>,
}

impl NodeOptions {
    /// Address the listener binds
    ///
    /// # Errors
    ///
    /// Returns error if no bind address was given and the local node has
    /// no member entry
    pub fn bind_address(&self) -> CoreResult<String> {
        if let Some(bind) = &self.bind {
            return Ok(bind.clone());
        }
        self.cluster
            .member(&self.cluster.local_node)
            .map(|m| m.address.clone())
            .ok_or_else(|| CoreError::not_found("member", self.cluster.local_node.as_str()))
    }
}

/// A running node: engine plus listener
pub struct NodeDaemon {
    engine: Arc<EnablementEngine>,
    server: NodeServer,
    recovery: RecoverySummary,
}

impl NodeDaemon {
    /// Open the store, recover state and bind the listener
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened, recovery cannot read
    /// it, or the address cannot be bound
    pub async fn start(options: NodeOptions) -> CoreResult<Self> {
        let store = Arc::new(RedbRecordStore::open(&options.store)?);
        let supervisor: Arc<dyn ServiceSupervisor> = match &options.supervisor {
            SupervisorKind::Hook(program) => Arc::new(HookSupervisor::new(program)),
            SupervisorKind::Simulated { startup_delay } => {
                Arc::new(SimulatedSupervisor::new().with_startup_delay(*startup_delay))
            }
        };

        let engine = Arc::new(EnablementEngine::new(
            options.cluster.local_node.clone(),
            options.cluster.engine.clone(),
            store,
            supervisor,
        ));
        let recovery = engine.recover().await.map_err(|e| CoreError::Internal {
            message: e.to_string(),
        })?;

        let bind = options.bind_address()?;
        let server = NodeServer::bind(&ServerConfig::new(bind), Arc::new(NodeService::new(Arc::clone(&engine)))).await?;
        info!(
            node = %options.cluster.local_node,
            records = %options.store.records_path().display(),
            "node started"
        );
        Ok(Self {
            engine,
            server,
            recovery,
        })
    }

    /// The node's engine
    #[must_use]
    pub fn engine(&self) -> &Arc<EnablementEngine> {
        &self.engine
    }

    /// What recovery found at startup
    #[must_use]
    pub fn recovery(&self) -> RecoverySummary {
        self.recovery
    }

    /// Address the listener is bound to
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address
    pub fn local_addr(&self) -> CoreResult<SocketAddr> {
        self.server.local_addr()
    }

    /// Serve until `shutdown` fires
    ///
    /// # Errors
    ///
    /// Returns error if the listener fails
    pub async fn run(self, shutdown: CancellationToken) -> CoreResult<()> {
        self.server.serve(shutdown).await
    }
}
