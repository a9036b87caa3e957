//! Per-node enablement state machine.
//!
//! Each service moves `Absent -> Enabling -> Enabled`, or `Enabling ->
//! Failed` when the supervisor cannot activate it. `Failed` is not
//! terminal. Transitions for one service are serialized by a per-service
//! mutex; different services proceed concurrently.
//!
//! A transition persists the new record as `Pending` before activation and
//! marks it `Active` afterwards. If activation fails the stored record is
//! put back to exactly what it was before the transition started.

use crate::config::EngineConfig;
use crate::supervisor::{ServiceHealth, ServiceSupervisor};
use crate::wire::{Acknowledgment, ReadinessReport, ServiceState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use stratum_core::{NodeName, RequestId};
use stratum_placement::{CodecError, EnablementRequest, ServiceName, ServicePlacement};
use stratum_storage::{NodeEnablementRecord, RecordStore, StoreError};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Enablement errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnablementError {
    /// Service name not in the registry
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// Payload does not decode under the service's schema
    #[error("Invalid configuration for {service}: {reason}")]
    InvalidConfig {
        /// Service
        service: ServiceName,
        /// Decode failure
        reason: String,
    },

    /// Record store failure
    #[error("Record store failure: {0}")]
    Store(#[from] StoreError),

    /// Supervisor could not activate the service
    #[error("Supervisor failed to activate {service}: {reason}")]
    Supervisor {
        /// Service
        service: ServiceName,
        /// Supervisor error
        reason: String,
    },

    /// Activation did not finish in time
    #[error("Activation of {service} timed out after {timeout_ms}ms")]
    ActivationTimeout {
        /// Service
        service: ServiceName,
        /// Bound that expired
        timeout_ms: u64,
    },
}

impl EnablementError {
    fn from_codec(name: &str, err: CodecError) -> Self {
        match err {
            CodecError::UnknownService(_) => Self::UnknownService(name.to_string()),
            CodecError::Schema { service, reason } => Self::InvalidConfig { service, reason },
            CodecError::Encoding(reason) => match name.parse() {
                Ok(service) => Self::InvalidConfig { service, reason },
                Err(_) => Self::UnknownService(name.to_string()),
            },
        }
    }
}

/// Result of running a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Placement persisted and the service activated
    Activated {
        /// Revision of the stored record
        revision: u64,
    },
    /// The same placement was already enabled and healthy
    AlreadyEnabled,
    /// A newer attempt for the service was submitted first
    Superseded,
}

/// Outcome of [`EnablementEngine::recover`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    /// Active records taken as enabled
    pub restored: usize,
    /// Pending records activated again
    pub reactivated: usize,
    /// Pending records whose activation failed
    pub failed: usize,
}

#[derive(Debug, Clone)]
struct Slot {
    state: ServiceState,
    attempt: u64,
    error: Option<String>,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            state: ServiceState::Absent,
            attempt: 0,
            error: None,
        }
    }
}

/// Applies enablement requests on one node
pub struct EnablementEngine {
    node: NodeName,
    config: EngineConfig,
    store: Arc<dyn RecordStore>,
    supervisor: Arc<dyn ServiceSupervisor>,
    locks: Mutex<HashMap<ServiceName, Arc<tokio::sync::Mutex<()>>>>,
    slots: RwLock<HashMap<ServiceName, Slot>>,
}

impl EnablementEngine {
    /// Create a new engine
    #[must_use]
    pub fn new(
        node: NodeName,
        config: EngineConfig,
        store: Arc<dyn RecordStore>,
        supervisor: Arc<dyn ServiceSupervisor>,
    ) -> Self {
        Self {
            node,
            config,
            store,
            supervisor,
            locks: Mutex::new(HashMap::new()),
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Node this engine runs on
    #[must_use]
    pub fn node(&self) -> &NodeName {
        &self.node
    }

    /// Accept a request and run its transition in the background
    ///
    /// Decoding happens before anything is touched; a request that does
    /// not decode changes neither the record nor the state.
    ///
    /// # Errors
    ///
    /// Returns error if the service is unknown, the payload does not match
    /// its schema, or the record store cannot be read
    pub async fn submit(self: &Arc<Self>, request: EnablementRequest) -> Result<Acknowledgment, EnablementError> {
        let placement = request
            .placement()
            .map_err(|e| EnablementError::from_codec(&request.name, e))?;
        let service = placement.service();

        if self.already_enabled(&placement).await? {
            let attempt = self.slot(service).await.attempt;
            debug!(node = %self.node, service = %service, "placement already enabled");
            return Ok(self.acknowledge(service, attempt, true));
        }

        let attempt = self.begin(service).await;
        info!(node = %self.node, service = %service, attempt, "accepted enablement request");

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = engine.apply_placement(placement, attempt).await {
                debug!(service = %service, attempt, error = %err, "background transition failed");
            }
        });

        Ok(self.acknowledge(service, attempt, false))
    }

    /// Run a transition to completion
    ///
    /// # Errors
    ///
    /// Returns error if the request does not decode, the store fails, or
    /// the service could not be activated (the record is rolled back)
    pub async fn apply(&self, request: &EnablementRequest) -> Result<ApplyOutcome, EnablementError> {
        let placement = request
            .placement()
            .map_err(|e| EnablementError::from_codec(&request.name, e))?;
        let attempt = self.begin(placement.service()).await;
        self.apply_placement(placement, attempt).await
    }

    /// Current readiness of `service` on this node
    pub async fn status(&self, service: ServiceName) -> ReadinessReport {
        let slot = self.slot(service).await;
        let health = match slot.state {
            ServiceState::Absent => ServiceHealth::Stopped,
            _ => self.probe_health(service).await,
        };

        let error = match (&slot.error, &health) {
            (Some(error), _) => Some(error.clone()),
            (None, ServiceHealth::Failed(reason)) => Some(reason.clone()),
            _ => None,
        };

        ReadinessReport {
            node: self.node.clone(),
            service,
            state: slot.state,
            live: slot.state == ServiceState::Enabled && health.is_live(),
            attempt: slot.attempt,
            error,
        }
    }

    /// Rebuild in-memory state from the store after a restart
    ///
    /// Active records are taken as enabled. Pending records were persisted
    /// by a transition that never finished and are activated again.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be listed
    pub async fn recover(&self) -> Result<RecoverySummary, EnablementError> {
        let mut summary = RecoverySummary::default();
        for record in self.store.list()? {
            let service = record.service();
            if record.is_active() {
                self.slots.write().await.insert(
                    service,
                    Slot {
                        state: ServiceState::Enabled,
                        ..Slot::default()
                    },
                );
                summary.restored += 1;
                continue;
            }

            let attempt = self.begin(service).await;
            match self.resume(record, attempt).await {
                Ok(()) => summary.reactivated += 1,
                Err(err) => {
                    warn!(node = %self.node, service = %service, error = %err, "could not reactivate pending record");
                    summary.failed += 1;
                }
            }
        }
        info!(
            node = %self.node,
            restored = summary.restored,
            reactivated = summary.reactivated,
            failed = summary.failed,
            "recovered enablement state"
        );
        Ok(summary)
    }

    fn lock_for(&self, service: ServiceName) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(service).or_default())
    }

    async fn slot(&self, service: ServiceName) -> Slot {
        self.slots.read().await.get(&service).cloned().unwrap_or_default()
    }

    /// Start a new attempt and return its number
    async fn begin(&self, service: ServiceName) -> u64 {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(service).or_default();
        slot.attempt += 1;
        slot.state = ServiceState::Enabling;
        slot.error = None;
        slot.attempt
    }

    /// Record the end of `attempt` unless a newer one has started
    async fn settle(&self, service: ServiceName, attempt: u64, state: ServiceState, error: Option<String>) {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(service).or_default();
        if slot.attempt == attempt {
            slot.state = state;
            slot.error = error;
        }
    }

    fn acknowledge(&self, service: ServiceName, attempt: u64, already_enabled: bool) -> Acknowledgment {
        Acknowledgment {
            node: self.node.clone(),
            request_id: RequestId::new(),
            service,
            attempt,
            already_enabled,
        }
    }

    async fn already_enabled(&self, placement: &ServicePlacement) -> Result<bool, EnablementError> {
        let service = placement.service();
        if self.slot(service).await.state != ServiceState::Enabled {
            return Ok(false);
        }
        self.matches_running(placement).await
    }

    async fn matches_running(&self, placement: &ServicePlacement) -> Result<bool, EnablementError> {
        let service = placement.service();
        match self.store.get(service)? {
            Some(record) if record.is_active() && record.placement == *placement => Ok(matches!(
                self.probe_health(service).await,
                ServiceHealth::Starting | ServiceHealth::Live
            )),
            _ => Ok(false),
        }
    }

    async fn probe_health(&self, service: ServiceName) -> ServiceHealth {
        match tokio::time::timeout(self.config.health_timeout(), self.supervisor.health(service)).await {
            Ok(health) => health,
            Err(_) => {
                warn!(node = %self.node, service = %service, "health probe timed out");
                ServiceHealth::Failed("health probe timed out".to_string())
            }
        }
    }

    async fn apply_placement(
        &self,
        placement: ServicePlacement,
        attempt: u64,
    ) -> Result<ApplyOutcome, EnablementError> {
        let service = placement.service();
        let lock = self.lock_for(service);
        let _guard = lock.lock().await;

        if self.slot(service).await.attempt > attempt {
            debug!(service = %service, attempt, "attempt superseded");
            return Ok(ApplyOutcome::Superseded);
        }

        let result = self.transition(&placement).await;
        match &result {
            Ok(outcome) => {
                info!(node = %self.node, service = %service, attempt, outcome = ?outcome, "service enabled");
                self.settle(service, attempt, ServiceState::Enabled, None).await;
            }
            Err(err) => {
                error!(node = %self.node, service = %service, attempt, error = %err, "enablement failed");
                self.settle(service, attempt, ServiceState::Failed, Some(err.to_string()))
                    .await;
            }
        }
        result
    }

    /// Persist, activate, and roll back on failure. Caller holds the
    /// service lock.
    async fn transition(&self, placement: &ServicePlacement) -> Result<ApplyOutcome, EnablementError> {
        let service = placement.service();
        if self.matches_running(placement).await? {
            return Ok(ApplyOutcome::AlreadyEnabled);
        }

        let previous = self.store.get(service)?;
        let pending = match &previous {
            Some(record) => record.supersede(placement.clone()),
            None => NodeEnablementRecord::new(placement.clone()),
        };
        self.store.put(&pending)?;
        debug!(service = %service, revision = pending.revision, "persisted pending record");

        let result = match self.activate(placement).await {
            Ok(()) => {
                let active = pending.activated();
                let revision = active.revision;
                self.store.put(&active).map(|()| revision).map_err(EnablementError::from)
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(revision) => Ok(ApplyOutcome::Activated { revision }),
            Err(err) => {
                self.restore(service, previous)?;
                warn!(service = %service, "record rolled back");
                Err(err)
            }
        }
    }

    async fn activate(&self, placement: &ServicePlacement) -> Result<(), EnablementError> {
        let service = placement.service();
        let timeout = self.config.activation_timeout();
        match tokio::time::timeout(timeout, self.supervisor.activate(placement)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(EnablementError::Supervisor {
                service,
                reason: err.to_string(),
            }),
            Err(_) => Err(EnablementError::ActivationTimeout {
                service,
                timeout_ms: self.config.activation_timeout_ms,
            }),
        }
    }

    fn restore(&self, service: ServiceName, previous: Option<NodeEnablementRecord>) -> Result<(), StoreError> {
        match previous {
            Some(record) => self.store.put(&record),
            None => self.store.remove(service).map(|_| ()),
        }
    }

    /// Finish a transition interrupted after its pending write
    async fn resume(&self, record: NodeEnablementRecord, attempt: u64) -> Result<(), EnablementError> {
        let service = record.service();
        let lock = self.lock_for(service);
        let _guard = lock.lock().await;

        let result = match self.activate(&record.placement).await {
            Ok(()) => self.store.put(&record.activated()).map_err(EnablementError::from),
            Err(err) => Err(err),
        };
        match &result {
            Ok(()) => self.settle(service, attempt, ServiceState::Enabled, None).await,
            Err(err) => {
                self.settle(service, attempt, ServiceState::Failed, Some(err.to_string()))
                    .await;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::{HookSupervisor, SimulatedSupervisor, SupervisorError};
    use async_trait::async_trait;
    use std::time::Duration;
    use stratum_placement::RgwPlacement;
    use stratum_storage::MemoryRecordStore;

    struct Fixture {
        engine: Arc<EnablementEngine>,
        store: Arc<MemoryRecordStore>,
        supervisor: Arc<SimulatedSupervisor>,
    }

    fn fixture_with(supervisor: SimulatedSupervisor, config: EngineConfig) -> Fixture {
        let store = Arc::new(MemoryRecordStore::new());
        let supervisor = Arc::new(supervisor);
        let engine = Arc::new(EnablementEngine::new(
            NodeName::new("node-a").unwrap(),
            config,
            store.clone(),
            supervisor.clone(),
        ));
        Fixture {
            engine,
            store,
            supervisor,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(SimulatedSupervisor::new(), EngineConfig::default())
    }

    fn rgw_request(placement: &RgwPlacement) -> EnablementRequest {
        EnablementRequest {
            name: "rgw".to_string(),
            wait: true,
            payload: ServicePlacement::Rgw(placement.clone()).encode().unwrap(),
        }
    }

    async fn wait_for_state(engine: &EnablementEngine, service: ServiceName, attempt: u64) -> ReadinessReport {
        for _ in 0..200 {
            let report = engine.status(service).await;
            if report.attempt == attempt && report.state != ServiceState::Enabling {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} never settled at attempt {}", service, attempt);
    }

    #[tokio::test]
    async fn test_submit_enables_rgw_locally() {
        let f = fixture();
        let ack = f.engine.submit(rgw_request(&RgwPlacement::default())).await.unwrap();
        assert_eq!(ack.service, ServiceName::Rgw);
        assert_eq!(ack.attempt, 1);
        assert!(!ack.already_enabled);

        let report = wait_for_state(&f.engine, ServiceName::Rgw, 1).await;
        assert_eq!(report.state, ServiceState::Enabled);
        assert!(report.live);

        let record = f.store.get(ServiceName::Rgw).unwrap().unwrap();
        assert!(record.is_active());
        assert_eq!(record.revision, 1);
        assert_eq!(record.placement, ServicePlacement::Rgw(RgwPlacement::default()));
    }

    #[tokio::test]
    async fn test_reapply_identical_is_noop() {
        let f = fixture();
        let request = rgw_request(&RgwPlacement::new(8080, 8443));

        let first = f.engine.apply(&request).await.unwrap();
        assert_eq!(first, ApplyOutcome::Activated { revision: 1 });
        let snapshot = f.store.get(ServiceName::Rgw).unwrap();
        let writes = f.store.stats().write_count;

        let second = f.engine.apply(&request).await.unwrap();
        assert_eq!(second, ApplyOutcome::AlreadyEnabled);
        assert_eq!(f.store.get(ServiceName::Rgw).unwrap(), snapshot);
        assert_eq!(f.store.stats().write_count, writes);
        assert_eq!(f.supervisor.activation_count().await, 1);

        let ack = f.engine.submit(request).await.unwrap();
        assert!(ack.already_enabled);
        assert_eq!(ack.attempt, 2);
        assert_eq!(f.store.stats().write_count, writes);
        assert_eq!(f.supervisor.activation_count().await, 1);
    }

    #[tokio::test]
    async fn test_missing_field_rejected_without_mutation() {
        let f = fixture();
        let request = EnablementRequest {
            name: "rgw".to_string(),
            wait: true,
            payload: r#"{"sslPort":443,"sslCertificate":"","sslPrivateKey":""}"#.to_string(),
        };

        let err = f.engine.submit(request.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            EnablementError::InvalidConfig {
                service: ServiceName::Rgw,
                ..
            }
        ));
        let err = f.engine.apply(&request).await.unwrap_err();
        assert!(matches!(err, EnablementError::InvalidConfig { .. }));

        assert_eq!(f.store.stats().write_count, 0);
        let report = f.engine.status(ServiceName::Rgw).await;
        assert_eq!(report.state, ServiceState::Absent);
        assert_eq!(report.attempt, 0);
    }

    #[tokio::test]
    async fn test_unpaired_certificate_rejected() {
        let f = fixture();
        let placement = RgwPlacement {
            ssl_certificate: "/tmp/x.pem".to_string(),
            ..RgwPlacement::default()
        };
        let request = EnablementRequest {
            name: "rgw".to_string(),
            wait: true,
            payload: serde_json::to_string(&placement).unwrap(),
        };

        let err = f.engine.submit(request).await.unwrap_err();
        assert!(matches!(err, EnablementError::InvalidConfig { .. }));
        assert!(f.store.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let f = fixture();
        let request = EnablementRequest {
            name: "nfs".to_string(),
            wait: false,
            payload: String::new(),
        };
        let err = f.engine.submit(request).await.unwrap_err();
        assert_eq!(err, EnablementError::UnknownService("nfs".to_string()));
    }

    #[tokio::test]
    async fn test_supervisor_failure_rolls_back_to_previous() {
        let f = fixture();
        f.engine.apply(&rgw_request(&RgwPlacement::default())).await.unwrap();
        let snapshot = f.store.get(ServiceName::Rgw).unwrap();

        f.supervisor.fail_with(ServiceName::Rgw, "port 8080 in use").await;
        let err = f
            .engine
            .apply(&rgw_request(&RgwPlacement::new(8080, 8443)))
            .await
            .unwrap_err();
        assert!(matches!(err, EnablementError::Supervisor { .. }));
        assert_eq!(f.store.get(ServiceName::Rgw).unwrap(), snapshot);

        let report = f.engine.status(ServiceName::Rgw).await;
        assert_eq!(report.state, ServiceState::Failed);
        assert!(!report.live);
        assert!(report.error.unwrap().contains("port 8080 in use"));

        f.supervisor.clear_failure(ServiceName::Rgw).await;
        let outcome = f
            .engine
            .apply(&rgw_request(&RgwPlacement::new(8080, 8443)))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Activated { revision: 2 });
        assert_eq!(f.engine.status(ServiceName::Rgw).await.state, ServiceState::Enabled);
    }

    #[tokio::test]
    async fn test_supervisor_failure_from_absent_leaves_no_record() {
        let f = fixture();
        f.supervisor.fail_with(ServiceName::Mds, "no metadata pool").await;

        let request = EnablementRequest {
            name: "mds".to_string(),
            wait: false,
            payload: String::new(),
        };
        assert!(f.engine.apply(&request).await.is_err());
        assert!(f.store.get(ServiceName::Mds).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_activation_timeout_rolls_back() {
        let f = fixture_with(
            SimulatedSupervisor::new().with_activation_delay(Duration::from_millis(200)),
            EngineConfig::default().with_activation_timeout(20),
        );
        let request = EnablementRequest {
            name: "mgr".to_string(),
            wait: false,
            payload: "{}".to_string(),
        };
        let err = f.engine.apply(&request).await.unwrap_err();
        assert_eq!(
            err,
            EnablementError::ActivationTimeout {
                service: ServiceName::Mgr,
                timeout_ms: 20
            }
        );
        assert!(f.store.get(ServiceName::Mgr).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_submission_wins() {
        let f = fixture_with(
            SimulatedSupervisor::new().with_activation_delay(Duration::from_millis(20)),
            EngineConfig::default(),
        );
        let first = RgwPlacement::new(8080, 8443);
        let second = RgwPlacement::new(9090, 9443);

        f.engine.submit(rgw_request(&first)).await.unwrap();
        let ack = f.engine.submit(rgw_request(&second)).await.unwrap();
        assert_eq!(ack.attempt, 2);

        let report = wait_for_state(&f.engine, ServiceName::Rgw, 2).await;
        assert_eq!(report.state, ServiceState::Enabled);
        let record = f.store.get(ServiceName::Rgw).unwrap().unwrap();
        assert_eq!(record.placement, ServicePlacement::Rgw(second));
    }

    #[tokio::test]
    async fn test_services_enable_concurrently() {
        let f = fixture_with(
            SimulatedSupervisor::new().with_activation_delay(Duration::from_millis(50)),
            EngineConfig::default(),
        );
        let mon = EnablementRequest {
            name: "mon".to_string(),
            wait: false,
            payload: String::new(),
        };
        let mgr = EnablementRequest {
            name: "mgr".to_string(),
            wait: false,
            payload: String::new(),
        };

        let (a, b) = tokio::join!(f.engine.apply(&mon), f.engine.apply(&mgr));
        assert_eq!(a.unwrap(), ApplyOutcome::Activated { revision: 1 });
        assert_eq!(b.unwrap(), ApplyOutcome::Activated { revision: 1 });
        assert_eq!(f.store.list().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_recover_reactivates_pending() {
        let f = fixture();
        f.store.put(&NodeEnablementRecord::new(ServicePlacement::Mon)).unwrap();
        f.store
            .put(&NodeEnablementRecord::new(ServicePlacement::Mgr).activated())
            .unwrap();

        let summary = f.engine.recover().await.unwrap();
        assert_eq!(
            summary,
            RecoverySummary {
                restored: 1,
                reactivated: 1,
                failed: 0
            }
        );

        assert!(f.store.get(ServiceName::Mon).unwrap().unwrap().is_active());
        assert_eq!(f.supervisor.activations().await, vec![ServicePlacement::Mon]);

        let mon = f.engine.status(ServiceName::Mon).await;
        assert_eq!(mon.state, ServiceState::Enabled);
        assert!(mon.live);
        let mgr = f.engine.status(ServiceName::Mgr).await;
        assert_eq!(mgr.state, ServiceState::Enabled);
    }

    #[tokio::test]
    async fn test_recover_failure_keeps_pending() {
        let f = fixture();
        f.store.put(&NodeEnablementRecord::new(ServicePlacement::Mds)).unwrap();
        f.supervisor.fail_with(ServiceName::Mds, "no metadata pool").await;

        let summary = f.engine.recover().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(!f.store.get(ServiceName::Mds).unwrap().unwrap().is_active());
        assert_eq!(f.engine.status(ServiceName::Mds).await.state, ServiceState::Failed);
    }

    /// Activates instantly; health probes never answer
    struct UnresponsiveHealth;

    #[async_trait]
    impl ServiceSupervisor for UnresponsiveHealth {
        async fn activate(&self, _placement: &ServicePlacement) -> Result<(), SupervisorError> {
            Ok(())
        }

        async fn health(&self, _service: ServiceName) -> ServiceHealth {
            std::future::pending::<ServiceHealth>().await
        }
    }

    #[tokio::test]
    async fn test_unresponsive_health_probe_is_bounded() {
        let store = Arc::new(MemoryRecordStore::new());
        let engine = Arc::new(EnablementEngine::new(
            NodeName::new("node-a").unwrap(),
            EngineConfig::default().with_health_timeout(50),
            store.clone(),
            Arc::new(UnresponsiveHealth),
        ));
        let mon = EnablementRequest {
            name: "mon".to_string(),
            wait: false,
            payload: String::new(),
        };
        assert_eq!(
            engine.apply(&mon).await.unwrap(),
            ApplyOutcome::Activated { revision: 1 }
        );

        let report = tokio::time::timeout(Duration::from_secs(2), engine.status(ServiceName::Mon))
            .await
            .unwrap();
        assert_eq!(report.state, ServiceState::Enabled);
        assert!(!report.live);
        assert_eq!(report.error.as_deref(), Some("health probe timed out"));

        let ack = tokio::time::timeout(Duration::from_secs(2), engine.submit(mon.clone()))
            .await
            .unwrap()
            .unwrap();
        assert!(!ack.already_enabled);
        let report = wait_for_state(&engine, ServiceName::Mon, ack.attempt).await;
        assert_eq!(report.state, ServiceState::Enabled);

        let outcome = tokio::time::timeout(Duration::from_secs(2), engine.apply(&mon))
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Activated { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_hook_is_killed_before_it_activates() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("activated");
        let hook = dir.path().join("hook.sh");
        std::fs::write(
            &hook,
            format!(
                "#!/bin/sh\n\
                 case \"$1\" in\n\
                   activate) sleep 1; touch {} ;;\n\
                   *) exit 3 ;;\n\
                 esac\n",
                marker.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();

        let store = Arc::new(MemoryRecordStore::new());
        let engine = EnablementEngine::new(
            NodeName::new("node-a").unwrap(),
            EngineConfig::default().with_activation_timeout(100),
            store.clone(),
            Arc::new(HookSupervisor::new(&hook)),
        );
        let mon = EnablementRequest {
            name: "mon".to_string(),
            wait: false,
            payload: String::new(),
        };

        let err = engine.apply(&mon).await.unwrap_err();
        assert!(matches!(err, EnablementError::ActivationTimeout { .. }));
        assert!(store.get(ServiceName::Mon).unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
