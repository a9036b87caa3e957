//! Readiness waiting.
//!
//! Polls a node's status until the service is live, the node reports the
//! acknowledged attempt failed, the deadline passes or the caller cancels.
//! The node is always polled at least once, even with a zero deadline.
//! Cancelling stops only the polling; the node keeps whatever it is doing.

use crate::config::WaitConfig;
use crate::dispatch::{DispatchError, Dispatcher, TargetSelector};
use crate::wire::{Acknowledgment, ReadinessReport, ServiceState};
use std::sync::Arc;
use std::time::Duration;
use stratum_core::NodeName;
use stratum_placement::ServiceName;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Waiter errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// Deadline passed; the service may still become ready
    #[error("{service} not ready on {node} after {waited_ms}ms (last state: {last_state})")]
    Timeout {
        /// Service
        service: String,
        /// Polled node
        node: String,
        /// Time spent waiting
        waited_ms: u64,
        /// Last state observed, or "unknown"
        last_state: String,
    },

    /// Node reports the enablement failed
    #[error("Enabling {service} on {node} failed: {reason}")]
    EnablementFailed {
        /// Node
        node: NodeName,
        /// Service
        service: ServiceName,
        /// Supervisor error
        reason: String,
    },

    /// Caller cancelled the wait
    #[error("Wait for {service} cancelled")]
    Cancelled {
        /// Service
        service: String,
    },

    /// Status could not be queried
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Polls node status until a service is ready
pub struct ReadinessWaiter {
    dispatcher: Arc<Dispatcher>,
    config: WaitConfig,
}

impl ReadinessWaiter {
    /// Create a new waiter
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, config: WaitConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Default deadline from the configuration
    #[must_use]
    pub fn default_deadline(&self) -> Duration {
        self.config.deadline()
    }

    /// Wait for the attempt named by an acknowledgment
    ///
    /// # Errors
    ///
    /// Same as [`ReadinessWaiter::wait_until_ready`]
    pub async fn wait_for(
        &self,
        ack: &Acknowledgment,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<ReadinessReport, WaitError> {
        self.poll(
            ack.service.as_str(),
            &TargetSelector::Node(ack.node.clone()),
            ack.attempt,
            deadline,
            cancel,
        )
        .await
    }

    /// Wait until `service` is live on `target`
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Timeout`] when the deadline passes,
    /// [`WaitError::EnablementFailed`] when the node reports failure,
    /// [`WaitError::Cancelled`] when `cancel` fires, and
    /// [`WaitError::Dispatch`] if the target cannot be resolved or the node
    /// rejects the query
    pub async fn wait_until_ready(
        &self,
        service: &str,
        target: &TargetSelector,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<ReadinessReport, WaitError> {
        self.poll(service, target, 0, deadline, cancel).await
    }

    async fn poll(
        &self,
        service: &str,
        target: &TargetSelector,
        min_attempt: u64,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<ReadinessReport, WaitError> {
        let started = Instant::now();
        let expires = started + deadline;
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_state: Option<ServiceState> = None;
        let mut polled_once = false;

        loop {
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(service, target = %target, "readiness wait cancelled");
                    return Err(WaitError::Cancelled { service: service.to_string() });
                }
                () = tokio::time::sleep_until(expires), if polled_once => {
                    return Err(WaitError::Timeout {
                        service: service.to_string(),
                        node: target.to_string(),
                        waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                        last_state: last_state.map_or_else(|| "unknown".to_string(), |s| s.to_string()),
                    });
                }
                polled = async {
                    ticker.tick().await;
                    self.dispatcher.status(service, target).await
                } => polled,
            };
            polled_once = true;

            match polled {
                Ok(report) => {
                    last_state = Some(report.state);
                    if report.attempt < min_attempt {
                        debug!(service, attempt = report.attempt, min_attempt, "status predates attempt");
                        continue;
                    }
                    if report.live {
                        info!(service, node = %report.node, "service ready");
                        return Ok(report);
                    }
                    if report.state == ServiceState::Failed {
                        return Err(WaitError::EnablementFailed {
                            node: report.node,
                            service: report.service,
                            reason: report.error.unwrap_or_else(|| "unknown failure".to_string()),
                        });
                    }
                    debug!(service, state = %report.state, "service not ready yet");
                }
                Err(err @ (DispatchError::TargetNotFound { .. } | DispatchError::Rejected { .. })) => {
                    return Err(err.into());
                }
                Err(err) => {
                    debug!(service, error = %err, "status poll failed, retrying");
                }
            }
        }
    }
}
