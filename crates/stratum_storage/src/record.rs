//! Node enablement records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stratum_placement::{ServiceName, ServicePlacement};

/// Whether the recorded placement has been confirmed by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Persisted, activation not yet confirmed
    Pending,
    /// Supervisor accepted the placement
    Active,
}

/// Last-applied configuration of one service on this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEnablementRecord {
    /// Placement the service runs (or is about to run) with
    pub placement: ServicePlacement,
    /// Activation progress
    pub activation: Activation,
    /// Bumped on every accepted configuration change
    pub revision: u64,
    /// Time of the last write
    pub updated_at: DateTime<Utc>,
}

impl NodeEnablementRecord {
    /// First record for a service, pending activation
    #[must_use]
    pub fn new(placement: ServicePlacement) -> Self {
        Self {
            placement,
            activation: Activation::Pending,
            revision: 1,
            updated_at: Utc::now(),
        }
    }

    /// Successor record carrying a new placement, pending activation
    #[must_use]
    pub fn supersede(&self, placement: ServicePlacement) -> Self {
        Self {
            placement,
            activation: Activation::Pending,
            revision: self.revision + 1,
            updated_at: Utc::now(),
        }
    }

    /// Mark the placement as active
    #[must_use]
    pub fn activated(mut self) -> Self {
        self.activation = Activation::Active;
        self.updated_at = Utc::now();
        self
    }

    /// Service the record belongs to
    #[must_use]
    pub fn service(&self) -> ServiceName {
        self.placement.service()
    }

    /// Whether activation is confirmed
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.activation == Activation::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_placement::RgwPlacement;

    #[test]
    fn test_new_record_is_pending() {
        let record = NodeEnablementRecord::new(ServicePlacement::Mon);
        assert_eq!(record.service(), ServiceName::Mon);
        assert_eq!(record.revision, 1);
        assert!(!record.is_active());
    }

    #[test]
    fn test_supersede_bumps_revision() {
        let first = NodeEnablementRecord::new(ServicePlacement::Rgw(RgwPlacement::default())).activated();
        let second = first.supersede(ServicePlacement::Rgw(RgwPlacement::new(8080, 8443)));

        assert_eq!(second.revision, 2);
        assert_eq!(second.activation, Activation::Pending);
        assert_eq!(second.placement.as_rgw().unwrap().port, 8080);
    }

    #[test]
    fn test_record_json() {
        let record = NodeEnablementRecord::new(ServicePlacement::Rgw(RgwPlacement::default())).activated();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"activation\":\"active\""));

        let back: NodeEnablementRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
