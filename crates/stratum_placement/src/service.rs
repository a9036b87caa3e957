//! The closed set of services a node can be asked to enable.

use crate::codec::CodecError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Known optional services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceName {
    /// Object-storage gateway
    Rgw,
    /// Monitor
    Mon,
    /// Manager
    Mgr,
    /// Metadata server
    Mds,
}

impl ServiceName {
    /// Every known service, in registry order
    pub const ALL: [ServiceName; 4] = [Self::Rgw, Self::Mon, Self::Mgr, Self::Mds];

    /// Wire identifier
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Rgw => "rgw",
            Self::Mon => "mon",
            Self::Mgr => "mgr",
            Self::Mds => "mds",
        }
    }

    /// Whether the service carries placement parameters
    #[must_use]
    pub const fn has_placement_schema(&self) -> bool {
        matches!(self, Self::Rgw)
    }
}

impl FromStr for ServiceName {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|svc| svc.as_str() == s)
            .ok_or_else(|| CodecError::UnknownService(s.to_string()))
    }
}

impl std::fmt::Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
