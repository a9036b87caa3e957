//! Service placements.

use crate::codec::{self, CodecError};
use crate::rgw::RgwPlacement;
use crate::service::ServiceName;
use serde::{Deserialize, Serialize};

/// Placement for one service, tagged by service name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "service", content = "placement", rename_all = "lowercase")]
pub enum ServicePlacement {
    /// Object-storage gateway
    Rgw(RgwPlacement),
    /// Monitor (no parameters)
    Mon,
    /// Manager (no parameters)
    Mgr,
    /// Metadata server (no parameters)
    Mds,
}

impl ServicePlacement {
    /// Default placement for a service
    #[must_use]
    pub fn default_for(service: ServiceName) -> Self {
        match service {
            ServiceName::Rgw => Self::Rgw(RgwPlacement::default()),
            ServiceName::Mon => Self::Mon,
            ServiceName::Mgr => Self::Mgr,
            ServiceName::Mds => Self::Mds,
        }
    }

    /// Service this placement belongs to
    #[must_use]
    pub fn service(&self) -> ServiceName {
        match self {
            Self::Rgw(_) => ServiceName::Rgw,
            Self::Mon => ServiceName::Mon,
            Self::Mgr => ServiceName::Mgr,
            Self::Mds => ServiceName::Mds,
        }
    }

    /// Encode to the transport payload; see [`codec::encode`]
    ///
    /// # Errors
    ///
    /// Returns error only on a serializer fault
    pub fn encode(&self) -> Result<String, CodecError> {
        codec::encode(self)
    }

    /// Decode a payload under the schema of `service`; see [`codec::decode`]
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Schema`] if the payload does not fit the schema
    pub fn decode(service: ServiceName, payload: &str) -> Result<Self, CodecError> {
        codec::decode(service, payload)
    }

    /// Gateway parameters, if this is a gateway placement
    #[must_use]
    pub fn as_rgw(&self) -> Option<&RgwPlacement> {
        match self {
            Self::Rgw(rgw) => Some(rgw),
            _ => None,
        }
    }
}
