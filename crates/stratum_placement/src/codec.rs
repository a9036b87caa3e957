//! Placement codec.
//!
//! A request carries its placement as opaque JSON text. The payload is only
//! ever decoded by the schema of the service the request names, so a gateway
//! payload sent under `mon` is rejected instead of being reinterpreted.

use crate::placement::ServicePlacement;
use crate::rgw::RgwPlacement;
use crate::service::ServiceName;
use stratum_core::CoreError;

/// Placement codec errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Serialization fault while encoding a well-formed placement
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Payload does not match the schema of the named service
    #[error("Schema error for {service}: {reason}")]
    Schema {
        /// Service whose schema was applied
        service: ServiceName,
        /// What did not match
        reason: String,
    },

    /// Service name is not in the registry
    #[error("Unknown service: {0:?}")]
    UnknownService(String),
}

impl CodecError {
    /// Shorthand for a schema failure
    #[must_use]
    pub fn schema(service: ServiceName, reason: impl Into<String>) -> Self {
        Self::Schema {
            service,
            reason: reason.into(),
        }
    }
}

impl From<CodecError> for CoreError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Encoding(reason) => CoreError::InvalidEncoding { reason },
            CodecError::Schema { service, reason } => CoreError::Validation {
                field: format!("{} payload", service),
                reason,
            },
            CodecError::UnknownService(name) => CoreError::NotFound {
                kind: "service".to_string(),
                id: name,
            },
        }
    }
}

/// Encode a placement to the transport payload
///
/// # Errors
///
/// Returns error only on a serializer fault
pub fn encode(placement: &ServicePlacement) -> Result<String, CodecError> {
    match placement {
        ServicePlacement::Rgw(rgw) => {
            serde_json::to_string(rgw).map_err(|e| CodecError::Encoding(e.to_string()))
        }
        ServicePlacement::Mon | ServicePlacement::Mgr | ServicePlacement::Mds => Ok("{}".to_string()),
    }
}

/// Decode a payload under the schema of `service`
///
/// Unknown fields are ignored. Missing fields, wrong types and violated
/// invariants are schema errors.
///
/// # Errors
///
/// Returns [`CodecError::Schema`] if the payload does not fit the schema
pub fn decode(service: ServiceName, payload: &str) -> Result<ServicePlacement, CodecError> {
    match service {
        ServiceName::Rgw => {
            let rgw: RgwPlacement = serde_json::from_str(payload)
                .map_err(|e| CodecError::schema(service, e.to_string()))?;
            rgw.validate()?;
            Ok(ServicePlacement::Rgw(rgw))
        }
        ServiceName::Mon | ServiceName::Mgr | ServiceName::Mds => {
            if !payload.trim().is_empty() {
                let value: serde_json::Value = serde_json::from_str(payload)
                    .map_err(|e| CodecError::schema(service, e.to_string()))?;
                if !value.is_object() {
                    return Err(CodecError::schema(service, "expected a JSON object"));
                }
            }
            Ok(ServicePlacement::default_for(service))
        }
    }
}
