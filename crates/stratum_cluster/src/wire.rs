//! Node protocol messages and framing.
//!
//! Every connection carries exactly one request frame followed by one
//! response frame. Frames are JSON documents behind a 4-byte big-endian
//! length prefix.

use crate::transport::TransportError;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stratum_core::{NodeName, RequestId};
use stratum_placement::{EnablementRequest, ServiceName};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Upper bound on a single frame
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// Request sent to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeRequest {
    /// Enable a service
    Enable {
        /// The enablement request
        request: EnablementRequest,
    },
    /// Report readiness of a service
    Status {
        /// Service name as sent by the client
        service: String,
    },
}

/// Node response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeResponse {
    /// Request accepted for processing
    Accepted {
        /// Acknowledgment details
        ack: Acknowledgment,
    },
    /// Readiness report
    Status {
        /// Current report
        report: ReadinessReport,
    },
    /// Request rejected by the node
    Rejected {
        /// Why
        error: RemoteError,
    },
}

/// Acknowledgment that a node accepted an enablement request
///
/// Accepted means queued for processing, not completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgment {
    /// Acknowledging node
    pub node: NodeName,
    /// Request id assigned by the node
    pub request_id: RequestId,
    /// Service the request was for
    pub service: ServiceName,
    /// Attempt number the transition runs under
    pub attempt: u64,
    /// The node already had this configuration enabled
    pub already_enabled: bool,
}

/// Per-service state on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Never enabled
    Absent,
    /// Transition in progress
    Enabling,
    /// Configuration persisted and service activated
    Enabled,
    /// Last transition failed; retry is permitted
    Failed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Absent => "absent",
            Self::Enabling => "enabling",
            Self::Enabled => "enabled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Readiness of a service on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessReport {
    /// Reporting node
    pub node: NodeName,
    /// Service
    pub service: ServiceName,
    /// State machine state
    pub state: ServiceState,
    /// Supervisor reports the service live and serving
    pub live: bool,
    /// Latest attempt number
    pub attempt: u64,
    /// Error of the latest failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error returned by a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteError {
    /// Payload does not decode under the service's schema
    #[error("Invalid configuration for {service}: {reason}")]
    InvalidConfig {
        /// Service name as sent
        service: String,
        /// Decode failure
        reason: String,
    },

    /// Service name not in the registry
    #[error("Unknown service: {name}")]
    UnknownService {
        /// Name as sent
        name: String,
    },

    /// Node-side failure
    #[error("Internal error: {message}")]
    Internal {
        /// Description
        message: String,
    },
}

/// Frame a byte stream with the protocol's codec
pub fn framed<T>(io: T) -> Framed<T, LengthDelimitedCodec>
where
    T: AsyncRead + AsyncWrite,
{
    let codec = LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec();
    Framed::new(io, codec)
}

/// Encode and send one message
///
/// # Errors
///
/// Returns error if encoding or the write fails
pub async fn send_frame<T, M>(
    framed: &mut Framed<T, LengthDelimitedCodec>,
    message: &M,
) -> Result<(), TransportError>
where
    T: AsyncRead + AsyncWrite + Unpin,
    M: Serialize,
{
    let bytes = serde_json::to_vec(message).map_err(|e| TransportError::Serialization(e.to_string()))?;
    framed
        .send(Bytes::from(bytes))
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
}

/// Receive and decode one message
///
/// # Errors
///
/// Returns error if the peer closes before a frame arrives, the read
/// fails or the frame is not a valid message
pub async fn recv_frame<T, M>(framed: &mut Framed<T, LengthDelimitedCodec>) -> Result<M, TransportError>
where
    T: AsyncRead + AsyncWrite + Unpin,
    M: DeserializeOwned,
{
    let frame = framed
        .next()
        .await
        .ok_or_else(|| TransportError::InvalidResponse("connection closed before a frame".to_string()))?
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
    serde_json::from_slice(&frame).map_err(|e| TransportError::InvalidResponse(e.to_string()))
}
