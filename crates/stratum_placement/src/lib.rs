//! STRATUM Placement
//!
//! Per-service placement schemas, the codec that turns them into the opaque
//! payload carried by an enablement request, and the request builder that
//! runs the pre-flight checks on the operator's machine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod placement;
pub mod request;
pub mod rgw;
pub mod service;

pub use codec::CodecError;
pub use placement::ServicePlacement;
pub use request::{
    AdvisoryWarning, BuildError, BuiltRequest, EnablementRequest, RequestBuilder,
    SafeStoragePrefixes,
};
pub use rgw::RgwPlacement;
pub use service::ServiceName;
