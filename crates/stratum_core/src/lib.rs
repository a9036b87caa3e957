//! STRATUM Core Types
//!
//! Pure types shared by every STRATUM crate: node names, request
//! identifiers and the common error type. No I/O happens here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use id::{NodeName, RequestId};
