//! Object-storage gateway placement.

use crate::codec::CodecError;
use crate::service::ServiceName;
use serde::{Deserialize, Serialize};

/// Default plain-HTTP port
pub const DEFAULT_PORT: u16 = 80;
/// Default HTTPS port
pub const DEFAULT_SSL_PORT: u16 = 443;

/// Gateway placement parameters
///
/// Every field is required on the wire. Paths use the empty string for
/// "not set". Capitalised keys are accepted as aliases so payloads written
/// by older clients still decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RgwPlacement {
    /// Plain-HTTP port
    #[serde(alias = "Port")]
    pub port: u16,
    /// HTTPS port
    #[serde(alias = "SSLPort")]
    pub ssl_port: u16,
    /// Path to the TLS certificate
    #[serde(alias = "SSLCertificate")]
    pub ssl_certificate: String,
    /// Path to the TLS private key
    #[serde(alias = "SSLPrivateKey")]
    pub ssl_private_key: String,
}

impl RgwPlacement {
    /// Create a placement without TLS material
    #[must_use]
    pub fn new(port: u16, ssl_port: u16) -> Self {
        Self {
            port,
            ssl_port,
            ssl_certificate: String::new(),
            ssl_private_key: String::new(),
        }
    }

    /// Set certificate and key paths
    #[must_use]
    pub fn with_tls(mut self, certificate: impl Into<String>, private_key: impl Into<String>) -> Self {
        self.ssl_certificate = certificate.into();
        self.ssl_private_key = private_key.into();
        self
    }

    /// Whether any TLS material is configured
    #[must_use]
    pub fn has_tls(&self) -> bool {
        !self.ssl_certificate.is_empty() || !self.ssl_private_key.is_empty()
    }

    /// Check the structural invariants of the schema
    ///
    /// # Errors
    ///
    /// Returns a schema error if a port is zero or only one of the
    /// certificate/key pair is set
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.port == 0 {
            return Err(CodecError::schema(ServiceName::Rgw, "port must be in 1..=65535"));
        }
        if self.ssl_port == 0 {
            return Err(CodecError::schema(ServiceName::Rgw, "sslPort must be in 1..=65535"));
        }
        match (self.ssl_certificate.is_empty(), self.ssl_private_key.is_empty()) {
            (false, true) => Err(CodecError::schema(
                ServiceName::Rgw,
                "sslCertificate is set but sslPrivateKey is empty",
            )),
            (true, false) => Err(CodecError::schema(
                ServiceName::Rgw,
                "sslPrivateKey is set but sslCertificate is empty",
            )),
            _ => Ok(()),
        }
    }
}

impl Default for RgwPlacement {
    fn default() -> Self {
        Self::new(DEFAULT_PORT, DEFAULT_SSL_PORT)
    }
}
