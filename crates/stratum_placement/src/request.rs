//! Enablement requests and the client-side request builder.

use crate::codec::CodecError;
use crate::placement::ServicePlacement;
use crate::service::ServiceName;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variables that name daemon-readable storage areas
pub const SAFE_STORAGE_VARS: [&str; 2] = ["SNAP_COMMON", "SNAP_USER_COMMON"];

/// Request to enable a service on a node
///
/// This is the exact wire shape; the payload stays opaque until the
/// receiving node decodes it with the schema of `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnablementRequest {
    /// Service identifier
    pub name: String,
    /// Whether the client intends to wait for readiness
    pub wait: bool,
    /// Serialized placement
    pub payload: String,
}

impl EnablementRequest {
    /// Parse the service name
    ///
    /// # Errors
    ///
    /// Returns error if the name is not a registered service
    pub fn service(&self) -> Result<ServiceName, CodecError> {
        self.name.parse()
    }

    /// Decode the payload under the named service's schema
    ///
    /// # Errors
    ///
    /// Returns error if the name is unknown or the payload does not match
    pub fn placement(&self) -> Result<ServicePlacement, CodecError> {
        ServicePlacement::decode(self.service()?, &self.payload)
    }
}

/// Storage prefixes the service daemons are known to be able to read
///
/// Empty prefixes are ignored; with no prefixes at all every TLS path is
/// considered potentially unreadable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafeStoragePrefixes {
    prefixes: Vec<PathBuf>,
}

impl SafeStoragePrefixes {
    /// Create from explicit prefixes
    #[must_use]
    pub fn new<I, P>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(Into::into)
                .filter(|p: &PathBuf| !p.as_os_str().is_empty())
                .collect(),
        }
    }

    /// Read the prefixes from [`SAFE_STORAGE_VARS`]
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(
            SAFE_STORAGE_VARS
                .iter()
                .filter_map(|var| std::env::var_os(var))
                .map(PathBuf::from),
        )
    }

    /// Configured prefixes
    #[must_use]
    pub fn prefixes(&self) -> &[PathBuf] {
        &self.prefixes
    }

    /// Whether `path` lies under one of the prefixes
    #[must_use]
    pub fn covers(&self, path: &Path) -> bool {
        self.prefixes.iter().any(|prefix| path.starts_with(prefix))
    }
}

/// Non-fatal finding from the pre-flight checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvisoryWarning {
    /// A TLS file lies outside every daemon-readable prefix
    UnreadablePath {
        /// The offending path
        path: String,
    },
    /// Only one half of the certificate/key pair was supplied
    MismatchedTlsPair {
        /// True when the certificate is set and the key is missing
        certificate_set: bool,
    },
}

impl std::fmt::Display for AdvisoryWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnreadablePath { path } => write!(
                f,
                "SSL file {} might not be readable by the daemon; use files under ${} or ${}",
                path, SAFE_STORAGE_VARS[0], SAFE_STORAGE_VARS[1]
            ),
            Self::MismatchedTlsPair { certificate_set: true } => {
                write!(f, "SSL certificate given without a private key")
            }
            Self::MismatchedTlsPair { certificate_set: false } => {
                write!(f, "SSL private key given without a certificate")
            }
        }
    }
}

/// Request builder errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// Input rejected before dispatch
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// Offending input
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Placement could not be encoded
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl BuildError {
    fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Output of [`RequestBuilder::build`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltRequest {
    /// Request ready for dispatch
    pub request: EnablementRequest,
    /// Advisory findings for the operator
    pub warnings: Vec<AdvisoryWarning>,
}

/// Builds canonical enablement requests
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    prefixes: SafeStoragePrefixes,
}

impl RequestBuilder {
    /// Create a builder that checks TLS paths against `prefixes`
    #[must_use]
    pub fn new(prefixes: SafeStoragePrefixes) -> Self {
        Self { prefixes }
    }

    /// Validate inputs and assemble a request
    ///
    /// Advisory warnings never fail the build.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Validation`] for an empty or unknown service
    /// name, a name that does not match the placement, or a zero port
    pub fn build(
        &self,
        service: &str,
        wait: bool,
        placement: &ServicePlacement,
    ) -> Result<BuiltRequest, BuildError> {
        if service.is_empty() {
            return Err(BuildError::validation("service", "service name is empty"));
        }
        let name: ServiceName = service
            .parse()
            .map_err(|_| BuildError::validation("service", format!("unknown service {:?}", service)))?;
        if name != placement.service() {
            return Err(BuildError::validation(
                "service",
                format!("placement is for {}, not {}", placement.service(), name),
            ));
        }
        if let Some(rgw) = placement.as_rgw() {
            if rgw.port == 0 {
                return Err(BuildError::validation("port", "must be in 1..=65535"));
            }
            if rgw.ssl_port == 0 {
                return Err(BuildError::validation("ssl-port", "must be in 1..=65535"));
            }
        }

        let warnings = self.check_tls_paths(placement);
        for warning in &warnings {
            warn!(service = %name, "{}", warning);
        }

        let payload = placement.encode()?;
        Ok(BuiltRequest {
            request: EnablementRequest {
                name: name.as_str().to_string(),
                wait,
                payload,
            },
            warnings,
        })
    }

    /// Heuristic readability check of the TLS material
    #[must_use]
    pub fn check_tls_paths(&self, placement: &ServicePlacement) -> Vec<AdvisoryWarning> {
        let Some(rgw) = placement.as_rgw() else {
            return Vec::new();
        };
        if !rgw.has_tls() {
            return Vec::new();
        }

        let mut warnings = Vec::new();
        if rgw.ssl_certificate.is_empty() != rgw.ssl_private_key.is_empty() {
            warnings.push(AdvisoryWarning::MismatchedTlsPair {
                certificate_set: !rgw.ssl_certificate.is_empty(),
            });
        }
        for path in [&rgw.ssl_certificate, &rgw.ssl_private_key] {
            if !path.is_empty() && !self.prefixes.covers(Path::new(path)) {
                warnings.push(AdvisoryWarning::UnreadablePath { path: path.clone() });
            }
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rgw::RgwPlacement;

    fn snap_prefixes() -> SafeStoragePrefixes {
        SafeStoragePrefixes::new(["/var/snap/stratum/common", "/home/op/snap/stratum/common"])
    }

    #[test]
    fn test_build_plain_rgw() {
        let builder = RequestBuilder::new(snap_prefixes());
        let placement = ServicePlacement::Rgw(RgwPlacement::default());

        let built = builder.build("rgw", true, &placement).unwrap();
        assert!(built.warnings.is_empty());
        assert_eq!(built.request.name, "rgw");
        assert!(built.request.wait);
        assert_eq!(built.request.placement().unwrap(), placement);
    }

    #[test]
    fn test_build_empty_service_name() {
        let builder = RequestBuilder::default();
        let placement = ServicePlacement::Rgw(RgwPlacement::default());
        let err = builder.build("", true, &placement).unwrap_err();
        assert!(matches!(err, BuildError::Validation { ref field, .. } if field == "service"));
    }

    #[test]
    fn test_build_unknown_service() {
        let builder = RequestBuilder::default();
        let err = builder.build("nfs", false, &ServicePlacement::Mon).unwrap_err();
        assert!(matches!(err, BuildError::Validation { .. }));
    }

    #[test]
    fn test_build_mismatched_placement() {
        let builder = RequestBuilder::default();
        let err = builder.build("rgw", false, &ServicePlacement::Mon).unwrap_err();
        assert!(err.to_string().contains("placement is for mon"));
    }

    #[test]
    fn test_build_zero_port() {
        let builder = RequestBuilder::default();
        let placement = ServicePlacement::Rgw(RgwPlacement::new(0, 443));
        let err = builder.build("rgw", false, &placement).unwrap_err();
        assert!(matches!(err, BuildError::Validation { ref field, .. } if field == "port"));
    }

    #[test]
    fn test_tls_under_safe_prefix_no_warning() {
        let builder = RequestBuilder::new(snap_prefixes());
        let placement = ServicePlacement::Rgw(RgwPlacement::default().with_tls(
            "/var/snap/stratum/common/tls/cert.pem",
            "/home/op/snap/stratum/common/key.pem",
        ));
        let built = builder.build("rgw", true, &placement).unwrap();
        assert!(built.warnings.is_empty());
    }

    #[test]
    fn test_tls_outside_prefix_warns_but_builds() {
        let builder = RequestBuilder::new(snap_prefixes());
        let placement = ServicePlacement::Rgw(
            RgwPlacement::default().with_tls("/etc/ssl/cert.pem", "/var/snap/stratum/common/key.pem"),
        );
        let built = builder.build("rgw", true, &placement).unwrap();
        assert_eq!(
            built.warnings,
            vec![AdvisoryWarning::UnreadablePath {
                path: "/etc/ssl/cert.pem".to_string()
            }]
        );
    }

    #[test]
    fn test_prefix_match_is_per_component() {
        let prefixes = SafeStoragePrefixes::new(["/var/snap/stratum/common"]);
        assert!(prefixes.covers(Path::new("/var/snap/stratum/common/cert.pem")));
        assert!(!prefixes.covers(Path::new("/var/snap/stratum/commonplace/cert.pem")));
    }

    #[test]
    fn test_no_prefixes_widens_warning() {
        let builder = RequestBuilder::new(SafeStoragePrefixes::new(["", ""]));
        assert!(builder.prefixes.prefixes().is_empty());

        let placement = ServicePlacement::Rgw(
            RgwPlacement::default().with_tls("/srv/cert.pem", "/srv/key.pem"),
        );
        let built = builder.build("rgw", false, &placement).unwrap();
        assert_eq!(built.warnings.len(), 2);
    }

    #[test]
    fn test_certificate_without_key() {
        let builder = RequestBuilder::new(snap_prefixes());
        let placement = ServicePlacement::Rgw(RgwPlacement::default().with_tls("/tmp/x.pem", ""));

        let built = builder.build("rgw", true, &placement).unwrap();
        assert!(built.warnings.contains(&AdvisoryWarning::MismatchedTlsPair {
            certificate_set: true
        }));
        assert!(built.warnings.contains(&AdvisoryWarning::UnreadablePath {
            path: "/tmp/x.pem".to_string()
        }));

        // The request still goes out; the receiving node enforces pairing.
        assert!(matches!(
            built.request.placement(),
            Err(CodecError::Schema { .. })
        ));
    }

    #[test]
    fn test_request_wire_shape() {
        let request = EnablementRequest {
            name: "rgw".to_string(),
            wait: true,
            payload: "{}".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["name"], "rgw");
        assert_eq!(json["wait"], true);
        assert_eq!(json["payload"], "{}");
    }

    #[test]
    fn test_warning_display() {
        let warning = AdvisoryWarning::UnreadablePath {
            path: "/tmp/x.pem".to_string(),
        };
        let s = warning.to_string();
        assert!(s.contains("/tmp/x.pem"));
        assert!(s.contains("SNAP_COMMON"));
    }
}
