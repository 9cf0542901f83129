use std::fmt;

use thiserror::Error;

use crate::fingerprint::CertificateFingerprints;

/// A server presented a certificate whose fingerprint is not on record.
///
/// Both digests describe the same certificate so the operator can compare
/// against whichever reference value they have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UntrustedCertificate {
    pub host: String,
    pub short_fingerprint: String,
    pub long_fingerprint: String,
}

impl UntrustedCertificate {
    pub fn new(host: impl Into<String>, fingerprints: CertificateFingerprints) -> Self {
        Self {
            host: host.into(),
            short_fingerprint: fingerprints.short,
            long_fingerprint: fingerprints.long,
        }
    }
}

impl fmt::Display for UntrustedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown certificate for {} (SHA-256: {}, SHA-512: {})",
            self.host, self.short_fingerprint, self.long_fingerprint
        )
    }
}

/// Why a connection attempt did not produce a session.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("{0}")]
    Untrusted(UntrustedCertificate),
    /// Validation failed for a reason that retrying will not change.
    #[error("certificate validation failed: {0}")]
    Certificate(String),
    #[error(transparent)]
    Transient(#[from] anyhow::Error),
}
