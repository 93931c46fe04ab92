//! The certificate issuance seam.
//!
//! Issuance itself is an external concern; the compiler only decides when a
//! proxy's cached certificate must be rotated.

use chrono::{DateTime, Utc};
use meshgateway_controller_core::{document::Certificate, Error};

/// Issues leaf certificates for data-plane proxies.
pub trait CertificateIssuer: Send + Sync {
    fn issue(
        &self,
        common_name: &str,
        sans: &[String],
        validity_secs: u64,
    ) -> Result<IssuedCertificate, Error>;
}

/// A certificate plus the metadata the compiler needs for rotation.
#[derive(Clone, Debug, PartialEq)]
pub struct IssuedCertificate {
    pub certificate: Certificate,
    pub expires_at: DateTime<Utc>,
    pub sans: Vec<String>,
}

// === impl IssuedCertificate ===

impl IssuedCertificate {
    /// A certificate is stale when its SAN set no longer covers the services
    /// the proxy implements or when less than half of its validity remains.
    pub(crate) fn is_stale(
        &self,
        sans: &[String],
        validity_secs: u64,
        now: DateTime<Utc>,
    ) -> bool {
        if self.sans != sans {
            return true;
        }
        let remaining = (self.expires_at - now).num_seconds();
        remaining < (validity_secs / 2) as i64
    }
}
