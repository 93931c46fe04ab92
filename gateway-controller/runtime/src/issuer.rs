//! Certificate issuers available to the compiler.

use crate::core::{document::Certificate, Error};
use crate::index::{CertificateIssuer, IssuedCertificate};
use anyhow::{anyhow, Context, Result};
use rcgen::{CertificateParams, DnType, KeyPair};

/// Signs proxy leaf certificates with a CA loaded from PEM files.
pub struct CaIssuer {
    ca_pem: String,
    ca: rcgen::Certificate,
    ca_key: KeyPair,
}

/// Used when mTLS is disabled; the compiler never asks it for a certificate.
pub struct NoIssuer;

// === impl CaIssuer ===

impl CaIssuer {
    pub fn load(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let ca_key = KeyPair::from_pem(key_pem).context("parsing CA key")?;
        let ca = CertificateParams::from_ca_cert_pem(cert_pem)
            .context("parsing CA certificate")?
            .self_signed(&ca_key)
            .context("loading CA certificate")?;
        Ok(Self {
            ca_pem: cert_pem.to_string(),
            ca,
            ca_key,
        })
    }

    fn sign(
        &self,
        common_name: &str,
        sans: &[String],
        validity_secs: u64,
    ) -> Result<IssuedCertificate> {
        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(sans.to_vec())?;
        params.distinguished_name.push(DnType::CommonName, common_name);

        let expires_at = chrono::Utc::now() + chrono::Duration::seconds(validity_secs as i64);
        params.not_before = time::OffsetDateTime::now_utc();
        params.not_after = time::OffsetDateTime::from_unix_timestamp(expires_at.timestamp())
            .context("certificate validity out of range")?;

        let cert = params.signed_by(&key, &self.ca, &self.ca_key)?;
        Ok(IssuedCertificate {
            certificate: Certificate {
                expiration: expires_at.to_rfc3339(),
                common_name: common_name.to_string(),
                cert_chain: cert.pem(),
                private_key: key.serialize_pem(),
                issuing_ca: self.ca_pem.clone(),
            },
            expires_at,
            sans: sans.to_vec(),
        })
    }
}

impl CertificateIssuer for CaIssuer {
    fn issue(
        &self,
        common_name: &str,
        sans: &[String],
        validity_secs: u64,
    ) -> Result<IssuedCertificate, Error> {
        self.sign(common_name, sans, validity_secs)
            .map_err(Error::Transient)
    }
}

// === impl NoIssuer ===

impl CertificateIssuer for NoIssuer {
    fn issue(&self, _: &str, _: &[String], _: u64) -> Result<IssuedCertificate, Error> {
        Err(Error::Transient(anyhow!(
            "no certificate authority is configured"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ca() -> (String, String) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, "test-ca");
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    #[test]
    fn issues_certificates_with_the_requested_sans() {
        let (cert_pem, key_pem) = test_ca();
        let issuer = CaIssuer::load(&cert_pem, &key_pem).unwrap();

        let sans = vec!["gw-a.ns1".to_string(), "app.example.com".to_string()];
        let issued = issuer.issue("gw-a.ns1", &sans, 3600).unwrap();
        assert_eq!(issued.sans, sans);
        assert_eq!(issued.certificate.common_name, "gw-a.ns1");
        assert_eq!(issued.certificate.issuing_ca, cert_pem);
        assert!(issued.certificate.cert_chain.contains("BEGIN CERTIFICATE"));
        assert!(issued.expires_at > chrono::Utc::now());
    }
}
