//! Certificate authority manager
//!
//! Issues the CA and server certificates Vault serves its API and cluster
//! traffic with, and reads back expiry and SAN information from existing
//! PEM material.

use std::net::IpAddr;

use chrono::{DateTime, TimeZone, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use thiserror::Error;
use x509_parser::extensions::GeneralName;
use x509_parser::pem::parse_x509_pem;

use crate::error::{Error, Result};

pub const CA_VALIDITY_DAYS: i64 = 3650;
pub const SERVER_VALIDITY_DAYS: i64 = 365;

const CA_COMMON_NAME: &str = "Vault CA";

/// PEM encoded TLS chain
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CertificateChain {
    pub ca_cert: String,
    pub ca_key: String,
    pub server_cert: String,
    pub server_key: String,
}

/// Why an existing CA could not be reused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaLoadError {
    #[error("the CA certificate or key is empty")]
    Empty,

    #[error("the CA certificate expires within the threshold")]
    Expired,

    #[error("the CA could not be loaded: {0}")]
    Invalid(String),
}

struct LoadedCa {
    cert_pem: String,
    key_pem: String,
    issuer: Certificate,
    key: KeyPair,
}

/// Issues chains for a fixed host/IP set
pub struct CertManager {
    hosts: Vec<String>,
    ca_validity: chrono::Duration,
    server_validity: chrono::Duration,
    ca: Option<LoadedCa>,
}

impl CertManager {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts,
            ca_validity: chrono::Duration::days(CA_VALIDITY_DAYS),
            server_validity: chrono::Duration::days(SERVER_VALIDITY_DAYS),
            ca: None,
        }
    }

    pub fn with_ca_validity(mut self, validity: chrono::Duration) -> Self {
        self.ca_validity = validity;
        self
    }

    pub fn with_server_validity(mut self, validity: chrono::Duration) -> Self {
        self.server_validity = validity;
        self
    }

    /// Load an existing CA for signing
    ///
    /// A CA with less than `threshold` validity left counts as expired.
    pub fn load_ca(
        &mut self,
        cert_pem: &[u8],
        key_pem: &[u8],
        threshold: chrono::Duration,
    ) -> std::result::Result<(), CaLoadError> {
        if cert_pem.is_empty() || key_pem.is_empty() {
            return Err(CaLoadError::Empty);
        }

        let cert_pem = std::str::from_utf8(cert_pem)
            .map_err(|e| CaLoadError::Invalid(e.to_string()))?
            .to_string();
        let key_pem = std::str::from_utf8(key_pem)
            .map_err(|e| CaLoadError::Invalid(e.to_string()))?
            .to_string();

        let (_, pem) = parse_x509_pem(cert_pem.as_bytes())
            .map_err(|e| CaLoadError::Invalid(format!("failed to decode CA PEM: {e}")))?;
        let cert = pem
            .parse_x509()
            .map_err(|e| CaLoadError::Invalid(format!("failed to parse CA certificate: {e}")))?;

        let key = KeyPair::from_pem(&key_pem)
            .map_err(|e| CaLoadError::Invalid(format!("failed to parse CA key: {e}")))?;
        if key.public_key_raw() != &*cert.public_key().subject_public_key.data {
            return Err(CaLoadError::Invalid(
                "CA key does not match the CA certificate".to_string(),
            ));
        }

        let not_after = cert.validity().not_after.timestamp();
        if not_after - Utc::now().timestamp() < threshold.num_seconds() {
            return Err(CaLoadError::Expired);
        }

        let params = CertificateParams::from_ca_cert_pem(&cert_pem)
            .map_err(|e| CaLoadError::Invalid(e.to_string()))?;
        let issuer = params
            .self_signed(&key)
            .map_err(|e| CaLoadError::Invalid(e.to_string()))?;

        self.ca = Some(LoadedCa {
            cert_pem,
            key_pem,
            issuer,
            key,
        });
        Ok(())
    }

    /// Generate a fresh CA and a server certificate signed by it
    pub fn new_chain(&mut self) -> Result<CertificateChain> {
        let key = KeyPair::generate()?;
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, CA_COMMON_NAME);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
        set_validity(&mut params, self.ca_validity);
        let issuer = params.self_signed(&key)?;

        self.ca = Some(LoadedCa {
            cert_pem: issuer.pem(),
            key_pem: key.serialize_pem(),
            issuer,
            key,
        });
        self.generate_server()
    }

    /// Issue a new server certificate with the loaded CA
    pub fn generate_server(&self) -> Result<CertificateChain> {
        let ca = self.ca.as_ref().ok_or_else(|| {
            Error::CertificateError("no CA loaded to sign the server certificate".to_string())
        })?;

        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(self.hosts.clone())?;
        params
            .distinguished_name
            .push(DnType::CommonName, self.common_name());
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        set_validity(&mut params, self.server_validity);
        let cert = params.signed_by(&key, &ca.issuer, &ca.key)?;

        Ok(CertificateChain {
            ca_cert: ca.cert_pem.clone(),
            ca_key: ca.key_pem.clone(),
            server_cert: cert.pem(),
            server_key: key.serialize_pem(),
        })
    }

    fn common_name(&self) -> String {
        self.hosts
            .iter()
            .find(|h| h.parse::<IpAddr>().is_err())
            .cloned()
            .unwrap_or_else(|| "localhost".to_string())
    }
}

fn set_validity(params: &mut CertificateParams, validity: chrono::Duration) {
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::minutes(1);
    params.not_after = now + time::Duration::seconds(validity.num_seconds());
}

/// NotAfter of the first certificate in `pem`
pub fn certificate_expiry(pem: &[u8]) -> Result<DateTime<Utc>> {
    let (_, pem) = parse_x509_pem(pem)
        .map_err(|e| Error::CertificateError(format!("failed to decode PEM: {e}")))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| Error::CertificateError(format!("failed to parse certificate: {e}")))?;
    let not_after = cert.validity().not_after.timestamp();
    Utc.timestamp_opt(not_after, 0).single().ok_or_else(|| {
        Error::CertificateError(format!("certificate expiry {not_after} is out of range"))
    })
}

/// DNS names and IP addresses covered by the certificate in `pem`
pub fn certificate_sans(pem: &[u8]) -> Result<Vec<String>> {
    let (_, pem) = parse_x509_pem(pem)
        .map_err(|e| Error::CertificateError(format!("failed to decode PEM: {e}")))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| Error::CertificateError(format!("failed to parse certificate: {e}")))?;
    let san = cert
        .subject_alternative_name()
        .map_err(|e| Error::CertificateError(format!("invalid SAN extension: {e}")))?;

    let mut names = Vec::new();
    let Some(san) = san else {
        return Ok(names);
    };
    for name in &san.value.general_names {
        match name {
            GeneralName::DNSName(dns) => names.push(dns.to_string()),
            GeneralName::IPAddress(raw) => {
                if let Some(ip) = ip_from_bytes(raw) {
                    names.push(ip.to_string());
                }
            }
            _ => {}
        }
    }
    Ok(names)
}

fn ip_from_bytes(raw: &[u8]) -> Option<IpAddr> {
    match raw.len() {
        4 => <[u8; 4]>::try_from(raw).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(raw).ok().map(IpAddr::from),
        _ => None,
    }
}
