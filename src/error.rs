//! Error types for the Vault operator

use thiserror::Error;

/// Errors surfaced by a reconciliation pass
#[derive(Error, Debug)]
pub enum Error {
    /// Any create/update/get/list failure against the Kubernetes API,
    /// including optimistic-concurrency conflicts
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The spec describes a topology the operator refuses to build
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// No storage backend declared in the Vault configuration
    #[error("storage configuration is missing")]
    MissingStorage,

    /// Chain load, parse or issuance failure
    #[error("Certificate error: {0}")]
    CertificateError(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Health check failed: {0}")]
    HealthCheckError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<rcgen::Error> for Error {
    fn from(e: rcgen::Error) -> Self {
        Error::CertificateError(e.to_string())
    }
}

impl Error {
    /// Whether the controller should retry quickly
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::KubeError(_)
                | Error::MissingStorage
                | Error::HttpError(_)
                | Error::HealthCheckError(_)
        )
    }

    /// API responded with 404
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// API responded with 409 (resourceVersion mismatch or already exists)
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    fn api_code(&self) -> Option<u16> {
        match self {
            Error::KubeError(kube::Error::Api(e)) => Some(e.code),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
