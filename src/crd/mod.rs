//! Custom Resource Definitions for vault-k8s
//!
//! The `Vault` CRD plus the third-party resources the operator emits.

mod service_monitor;
pub mod types;
mod vault;


pub use service_monitor::{
    Endpoint, NamespaceSelector, ServiceMonitor, ServiceMonitorSpec, TlsConfig,
};
pub use types::*;
pub use vault::{
    parse_duration, Vault, VaultSpec, VaultStatus, DEFAULT_BANK_VAULTS_IMAGE, DEFAULT_CONFIG_PATH,
    DEFAULT_TLS_EXPIRY_THRESHOLD, DEFAULT_VAULT_IMAGE,
};
