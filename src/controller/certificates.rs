//! TLS secret lifecycle
//!
//! Decides, from the current content of the `<name>-tls` secret, whether to
//! issue a whole new chain, rotate only the server certificate, or leave the
//! secret alone.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::ByteString;
use kube::ResourceExt;
use tracing::{debug, info};

use super::resources::{
    common_annotations, load_balancer_ingress_points, owned_meta, per_instance_service_name,
    with_vault_annotations, with_vault_labels,
};
use super::tls::{certificate_expiry, certificate_sans, CaLoadError, CertManager, CertificateChain};
use crate::crd::Vault;
use crate::error::{Error, Result};

pub const CA_CERT_KEY: &str = "ca.crt";
pub const CA_KEY_KEY: &str = "ca.key";
pub const SERVER_CERT_KEY: &str = "server.crt";
pub const SERVER_KEY_KEY: &str = "server.key";

/// Keys of a `kubernetes.io/tls` secret supplied by the user
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";

pub fn tls_secret_name(vault: &Vault) -> String {
    format!("{}-tls", vault.name_any())
}

/// Short, namespaced and cluster-local DNS names of a service
pub fn hosts_for_service(name: &str, namespace: &str) -> Vec<String> {
    vec![
        name.to_string(),
        format!("{name}.{namespace}"),
        format!("{name}.{namespace}.svc.cluster.local"),
    ]
}

/// Every name and address the server certificate must cover
pub fn hosts_and_ips(vault: &Vault, service: &Service) -> Vec<String> {
    let name = vault.name_any();
    let namespace = vault.namespace_or_default();

    let mut hosts = vec!["127.0.0.1".to_string()];
    hosts.extend(hosts_for_service(&name, &namespace));
    hosts.extend(load_balancer_ingress_points(service));
    hosts.extend(
        vault
            .spec
            .tls_additional_hosts
            .iter()
            .filter(|h| !h.is_empty())
            .cloned(),
    );
    if vault.spec.size > 1 {
        for i in 0..vault.spec.size {
            hosts.extend(hosts_for_service(
                &per_instance_service_name(&name, i),
                &namespace,
            ));
        }
    }

    let mut seen = HashSet::new();
    hosts.retain(|h| seen.insert(h.clone()));
    hosts
}

/// What happened to the TLS secret this pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsAction {
    /// New CA and server certificate
    Issued,
    /// Server certificate reissued with the existing CA
    ServerRotated,
    Unchanged,
}

#[derive(Clone, Debug)]
pub struct TlsOutcome {
    pub secret: Secret,
    /// Earliest NotAfter of the CA and server certificate
    pub expiration: DateTime<Utc>,
    pub action: TlsAction,
}

fn field<'a>(data: &'a BTreeMap<String, ByteString>, key: &str) -> &'a [u8] {
    data.get(key).map(|v| v.0.as_slice()).unwrap_or_default()
}

/// Materialize the desired TLS secret from the live one, if any
///
/// A CA that is missing or about to expire is replaced together with the
/// server certificate. A CA that cannot be loaded for any other reason is
/// an error and is never replaced.
pub fn reconcile_tls_secret(
    vault: &Vault,
    service: &Service,
    existing: Option<&Secret>,
) -> Result<TlsOutcome> {
    let hosts = hosts_and_ips(vault, service);
    let threshold = vault.spec.tls_expiry_threshold();
    let data = existing
        .and_then(|s| s.data.clone())
        .unwrap_or_default();

    let mut manager = CertManager::new(hosts.clone());
    let (data, action) = match manager.load_ca(
        field(&data, CA_CERT_KEY),
        field(&data, CA_KEY_KEY),
        threshold,
    ) {
        Err(CaLoadError::Empty) => {
            info!("No CA found in {}, issuing a new chain", tls_secret_name(vault));
            (chain_data(&manager.new_chain()?), TlsAction::Issued)
        }
        Err(CaLoadError::Expired) => {
            info!("CA in {} is expiring, issuing a new chain", tls_secret_name(vault));
            (chain_data(&manager.new_chain()?), TlsAction::Issued)
        }
        Err(CaLoadError::Invalid(e)) => {
            return Err(Error::CertificateError(format!(
                "failed to load CA from {}: {}",
                tls_secret_name(vault),
                e
            )));
        }
        Ok(()) => match server_rotation_reason(&data, &hosts, threshold)? {
            Some(reason) => {
                info!("Regenerating server certificate: {}", reason);
                (
                    chain_data(&manager.generate_server()?),
                    TlsAction::ServerRotated,
                )
            }
            None => {
                debug!("TLS secret {} is up to date", tls_secret_name(vault));
                (data, TlsAction::Unchanged)
            }
        },
    };

    let expiration = chain_expiration(&data)?;
    let secret = Secret {
        metadata: owned_meta(
            vault,
            tls_secret_name(vault),
            with_vault_labels(vault, vault.labels_for_vault()),
            with_vault_annotations(vault, common_annotations(vault)),
        ),
        data: Some(data),
        ..Default::default()
    };

    Ok(TlsOutcome {
        secret,
        expiration,
        action,
    })
}

/// Why the server certificate of a chain with a valid CA must be reissued
fn server_rotation_reason(
    data: &BTreeMap<String, ByteString>,
    hosts: &[String],
    threshold: chrono::Duration,
) -> Result<Option<String>> {
    let server = field(data, SERVER_CERT_KEY);
    if server.is_empty() {
        return Ok(Some("server certificate is missing".to_string()));
    }

    let expiry = chain_expiration(data)?;
    if expiry - Utc::now() < threshold {
        return Ok(Some(format!("certificate chain expires at {expiry}")));
    }

    // Only the number of names is compared
    let covered = certificate_sans(server)?.len();
    if covered != hosts.len() {
        return Ok(Some(format!(
            "host set changed, certificate covers {} names but {} are required",
            covered,
            hosts.len()
        )));
    }

    Ok(None)
}

/// The nearer of the server and CA certificate expiry
fn chain_expiration(data: &BTreeMap<String, ByteString>) -> Result<DateTime<Utc>> {
    let mut expiry = certificate_expiry(field(data, SERVER_CERT_KEY))?;
    let ca = field(data, CA_CERT_KEY);
    if !ca.is_empty() {
        expiry = expiry.min(certificate_expiry(ca)?);
    }
    Ok(expiry)
}

fn chain_data(chain: &CertificateChain) -> BTreeMap<String, ByteString> {
    BTreeMap::from([
        (
            CA_CERT_KEY.to_string(),
            ByteString(chain.ca_cert.clone().into_bytes()),
        ),
        (
            CA_KEY_KEY.to_string(),
            ByteString(chain.ca_key.clone().into_bytes()),
        ),
        (
            SERVER_CERT_KEY.to_string(),
            ByteString(chain.server_cert.clone().into_bytes()),
        ),
        (
            SERVER_KEY_KEY.to_string(),
            ByteString(chain.server_key.clone().into_bytes()),
        ),
    ])
}

/// Expiry of the certificate in a user supplied TLS secret
pub fn external_tls_expiry(secret: &Secret) -> Result<DateTime<Utc>> {
    let data = secret.data.clone().unwrap_or_default();
    let cert = field(&data, TLS_CERT_KEY);
    if cert.is_empty() {
        return Err(Error::CertificateError(format!(
            "secret {} has no {}",
            secret.name_any(),
            TLS_CERT_KEY
        )));
    }
    certificate_expiry(cert)
}
