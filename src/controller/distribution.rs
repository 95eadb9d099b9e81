//! CA certificate distribution
//!
//! Copies the public CA certificate of a Vault's TLS secret into other
//! namespaces so workloads there can trust the Vault API.

use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::ResourceExt;
use tracing::{info, warn};

use super::apply::apply;
use super::certificates::CA_CERT_KEY;
use super::platform::{ObjectKey, ObjectKind, ObjectStore};
use crate::crd::Vault;
use crate::error::{Error, Result};

/// `caNamespaces` entry selecting every namespace
pub const ALL_NAMESPACES: &str = "*";

const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

/// Strip all private material from a TLS secret, keeping only `ca.crt`
pub fn ca_only_secret(secret: &Secret) -> Secret {
    let mut copy = secret.clone();
    if copy.type_.as_deref() == Some(TLS_SECRET_TYPE) {
        // The tls type requires tls.crt and tls.key
        copy.type_ = Some("Opaque".to_string());
    }
    if let Some(data) = copy.data.as_mut() {
        data.retain(|key, _| key == CA_CERT_KEY);
    }
    copy.string_data = None;
    copy
}

fn is_terminating(namespace: &Namespace) -> bool {
    namespace.metadata.deletion_timestamp.is_some()
}

/// Resolve `caNamespaces`, expanding the wildcard to all live namespaces
pub async fn target_namespaces(store: &dyn ObjectStore, vault: &Vault) -> Result<Vec<String>> {
    if vault.spec.ca_namespaces.len() == 1 && vault.spec.ca_namespaces[0] == ALL_NAMESPACES {
        let namespaces = store.list_namespaces().await?;
        return Ok(namespaces
            .iter()
            .filter(|ns| !is_terminating(ns))
            .map(|ns| ns.name_any())
            .collect());
    }
    Ok(vault.spec.ca_namespaces.clone())
}

/// Apply the CA-only copy of `secret_name` into every target namespace
///
/// A target namespace that does not exist is skipped.
pub async fn distribute_ca_certificate(
    store: &dyn ObjectStore,
    vault: &Vault,
    secret_name: &str,
) -> Result<()> {
    let own_namespace = vault.namespace_or_default();
    let key = ObjectKey::new(ObjectKind::Secret, own_namespace.clone(), secret_name);
    let secret: Secret = store
        .get(&key)
        .await?
        .and_then(|o| o.try_into().ok())
        .ok_or_else(|| Error::ConfigError(format!("TLS secret {key} not found")))?;

    let ca_secret = ca_only_secret(&secret);

    for namespace in target_namespaces(store, vault).await? {
        if namespace == own_namespace {
            continue;
        }

        let mut copy = ca_secret.clone();
        let meta = &mut copy.metadata;
        meta.namespace = Some(namespace.clone());
        meta.resource_version = None;
        meta.uid = None;
        meta.owner_references = None;
        meta.creation_timestamp = None;
        meta.managed_fields = None;

        match apply(store, copy.into()).await {
            Ok(_) => info!("CA certificate distributed to namespace {}", namespace),
            Err(e) if e.is_not_found() => {
                warn!("Namespace {} does not exist, skipping CA distribution", namespace);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}
