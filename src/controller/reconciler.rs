//! Main reconciler for Vault resources
//!
//! Implements the controller pattern using kube-rs runtime. Each pass runs
//! the same pipeline: services, TLS, config artifacts, the StatefulSet, the
//! optional monitoring/configurer/ingress objects and finally the status.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    Api, Client, Resource, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::apply::apply;
use super::certificates::{external_tls_expiry, reconcile_tls_secret, tls_secret_name};
use super::conditions::{healthy_condition, missing_storage_condition, status_needs_update};
use super::configurer::deploy_configurer;
use super::distribution::distribute_ca_certificate;
use super::health::{live_pod_names, observe_leader, HealthProbe};
use super::platform::{ObjectKey, ObjectKind, ObjectStore};
use super::resources::{
    build_fluentd_config_map, build_ingress, build_per_instance_services,
    build_raw_config_secret, build_service, build_service_monitor, build_statsd_config_map,
    load_balancer_ingress_points, secret_matches_selectors, service_type,
    watched_secrets_digest, RestartTriggers,
};
use super::workload::build_stateful_set;
use crate::crd::{Vault, VaultStatus};
use crate::error::{Error, Result};

/// Requeue while waiting for a load balancer address
pub const LOAD_BALANCER_REQUEUE: Duration = Duration::from_secs(5);
/// Periodic resync after a successful pass
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Dependencies shared by all reconciliation passes
pub struct Context {
    pub store: Arc<dyn ObjectStore>,
    pub probe: Arc<dyn HealthProbe>,
}

impl Context {
    pub fn new(store: Arc<dyn ObjectStore>, probe: Arc<dyn HealthProbe>) -> Self {
        Self { store, probe }
    }
}

/// Main entry point to start the controller
///
/// Watches Vaults (cluster-wide, or in `namespace` only) and the objects
/// they own.
pub async fn run_controller(
    client: Client,
    namespace: Option<String>,
    ctx: Arc<Context>,
) -> Result<()> {
    let vaults: Api<Vault> = scoped_api(&client, namespace.as_deref());

    info!(
        "Starting Vault controller in {}",
        namespace.as_deref().unwrap_or("all namespaces")
    );

    // Verify CRD exists
    match vaults.list(&Default::default()).await {
        Ok(_) => info!("Vault CRD is available"),
        Err(e) => {
            error!("Vault CRD not found. Please install the CRD first: {:?}", e);
            return Err(Error::ConfigError("Vault CRD not installed".to_string()));
        }
    }

    Controller::new(vaults, Config::default())
        // Watch owned resources for changes
        .owns::<StatefulSet>(scoped_api(&client, namespace.as_deref()), Config::default())
        .owns::<Service>(scoped_api(&client, namespace.as_deref()), Config::default())
        .owns::<Secret>(scoped_api(&client, namespace.as_deref()), Config::default())
        .owns::<ConfigMap>(scoped_api(&client, namespace.as_deref()), Config::default())
        .owns::<Deployment>(scoped_api(&client, namespace.as_deref()), Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

#[instrument(skip(vault, ctx), fields(name = %vault.name_any(), namespace = vault.namespace()))]
async fn reconcile(vault: Arc<Vault>, ctx: Arc<Context>) -> Result<Action> {
    if vault.metadata.deletion_timestamp.is_some() {
        // Owned objects are garbage collected through their owner references
        debug!("Vault is being deleted");
        return Ok(Action::await_change());
    }
    reconcile_vault(&ctx, &vault).await
}

/// One reconciliation pass for `vault`
pub async fn reconcile_vault(ctx: &Context, vault: &Vault) -> Result<Action> {
    let store = ctx.store.as_ref();
    let namespace = vault.namespace_or_default();

    if vault.spec.storage().is_none() {
        warn!("Vault {} has no storage configuration", vault.name_any());
        record_missing_storage(store, vault).await?;
        return Err(Error::MissingStorage);
    }

    // Services
    let service = build_service(vault);
    let service_key = ObjectKey::new(ObjectKind::Service, namespace.clone(), vault.name_any());
    apply(store, service.clone().into()).await?;
    let service: Service = store
        .get(&service_key)
        .await?
        .and_then(|o| o.try_into().ok())
        .unwrap_or(service);

    let needs_lb_address = service_type(vault) == "LoadBalancer"
        && !vault.spec.is_tls_disabled()
        && vault.spec.existing_tls_secret_name.is_empty();
    if needs_lb_address && load_balancer_ingress_points(&service).is_empty() {
        info!(
            "Waiting for load balancer address of {}, requeueing",
            service_key
        );
        return Ok(Action::requeue(LOAD_BALANCER_REQUEUE));
    }

    for per_instance in build_per_instance_services(vault) {
        apply(store, per_instance.into()).await?;
    }

    // TLS
    let tls_expiration = if vault.spec.is_tls_disabled() {
        None
    } else {
        let expiration = ensure_tls_secret(store, vault, &service).await?;
        if !vault.spec.ca_namespaces.is_empty() {
            distribute_ca_certificate(store, vault, &tls_volume_secret_name(vault)).await?;
        }
        Some(expiration)
    };

    // Sidecar configuration
    if vault.spec.is_fluentd_enabled() {
        apply(store, build_fluentd_config_map(vault).into()).await?;
    }
    if !vault.spec.is_statsd_disabled() {
        apply(store, build_statsd_config_map(vault).into()).await?;
    }

    // Workload
    let watched_secrets_digest = watched_secrets(store, vault).await?;
    let (raw_config, config_digest) = build_raw_config_secret(vault)?;
    apply(store, raw_config.into()).await?;

    let triggers = RestartTriggers {
        tls_expiration,
        config_digest,
        watched_secrets_digest,
    };
    let stateful_set = build_stateful_set(vault, &triggers.annotations(), &service)?;
    apply(store, stateful_set.into()).await?;

    if vault.spec.service_monitor_enabled {
        apply(store, build_service_monitor(vault).into()).await?;
    }

    if vault.spec.has_external_config() {
        deploy_configurer(store, vault, &triggers.tls_annotations()).await?;
    }

    if let Some(ingress) = build_ingress(vault) {
        apply(store, ingress.into()).await?;
    }

    update_status(ctx, vault).await?;

    Ok(Action::requeue(RESYNC_INTERVAL))
}

fn tls_volume_secret_name(vault: &Vault) -> String {
    if vault.spec.existing_tls_secret_name.is_empty() {
        tls_secret_name(vault)
    } else {
        vault.spec.existing_tls_secret_name.clone()
    }
}

/// Issue or rotate the generated TLS secret, or read the user supplied one
///
/// Returns the expiry stamped on the pod template.
async fn ensure_tls_secret(
    store: &dyn ObjectStore,
    vault: &Vault,
    service: &Service,
) -> Result<chrono::DateTime<chrono::Utc>> {
    let key = ObjectKey::new(
        ObjectKind::Secret,
        vault.namespace_or_default(),
        tls_volume_secret_name(vault),
    );
    let existing: Option<Secret> = store.get(&key).await?.and_then(|o| o.try_into().ok());

    if !vault.spec.existing_tls_secret_name.is_empty() {
        let secret = existing.ok_or_else(|| {
            Error::ConfigError(format!("existing TLS secret {key} not found"))
        })?;
        return external_tls_expiry(&secret);
    }

    let outcome = reconcile_tls_secret(vault, service, existing.as_ref())?;
    debug!("TLS secret {}: {:?}", key, outcome.action);
    apply(store, outcome.secret.into()).await?;
    Ok(outcome.expiration)
}

/// Digest of the secrets selected by the watched label/annotation selectors
async fn watched_secrets(store: &dyn ObjectStore, vault: &Vault) -> Result<Option<String>> {
    let labels = vault.spec.watched_secrets_labels();
    let annotations = vault.spec.watched_secrets_annotations();
    if labels.is_empty() && annotations.is_empty() {
        return Ok(None);
    }

    let secrets: Vec<Secret> = store
        .list_secrets(&vault.namespace_or_default(), None)
        .await?
        .into_iter()
        .filter(|s| secret_matches_selectors(s, labels, annotations))
        .collect();
    Ok(watched_secrets_digest(&secrets))
}

async fn record_missing_storage(store: &dyn ObjectStore, vault: &Vault) -> Result<()> {
    let Some(mut latest) = store
        .get_vault(&vault.namespace_or_default(), &vault.name_any())
        .await?
    else {
        return Ok(());
    };

    let old = latest.status.clone().unwrap_or_default();
    let status = VaultStatus {
        nodes: old.nodes.clone(),
        leader: old.leader.clone(),
        conditions: vec![missing_storage_condition()],
    };
    if !status_needs_update(&old, &status) {
        return Ok(());
    }

    latest.status = Some(status);
    store.replace_vault_status(&latest).await?;
    Ok(())
}

/// Probe the replicas and write the status if it changed
async fn update_status(ctx: &Context, vault: &Vault) -> Result<()> {
    let store = ctx.store.as_ref();
    let observation = observe_leader(ctx.probe.as_ref(), vault).await;
    let nodes = live_pod_names(store, vault).await?;

    // Re-fetch so the write is based on the latest resourceVersion
    let Some(mut latest) = store
        .get_vault(&vault.namespace_or_default(), &vault.name_any())
        .await?
    else {
        debug!("Vault {} is gone, skipping status update", vault.name_any());
        return Ok(());
    };

    let status = VaultStatus {
        nodes,
        leader: observation.leader.clone(),
        conditions: vec![healthy_condition(
            !observation.leader.is_empty(),
            observation.error,
        )],
    };
    let old = latest.status.clone().unwrap_or_default();
    if !status_needs_update(&old, &status) {
        debug!("Status of {} unchanged", vault.name_any());
        return Ok(());
    }

    info!(
        "Updating status of {}: leader={:?} nodes={:?}",
        vault.name_any(),
        status.leader,
        status.nodes
    );
    latest.status = Some(status);
    store.replace_vault_status(&latest).await?;
    Ok(())
}

/// Error policy for the controller
fn error_policy(vault: Arc<Vault>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!("Reconciliation error for {}: {:?}", vault.name_any(), error);

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
