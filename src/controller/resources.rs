//! Kubernetes resource builders for Vault
//!
//! Pure functions turning a `Vault` into the objects the reconciler applies:
//! services, config artifacts, ingress, the ServiceMonitor and the restart
//! trigger annotations. The StatefulSet lives in `workload`, the configurer
//! objects in `configurer`.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::{
    ConfigMap, ContainerPort, ResourceRequirements, Secret, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta, OwnerReference,
};
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::crd::{Endpoint, NamespaceSelector, ServiceMonitor, ServiceMonitorSpec, TlsConfig, Vault};
use crate::error::Result;

pub const API_PORT: i32 = 8200;
pub const CLUSTER_PORT: i32 = 8201;
pub const METRICS_PORT: i32 = 9091;
pub const STATSD_PORT: i32 = 9102;

pub const POD_NAME_LABEL: &str = "statefulset.kubernetes.io/pod-name";
pub const GLOBAL_SERVICE_LABEL: &str = "global_service";

pub const TLS_EXPIRATION_ANNOTATION: &str = "vault.banzaicloud.io/tls-expiration-date";
pub const CONFIG_DIGEST_ANNOTATION: &str = "vault.banzaicloud.io/vault-config";
pub const WATCHED_SECRETS_ANNOTATION: &str = "vault.banzaicloud.io/watched-secrets-sum";

pub const RAW_CONFIG_FILE: &str = "vault-config.json";
pub const STATSD_MAPPING_FILE: &str = "statsd-mapping.conf";

const DEFAULT_STATSD_MAPPING: &str = r#"mappings:
        - match: vault.route.*.*
          name: "vault_route"
          labels:
            method: "$1"
            path: "$2""#;

// ============================================================================
// Metadata
// ============================================================================

/// Create an OwnerReference for garbage collection
pub fn owner_reference(vault: &Vault) -> OwnerReference {
    OwnerReference {
        api_version: Vault::api_version(&()).to_string(),
        kind: Vault::kind(&()).to_string(),
        name: vault.name_any(),
        uid: vault.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Metadata for an object owned by `vault` in its namespace
pub fn owned_meta(
    vault: &Vault,
    name: impl Into<String>,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(vault.namespace_or_default()),
        labels: Some(labels),
        annotations: (!annotations.is_empty()).then_some(annotations),
        owner_references: Some(vec![owner_reference(vault)]),
        ..Default::default()
    }
}

/// `labels` extended with the user's Vault labels, which win on collision
pub fn with_vault_labels(
    vault: &Vault,
    mut labels: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    labels.extend(vault.spec.vault_labels.clone());
    labels
}

pub fn with_configurer_labels(
    vault: &Vault,
    mut labels: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    labels.extend(vault.spec.vault_configurer_labels.clone());
    labels
}

/// Annotations shared by every generated object
pub fn common_annotations(vault: &Vault) -> BTreeMap<String, String> {
    vault.spec.annotations.clone()
}

pub fn with_vault_annotations(
    vault: &Vault,
    mut annotations: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    annotations.extend(vault.spec.vault_annotations.clone());
    annotations
}

pub fn with_configurer_annotations(
    vault: &Vault,
    mut annotations: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    annotations.extend(vault.spec.vault_configurer_annotations.clone());
    annotations
}

pub fn with_prometheus_annotations(
    port: &str,
    mut annotations: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    annotations.insert("prometheus.io/scrape".to_string(), "true".to_string());
    annotations.insert("prometheus.io/path".to_string(), "/metrics".to_string());
    annotations.insert("prometheus.io/port".to_string(), port.to_string());
    annotations
}

/// Backup hooks freezing the raft/file data directory around velero snapshots
pub fn with_velero_annotations(
    vault: &Vault,
    mut annotations: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    if vault.spec.velero_enabled {
        annotations.extend([
            (
                "pre.hook.backup.velero.io/container".to_string(),
                "velero-fsfreeze".to_string(),
            ),
            (
                "pre.hook.backup.velero.io/command".to_string(),
                r#"["/sbin/fsfreeze", "--freeze", "/vault/file/"]"#.to_string(),
            ),
            (
                "post.hook.backup.velero.io/container".to_string(),
                "velero-fsfreeze".to_string(),
            ),
            (
                "post.hook.backup.velero.io/command".to_string(),
                r#"["/sbin/fsfreeze", "--unfreeze", "/vault/file/"]"#.to_string(),
            ),
        ]);
    }
    annotations
}

// ============================================================================
// Restart triggers
// ============================================================================

/// Pod template annotations whose change rolls the StatefulSet
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestartTriggers {
    pub tls_expiration: Option<DateTime<Utc>>,
    pub config_digest: String,
    pub watched_secrets_digest: Option<String>,
}

impl RestartTriggers {
    /// Annotations carried over to the configurer deployment
    pub fn tls_annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        if let Some(expiration) = self.tls_expiration {
            annotations.insert(
                TLS_EXPIRATION_ANNOTATION.to_string(),
                expiration.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
        }
        annotations.insert(
            CONFIG_DIGEST_ANNOTATION.to_string(),
            self.config_digest.clone(),
        );
        annotations
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = self.tls_annotations();
        if let Some(digest) = &self.watched_secrets_digest {
            annotations.insert(WATCHED_SECRETS_ANNOTATION.to_string(), digest.clone());
        }
        annotations
    }
}

/// Whether every key/value of `selector` is present in `set`
fn selector_matches(
    selector: &BTreeMap<String, String>,
    set: Option<&BTreeMap<String, String>>,
) -> bool {
    selector
        .iter()
        .all(|(k, v)| set.and_then(|s| s.get(k)) == Some(v))
}

/// A secret is watched when any label selector or any annotation selector matches it
pub fn secret_matches_selectors(
    secret: &Secret,
    label_selectors: &[BTreeMap<String, String>],
    annotation_selectors: &[BTreeMap<String, String>],
) -> bool {
    let meta = &secret.metadata;
    let matched = label_selectors
        .iter()
        .any(|s| selector_matches(s, meta.labels.as_ref()))
        || annotation_selectors
            .iter()
            .any(|s| selector_matches(s, meta.annotations.as_ref()));
    if matched {
        debug!(
            "Watching secret {}/{}",
            meta.namespace.as_deref().unwrap_or_default(),
            meta.name.as_deref().unwrap_or_default()
        );
    }
    matched
}

/// Digest over the data of all watched secrets, `None` when nothing is watched
pub fn watched_secrets_digest(secrets: &[Secret]) -> Option<String> {
    if secrets.is_empty() {
        return None;
    }

    let mut values: Vec<String> = secrets
        .iter()
        .flat_map(|s| s.data.iter().flatten())
        .map(|(k, v)| format!("{}={}", k, String::from_utf8_lossy(&v.0)))
        .collect();
    values.sort();

    Some(hex::encode(Sha256::digest(values.join(";;").as_bytes())))
}

// ============================================================================
// Services
// ============================================================================

/// Service and container ports, sorted by name when user supplied
pub fn service_ports(vault: &Vault) -> (Vec<ServicePort>, Vec<ContainerPort>) {
    let api_port_name = vault.spec.api_port_name();
    let ports: Vec<(String, i32)> = if vault.spec.service_ports.is_empty() {
        vec![
            (api_port_name.to_string(), API_PORT),
            ("cluster-port".to_string(), CLUSTER_PORT),
        ]
    } else {
        // BTreeMap iteration is already ordered by name
        vault
            .spec
            .service_ports
            .iter()
            .map(|(name, port)| (name.clone(), *port))
            .collect()
    };

    let service_ports = ports
        .iter()
        .map(|(name, port)| service_port(name, *port))
        .collect();
    let container_ports = ports
        .iter()
        .map(|(name, port)| ContainerPort {
            name: Some(name.clone()),
            container_port: *port,
            ..Default::default()
        })
        .collect();
    (service_ports, container_ports)
}

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        ..Default::default()
    }
}

pub fn service_type(vault: &Vault) -> &'static str {
    match vault.spec.service_type.as_str() {
        "NodePort" => "NodePort",
        "LoadBalancer" => "LoadBalancer",
        "ExternalName" => "ExternalName",
        _ => "ClusterIP",
    }
}

/// The primary Vault service
pub fn build_service(vault: &Vault) -> Service {
    let mut labels = vault.labels_for_vault();
    labels.insert(GLOBAL_SERVICE_LABEL.to_string(), "true".to_string());

    let mut selector = vault.labels_for_vault();
    if vault.spec.service_registration_enabled {
        selector.insert("vault-active".to_string(), "true".to_string());
    }

    let mut annotations = with_vault_annotations(vault, common_annotations(vault));
    // GKE needs the backend protocol on the service when TLS is enabled
    if vault.spec.ingress.is_some() && !vault.spec.is_tls_disabled() {
        annotations.insert(
            "cloud.google.com/app-protocols".to_string(),
            format!(r#"{{"{}":"HTTPS"}}"#, vault.spec.api_port_name()),
        );
    }

    let (mut ports, _) = service_ports(vault);
    ports.push(service_port("metrics", METRICS_PORT));
    ports.push(service_port("statsd", STATSD_PORT));

    let load_balancer_ip = &vault.spec.load_balancer_ip;
    Service {
        metadata: owned_meta(
            vault,
            vault.name_any(),
            with_vault_labels(vault, labels),
            annotations,
        ),
        spec: Some(ServiceSpec {
            type_: Some(service_type(vault).to_string()),
            selector: Some(selector),
            ports: Some(ports),
            load_balancer_ip: (!load_balancer_ip.is_empty()).then(|| load_balancer_ip.clone()),
            publish_not_ready_addresses: vault
                .spec
                .is_raft_bootstrap_follower()
                .then_some(true),
            ..Default::default()
        }),
        status: None,
    }
}

/// Externally assigned load balancer addresses (IPs or hostnames) of `service`
pub fn load_balancer_ingress_points(service: &Service) -> Vec<String> {
    service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|ingress| {
            ingress
                .iter()
                .flat_map(|i| [i.ip.clone(), i.hostname.clone()])
                .flatten()
                .filter(|v| !v.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

pub fn per_instance_service_name(name: &str, index: i32) -> String {
    format!("{name}-{index}")
}

/// One ClusterIP service per replica for direct addressing
pub fn build_per_instance_services(vault: &Vault) -> Vec<Service> {
    let (mut ports, _) = service_ports(vault);
    ports.push(service_port("metrics", METRICS_PORT));

    (0..vault.spec.size)
        .map(|i| {
            let pod_name = per_instance_service_name(&vault.name_any(), i);
            let mut labels = vault.labels_for_vault();
            labels.insert(POD_NAME_LABEL.to_string(), pod_name.clone());

            Service {
                metadata: owned_meta(
                    vault,
                    pod_name,
                    with_vault_labels(vault, labels.clone()),
                    with_vault_annotations(vault, common_annotations(vault)),
                ),
                spec: Some(ServiceSpec {
                    type_: Some("ClusterIP".to_string()),
                    selector: Some(labels),
                    ports: Some(ports.clone()),
                    publish_not_ready_addresses: Some(true),
                    ..Default::default()
                }),
                status: None,
            }
        })
        .collect()
}

// ============================================================================
// Config artifacts
// ============================================================================

/// The rendered Vault configuration and its sha256 hex digest
pub fn build_raw_config_secret(vault: &Vault) -> Result<(Secret, String)> {
    let config = vault.spec.config_json()?;
    let digest = hex::encode(Sha256::digest(&config));

    let secret = Secret {
        metadata: owned_meta(
            vault,
            format!("{}-raw-config", vault.name_any()),
            vault.labels_for_vault(),
            BTreeMap::new(),
        ),
        data: Some(BTreeMap::from([(
            RAW_CONFIG_FILE.to_string(),
            ByteString(config),
        )])),
        ..Default::default()
    };
    Ok((secret, digest))
}

pub fn build_statsd_config_map(vault: &Vault) -> ConfigMap {
    let mapping = vault
        .spec
        .statsd_config
        .clone()
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_STATSD_MAPPING.to_string());

    ConfigMap {
        metadata: owned_meta(
            vault,
            format!("{}-statsd-mapping", vault.name_any()),
            vault.labels_for_vault(),
            BTreeMap::new(),
        ),
        data: Some(BTreeMap::from([(STATSD_MAPPING_FILE.to_string(), mapping)])),
        ..Default::default()
    }
}

pub fn build_fluentd_config_map(vault: &Vault) -> ConfigMap {
    let file = vault
        .spec
        .fluentd_conf_file
        .clone()
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| "fluent.conf".to_string());

    ConfigMap {
        metadata: owned_meta(
            vault,
            format!("{}-fluentd-config", vault.name_any()),
            vault.labels_for_vault(),
            BTreeMap::new(),
        ),
        data: Some(BTreeMap::from([(file, vault.spec.fluentd_config.clone())])),
        ..Default::default()
    }
}

// ============================================================================
// Ingress and monitoring
// ============================================================================

pub fn build_ingress(vault: &Vault) -> Option<Ingress> {
    let ingress = vault.spec.ingress.as_ref()?;
    Some(Ingress {
        metadata: owned_meta(
            vault,
            vault.name_any(),
            vault.labels_for_vault(),
            ingress.annotations.clone(),
        ),
        spec: Some(ingress.spec.clone()),
        status: None,
    })
}

/// Prometheus Operator scrape configuration for the Vault pods
pub fn build_service_monitor(vault: &Vault) -> ServiceMonitor {
    let labels = vault.labels_for_vault();
    let namespace = vault.namespace_or_default();

    let mut endpoint = Endpoint {
        interval: "30s".to_string(),
        port: vault.spec.api_port_name().to_string(),
        scheme: vault.spec.api_scheme().to_string(),
        params: BTreeMap::from([("format".to_string(), vec!["prometheus".to_string()])]),
        path: "/v1/sys/metrics".to_string(),
        tls_config: Some(TlsConfig {
            insecure_skip_verify: true,
        }),
        ..Default::default()
    };
    if !vault.spec.is_telemetry_unauthenticated() {
        endpoint.bearer_token_file =
            format!("/etc/prometheus/config_out/.{}-token", vault.name_any());
    }

    let mut monitor = ServiceMonitor::new(
        &vault.name_any(),
        ServiceMonitorSpec {
            job_label: "vault_cr".to_string(),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: POD_NAME_LABEL.to_string(),
                    operator: "Exists".to_string(),
                    values: None,
                }]),
            },
            namespace_selector: NamespaceSelector {
                match_names: vec![namespace],
            },
            endpoints: vec![endpoint],
        },
    );
    monitor.metadata = owned_meta(vault, vault.name_any(), labels, BTreeMap::new());
    monitor
}

// ============================================================================
// Default resources
// ============================================================================

fn resource_requirements(
    request_cpu: &str,
    request_memory: &str,
    limit_cpu: &str,
    limit_memory: &str,
) -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(request_cpu.to_string())),
            ("memory".to_string(), Quantity(request_memory.to_string())),
        ])),
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(limit_cpu.to_string())),
            ("memory".to_string(), Quantity(limit_memory.to_string())),
        ])),
        ..Default::default()
    }
}

fn sidecar_default_resources() -> ResourceRequirements {
    resource_requirements("100m", "64Mi", "200m", "128Mi")
}

pub fn vault_resources(vault: &Vault) -> ResourceRequirements {
    vault
        .spec
        .resources
        .as_ref()
        .and_then(|r| r.vault.clone())
        .unwrap_or_else(|| resource_requirements("250m", "256Mi", "1", "512Mi"))
}

pub fn bank_vaults_resources(vault: &Vault) -> ResourceRequirements {
    vault
        .spec
        .resources
        .as_ref()
        .and_then(|r| r.bank_vaults.clone())
        .unwrap_or_else(sidecar_default_resources)
}

pub fn hsm_daemon_resources(vault: &Vault) -> ResourceRequirements {
    vault
        .spec
        .resources
        .as_ref()
        .and_then(|r| r.hsm_daemon.clone())
        .unwrap_or_else(sidecar_default_resources)
}

pub fn prometheus_exporter_resources(vault: &Vault) -> ResourceRequirements {
    vault
        .spec
        .resources
        .as_ref()
        .and_then(|r| r.prometheus_exporter.clone())
        .unwrap_or_else(sidecar_default_resources)
}

pub fn fluentd_resources(vault: &Vault) -> ResourceRequirements {
    vault
        .spec
        .resources
        .as_ref()
        .and_then(|r| r.fluentd.clone())
        .unwrap_or_else(sidecar_default_resources)
}

pub fn velero_resources() -> ResourceRequirements {
    resource_requirements("50m", "32Mi", "50m", "32Mi")
}
