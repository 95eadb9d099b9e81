//! Vault StatefulSet builder
//!
//! The primary `vault` container runs next to the `bank-vaults` unsealer and
//! the optional statsd exporter, fluentd audit-log shipper, velero fsfreeze
//! and HSM pcscd sidecars.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
    EnvVar, EnvVarSource, HTTPGetAction, HostPathVolumeSource, KeyToPath, ObjectFieldSelector,
    PodAffinityTerm, PodAntiAffinity, PodSecurityContext, PodSpec, PodTemplateSpec, Probe,
    SecretVolumeSource, SecurityContext, Service, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use super::certificates::{
    tls_secret_name, CA_CERT_KEY, SERVER_CERT_KEY, SERVER_KEY_KEY, TLS_CERT_KEY, TLS_KEY_KEY,
};
use super::merge::{merge_container_override, merge_pod_spec_defaults};
use super::resources::{
    bank_vaults_resources, common_annotations, fluentd_resources, hsm_daemon_resources,
    load_balancer_ingress_points, owned_meta, prometheus_exporter_resources, service_ports,
    vault_resources, velero_resources, with_prometheus_annotations, with_vault_annotations,
    with_vault_labels, with_velero_annotations, API_PORT, CLUSTER_PORT, METRICS_PORT,
    RAW_CONFIG_FILE, STATSD_MAPPING_FILE,
};
use crate::crd::Vault;
use crate::error::{Error, Result};

pub const TLS_MOUNT_PATH: &str = "/vault/tls";
pub const AUDIT_LOG_PATH: &str = "/vault/logs";
const PCSCD_PATH: &str = "/var/run/pcscd/";

const RAW_CONFIG_VOLUME: &str = "vault-raw-config";
const CONFIG_VOLUME: &str = "vault-config";
const TLS_VOLUME: &str = "vault-tls";
const AUDIT_LOG_VOLUME: &str = "vault-auditlogs";
const FLUENTD_CONFIG_VOLUME: &str = "fluentd-config";
const STATSD_VOLUME: &str = "statsd-mapping";
const PCSCD_VOLUME: &str = "hsm-pcscd";

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn pod_name_env(name: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "metadata.name".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

/// Keep the last entry per name and order by name
fn dedupe_volumes(volumes: Vec<Volume>) -> Vec<Volume> {
    let by_name: BTreeMap<String, Volume> =
        volumes.into_iter().map(|v| (v.name.clone(), v)).collect();
    by_name.into_values().collect()
}

fn dedupe_mounts(mounts: Vec<VolumeMount>) -> Vec<VolumeMount> {
    let by_name: BTreeMap<String, VolumeMount> =
        mounts.into_iter().map(|m| (m.name.clone(), m)).collect();
    by_name.into_values().collect()
}

// ============================================================================
// Environment
// ============================================================================

/// `VAULT_ADDR` (and `VAULT_CACERT` with TLS) for clients in the pod
pub fn with_tls_env(vault: &Vault, localhost: bool, mut envs: Vec<EnvVar>) -> Vec<EnvVar> {
    let host = if localhost {
        "127.0.0.1".to_string()
    } else {
        format!("{}.{}", vault.name_any(), vault.namespace_or_default())
    };

    if vault.spec.is_tls_disabled() {
        envs.push(env("VAULT_ADDR", format!("http://{host}:{API_PORT}")));
    } else {
        envs.push(env("VAULT_ADDR", format!("https://{host}:{API_PORT}")));
        envs.push(env("VAULT_CACERT", format!("{TLS_MOUNT_PATH}/{CA_CERT_KEY}")));
    }
    envs
}

pub fn with_credentials_env(vault: &Vault, mut envs: Vec<EnvVar>) -> Vec<EnvVar> {
    let credentials = &vault.spec.credentials_config;
    if !credentials.env.is_empty() {
        envs.push(env(&credentials.env, credentials.path.clone()));
    }
    envs
}

fn with_sidecar_env(vault: &Vault, mut envs: Vec<EnvVar>) -> Vec<EnvVar> {
    envs.extend(vault.spec.sidecar_envs_config.iter().cloned());
    envs
}

/// Advertise the load balancer address when joining a remote raft leader
fn with_cluster_addr_env(vault: &Vault, service: &Service, mut envs: Vec<EnvVar>) -> Vec<EnvVar> {
    if vault.spec.raft_leader_address.is_empty() {
        return envs;
    }
    if let Some(address) = load_balancer_ingress_points(service).last() {
        envs.push(env(
            "VAULT_CLUSTER_ADDR",
            format!("https://{address}:{CLUSTER_PORT}"),
        ));
        envs.push(env(
            "VAULT_API_ADDR",
            format!("{}://{address}:{API_PORT}", vault.spec.api_scheme()),
        ));
    }
    envs
}

fn base_env(vault: &Vault, pod_name_var: &str) -> Vec<EnvVar> {
    let mut envs = vec![pod_name_env(pod_name_var)];
    envs.extend(vault.spec.envs_config.iter().cloned());
    envs
}

// ============================================================================
// Volumes and mounts
// ============================================================================

fn vault_volumes(vault: &Vault) -> Vec<Volume> {
    let name = vault.name_any();
    let mut volumes = vec![
        Volume {
            name: RAW_CONFIG_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(format!("{name}-raw-config")),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: CONFIG_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some("Memory".to_string()),
                size_limit: Some(Quantity("1Mi".to_string())),
            }),
            ..Default::default()
        },
    ];

    volumes.extend(credentials_volume(vault));

    if !vault.spec.is_tls_disabled() {
        volumes.push(tls_volume(vault));
    }

    if vault.spec.is_fluentd_enabled() {
        volumes.push(Volume {
            name: AUDIT_LOG_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
        volumes.push(Volume {
            name: FLUENTD_CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(format!("{name}-fluentd-config")),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    if !vault.spec.is_statsd_disabled() {
        volumes.push(Volume {
            name: STATSD_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(format!("{name}-statsd-mapping")),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    volumes.extend(hsm_volume(vault));

    volumes.extend(vault.spec.volumes.iter().cloned());
    dedupe_volumes(volumes)
}

pub fn credentials_volume(vault: &Vault) -> Option<Volume> {
    let secret_name = &vault.spec.credentials_config.secret_name;
    (!secret_name.is_empty()).then(|| Volume {
        name: secret_name.clone(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.clone()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Host socket of the pcscd daemon
pub fn hsm_volume(vault: &Vault) -> Option<Volume> {
    vault
        .spec
        .unseal_config
        .hsm_daemon_needed()
        .then(|| Volume {
            name: PCSCD_VOLUME.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: PCSCD_PATH.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        })
}

/// The generated `<name>-tls` secret, or the user's `kubernetes.io/tls` secret
/// remapped to the file names Vault expects
pub fn tls_volume(vault: &Vault) -> Volume {
    let existing = &vault.spec.existing_tls_secret_name;
    let source = if existing.is_empty() {
        SecretVolumeSource {
            secret_name: Some(tls_secret_name(vault)),
            ..Default::default()
        }
    } else {
        let item = |key: &str, path: &str| KeyToPath {
            key: key.to_string(),
            path: path.to_string(),
            ..Default::default()
        };
        SecretVolumeSource {
            secret_name: Some(existing.clone()),
            items: Some(vec![
                item(CA_CERT_KEY, CA_CERT_KEY),
                item(TLS_CERT_KEY, SERVER_CERT_KEY),
                item(TLS_KEY_KEY, SERVER_KEY_KEY),
            ]),
            ..Default::default()
        }
    };

    Volume {
        name: TLS_VOLUME.to_string(),
        secret: Some(source),
        ..Default::default()
    }
}

pub fn with_tls_volume_mount(vault: &Vault, mut mounts: Vec<VolumeMount>) -> Vec<VolumeMount> {
    if !vault.spec.is_tls_disabled() {
        mounts.push(mount(TLS_VOLUME, TLS_MOUNT_PATH));
    }
    mounts
}

pub fn with_credentials_volume_mount(
    vault: &Vault,
    mut mounts: Vec<VolumeMount>,
) -> Vec<VolumeMount> {
    let credentials = &vault.spec.credentials_config;
    if !credentials.secret_name.is_empty() {
        let file_name = credentials
            .path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        mounts.push(VolumeMount {
            name: credentials.secret_name.clone(),
            mount_path: credentials.path.clone(),
            sub_path: Some(file_name),
            ..Default::default()
        });
    }
    mounts
}

pub fn with_hsm_volume_mount(vault: &Vault, mut mounts: Vec<VolumeMount>) -> Vec<VolumeMount> {
    if vault.spec.unseal_config.hsm_daemon_needed() {
        mounts.push(mount(PCSCD_VOLUME, PCSCD_PATH));
    }
    mounts
}

/// Mounts shared by every container that runs Vault itself
fn with_vault_volume_mounts(vault: &Vault, mut mounts: Vec<VolumeMount>) -> Vec<VolumeMount> {
    mounts.push(mount(CONFIG_VOLUME, &vault.spec.config_path()));
    let mut mounts = with_tls_volume_mount(vault, mounts);
    mounts = with_credentials_volume_mount(vault, mounts);
    if vault.spec.is_fluentd_enabled() {
        mounts.push(mount(AUDIT_LOG_VOLUME, AUDIT_LOG_PATH));
    }
    mounts.extend(vault.spec.volume_mounts.iter().cloned());
    dedupe_mounts(mounts)
}

// ============================================================================
// Containers
// ============================================================================

/// Command line of the `bank-vaults unseal` sidecar
pub fn unseal_command(vault: &Vault) -> Vec<String> {
    let mut command: Vec<String> = ["bank-vaults", "unseal", "--init"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    if vault.spec.is_auto_unseal() {
        command.push("--auto".to_string());
    }

    if vault.spec.is_raft_storage() {
        let follower = vault.spec.is_raft_bootstrap_follower();
        let (scheme, leader) = if follower {
            let scheme = if vault.spec.raft_leader_api_scheme_override.is_empty() {
                vault.spec.api_scheme().to_string()
            } else {
                vault.spec.raft_leader_api_scheme_override.clone()
            };
            (scheme, vault.spec.raft_leader_address.clone())
        } else {
            (vault.spec.api_scheme().to_string(), vault.name_any())
        };

        command.push("--raft".to_string());
        command.push("--raft-leader-address".to_string());
        command.push(format!("{scheme}://{leader}:{API_PORT}"));
        if follower {
            command.push("--raft-secondary".to_string());
        }
    } else if vault.spec.is_raft_ha_storage() {
        command.push("--raft-ha-storage".to_string());
    }

    command
}

fn http_probe(vault: &Vault, path: &str) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::String(vault.spec.api_port_name().to_string()),
            scheme: Some(vault.spec.api_scheme().to_ascii_uppercase()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn vault_container(vault: &Vault, service: &Service) -> Container {
    let (_, ports) = service_ports(vault);

    let envs = base_env(vault, "VAULT_K8S_POD_NAME");
    let envs = with_credentials_env(vault, envs);
    let envs = with_cluster_addr_env(vault, service, envs);

    let security_context = (!vault.spec.is_mlock_disabled()).then(|| SecurityContext {
        capabilities: Some(Capabilities {
            add: Some(vec!["IPC_LOCK".to_string(), "SETFCAP".to_string()]),
            drop: None,
        }),
        ..Default::default()
    });

    Container {
        name: "vault".to_string(),
        image: Some(vault.spec.vault_image()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec!["server".to_string()]),
        ports: Some(ports),
        env: Some(envs),
        security_context,
        startup_probe: Some(Probe {
            period_seconds: Some(10),
            failure_threshold: Some(18),
            ..http_probe(vault, "/v1/sys/init")
        }),
        liveness_probe: Some(http_probe(vault, "/v1/sys/health?standbyok=true")),
        readiness_probe: Some(Probe {
            period_seconds: Some(5),
            failure_threshold: Some(2),
            ..http_probe(
                vault,
                "/v1/sys/health?standbyok=true&perfstandbyok=true&drsecondarycode=299",
            )
        }),
        volume_mounts: Some(with_vault_volume_mounts(vault, Vec::new())),
        resources: Some(vault_resources(vault)),
        ..Default::default()
    }
}

fn bank_vaults_container(vault: &Vault) -> Container {
    let envs = base_env(vault, "POD_NAME");
    let envs = with_tls_env(vault, true, envs);
    let envs = with_credentials_env(vault, envs);
    let envs = with_sidecar_env(vault, envs);

    let mounts = with_credentials_volume_mount(vault, Vec::new());
    let mut mounts = with_tls_volume_mount(vault, mounts);
    mounts.extend(vault.spec.bank_vaults_volume_mounts.iter().cloned());
    let mounts = with_hsm_volume_mount(vault, dedupe_mounts(mounts));

    Container {
        name: "bank-vaults".to_string(),
        image: Some(vault.spec.bank_vaults_image()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(unseal_command(vault)),
        args: Some(
            vault
                .spec
                .unseal_config
                .to_args(&vault.name_any(), &vault.namespace_or_default()),
        ),
        env: Some(envs),
        ports: Some(vec![ContainerPort {
            name: Some("metrics".to_string()),
            container_port: METRICS_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(mounts),
        resources: Some(bank_vaults_resources(vault)),
        ..Default::default()
    }
}

fn statsd_container(vault: &Vault) -> Container {
    Container {
        name: "prometheus-exporter".to_string(),
        image: Some(vault.spec.statsd_image()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec![format!(
            "--statsd.mapping-config=/tmp/{STATSD_MAPPING_FILE}"
        )]),
        env: Some(with_sidecar_env(vault, Vec::new())),
        ports: Some(vec![
            ContainerPort {
                name: Some("statsd".to_string()),
                container_port: 9125,
                protocol: Some("UDP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("prometheus".to_string()),
                container_port: 9102,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![mount(STATSD_VOLUME, "/tmp/")]),
        resources: Some(prometheus_exporter_resources(vault)),
        ..Default::default()
    }
}

fn fluentd_container(vault: &Vault) -> Container {
    let mounts = vec![
        mount(AUDIT_LOG_VOLUME, AUDIT_LOG_PATH),
        mount(FLUENTD_CONFIG_VOLUME, &vault.spec.fluentd_conf_location()),
    ];
    Container {
        name: "auditlog-exporter".to_string(),
        image: Some(vault.spec.fluentd_image()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        volume_mounts: Some(with_credentials_volume_mount(vault, mounts)),
        resources: Some(fluentd_resources(vault)),
        ..Default::default()
    }
}

fn velero_container(vault: &Vault) -> Container {
    Container {
        name: "velero-fsfreeze".to_string(),
        image: Some(vault.spec.velero_fsfreeze_image()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            "sleep infinity".to_string(),
        ]),
        volume_mounts: Some(with_vault_volume_mounts(vault, Vec::new())),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        resources: Some(velero_resources()),
        ..Default::default()
    }
}

fn hsm_daemon_container(vault: &Vault) -> Container {
    Container {
        name: "bank-vaults-hsm-pcscd".to_string(),
        image: Some(vault.spec.bank_vaults_image()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["pcscd-entrypoint.sh".to_string()]),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            run_as_user: Some(0),
            ..Default::default()
        }),
        volume_mounts: Some(with_hsm_volume_mount(vault, Vec::new())),
        resources: Some(hsm_daemon_resources(vault)),
        ..Default::default()
    }
}

/// Renders the raw configuration template into the in-memory config volume
fn config_templating_container(vault: &Vault) -> Container {
    let envs = with_credentials_env(vault, base_env(vault, "POD_NAME"));
    let mounts = with_vault_volume_mounts(vault, vec![mount(RAW_CONFIG_VOLUME, "/tmp")]);

    Container {
        name: "config-templating".to_string(),
        image: Some(vault.spec.bank_vaults_image()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec![
            "template".to_string(),
            "-template".to_string(),
            format!(
                "/tmp/{RAW_CONFIG_FILE}:{}/vault.json",
                vault.spec.config_path()
            ),
        ]),
        env: Some(envs),
        volume_mounts: Some(mounts),
        resources: Some(bank_vaults_resources(vault)),
        ..Default::default()
    }
}

fn containers(vault: &Vault, service: &Service) -> Vec<Container> {
    let mut containers = vec![vault_container(vault, service), bank_vaults_container(vault)];

    if !vault.spec.is_statsd_disabled() {
        containers.push(statsd_container(vault));
    }
    if vault.spec.is_fluentd_enabled() {
        containers.push(fluentd_container(vault));
    }
    if vault.spec.velero_enabled {
        containers.push(velero_container(vault));
    }
    if vault.spec.unseal_config.hsm_daemon_needed() {
        containers.push(hsm_daemon_container(vault));
    }
    containers.extend(vault.spec.vault_containers.iter().cloned());

    if let (Some(primary), Some(overlay)) =
        (containers.first_mut(), vault.spec.vault_container_spec.as_ref())
    {
        merge_container_override(primary, overlay);
    }
    containers
}

// ============================================================================
// Pod and StatefulSet
// ============================================================================

fn affinity(vault: &Vault) -> Option<Affinity> {
    if let Some(affinity) = &vault.spec.affinity {
        return Some(affinity.clone());
    }

    let topology_key = &vault.spec.pod_anti_affinity;
    let pod_anti_affinity = (!topology_key.is_empty()).then(|| PodAntiAffinity {
        required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
            label_selector: Some(LabelSelector {
                match_labels: Some(vault.labels_for_vault()),
                ..Default::default()
            }),
            topology_key: topology_key.clone(),
            ..Default::default()
        }]),
        ..Default::default()
    });
    let node_affinity = vault.spec.node_affinity.clone();

    if pod_anti_affinity.is_none() && node_affinity.is_none() {
        return None;
    }
    Some(Affinity {
        pod_anti_affinity,
        node_affinity,
        ..Default::default()
    })
}

/// Pod security context, defaulting to `fsGroup: 1000`
pub fn pod_security_context(vault: &Vault) -> PodSecurityContext {
    vault
        .spec
        .security_context
        .clone()
        .unwrap_or_else(|| PodSecurityContext {
            fs_group: Some(1000),
            ..Default::default()
        })
}

fn pod_spec(vault: &Vault, service: &Service) -> PodSpec {
    let mut init_containers = vec![config_templating_container(vault)];
    init_containers.extend(vault.spec.vault_init_containers.iter().cloned());

    let mut spec = PodSpec {
        affinity: affinity(vault),
        service_account_name: Some(vault.spec.service_account()),
        automount_service_account_token: Some(true),
        init_containers: Some(init_containers),
        containers: containers(vault, service),
        volumes: Some(vault_volumes(vault)),
        security_context: Some(pod_security_context(vault)),
        node_selector: (!vault.spec.node_selector.is_empty())
            .then(|| vault.spec.node_selector.clone()),
        tolerations: (!vault.spec.tolerations.is_empty()).then(|| vault.spec.tolerations.clone()),
        ..Default::default()
    };

    if let Some(overlay) = &vault.spec.vault_pod_spec {
        merge_pod_spec_defaults(&mut spec, overlay);
    }
    spec
}

/// Build the Vault StatefulSet
///
/// `restart_annotations` are stamped on the pod template so that a change
/// in any of them rolls the pods.
pub fn build_stateful_set(
    vault: &Vault,
    restart_annotations: &BTreeMap<String, String>,
    service: &Service,
) -> Result<StatefulSet> {
    if vault.spec.size > 1 && !vault.spec.has_ha_storage() {
        return Err(Error::ValidationError(
            "more than 1 replicas are not supported without HA storage backend".to_string(),
        ));
    }

    let labels = vault.labels_for_vault();

    let mut pod_annotations = with_prometheus_annotations("9102", common_annotations(vault));
    pod_annotations = with_vault_annotations(vault, pod_annotations);
    pod_annotations.extend(restart_annotations.clone());
    let pod_annotations = with_velero_annotations(vault, pod_annotations);

    let pod_management_policy =
        if vault.spec.is_raft_storage() || vault.spec.is_raft_ha_storage() {
            "OrderedReady"
        } else {
            "Parallel"
        };

    let claims = &vault.spec.volume_claim_templates;

    Ok(StatefulSet {
        metadata: owned_meta(
            vault,
            vault.name_any(),
            with_vault_labels(vault, labels.clone()),
            with_vault_annotations(vault, common_annotations(vault)),
        ),
        spec: Some(StatefulSetSpec {
            replicas: Some(vault.spec.size),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            service_name: vault.name_any(),
            pod_management_policy: Some(pod_management_policy.to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateStatefulSetStrategy {
                    partition: Some(0),
                    ..Default::default()
                }),
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(with_vault_labels(vault, labels)),
                    annotations: Some(pod_annotations),
                    ..Default::default()
                }),
                spec: Some(pod_spec(vault, service)),
            },
            volume_claim_templates: (!claims.is_empty()).then(|| claims.clone()),
            ..Default::default()
        }),
        status: None,
    })
}
