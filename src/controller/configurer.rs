//! Configurer sub-pipeline
//!
//! Applies `externalConfig` through a `bank-vaults configure` deployment.
//! Its inputs are every config map or secret in the namespace carrying the
//! configurer labels and a `vault-config.yml` (or `.yaml`) key, including
//! the `<name>-configurer` secret rendered here.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
    ObjectFieldSelector, PodAffinity, PodAffinityTerm, PodSpec, PodTemplateSpec, Secret,
    SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::ByteString;
use kube::ResourceExt;
use tracing::info;

use super::apply::apply;
use super::merge::merge_pod_spec_defaults;
use super::platform::ObjectStore;
use super::resources::{
    bank_vaults_resources, common_annotations, owned_meta, with_configurer_annotations,
    with_configurer_labels, with_prometheus_annotations, METRICS_PORT,
};
use super::workload::{
    credentials_volume, hsm_volume, pod_security_context, tls_volume,
    with_credentials_env, with_credentials_volume_mount, with_hsm_volume_mount, with_tls_env,
    with_tls_volume_mount,
};
use crate::crd::Vault;
use crate::error::Result;

pub const CONFIGURER_CONFIG_FILE: &str = "vault-config.yml";
const CONFIG_FILE_KEYS: &[&str] = &["vault-config.yml", "vault-config.yaml"];
const CONFIG_MOUNT_ROOT: &str = "/config";

pub fn configurer_name(vault: &Vault) -> String {
    format!("{}-configurer", vault.name_any())
}

/// The external configuration rendered as a configurer input
pub fn build_configurer_secret(vault: &Vault) -> Result<Secret> {
    Ok(Secret {
        metadata: owned_meta(
            vault,
            configurer_name(vault),
            vault.labels_for_configurer(),
            BTreeMap::new(),
        ),
        data: Some(BTreeMap::from([(
            CONFIGURER_CONFIG_FILE.to_string(),
            ByteString(vault.spec.external_config_json()?),
        )])),
        ..Default::default()
    })
}

/// One mounted configuration file
struct ConfigSource {
    volume: Volume,
    mount: VolumeMount,
    file: String,
}

fn config_file_key<'a>(mut keys: impl Iterator<Item = &'a String>) -> Option<String> {
    keys.find(|k| CONFIG_FILE_KEYS.contains(&k.as_str()))
        .cloned()
}

fn config_sources(config_maps: &[ConfigMap], secrets: &[Secret]) -> Vec<ConfigSource> {
    let mut config_maps: Vec<&ConfigMap> = config_maps.iter().collect();
    config_maps.sort_by_key(|c| c.name_any());
    let mut secrets: Vec<&Secret> = secrets.iter().collect();
    secrets.sort_by_key(|s| s.name_any());

    let mut sources = Vec::new();

    for config_map in config_maps {
        let Some(file) = config_file_key(config_map.data.iter().flat_map(|d| d.keys())) else {
            continue;
        };
        let name = config_map.name_any();
        sources.push(ConfigSource {
            volume: Volume {
                name: name.clone(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            mount: VolumeMount {
                name: name.clone(),
                mount_path: format!("{CONFIG_MOUNT_ROOT}/{name}"),
                ..Default::default()
            },
            file,
        });
    }

    for secret in secrets {
        let keys = secret
            .data
            .iter()
            .flat_map(|d| d.keys())
            .chain(secret.string_data.iter().flat_map(|d| d.keys()));
        let Some(file) = config_file_key(keys) else {
            continue;
        };
        let name = secret.name_any();
        sources.push(ConfigSource {
            volume: Volume {
                name: name.clone(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            mount: VolumeMount {
                name: name.clone(),
                mount_path: format!("{CONFIG_MOUNT_ROOT}/{name}"),
                ..Default::default()
            },
            file,
        });
    }

    sources
}

/// Keep the configurer next to the Vault pods so it can reach the HSM
fn hsm_affinity(vault: &Vault) -> Option<Affinity> {
    vault.spec.unseal_config.hsm_daemon_needed().then(|| Affinity {
        pod_affinity: Some(PodAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                label_selector: Some(LabelSelector {
                    match_labels: Some(vault.labels_for_vault()),
                    ..Default::default()
                }),
                topology_key: "kubernetes.io/hostname".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn configurer_container(vault: &Vault, sources: &[ConfigSource]) -> Container {
    let mut args = vault
        .spec
        .unseal_config
        .to_args(&vault.name_any(), &vault.namespace_or_default());
    for source in sources {
        args.push("--vault-config-file".to_string());
        args.push(format!("{}/{}", source.mount.mount_path, source.file));
    }

    let envs = with_credentials_env(vault, Vec::new());
    let mut envs = with_tls_env(vault, false, envs);
    envs.extend(vault.spec.envs_config.iter().cloned());
    envs.push(EnvVar {
        name: "NAMESPACE".to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "metadata.namespace".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    });

    let mut mounts: Vec<VolumeMount> = sources.iter().map(|s| s.mount.clone()).collect();
    mounts = with_credentials_volume_mount(vault, mounts);
    mounts = with_tls_volume_mount(vault, mounts);
    mounts = with_hsm_volume_mount(vault, mounts);

    Container {
        name: "bank-vaults".to_string(),
        image: Some(vault.spec.bank_vaults_image()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        command: Some(vec!["bank-vaults".to_string(), "configure".to_string()]),
        args: Some(args),
        ports: Some(vec![ContainerPort {
            name: Some("metrics".to_string()),
            container_port: METRICS_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(envs),
        volume_mounts: Some(mounts),
        working_dir: Some(CONFIG_MOUNT_ROOT.to_string()),
        resources: Some(bank_vaults_resources(vault)),
        ..Default::default()
    }
}

/// Build the configurer deployment
///
/// `restart_annotations` roll the configurer together with Vault when the
/// TLS chain or the server configuration changes.
pub fn build_configurer_deployment(
    vault: &Vault,
    config_maps: &[ConfigMap],
    secrets: &[Secret],
    restart_annotations: &BTreeMap<String, String>,
) -> Deployment {
    let sources = config_sources(config_maps, secrets);
    let labels = vault.labels_for_configurer();

    let mut volumes: Vec<Volume> = sources.iter().map(|s| s.volume.clone()).collect();
    if !vault.spec.is_tls_disabled() {
        volumes.push(tls_volume(vault));
    }
    volumes.extend(credentials_volume(vault));
    volumes.extend(hsm_volume(vault));

    let mut pod_spec = PodSpec {
        service_account_name: Some(vault.spec.service_account()),
        containers: vec![configurer_container(vault, &sources)],
        volumes: Some(volumes),
        security_context: Some(pod_security_context(vault)),
        node_selector: (!vault.spec.node_selector.is_empty())
            .then(|| vault.spec.node_selector.clone()),
        tolerations: (!vault.spec.tolerations.is_empty()).then(|| vault.spec.tolerations.clone()),
        affinity: hsm_affinity(vault),
        ..Default::default()
    };
    if let Some(overlay) = &vault.spec.vault_configurer_pod_spec {
        merge_pod_spec_defaults(&mut pod_spec, overlay);
    }

    let mut pod_annotations = common_annotations(vault);
    pod_annotations.extend(restart_annotations.clone());
    let pod_annotations = with_configurer_annotations(
        vault,
        with_prometheus_annotations(&METRICS_PORT.to_string(), pod_annotations),
    );

    Deployment {
        metadata: owned_meta(
            vault,
            configurer_name(vault),
            with_configurer_labels(vault, labels.clone()),
            with_configurer_annotations(vault, common_annotations(vault)),
        ),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            revision_history_limit: Some(0),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(with_configurer_labels(vault, labels)),
                    annotations: Some(pod_annotations),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub fn build_configurer_service(vault: &Vault) -> Service {
    let labels = vault.labels_for_configurer();
    Service {
        metadata: owned_meta(
            vault,
            configurer_name(vault),
            with_configurer_labels(vault, labels.clone()),
            with_configurer_annotations(vault, common_annotations(vault)),
        ),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("metrics".to_string()),
                port: METRICS_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Apply the configurer secret, deployment and service
pub async fn deploy_configurer(
    store: &dyn ObjectStore,
    vault: &Vault,
    restart_annotations: &BTreeMap<String, String>,
) -> Result<()> {
    apply(store, build_configurer_secret(vault)?.into()).await?;

    let namespace = vault.namespace_or_default();
    let labels = vault.labels_for_configurer();
    let config_maps = store.list_config_maps(&namespace, Some(&labels)).await?;
    let secrets = store.list_secrets(&namespace, Some(&labels)).await?;
    info!(
        "Configurer for {} uses {} config map(s) and {} secret(s)",
        vault.name_any(),
        config_maps.len(),
        secrets.len()
    );

    let deployment =
        build_configurer_deployment(vault, &config_maps, &secrets, restart_annotations);
    apply(store, deployment.into()).await?;
    apply(store, build_configurer_service(vault).into()).await?;
    Ok(())
}
