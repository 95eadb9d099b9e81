//! Shared types used by the Vault CRD

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, ContainerPort, EnvFromSource, EnvVar, Lifecycle, LocalObjectReference,
    PodDNSConfig, PodSecurityContext, Probe, ResourceRequirements, SecurityContext, Toleration,
    TopologySpreadConstraint, VolumeMount,
};
use k8s_openapi::api::networking::v1::IngressSpec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Component condition, shaped like `core/v1.ComponentCondition`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentCondition {
    /// Type of condition, always `Healthy` for now
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-component resource overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub vault: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub bank_vaults: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub hsm_daemon: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub prometheus_exporter: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub fluentd: Option<ResourceRequirements>,
}

/// Ingress requested for the Vault API
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    #[schemars(with = "serde_json::Value")]
    pub spec: IngressSpec,
}

/// Cloud credentials mounted into the Vault and unsealer containers
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsConfig {
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub secret_name: String,
}

// ============================================================================
// Unseal configuration
// ============================================================================

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnsealOptions {
    #[serde(default)]
    pub pre_flight_checks: bool,
    #[serde(default)]
    pub store_root_token: bool,
    #[serde(default)]
    pub secret_shares: i32,
    #[serde(default)]
    pub secret_threshold: i32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesUnsealConfig {
    #[serde(default)]
    pub secret_namespace: String,
    #[serde(default)]
    pub secret_name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GoogleUnsealConfig {
    pub kms_key_ring: String,
    pub kms_crypto_key: String,
    pub kms_location: String,
    pub kms_project: String,
    pub storage_bucket: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AwsUnsealConfig {
    pub kms_key_id: String,
    #[serde(default)]
    pub kms_region: String,
    pub s3_bucket: String,
    #[serde(default)]
    pub s3_prefix: String,
    #[serde(default)]
    pub s3_region: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AzureUnsealConfig {
    pub key_vault_name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultUnsealConfig {
    pub address: String,
    pub unseal_keys_path: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub auth_path: String,
    #[serde(default)]
    pub token_path: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HsmUnsealConfig {
    /// Run the pcscd daemon as a sidecar
    #[serde(default)]
    pub daemon: bool,
    pub module_path: String,
    #[serde(default)]
    pub slot_id: u32,
    #[serde(default)]
    pub token_label: String,
    pub pin: String,
    pub key_label: String,
}

/// How the unsealer sidecar stores and retrieves unseal keys
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnsealConfig {
    #[serde(default)]
    pub options: UnsealOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<KubernetesUnsealConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google: Option<GoogleUnsealConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsUnsealConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureUnsealConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<VaultUnsealConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hsm: Option<HsmUnsealConfig>,
}

impl UnsealConfig {
    /// The HSM backend needs the pcscd daemon next to Vault
    pub fn hsm_daemon_needed(&self) -> bool {
        self.hsm.as_ref().map(|h| h.daemon).unwrap_or(false)
    }

    /// Render the unsealer command line arguments
    ///
    /// `name` and `namespace` identify the owning Vault and provide the
    /// defaults for the Kubernetes secret backend.
    pub fn to_args(&self, name: &str, namespace: &str) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

        if self.options.pre_flight_checks {
            push(&["--pre-flight-checks", "true"]);
        }
        if self.options.store_root_token {
            push(&["--store-root-token", "true"]);
        }
        if self.options.secret_shares != 0 {
            push(&["--secret-shares", &self.options.secret_shares.to_string()]);
        }
        if self.options.secret_threshold != 0 {
            push(&[
                "--secret-threshold",
                &self.options.secret_threshold.to_string(),
            ]);
        }

        if let Some(google) = &self.google {
            push(&[
                "--mode",
                "google-cloud-kms-gcs",
                "--google-cloud-kms-key-ring",
                &google.kms_key_ring,
                "--google-cloud-kms-crypto-key",
                &google.kms_crypto_key,
                "--google-cloud-kms-location",
                &google.kms_location,
                "--google-cloud-kms-project",
                &google.kms_project,
                "--google-cloud-storage-bucket",
                &google.storage_bucket,
            ]);
        } else if let Some(azure) = &self.azure {
            push(&[
                "--mode",
                "azure-key-vault",
                "--azure-key-vault-name",
                &azure.key_vault_name,
            ]);
        } else if let Some(aws) = &self.aws {
            push(&[
                "--mode",
                "aws-kms-s3",
                "--aws-kms-key-id",
                &aws.kms_key_id,
                "--aws-kms-region",
                &aws.kms_region,
                "--aws-s3-bucket",
                &aws.s3_bucket,
                "--aws-s3-prefix",
                &aws.s3_prefix,
                "--aws-s3-region",
                &aws.s3_region,
            ]);
        } else if let Some(vault) = &self.vault {
            push(&[
                "--mode",
                "vault",
                "--vault-addr",
                &vault.address,
                "--vault-unseal-keys-path",
                &vault.unseal_keys_path,
            ]);
            if !vault.role.is_empty() {
                push(&["--vault-role", &vault.role]);
            }
            if !vault.auth_path.is_empty() {
                push(&["--vault-auth-path", &vault.auth_path]);
            }
            if !vault.token_path.is_empty() {
                push(&["--vault-token-path", &vault.token_path]);
            }
        } else if let Some(hsm) = &self.hsm {
            // Keys wrapped by the HSM are still persisted in a Kubernetes secret
            let mode = if self.kubernetes.is_some() {
                "hsm-k8s"
            } else {
                "hsm"
            };
            push(&[
                "--mode",
                mode,
                "--hsm-module-path",
                &hsm.module_path,
                "--hsm-slot-id",
                &hsm.slot_id.to_string(),
                "--hsm-token-label",
                &hsm.token_label,
                "--hsm-pin",
                &hsm.pin,
                "--hsm-key-label",
                &hsm.key_label,
            ]);
            if self.kubernetes.is_some() {
                let (secret_namespace, secret_name) = self.kubernetes_secret(name, namespace);
                push(&[
                    "--k8s-secret-namespace",
                    &secret_namespace,
                    "--k8s-secret-name",
                    &secret_name,
                ]);
            }
        } else {
            let (secret_namespace, secret_name) = self.kubernetes_secret(name, namespace);
            push(&[
                "--mode",
                "k8s",
                "--k8s-secret-namespace",
                &secret_namespace,
                "--k8s-secret-name",
                &secret_name,
            ]);
        }

        args
    }

    fn kubernetes_secret(&self, name: &str, namespace: &str) -> (String, String) {
        let k8s = self.kubernetes.clone().unwrap_or_default();
        let secret_namespace = if k8s.secret_namespace.is_empty() {
            namespace.to_string()
        } else {
            k8s.secret_namespace
        };
        let secret_name = if k8s.secret_name.is_empty() {
            format!("{name}-unseal-keys")
        } else {
            k8s.secret_name
        };
        (secret_namespace, secret_name)
    }
}

// ============================================================================
// Merge overlays
// ============================================================================

/// User-supplied pod spec fragment
///
/// Every field is a default: it is only used when the generated pod spec
/// leaves the same field unset.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpecOverlay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automount_service_account_token: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<PodSecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secrets: Option<Vec<LocalObjectReference>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_network: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_config: Option<PodDNSConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_process_namespace: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_spread_constraints: Option<Vec<TopologySpreadConstraint>>,
}

/// User-supplied fragment for the primary Vault container
///
/// Every field set here wins over the generated value.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOverlay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_from: Option<Vec<EnvFromSource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<ContainerPort>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mounts: Option<Vec<VolumeMount>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
}
