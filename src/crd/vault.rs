//! Vault Custom Resource Definition
//!
//! The Vault CRD declares a clustered Vault deployment: replica count,
//! exposure, TLS options, the Vault server configuration (including the
//! storage backend) and the unsealer/configurer sidecars.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, NodeAffinity, PersistentVolumeClaim, PodSecurityContext,
    Toleration, Volume, VolumeMount,
};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::types::{
    ComponentCondition, ContainerOverlay, CredentialsConfig, IngressConfig, PodSpecOverlay,
    Resources, UnsealConfig,
};

pub const DEFAULT_VAULT_IMAGE: &str = "hashicorp/vault:latest";
pub const DEFAULT_BANK_VAULTS_IMAGE: &str = "ghcr.io/bank-vaults/bank-vaults:latest";
pub const DEFAULT_STATSD_IMAGE: &str = "prom/statsd-exporter:latest";
pub const DEFAULT_FLUENTD_IMAGE: &str = "fluent/fluentd:edge";
pub const DEFAULT_VELERO_FSFREEZE_IMAGE: &str = "velero/fsfreeze-pause:latest";
pub const DEFAULT_CONFIG_PATH: &str = "/vault/config";
pub const DEFAULT_FLUENTD_CONF_LOCATION: &str = "/fluentd/etc";
pub const DEFAULT_TLS_EXPIRY_THRESHOLD: &str = "168h";

/// Backends that always coordinate several active replicas
const HA_STORAGE_BACKENDS: &[&str] = &["consul", "dynamodb", "etcd", "raft", "zookeeper"];
/// Backends that coordinate only with `ha_enabled = "true"`
const OPTIONAL_HA_STORAGE_BACKENDS: &[&str] =
    &["cockroachdb", "gcs", "mysql", "postgresql", "spanner"];

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "vault.banzaicloud.com",
    version = "v1alpha1",
    kind = "Vault",
    namespaced,
    status = "VaultStatus",
    printcolumn = r#"{"name":"Size","type":"integer","jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Leader","type":"string","jsonPath":".status.leader"}"#,
    printcolumn = r#"{"name":"Healthy","type":"string","jsonPath":".status.conditions[?(@.type=='Healthy')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VaultSpec {
    #[serde(default = "default_size")]
    pub size: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_vaults_image: Option<String>,

    #[serde(default)]
    pub statsd_disabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statsd_image: Option<String>,

    /// statsd-exporter mapping configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statsd_config: Option<String>,

    #[serde(default)]
    pub fluentd_enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fluentd_image: Option<String>,

    #[serde(default)]
    pub fluentd_config: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fluentd_conf_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fluentd_conf_location: Option<String>,

    /// Add the fsfreeze sidecar and backup hook annotations
    #[serde(default)]
    pub velero_enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velero_fsfreeze_image: Option<String>,

    #[serde(default)]
    pub service_type: String,

    #[serde(default, rename = "loadBalancerIP")]
    pub load_balancer_ip: String,

    /// Named ports exposed by the Vault service; defaults to the API and cluster ports
    #[serde(default)]
    pub service_ports: BTreeMap<String, i32>,

    #[serde(default)]
    pub service_monitor_enabled: bool,

    #[serde(default)]
    pub service_registration_enabled: bool,

    /// Vault server configuration, rendered verbatim into `vault-config.json`
    #[serde(default)]
    pub config: Value,

    /// Configuration applied by the configurer once Vault is running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_config: Option<Value>,

    #[serde(default)]
    pub unseal_config: UnsealConfig,

    #[serde(default)]
    pub credentials_config: CredentialsConfig,

    #[serde(default)]
    #[schemars(with = "Vec<serde_json::Value>")]
    pub envs_config: Vec<EnvVar>,

    #[serde(default)]
    #[schemars(with = "Vec<serde_json::Value>")]
    pub sidecar_envs_config: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub security_context: Option<PodSecurityContext>,

    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default)]
    #[schemars(with = "Vec<serde_json::Value>")]
    pub tolerations: Vec<Toleration>,

    /// Topology key for the required pod anti-affinity between replicas
    #[serde(default)]
    pub pod_anti_affinity: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub node_affinity: Option<NodeAffinity>,

    /// Replaces the generated affinity entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub affinity: Option<Affinity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    #[serde(default)]
    #[schemars(with = "Vec<serde_json::Value>")]
    pub volumes: Vec<Volume>,

    #[serde(default)]
    #[schemars(with = "Vec<serde_json::Value>")]
    pub volume_mounts: Vec<VolumeMount>,

    #[serde(default)]
    #[schemars(with = "Vec<serde_json::Value>")]
    pub bank_vaults_volume_mounts: Vec<VolumeMount>,

    #[serde(default)]
    #[schemars(with = "Vec<serde_json::Value>")]
    pub vault_containers: Vec<Container>,

    #[serde(default)]
    #[schemars(with = "Vec<serde_json::Value>")]
    pub vault_init_containers: Vec<Container>,

    #[serde(default)]
    #[schemars(with = "Vec<serde_json::Value>")]
    pub volume_claim_templates: Vec<PersistentVolumeClaim>,

    /// Annotations applied to every generated object
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub vault_annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub vault_labels: BTreeMap<String, String>,

    #[serde(default)]
    pub vault_configurer_annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub vault_configurer_labels: BTreeMap<String, String>,

    /// TLS secret managed outside the operator (`ca.crt`, `tls.crt`, `tls.key`)
    #[serde(default, rename = "existingTlsSecretName")]
    pub existing_tls_secret_name: String,

    /// Go-style duration, e.g. `168h`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_expiry_threshold: Option<String>,

    #[serde(default)]
    pub tls_additional_hosts: Vec<String>,

    /// Namespaces receiving a copy of the CA certificate; `["*"]` means all
    #[serde(default, rename = "caNamespaces")]
    pub ca_namespaces: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub vault_pod_spec: Option<PodSpecOverlay>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub vault_configurer_pod_spec: Option<PodSpecOverlay>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub vault_container_spec: Option<ContainerOverlay>,

    /// Address of a remote raft leader this cluster joins as a follower
    #[serde(default)]
    pub raft_leader_address: String,

    #[serde(default)]
    pub raft_leader_api_scheme_override: String,

    #[serde(default)]
    pub watched_secrets_labels: Vec<BTreeMap<String, String>>,

    #[serde(default)]
    pub watched_secrets_annotations: Vec<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

fn default_size() -> i32 {
    1
}

/// Observed state of a Vault cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VaultStatus {
    /// Sorted names of the live Vault pods
    #[serde(default)]
    pub nodes: Vec<String>,
    /// Name of the active replica, empty when none answered as active
    #[serde(default)]
    pub leader: String,
    #[serde(default)]
    pub conditions: Vec<ComponentCondition>,
}

impl VaultSpec {
    pub fn vault_image(&self) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| DEFAULT_VAULT_IMAGE.to_string())
    }

    pub fn bank_vaults_image(&self) -> String {
        self.bank_vaults_image
            .clone()
            .unwrap_or_else(|| DEFAULT_BANK_VAULTS_IMAGE.to_string())
    }

    pub fn statsd_image(&self) -> String {
        self.statsd_image
            .clone()
            .unwrap_or_else(|| DEFAULT_STATSD_IMAGE.to_string())
    }

    pub fn fluentd_image(&self) -> String {
        self.fluentd_image
            .clone()
            .unwrap_or_else(|| DEFAULT_FLUENTD_IMAGE.to_string())
    }

    pub fn velero_fsfreeze_image(&self) -> String {
        self.velero_fsfreeze_image
            .clone()
            .unwrap_or_else(|| DEFAULT_VELERO_FSFREEZE_IMAGE.to_string())
    }

    pub fn fluentd_conf_location(&self) -> String {
        self.fluentd_conf_location
            .clone()
            .unwrap_or_else(|| DEFAULT_FLUENTD_CONF_LOCATION.to_string())
    }

    pub fn config_path(&self) -> String {
        self.config_path
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    pub fn service_account(&self) -> String {
        self.service_account
            .clone()
            .unwrap_or_else(|| "default".to_string())
    }

    /// The `storage` stanza of the Vault configuration
    pub fn storage(&self) -> Option<&serde_json::Map<String, Value>> {
        self.config
            .get("storage")
            .and_then(Value::as_object)
            .filter(|s| !s.is_empty())
    }

    /// Backend name of the `storage` stanza, e.g. `raft`
    pub fn storage_type(&self) -> Option<&str> {
        self.storage().and_then(|s| s.keys().next()).map(String::as_str)
    }

    fn ha_storage_type(&self) -> Option<&str> {
        self.config
            .get("ha_storage")
            .and_then(Value::as_object)
            .and_then(|s| s.keys().next())
            .map(String::as_str)
    }

    /// Whether the storage setup lets more than one replica run safely
    pub fn has_ha_storage(&self) -> bool {
        if self.ha_storage_type().is_some() {
            return true;
        }
        let Some(storage_type) = self.storage_type() else {
            return false;
        };
        if HA_STORAGE_BACKENDS.contains(&storage_type) {
            return true;
        }
        if OPTIONAL_HA_STORAGE_BACKENDS.contains(&storage_type) {
            return self
                .storage()
                .and_then(|s| s.get(storage_type))
                .and_then(|b| b.get("ha_enabled"))
                .map(is_truthy)
                .unwrap_or(false);
        }
        false
    }

    pub fn is_raft_storage(&self) -> bool {
        self.storage_type() == Some("raft")
    }

    pub fn is_raft_ha_storage(&self) -> bool {
        self.ha_storage_type() == Some("raft")
    }

    /// Raft storage joining a leader that lives outside this cluster
    pub fn is_raft_bootstrap_follower(&self) -> bool {
        self.is_raft_storage() && !self.raft_leader_address.is_empty()
    }

    /// A `seal` stanza means Vault unseals itself through a KMS
    pub fn is_auto_unseal(&self) -> bool {
        self.config.get("seal").is_some()
    }

    pub fn is_tls_disabled(&self) -> bool {
        self.tcp_listener()
            .and_then(|l| l.get("tls_disable"))
            .map(is_truthy)
            .unwrap_or(false)
    }

    pub fn is_telemetry_unauthenticated(&self) -> bool {
        self.tcp_listener()
            .and_then(|l| l.get("telemetry"))
            .and_then(|t| t.get("unauthenticated_metrics_access"))
            .map(is_truthy)
            .unwrap_or(false)
    }

    pub fn is_mlock_disabled(&self) -> bool {
        self.config
            .get("disable_mlock")
            .map(is_truthy)
            .unwrap_or(false)
    }

    pub fn is_statsd_disabled(&self) -> bool {
        self.statsd_disabled
    }

    pub fn is_fluentd_enabled(&self) -> bool {
        self.fluentd_enabled
    }

    fn tcp_listener(&self) -> Option<&Value> {
        self.config.get("listener").and_then(|l| l.get("tcp"))
    }

    pub fn api_scheme(&self) -> &'static str {
        if self.is_tls_disabled() {
            "http"
        } else {
            "https"
        }
    }

    pub fn api_port_name(&self) -> &'static str {
        "api-port"
    }

    /// Remaining validity below which certificates are regenerated
    pub fn tls_expiry_threshold(&self) -> chrono::Duration {
        let raw = self
            .tls_expiry_threshold
            .as_deref()
            .unwrap_or(DEFAULT_TLS_EXPIRY_THRESHOLD);
        parse_duration(raw).unwrap_or_else(|| {
            warn!(
                "Invalid tlsExpiryThreshold {:?}, falling back to {}",
                raw, DEFAULT_TLS_EXPIRY_THRESHOLD
            );
            chrono::Duration::hours(168)
        })
    }

    /// Rendered Vault configuration
    pub fn config_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.config)
    }

    pub fn external_config_json(&self) -> serde_json::Result<Vec<u8>> {
        match &self.external_config {
            Some(config) => serde_json::to_vec(config),
            None => Ok(b"{}".to_vec()),
        }
    }

    pub fn has_external_config(&self) -> bool {
        match &self.external_config {
            None | Some(Value::Null) => false,
            Some(Value::Object(o)) => !o.is_empty(),
            Some(_) => true,
        }
    }

    pub fn watched_secrets_labels(&self) -> &[BTreeMap<String, String>] {
        &self.watched_secrets_labels
    }

    pub fn watched_secrets_annotations(&self) -> &[BTreeMap<String, String>] {
        &self.watched_secrets_annotations
    }
}

impl Vault {
    /// Selector labels shared by every Vault pod
    pub fn labels_for_vault(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app.kubernetes.io/name".to_string(), "vault".to_string()),
            ("vault_cr".to_string(), self.name_any()),
        ])
    }

    /// Selector labels of the configurer deployment and its inputs
    pub fn labels_for_configurer(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                "app.kubernetes.io/name".to_string(),
                "vault-configurator".to_string(),
            ),
            ("vault_cr".to_string(), self.name_any()),
        ])
    }

    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }
}

/// Accepts booleans, "true"/"1" strings and non-zero numbers, like Vault's HCL decoding
fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "t"),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

/// Parse a Go-style duration such as `168h`, `1h30m` or `90s`
pub fn parse_duration(raw: &str) -> Option<chrono::Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw == "0" {
        return Some(chrono::Duration::zero());
    }

    let mut total_ns: i64 = 0;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_ns = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "\u{b5}s" | "\u{3bc}s" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60_000_000_000.0,
            "h" => 3_600_000_000_000.0,
            _ => return None,
        };
        rest = &rest[unit_len..];

        let term = value * unit_ns;
        if !term.is_finite() || term >= i64::MAX as f64 {
            return None;
        }
        total_ns = total_ns.checked_add(term as i64)?;
    }

    Some(chrono::Duration::nanoseconds(total_ns))
}
