//! Leader and health observation
//!
//! Probes the health endpoint of every replica through its per-instance
//! service and works out which one is active.

use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::platform::ObjectStore;
use super::resources::{per_instance_service_name, API_PORT};
use crate::crd::Vault;
use crate::error::{Error, Result};

/// Per-call timeout used when none is configured
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Status codes forcing `/v1/sys/health` to answer 2xx in every state
const HEALTH_QUERY: &[(&str, &str)] = &[
    ("uninitcode", "299"),
    ("sealedcode", "299"),
    ("standbycode", "299"),
    ("drsecondarycode", "299"),
    ("performancestandbycode", "299"),
];

/// Body of Vault's `/v1/sys/health`
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub sealed: bool,
    #[serde(default)]
    pub standby: bool,
}

/// Queries the health of one replica
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `address` is the scheme, host and port of the replica
    async fn health(&self, address: &str) -> Result<HealthResponse>;
}

/// [`HealthProbe`] over HTTPS with certificate verification disabled
pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn health(&self, address: &str) -> Result<HealthResponse> {
        let url = format!("{}/v1/sys/health", address.trim_end_matches('/'));
        let response = self.client.get(&url).query(HEALTH_QUERY).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HealthCheckError(format!(
                "{url} returned HTTP {status}"
            )));
        }
        Ok(response.json().await?)
    }
}

/// Direct address of replica `index`
pub fn replica_address(vault: &Vault, index: i32) -> String {
    format!(
        "{}://{}.{}:{}",
        vault.spec.api_scheme(),
        per_instance_service_name(&vault.name_any(), index),
        vault.namespace_or_default(),
        API_PORT
    )
}

/// Outcome of probing the replicas
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaderObservation {
    /// Pod name of the active replica, empty when none was found
    pub leader: String,
    pub error: Option<String>,
}

/// Probe replicas in index order
///
/// Stops at the first failing probe. Every active replica seen before that
/// overwrites the previous candidate, so with several active replicas the
/// highest index wins.
pub async fn observe_leader(probe: &dyn HealthProbe, vault: &Vault) -> LeaderObservation {
    let mut observation = LeaderObservation::default();

    for i in 0..vault.spec.size {
        let address = replica_address(vault, i);
        match probe.health(&address).await {
            Ok(health) => {
                debug!(
                    "Replica {} initialized={} sealed={} standby={}",
                    address, health.initialized, health.sealed, health.standby
                );
                if !health.standby {
                    observation.leader = per_instance_service_name(&vault.name_any(), i);
                }
            }
            Err(e) => {
                warn!("Health check of {} failed: {}", address, e);
                observation.error = Some(e.to_string());
                break;
            }
        }
    }

    observation
}

/// Sorted names of the pods currently backing `vault`
pub async fn live_pod_names(store: &dyn ObjectStore, vault: &Vault) -> Result<Vec<String>> {
    let pods = store
        .list_pods(&vault.namespace_or_default(), Some(&vault.labels_for_vault()))
        .await?;
    let mut names: Vec<String> = pods.iter().map(|p| p.name_any()).collect();
    names.sort();
    Ok(names)
}
