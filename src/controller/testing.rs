//! In-memory doubles for the platform and health probe seams

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMap, LoadBalancerIngress, LoadBalancerStatus, Namespace, Pod, Secret, ServiceStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::error::ErrorResponse;
use kube::ResourceExt;

use super::health::{HealthProbe, HealthResponse};
use super::platform::{ManagedObject, ObjectKey, ObjectKind, ObjectStore};
use crate::crd::Vault;
use crate::error::{Error, Result};

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn labels_match(
    selector: Option<&BTreeMap<String, String>>,
    labels: Option<&BTreeMap<String, String>>,
) -> bool {
    selector
        .map(|s| {
            s.iter()
                .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
        })
        .unwrap_or(true)
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, ManagedObject>,
    namespaces: BTreeMap<String, Namespace>,
    pods: Vec<Pod>,
    vaults: BTreeMap<(String, String), Vault>,
    version: u64,
    creates: usize,
    replaces: usize,
    status_writes: usize,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// [`ObjectStore`] keeping everything in memory
///
/// Behaves like the API server where the pipeline can observe it: writes to
/// unknown namespaces fail with 404, creating an existing object and
/// replacing with a stale resourceVersion fail with 409, and services get a
/// cluster IP assigned on create.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new(namespaces: &[&str]) -> Self {
        let store = Self::default();
        for ns in namespaces {
            store.add_namespace(ns, false);
        }
        store
    }

    pub fn add_namespace(&self, name: &str, terminating: bool) {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                deletion_timestamp: terminating.then(|| Time(chrono::Utc::now())),
                ..Default::default()
            },
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .namespaces
            .insert(name.to_string(), namespace);
    }

    pub fn add_vault(&self, vault: &Vault) {
        let mut vault = vault.clone();
        vault.metadata.uid.get_or_insert_with(|| "vault-uid".to_string());
        let key = (vault.namespace().unwrap_or_default(), vault.name_any());
        self.state.lock().unwrap().vaults.insert(key, vault);
    }

    pub fn remove_vault(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .vaults
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn vault(&self, namespace: &str, name: &str) -> Option<Vault> {
        self.state
            .lock()
            .unwrap()
            .vaults
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn add_pod(&self, namespace: &str, name: &str, labels: BTreeMap<String, String>) {
        self.state.lock().unwrap().pods.push(Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        });
    }

    /// Insert a live object directly, bypassing create
    pub fn insert(&self, obj: ManagedObject) {
        let mut state = self.state.lock().unwrap();
        let mut obj = obj;
        let version = state.next_version();
        obj.metadata_mut().resource_version = Some(version);
        state.objects.insert(obj.key(), obj);
    }

    /// Simulate the cloud provider assigning a load balancer address
    pub fn set_load_balancer_ip(&self, namespace: &str, name: &str, ip: &str) {
        let key = ObjectKey::new(ObjectKind::Service, namespace, name);
        let mut state = self.state.lock().unwrap();
        if let Some(ManagedObject::Service(service)) = state.objects.get_mut(&key) {
            service.status = Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(vec![LoadBalancerIngress {
                        ip: Some(ip.to_string()),
                        ..Default::default()
                    }]),
                }),
                ..Default::default()
            });
        }
    }

    pub fn object(&self, key: &ObjectKey) -> Option<ManagedObject> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn creates(&self) -> usize {
        self.state.lock().unwrap().creates
    }

    pub fn replaces(&self) -> usize {
        self.state.lock().unwrap().replaces
    }

    /// Create and replace calls that succeeded
    pub fn mutations(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.creates + state.replaces
    }

    pub fn status_writes(&self) -> usize {
        self.state.lock().unwrap().status_writes
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<ManagedObject>> {
        Ok(self.state.lock().unwrap().objects.get(key).cloned())
    }

    async fn create(&self, mut obj: ManagedObject) -> Result<ManagedObject> {
        let key = obj.key();
        let mut state = self.state.lock().unwrap();
        if !state.namespaces.contains_key(&key.namespace) {
            return Err(api_error(
                404,
                "NotFound",
                format!("namespaces \"{}\" not found", key.namespace),
            ));
        }
        if state.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{key} already exists")));
        }

        let version = state.next_version();
        let meta = obj.metadata_mut();
        meta.resource_version = Some(version.clone());
        meta.uid = Some(format!("uid-{version}"));
        if let ManagedObject::Service(service) = &mut obj {
            if let Some(spec) = service.spec.as_mut() {
                if spec.cluster_ip.is_none() {
                    let ip = format!("10.0.0.{version}");
                    spec.cluster_ip = Some(ip.clone());
                    spec.cluster_ips = Some(vec![ip]);
                }
            }
        }

        state.creates += 1;
        state.objects.insert(key, obj.clone());
        Ok(obj)
    }

    async fn replace(&self, mut obj: ManagedObject) -> Result<ManagedObject> {
        let key = obj.key();
        let mut state = self.state.lock().unwrap();
        let Some(live) = state.objects.get(&key) else {
            return Err(api_error(404, "NotFound", format!("{key} not found")));
        };
        if live.metadata().resource_version != obj.metadata().resource_version {
            return Err(api_error(
                409,
                "Conflict",
                format!("{key} has been modified"),
            ));
        }

        let uid = live.metadata().uid.clone();
        let version = state.next_version();
        let meta = obj.metadata_mut();
        meta.resource_version = Some(version);
        meta.uid = uid;

        state.replaces += 1;
        state.objects.insert(key, obj.clone());
        Ok(obj)
    }

    async fn list_secrets(
        &self,
        namespace: &str,
        labels: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<Secret>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|(k, _)| k.kind == ObjectKind::Secret && k.namespace == namespace)
            .filter_map(|(_, o)| Secret::try_from(o.clone()).ok())
            .filter(|s| labels_match(labels, s.metadata.labels.as_ref()))
            .collect())
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        labels: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<ConfigMap>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|(k, _)| k.kind == ObjectKind::ConfigMap && k.namespace == namespace)
            .filter_map(|(_, o)| ConfigMap::try_from(o.clone()).ok())
            .filter(|c| labels_match(labels, c.metadata.labels.as_ref()))
            .collect())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<Pod>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| labels_match(labels, p.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .namespaces
            .values()
            .cloned()
            .collect())
    }

    async fn get_vault(&self, namespace: &str, name: &str) -> Result<Option<Vault>> {
        Ok(self.vault(namespace, name))
    }

    async fn replace_vault_status(&self, vault: &Vault) -> Result<Vault> {
        let key = (vault.namespace().unwrap_or_default(), vault.name_any());
        let mut state = self.state.lock().unwrap();
        let Some(live) = state.vaults.get_mut(&key) else {
            return Err(api_error(
                404,
                "NotFound",
                format!("vault {}/{} not found", key.0, key.1),
            ));
        };
        live.status = vault.status.clone();
        let updated = live.clone();
        state.status_writes += 1;
        Ok(updated)
    }
}

/// [`HealthProbe`] answering from a fixed script keyed by address
#[derive(Default)]
pub struct ScriptedProbe {
    responses: BTreeMap<String, std::result::Result<HealthResponse, String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standby(mut self, address: &str, standby: bool) -> Self {
        self.responses.insert(
            address.to_string(),
            Ok(HealthResponse {
                initialized: true,
                sealed: false,
                standby,
            }),
        );
        self
    }

    pub fn failing(mut self, address: &str, error: &str) -> Self {
        self.responses
            .insert(address.to_string(), Err(error.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn health(&self, address: &str) -> Result<HealthResponse> {
        self.calls.lock().unwrap().push(address.to_string());
        match self.responses.get(address) {
            Some(Ok(health)) => Ok(health.clone()),
            Some(Err(e)) => Err(Error::HealthCheckError(e.clone())),
            None => Err(Error::HealthCheckError(format!(
                "{address}: connection refused"
            ))),
        }
    }
}
