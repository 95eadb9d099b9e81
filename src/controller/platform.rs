//! Platform client seam
//!
//! Every read and write the reconciler performs against the cluster goes
//! through [`ObjectStore`], so the pipeline can run against the real API
//! server ([`KubeStore`]) or an in-memory fake in tests.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crd::{ServiceMonitor, Vault};
use crate::error::Result;

/// Kinds of objects the operator manages
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Service,
    Secret,
    ConfigMap,
    StatefulSet,
    Deployment,
    Ingress,
    ServiceMonitor,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identity of a managed object
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// A desired or live object of one of the managed kinds
#[derive(Clone, Debug, PartialEq)]
pub enum ManagedObject {
    Service(Service),
    Secret(Secret),
    ConfigMap(ConfigMap),
    StatefulSet(StatefulSet),
    Deployment(Deployment),
    Ingress(Ingress),
    ServiceMonitor(ServiceMonitor),
}

/// Evaluate `$body` with `$o` bound to the wrapped object, whatever its kind
macro_rules! with_object {
    ($obj:expr, $o:ident => $body:expr) => {
        match $obj {
            ManagedObject::Service($o) => $body,
            ManagedObject::Secret($o) => $body,
            ManagedObject::ConfigMap($o) => $body,
            ManagedObject::StatefulSet($o) => $body,
            ManagedObject::Deployment($o) => $body,
            ManagedObject::Ingress($o) => $body,
            ManagedObject::ServiceMonitor($o) => $body,
        }
    };
}

/// Like `with_object!` but rewraps the result in the same variant
macro_rules! map_object {
    ($obj:expr, $o:ident => $body:expr) => {
        match $obj {
            ManagedObject::Service($o) => ManagedObject::Service($body),
            ManagedObject::Secret($o) => ManagedObject::Secret($body),
            ManagedObject::ConfigMap($o) => ManagedObject::ConfigMap($body),
            ManagedObject::StatefulSet($o) => ManagedObject::StatefulSet($body),
            ManagedObject::Deployment($o) => ManagedObject::Deployment($body),
            ManagedObject::Ingress($o) => ManagedObject::Ingress($body),
            ManagedObject::ServiceMonitor($o) => ManagedObject::ServiceMonitor($body),
        }
    };
}

impl ManagedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ManagedObject::Service(_) => ObjectKind::Service,
            ManagedObject::Secret(_) => ObjectKind::Secret,
            ManagedObject::ConfigMap(_) => ObjectKind::ConfigMap,
            ManagedObject::StatefulSet(_) => ObjectKind::StatefulSet,
            ManagedObject::Deployment(_) => ObjectKind::Deployment,
            ManagedObject::Ingress(_) => ObjectKind::Ingress,
            ManagedObject::ServiceMonitor(_) => ObjectKind::ServiceMonitor,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        with_object!(self, o => o.meta())
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        with_object!(self, o => o.meta_mut())
    }

    pub fn key(&self) -> ObjectKey {
        let meta = self.metadata();
        ObjectKey::new(
            self.kind(),
            meta.namespace.clone().unwrap_or_default(),
            meta.name.clone().unwrap_or_default(),
        )
    }

    /// JSON form used for diffing
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        with_object!(self, o => serde_json::to_value(o))
    }
}

macro_rules! managed_conversions {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for ManagedObject {
                fn from(o: $variant) -> Self {
                    ManagedObject::$variant(o)
                }
            }

            impl TryFrom<ManagedObject> for $variant {
                type Error = ManagedObject;

                fn try_from(o: ManagedObject) -> std::result::Result<Self, Self::Error> {
                    match o {
                        ManagedObject::$variant(inner) => Ok(inner),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

managed_conversions!(
    Service,
    Secret,
    ConfigMap,
    StatefulSet,
    Deployment,
    Ingress,
    ServiceMonitor
);

// ============================================================================
// ObjectStore
// ============================================================================

/// Cluster operations used by a reconciliation pass
///
/// Implementations must surface API failures as `Error::KubeError` so that
/// `Error::is_not_found()` and `Error::is_conflict()` classify them.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a managed object, `None` when it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<ManagedObject>>;

    async fn create(&self, obj: ManagedObject) -> Result<ManagedObject>;

    /// Full update; the object must carry the live resourceVersion
    async fn replace(&self, obj: ManagedObject) -> Result<ManagedObject>;

    async fn list_secrets(
        &self,
        namespace: &str,
        labels: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<Secret>>;

    async fn list_config_maps(
        &self,
        namespace: &str,
        labels: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<ConfigMap>>;

    async fn list_pods(
        &self,
        namespace: &str,
        labels: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<Pod>>;

    async fn list_namespaces(&self) -> Result<Vec<Namespace>>;

    async fn get_vault(&self, namespace: &str, name: &str) -> Result<Option<Vault>>;

    /// Write the status subresource of `vault`
    async fn replace_vault_status(&self, vault: &Vault) -> Result<Vault>;
}

/// Render a label map as a `k=v,k=v` selector
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn list_params(labels: Option<&BTreeMap<String, String>>) -> ListParams {
    match labels {
        Some(labels) if !labels.is_empty() => ListParams::default().labels(&label_selector(labels)),
        _ => ListParams::default(),
    }
}

/// [`ObjectStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_typed<K>(&self, key: &ObjectKey) -> Result<Option<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + fmt::Debug,
        K::DynamicType: Default,
    {
        Ok(self.api::<K>(&key.namespace).get_opt(&key.name).await?)
    }

    async fn create_typed<K>(&self, obj: K) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + fmt::Debug,
        K::DynamicType: Default,
    {
        let namespace = obj.namespace().unwrap_or_default();
        Ok(self
            .api::<K>(&namespace)
            .create(&PostParams::default(), &obj)
            .await?)
    }

    async fn replace_typed<K>(&self, obj: K) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + fmt::Debug,
        K::DynamicType: Default,
    {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        Ok(self
            .api::<K>(&namespace)
            .replace(&name, &PostParams::default(), &obj)
            .await?)
    }

    async fn list_typed<K>(
        &self,
        namespace: &str,
        labels: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + fmt::Debug,
        K::DynamicType: Default,
    {
        Ok(self
            .api::<K>(namespace)
            .list(&list_params(labels))
            .await?
            .items)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<ManagedObject>> {
        let obj = match key.kind {
            ObjectKind::Service => self.get_typed::<Service>(key).await?.map(Into::into),
            ObjectKind::Secret => self.get_typed::<Secret>(key).await?.map(Into::into),
            ObjectKind::ConfigMap => self.get_typed::<ConfigMap>(key).await?.map(Into::into),
            ObjectKind::StatefulSet => self.get_typed::<StatefulSet>(key).await?.map(Into::into),
            ObjectKind::Deployment => self.get_typed::<Deployment>(key).await?.map(Into::into),
            ObjectKind::Ingress => self.get_typed::<Ingress>(key).await?.map(Into::into),
            ObjectKind::ServiceMonitor => {
                self.get_typed::<ServiceMonitor>(key).await?.map(Into::into)
            }
        };
        Ok(obj)
    }

    async fn create(&self, obj: ManagedObject) -> Result<ManagedObject> {
        Ok(map_object!(obj, o => self.create_typed(o).await?))
    }

    async fn replace(&self, obj: ManagedObject) -> Result<ManagedObject> {
        Ok(map_object!(obj, o => self.replace_typed(o).await?))
    }

    async fn list_secrets(
        &self,
        namespace: &str,
        labels: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<Secret>> {
        self.list_typed(namespace, labels).await
    }

    async fn list_config_maps(
        &self,
        namespace: &str,
        labels: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<ConfigMap>> {
        self.list_typed(namespace, labels).await
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<Pod>> {
        self.list_typed(namespace, labels).await
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_vault(&self, namespace: &str, name: &str) -> Result<Option<Vault>> {
        let api: Api<Vault> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replace_vault_status(&self, vault: &Vault) -> Result<Vault> {
        let namespace = vault.namespace().unwrap_or_default();
        let api: Api<Vault> = Api::namespaced(self.client.clone(), &namespace);
        let data = serde_json::to_vec(vault)?;
        Ok(api
            .replace_status(&vault.name_any(), &PostParams::default(), data)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_object() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("vault-tls".to_string()),
                namespace: Some("vault".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let obj = ManagedObject::from(secret);
        assert_eq!(obj.kind(), ObjectKind::Secret);
        assert_eq!(obj.key(), ObjectKey::new(ObjectKind::Secret, "vault", "vault-tls"));
        assert_eq!(obj.key().to_string(), "Secret vault/vault-tls");
    }

    #[test]
    fn test_try_from_wrong_kind() {
        let obj = ManagedObject::from(Secret::default());
        assert!(Service::try_from(obj.clone()).is_err());
        assert!(Secret::try_from(obj).is_ok());
    }

    #[test]
    fn test_label_selector() {
        let labels = BTreeMap::from([
            ("vault_cr".to_string(), "vault".to_string()),
            ("app.kubernetes.io/name".to_string(), "vault".to_string()),
        ]);
        assert_eq!(
            label_selector(&labels),
            "app.kubernetes.io/name=vault,vault_cr=vault"
        );
        assert!(list_params(None).label_selector.is_none());
    }
}
