//! Pipeline tests for `reconcile_vault` against the in-memory platform.
//!
//! Run with: `cargo test -p vault-k8s reconciler_test`

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use k8s_openapi::api::apps::v1::StatefulSet;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use kube::runtime::controller::Action;
    use kube::ResourceExt;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use crate::controller::certificates::{CA_CERT_KEY, CA_KEY_KEY, SERVER_CERT_KEY, TLS_CERT_KEY};
    use crate::controller::conditions::{
        find_condition, CONDITION_STATUS_FALSE, CONDITION_STATUS_TRUE, CONDITION_TYPE_HEALTHY,
        MISSING_STORAGE_MESSAGE,
    };
    use crate::controller::platform::{ObjectKey, ObjectKind};
    use crate::controller::reconciler::{
        reconcile_vault, Context, LOAD_BALANCER_REQUEUE, RESYNC_INTERVAL,
    };
    use crate::controller::resources::WATCHED_SECRETS_ANNOTATION;
    use crate::controller::testing::{InMemoryStore, ScriptedProbe};
    use crate::controller::tls::{certificate_sans, CertManager};
    use crate::crd::{Vault, VaultSpec, VaultStatus};
    use crate::error::Error;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    const NS: &str = "default";

    fn address(index: i32) -> String {
        format!("https://vault-{index}.{NS}:8200")
    }

    fn vault(size: i32, config: serde_json::Value) -> Vault {
        let mut vault = Vault::new(
            "vault",
            VaultSpec {
                size,
                config,
                ..Default::default()
            },
        );
        vault.metadata.namespace = Some(NS.to_string());
        vault.metadata.uid = Some("vault-uid".to_string());
        vault
    }

    fn raft_vault(size: i32) -> Vault {
        vault(size, json!({"storage": {"raft": {"path": "/vault/file"}}}))
    }

    /// Store holding `vault` and one pod per replica
    fn store_with(vault: &Vault, namespaces: &[&str]) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new(namespaces));
        store.add_vault(vault);
        for i in 0..vault.spec.size {
            store.add_pod(NS, &format!("vault-{i}"), vault.labels_for_vault());
        }
        store
    }

    fn context(store: &Arc<InMemoryStore>, probe: ScriptedProbe) -> Context {
        Context::new(store.clone(), Arc::new(probe))
    }

    /// Probe where only `leader` reports active
    fn probe_with_leader(size: i32, leader: i32) -> ScriptedProbe {
        (0..size).fold(ScriptedProbe::new(), |probe, i| {
            probe.standby(&address(i), i != leader)
        })
    }

    fn key(kind: ObjectKind, name: &str) -> ObjectKey {
        ObjectKey::new(kind, NS, name)
    }

    fn secret_in(store: &InMemoryStore, namespace: &str, name: &str) -> Option<Secret> {
        store
            .object(&ObjectKey::new(ObjectKind::Secret, namespace, name))
            .and_then(|o| o.try_into().ok())
    }

    fn status(store: &InMemoryStore) -> VaultStatus {
        store
            .vault(NS, "vault")
            .and_then(|v| v.status)
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Full pass
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_first_pass_creates_cluster_objects() {
        let vault = raft_vault(3);
        let store = store_with(&vault, &[NS]);
        let ctx = context(&store, probe_with_leader(3, 1));

        let action = assert_ok!(reconcile_vault(&ctx, &vault).await);
        assert_eq!(action, Action::requeue(RESYNC_INTERVAL));

        for expected in [
            key(ObjectKind::Service, "vault"),
            key(ObjectKind::Service, "vault-0"),
            key(ObjectKind::Service, "vault-1"),
            key(ObjectKind::Service, "vault-2"),
            key(ObjectKind::Secret, "vault-tls"),
            key(ObjectKind::Secret, "vault-raw-config"),
            key(ObjectKind::ConfigMap, "vault-statsd-mapping"),
            key(ObjectKind::StatefulSet, "vault"),
        ] {
            assert!(store.object(&expected).is_some(), "{expected} missing");
        }
        assert!(store.object(&key(ObjectKind::ServiceMonitor, "vault")).is_none());
        assert!(store.object(&key(ObjectKind::Deployment, "vault-configurer")).is_none());

        let status = status(&store);
        assert_eq!(status.leader, "vault-1");
        assert_eq!(status.nodes, vec!["vault-0", "vault-1", "vault-2"]);
        let healthy = find_condition(&status.conditions, CONDITION_TYPE_HEALTHY).unwrap();
        assert_eq!(healthy.status, CONDITION_STATUS_TRUE);
        assert!(healthy.error.is_none());
    }

    #[tokio::test]
    async fn test_second_pass_is_a_noop() {
        let vault = raft_vault(3);
        let store = store_with(&vault, &[NS]);
        let ctx = context(&store, probe_with_leader(3, 0));

        reconcile_vault(&ctx, &vault).await.unwrap();
        let mutations = store.mutations();
        let tls_before = secret_in(&store, NS, "vault-tls").and_then(|s| s.data);

        let latest = store.vault(NS, "vault").unwrap();
        reconcile_vault(&ctx, &latest).await.unwrap();

        assert_eq!(store.mutations(), mutations);
        assert_eq!(store.status_writes(), 1);
        assert_eq!(secret_in(&store, NS, "vault-tls").and_then(|s| s.data), tls_before);
    }

    #[tokio::test]
    async fn test_too_many_replicas_without_ha_storage() {
        let vault = vault(2, json!({"storage": {"file": {"path": "/vault/file"}}}));
        let store = store_with(&vault, &[NS]);
        let ctx = context(&store, probe_with_leader(2, 0));

        let err = assert_err!(reconcile_vault(&ctx, &vault).await);
        assert!(matches!(err, Error::ValidationError(_)), "got {err:?}");
        assert!(store.object(&key(ObjectKind::StatefulSet, "vault")).is_none());
        assert_eq!(store.status_writes(), 0);
    }

    // -----------------------------------------------------------------------
    // Leader observation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_split_brain_highest_index_wins() {
        let vault = raft_vault(3);
        let store = store_with(&vault, &[NS]);
        let probe = ScriptedProbe::new()
            .standby(&address(0), false)
            .standby(&address(1), true)
            .standby(&address(2), false);
        let ctx = context(&store, probe);

        reconcile_vault(&ctx, &vault).await.unwrap();
        assert_eq!(status(&store).leader, "vault-2");
    }

    #[tokio::test]
    async fn test_probe_failure_stops_probing() {
        let vault = raft_vault(3);
        let store = store_with(&vault, &[NS]);
        let probe = Arc::new(
            ScriptedProbe::new()
                .standby(&address(0), true)
                .failing(&address(1), "connection refused")
                .standby(&address(2), false),
        );
        let ctx = Context::new(store.clone(), probe.clone());

        reconcile_vault(&ctx, &vault).await.unwrap();

        assert_eq!(probe.calls(), vec![address(0), address(1)]);
        let status = status(&store);
        assert_eq!(status.leader, "");
        let healthy = find_condition(&status.conditions, CONDITION_TYPE_HEALTHY).unwrap();
        assert_eq!(healthy.status, CONDITION_STATUS_FALSE);
        assert!(healthy.error.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_status_written_only_on_change() {
        let vault = raft_vault(3);
        let store = store_with(&vault, &[NS]);

        let ctx = context(&store, probe_with_leader(3, 0));
        reconcile_vault(&ctx, &vault).await.unwrap();
        reconcile_vault(&ctx, &vault).await.unwrap();
        assert_eq!(store.status_writes(), 1);

        let ctx = context(&store, probe_with_leader(3, 2));
        reconcile_vault(&ctx, &vault).await.unwrap();
        assert_eq!(store.status_writes(), 2);
        assert_eq!(status(&store).leader, "vault-2");
    }

    #[tokio::test]
    async fn test_vault_removed_before_status_write() {
        let vault = raft_vault(1);
        let store = store_with(&vault, &[NS]);
        store.remove_vault(NS, "vault");
        let ctx = context(&store, probe_with_leader(1, 0));

        let action = reconcile_vault(&ctx, &vault).await.unwrap();
        assert_eq!(action, Action::requeue(RESYNC_INTERVAL));
        assert_eq!(store.status_writes(), 0);
    }

    // -----------------------------------------------------------------------
    // Storage validation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_missing_storage_records_condition() {
        let vault = vault(1, json!({"listener": {"tcp": {}}}));
        let store = store_with(&vault, &[NS]);
        let ctx = context(&store, probe_with_leader(1, 0));

        let err = reconcile_vault(&ctx, &vault).await.unwrap_err();
        assert!(matches!(err, Error::MissingStorage));
        assert!(store.keys().is_empty());

        let condition = &status(&store).conditions[0];
        assert_eq!(condition.status, CONDITION_STATUS_FALSE);
        assert_eq!(condition.message.as_deref(), Some(MISSING_STORAGE_MESSAGE));

        let _ = reconcile_vault(&ctx, &vault).await;
        assert_eq!(store.status_writes(), 1);
    }

    // -----------------------------------------------------------------------
    // Load balancer
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_waits_for_load_balancer_address() {
        let mut vault = raft_vault(1);
        vault.spec.service_type = "LoadBalancer".to_string();
        let store = store_with(&vault, &[NS]);
        let ctx = context(&store, probe_with_leader(1, 0));

        let action = reconcile_vault(&ctx, &vault).await.unwrap();
        assert_eq!(action, Action::requeue(LOAD_BALANCER_REQUEUE));
        assert!(store.object(&key(ObjectKind::Service, "vault")).is_some());
        assert!(secret_in(&store, NS, "vault-tls").is_none());

        store.set_load_balancer_ip(NS, "vault", "203.0.113.9");
        let action = reconcile_vault(&ctx, &vault).await.unwrap();
        assert_eq!(action, Action::requeue(RESYNC_INTERVAL));

        let data = secret_in(&store, NS, "vault-tls").unwrap().data.unwrap();
        let sans = certificate_sans(&data[SERVER_CERT_KEY].0).unwrap();
        assert!(sans.contains(&"203.0.113.9".to_string()));
    }

    // -----------------------------------------------------------------------
    // TLS
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_tls_disabled_skips_certificates() {
        let vault = vault(
            1,
            json!({"storage": {"file": {}}, "listener": {"tcp": {"tls_disable": true}}}),
        );
        let store = store_with(&vault, &[NS]);
        let probe = ScriptedProbe::new().standby("http://vault-0.default:8200", false);
        let ctx = context(&store, probe);

        reconcile_vault(&ctx, &vault).await.unwrap();
        assert!(secret_in(&store, NS, "vault-tls").is_none());
        assert_eq!(status(&store).leader, "vault-0");
    }

    #[tokio::test]
    async fn test_existing_tls_secret_must_exist() {
        let mut vault = raft_vault(1);
        vault.spec.existing_tls_secret_name = "my-tls".to_string();
        let store = store_with(&vault, &[NS]);
        let ctx = context(&store, probe_with_leader(1, 0));

        let err = reconcile_vault(&ctx, &vault).await.unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)), "got {err:?}");

        let chain = CertManager::new(vec!["vault".to_string()]).new_chain().unwrap();
        store.insert(
            Secret {
                metadata: kube::api::ObjectMeta {
                    name: Some("my-tls".to_string()),
                    namespace: Some(NS.to_string()),
                    ..Default::default()
                },
                data: Some(BTreeMap::from([
                    (CA_CERT_KEY.to_string(), ByteString(chain.ca_cert.into_bytes())),
                    (TLS_CERT_KEY.to_string(), ByteString(chain.server_cert.into_bytes())),
                ])),
                ..Default::default()
            }
            .into(),
        );

        reconcile_vault(&ctx, &vault).await.unwrap();
        assert!(secret_in(&store, NS, "vault-tls").is_none());
        assert!(store.object(&key(ObjectKind::StatefulSet, "vault")).is_some());
    }

    #[tokio::test]
    async fn test_ca_distributed_to_all_live_namespaces() {
        let mut vault = raft_vault(1);
        vault.spec.ca_namespaces = vec!["*".to_string()];
        let store = store_with(&vault, &[NS, "team-a", "team-b"]);
        store.add_namespace("team-c", true);
        let ctx = context(&store, probe_with_leader(1, 0));

        reconcile_vault(&ctx, &vault).await.unwrap();

        for namespace in ["team-a", "team-b"] {
            let copy = secret_in(&store, namespace, "vault-tls")
                .unwrap_or_else(|| panic!("no CA copy in {namespace}"));
            let data = copy.data.clone().unwrap();
            assert_eq!(data.keys().collect::<Vec<_>>(), vec![CA_CERT_KEY]);
            assert!(copy.owner_references().is_empty());
        }
        assert!(secret_in(&store, "team-c", "vault-tls").is_none());

        let own = secret_in(&store, NS, "vault-tls").unwrap().data.unwrap();
        assert!(own.contains_key(CA_KEY_KEY));
    }

    #[tokio::test]
    async fn test_ca_distribution_skips_missing_namespace() {
        let mut vault = raft_vault(1);
        vault.spec.ca_namespaces = vec!["team-a".to_string(), "gone".to_string()];
        let store = store_with(&vault, &[NS, "team-a"]);
        let ctx = context(&store, probe_with_leader(1, 0));

        reconcile_vault(&ctx, &vault).await.unwrap();
        assert!(secret_in(&store, "team-a", "vault-tls").is_some());
        assert!(secret_in(&store, "gone", "vault-tls").is_none());
    }

    // -----------------------------------------------------------------------
    // Restart triggers and optional objects
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_watched_secret_change_rolls_statefulset() {
        let mut vault = raft_vault(1);
        vault.spec.watched_secrets_labels =
            vec![BTreeMap::from([("watch".to_string(), "yes".to_string())])];
        let store = store_with(&vault, &[NS]);
        let ctx = context(&store, probe_with_leader(1, 0));

        let watched = |value: &str| Secret {
            metadata: kube::api::ObjectMeta {
                name: Some("creds".to_string()),
                namespace: Some(NS.to_string()),
                labels: Some(BTreeMap::from([("watch".to_string(), "yes".to_string())])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "token".to_string(),
                ByteString(value.as_bytes().to_vec()),
            )])),
            ..Default::default()
        };

        let digest = |store: &InMemoryStore| {
            let sts: StatefulSet = store
                .object(&key(ObjectKind::StatefulSet, "vault"))
                .and_then(|o| o.try_into().ok())
                .unwrap();
            sts.spec
                .unwrap()
                .template
                .metadata
                .unwrap()
                .annotations
                .unwrap()
                .get(WATCHED_SECRETS_ANNOTATION)
                .cloned()
        };

        store.insert(watched("one").into());
        reconcile_vault(&ctx, &vault).await.unwrap();
        let first = digest(&store);
        assert!(first.is_some());

        store.insert(watched("two").into());
        let replaces = store.replaces();
        reconcile_vault(&ctx, &vault).await.unwrap();
        assert_ne!(digest(&store), first);
        assert_eq!(store.replaces(), replaces + 1);
    }

    #[tokio::test]
    async fn test_optional_objects() {
        let mut vault = raft_vault(1);
        vault.spec.service_monitor_enabled = true;
        vault.spec.fluentd_enabled = true;
        vault.spec.external_config = Some(json!({"policies": [{"name": "allow_secrets"}]}));
        vault.spec.ingress = Some(Default::default());
        let store = store_with(&vault, &[NS]);
        let ctx = context(&store, probe_with_leader(1, 0));

        reconcile_vault(&ctx, &vault).await.unwrap();

        for expected in [
            key(ObjectKind::ServiceMonitor, "vault"),
            key(ObjectKind::ConfigMap, "vault-fluentd-config"),
            key(ObjectKind::Secret, "vault-configurer"),
            key(ObjectKind::Deployment, "vault-configurer"),
            key(ObjectKind::Service, "vault-configurer"),
            key(ObjectKind::Ingress, "vault"),
        ] {
            assert!(store.object(&expected).is_some(), "{expected} missing");
        }
    }
}
