//! Unit tests for the TLS secret lifecycle.
//!
//! Run with: `cargo test -p vault-k8s certificates_test`

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, Secret, Service, ServiceStatus,
    };
    use k8s_openapi::ByteString;
    use serde_json::json;

    use crate::controller::certificates::{
        external_tls_expiry, hosts_and_ips, reconcile_tls_secret, TlsAction, CA_CERT_KEY,
        CA_KEY_KEY, SERVER_CERT_KEY, SERVER_KEY_KEY, TLS_CERT_KEY,
    };
    use crate::controller::resources::build_service;
    use crate::controller::tls::{certificate_expiry, certificate_sans, CertManager, CertificateChain};
    use crate::crd::{Vault, VaultSpec};
    use crate::error::Error;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn vault(size: i32) -> Vault {
        let mut vault = Vault::new(
            "vault",
            VaultSpec {
                size,
                config: json!({"storage": {"raft": {"path": "/vault/file"}}}),
                tls_expiry_threshold: Some("720h".to_string()),
                ..Default::default()
            },
        );
        vault.metadata.namespace = Some("secrets".to_string());
        vault.metadata.uid = Some("vault-uid".to_string());
        vault
    }

    fn tls_secret(chain: &CertificateChain) -> Secret {
        let data = BTreeMap::from([
            (CA_CERT_KEY.to_string(), ByteString(chain.ca_cert.clone().into_bytes())),
            (CA_KEY_KEY.to_string(), ByteString(chain.ca_key.clone().into_bytes())),
            (
                SERVER_CERT_KEY.to_string(),
                ByteString(chain.server_cert.clone().into_bytes()),
            ),
            (
                SERVER_KEY_KEY.to_string(),
                ByteString(chain.server_key.clone().into_bytes()),
            ),
        ]);
        Secret {
            data: Some(data),
            ..Default::default()
        }
    }

    fn data_of(secret: &Secret) -> BTreeMap<String, ByteString> {
        secret.data.clone().unwrap_or_default()
    }

    fn with_load_balancer(mut service: Service, ip: &str, hostname: &str) -> Service {
        service.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some(ip.to_string()),
                    hostname: Some(hostname.to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });
        service
    }

    // -----------------------------------------------------------------------
    // Host set
    // -----------------------------------------------------------------------

    #[test]
    fn test_hosts_single_replica() {
        let vault = vault(1);
        assert_eq!(
            hosts_and_ips(&vault, &build_service(&vault)),
            vec![
                "127.0.0.1",
                "vault",
                "vault.secrets",
                "vault.secrets.svc.cluster.local",
            ]
        );
    }

    #[test]
    fn test_hosts_with_load_balancer_and_replicas() {
        let mut vault = vault(2);
        vault.spec.tls_additional_hosts = vec![
            "vault.example.com".to_string(),
            String::new(),
            "vault".to_string(),
        ];
        let service = with_load_balancer(build_service(&vault), "192.0.2.7", "lb.example.com");

        assert_eq!(
            hosts_and_ips(&vault, &service),
            vec![
                "127.0.0.1",
                "vault",
                "vault.secrets",
                "vault.secrets.svc.cluster.local",
                "192.0.2.7",
                "lb.example.com",
                "vault.example.com",
                "vault-0",
                "vault-0.secrets",
                "vault-0.secrets.svc.cluster.local",
                "vault-1",
                "vault-1.secrets",
                "vault-1.secrets.svc.cluster.local",
            ]
        );
    }

    // -----------------------------------------------------------------------
    // Issue / rotate / keep
    // -----------------------------------------------------------------------

    #[test]
    fn test_empty_secret_issues_chain() {
        let vault = vault(1);
        let service = build_service(&vault);
        let outcome = reconcile_tls_secret(&vault, &service, None).unwrap();

        assert_eq!(outcome.action, TlsAction::Issued);
        assert_eq!(outcome.secret.metadata.name.as_deref(), Some("vault-tls"));
        assert_eq!(outcome.secret.metadata.namespace.as_deref(), Some("secrets"));

        let data = data_of(&outcome.secret);
        for key in [CA_CERT_KEY, CA_KEY_KEY, SERVER_CERT_KEY, SERVER_KEY_KEY] {
            assert!(!data[key].0.is_empty(), "{key} is empty");
        }

        let sans = certificate_sans(&data[SERVER_CERT_KEY].0).unwrap();
        assert_eq!(sans.len(), hosts_and_ips(&vault, &service).len());
        assert!(sans.contains(&"vault.secrets.svc.cluster.local".to_string()));
        assert!(sans.contains(&"127.0.0.1".to_string()));

        let server_expiry = certificate_expiry(&data[SERVER_CERT_KEY].0).unwrap();
        assert_eq!(outcome.expiration, server_expiry);
    }

    #[test]
    fn test_up_to_date_secret_is_kept_byte_identical() {
        let vault = vault(1);
        let service = build_service(&vault);
        let issued = reconcile_tls_secret(&vault, &service, None).unwrap();

        let outcome = reconcile_tls_secret(&vault, &service, Some(&issued.secret)).unwrap();
        assert_eq!(outcome.action, TlsAction::Unchanged);
        assert_eq!(data_of(&outcome.secret), data_of(&issued.secret));
        assert_eq!(outcome.expiration, issued.expiration);
    }

    #[test]
    fn test_expiring_server_certificate_is_rotated() {
        let vault = vault(1);
        let service = build_service(&vault);
        let chain = CertManager::new(hosts_and_ips(&vault, &service))
            .with_server_validity(chrono::Duration::days(10))
            .new_chain()
            .unwrap();
        let existing = tls_secret(&chain);

        let outcome = reconcile_tls_secret(&vault, &service, Some(&existing)).unwrap();
        assert_eq!(outcome.action, TlsAction::ServerRotated);

        let data = data_of(&outcome.secret);
        assert_eq!(data[CA_CERT_KEY].0, chain.ca_cert.as_bytes());
        assert_eq!(data[CA_KEY_KEY].0, chain.ca_key.as_bytes());
        assert_ne!(data[SERVER_CERT_KEY].0, chain.server_cert.as_bytes());
        assert!(outcome.expiration - chrono::Utc::now() > chrono::Duration::days(300));
    }

    #[test]
    fn test_host_change_rotates_server_keeping_ca() {
        let mut vault = vault(1);
        let service = build_service(&vault);
        let issued = reconcile_tls_secret(&vault, &service, None).unwrap();
        let before = data_of(&issued.secret);

        vault.spec.tls_additional_hosts = vec!["vault.example.com".to_string()];
        let outcome = reconcile_tls_secret(&vault, &service, Some(&issued.secret)).unwrap();
        assert_eq!(outcome.action, TlsAction::ServerRotated);

        let after = data_of(&outcome.secret);
        assert_eq!(after[CA_KEY_KEY], before[CA_KEY_KEY]);
        assert_eq!(after[CA_CERT_KEY], before[CA_CERT_KEY]);
        let sans = certificate_sans(&after[SERVER_CERT_KEY].0).unwrap();
        assert!(sans.contains(&"vault.example.com".to_string()));
    }

    #[test]
    fn test_expiring_ca_issues_new_chain() {
        let vault = vault(1);
        let service = build_service(&vault);
        let chain = CertManager::new(hosts_and_ips(&vault, &service))
            .with_ca_validity(chrono::Duration::days(10))
            .new_chain()
            .unwrap();

        let outcome = reconcile_tls_secret(&vault, &service, Some(&tls_secret(&chain))).unwrap();
        assert_eq!(outcome.action, TlsAction::Issued);
        assert_ne!(data_of(&outcome.secret)[CA_KEY_KEY].0, chain.ca_key.as_bytes());
    }

    #[test]
    fn test_invalid_ca_is_fatal() {
        let vault = vault(1);
        let service = build_service(&vault);
        let existing = Secret {
            data: Some(BTreeMap::from([
                (CA_CERT_KEY.to_string(), ByteString(b"not a certificate".to_vec())),
                (CA_KEY_KEY.to_string(), ByteString(b"not a key".to_vec())),
            ])),
            ..Default::default()
        };

        let err = reconcile_tls_secret(&vault, &service, Some(&existing)).unwrap_err();
        assert!(matches!(err, Error::CertificateError(_)), "got {err:?}");
    }

    // -----------------------------------------------------------------------
    // User supplied secret
    // -----------------------------------------------------------------------

    #[test]
    fn test_external_tls_expiry() {
        let vault = vault(1);
        let chain = CertManager::new(hosts_and_ips(&vault, &build_service(&vault)))
            .new_chain()
            .unwrap();
        let secret = Secret {
            data: Some(BTreeMap::from([(
                TLS_CERT_KEY.to_string(),
                ByteString(chain.server_cert.clone().into_bytes()),
            )])),
            ..Default::default()
        };

        assert_eq!(
            external_tls_expiry(&secret).unwrap(),
            certificate_expiry(chain.server_cert.as_bytes()).unwrap()
        );
        assert!(matches!(
            external_tls_expiry(&Secret::default()),
            Err(Error::CertificateError(_))
        ));
    }
}
