//! Vault-K8s: Kubernetes Operator for clustered Vault deployments
//!
//! This crate provides the `Vault` custom resource and the controller that
//! keeps a Vault cluster, its TLS material and its companion objects in
//! line with that resource.

pub mod controller;
pub mod crd;
pub mod error;

pub use crate::error::{Error, Result};
