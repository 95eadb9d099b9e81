//! Controller module for Vault reconciliation
//! This module contains the controller loop, the desired-state builders,
//! the apply layer and the certificate and health machinery.

pub mod apply;
pub mod certificates;
pub mod conditions;
pub mod configurer;
pub mod distribution;
pub mod health;
pub mod merge;
pub mod platform;
mod reconciler;
pub mod resources;
pub mod tls;
pub mod workload;

#[cfg(test)]
mod certificates_test;
#[cfg(test)]
mod reconciler_test;
#[cfg(test)]
pub(crate) mod testing;

pub use apply::{apply, ApplyOutcome};
pub use health::{HealthProbe, HttpHealthProbe, DEFAULT_PROBE_TIMEOUT};
pub use platform::{KubeStore, ManagedObject, ObjectKey, ObjectKind, ObjectStore};
pub use reconciler::{reconcile_vault, run_controller, Context};
