//! Merging user overlays onto generated pod specs
//!
//! Two strategies, chosen per target:
//! - pod spec overlays are defaults: a field is only taken from the overlay
//!   when the generated spec left it unset
//! - the primary container overlay wins field by field

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, PodSpec};

use crate::crd::{ContainerOverlay, PodSpecOverlay};

/// Fill unset fields of `spec` from `overlay`
pub fn merge_pod_spec_defaults(spec: &mut PodSpec, overlay: &PodSpecOverlay) {
    fill(&mut spec.service_account_name, &overlay.service_account_name);
    fill(
        &mut spec.automount_service_account_token,
        &overlay.automount_service_account_token,
    );
    fill_collection(&mut spec.node_selector, &overlay.node_selector);
    fill_collection(&mut spec.tolerations, &overlay.tolerations);
    fill(&mut spec.affinity, &overlay.affinity);
    fill(&mut spec.security_context, &overlay.security_context);
    fill(&mut spec.priority_class_name, &overlay.priority_class_name);
    fill_collection(&mut spec.image_pull_secrets, &overlay.image_pull_secrets);
    fill(&mut spec.host_network, &overlay.host_network);
    fill(&mut spec.dns_policy, &overlay.dns_policy);
    fill(&mut spec.dns_config, &overlay.dns_config);
    fill(
        &mut spec.termination_grace_period_seconds,
        &overlay.termination_grace_period_seconds,
    );
    fill(
        &mut spec.share_process_namespace,
        &overlay.share_process_namespace,
    );
    fill(&mut spec.scheduler_name, &overlay.scheduler_name);
    fill(&mut spec.runtime_class_name, &overlay.runtime_class_name);
    fill_collection(
        &mut spec.topology_spread_constraints,
        &overlay.topology_spread_constraints,
    );
}

/// Overwrite fields of `container` with every field set in `overlay`
pub fn merge_container_override(container: &mut Container, overlay: &ContainerOverlay) {
    set(&mut container.image, &overlay.image);
    set(&mut container.image_pull_policy, &overlay.image_pull_policy);
    set(&mut container.command, &overlay.command);
    set(&mut container.args, &overlay.args);
    set(&mut container.working_dir, &overlay.working_dir);
    set(&mut container.env, &overlay.env);
    set(&mut container.env_from, &overlay.env_from);
    set(&mut container.ports, &overlay.ports);
    set(&mut container.resources, &overlay.resources);
    set(&mut container.security_context, &overlay.security_context);
    set(&mut container.volume_mounts, &overlay.volume_mounts);
    set(&mut container.liveness_probe, &overlay.liveness_probe);
    set(&mut container.readiness_probe, &overlay.readiness_probe);
    set(&mut container.startup_probe, &overlay.startup_probe);
    set(&mut container.lifecycle, &overlay.lifecycle);
}

fn fill<T: Clone>(target: &mut Option<T>, overlay: &Option<T>) {
    if target.is_none() {
        target.clone_from(overlay);
    }
}

/// Collections where an empty generated value counts as unset
trait Collection: Clone {
    fn is_empty(&self) -> bool;
}

impl<T: Clone> Collection for Vec<T> {
    fn is_empty(&self) -> bool {
        Vec::is_empty(self)
    }
}

impl<K: Clone, V: Clone> Collection for BTreeMap<K, V> {
    fn is_empty(&self) -> bool {
        BTreeMap::is_empty(self)
    }
}

fn fill_collection<C: Collection>(target: &mut Option<C>, overlay: &Option<C>) {
    let unset = target.as_ref().map(Collection::is_empty).unwrap_or(true);
    if unset && overlay.is_some() {
        target.clone_from(overlay);
    }
}

fn set<T: Clone>(target: &mut Option<T>, overlay: &Option<T>) {
    if overlay.is_some() {
        target.clone_from(overlay);
    }
}
