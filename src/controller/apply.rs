//! Idempotent apply layer
//!
//! `apply` converges one desired object against the live cluster: create
//! when absent, no-op when the live object already matches, otherwise a
//! full update carrying the live resourceVersion. Matching uses a
//! three-way comparison between the last-applied state (stored in an
//! annotation), the desired object and the live object.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Service;
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use super::platform::{ManagedObject, ObjectKind, ObjectStore};
use crate::error::Result;

/// Annotation holding the JSON of the last applied desired state
pub const LAST_APPLIED_ANNOTATION: &str = "vault.banzaicloud.io/last-applied";

/// What `apply` did to the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Kind-specific rules run on the desired object before diffing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PreMerge {
    /// Keep platform-assigned addresses and ports of a Service
    ServiceEndpoint,
}

fn pre_merge_rule(kind: ObjectKind) -> Option<PreMerge> {
    match kind {
        ObjectKind::Service => Some(PreMerge::ServiceEndpoint),
        _ => None,
    }
}

/// Create or update `desired` so the live object matches it
pub async fn apply(store: &dyn ObjectStore, mut desired: ManagedObject) -> Result<ApplyOutcome> {
    let key = desired.key();

    let Some(current) = store.get(&key).await? else {
        set_last_applied(&mut desired)?;
        store.create(desired).await?;
        info!("Created {}", key);
        return Ok(ApplyOutcome::Created);
    };

    if let Some(rule) = pre_merge_rule(key.kind) {
        run_pre_merge(rule, &mut desired, &current);
    }

    match calculate_patch(&current, &desired) {
        Ok(patch) if patch.is_empty() => {
            debug!("Skipping update for {}, unchanged", key);
            return Ok(ApplyOutcome::Unchanged);
        }
        Ok(patch) => {
            debug!(
                "Updating {}, changed fields: {:?}",
                key,
                patch.keys().collect::<Vec<_>>()
            );
        }
        Err(e) => {
            error!(
                "Could not calculate patch for {}: {}, updating unconditionally",
                key, e
            );
        }
    }

    set_last_applied(&mut desired)?;
    desired.metadata_mut().resource_version = current.metadata().resource_version.clone();
    store.replace(desired).await?;
    info!("Updated {}", key);
    Ok(ApplyOutcome::Updated)
}

fn run_pre_merge(rule: PreMerge, desired: &mut ManagedObject, current: &ManagedObject) {
    match rule {
        PreMerge::ServiceEndpoint => {
            if let (ManagedObject::Service(desired), ManagedObject::Service(current)) =
                (desired, current)
            {
                preserve_service_fields(desired, current);
            }
        }
    }
}

/// Copy immutable and platform-allocated Service fields from the live object
pub fn preserve_service_fields(desired: &mut Service, current: &Service) {
    let annotations = merged_annotations(
        current.metadata.annotations.as_ref(),
        desired.metadata.annotations.as_ref(),
    );
    desired.metadata.annotations = annotations;

    let (Some(desired_spec), Some(current_spec)) = (desired.spec.as_mut(), current.spec.as_ref())
    else {
        return;
    };

    desired_spec.cluster_ip = current_spec.cluster_ip.clone();
    desired_spec.cluster_ips = current_spec.cluster_ips.clone();

    let externally_routed = matches!(
        desired_spec.type_.as_deref(),
        Some("NodePort") | Some("LoadBalancer")
    );
    if !externally_routed {
        return;
    }
    if let (Some(desired_ports), Some(current_ports)) =
        (desired_spec.ports.as_mut(), current_spec.ports.as_ref())
    {
        for (desired_port, current_port) in desired_ports.iter_mut().zip(current_ports) {
            if desired_port.node_port.is_none() {
                desired_port.node_port = current_port.node_port;
            }
        }
    }
}

/// Live annotations with the desired ones layered on top
fn merged_annotations(
    current: Option<&BTreeMap<String, String>>,
    desired: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let mut merged = current.cloned().unwrap_or_default();
    merged.extend(desired.cloned().unwrap_or_default());
    (!merged.is_empty()).then_some(merged)
}

fn set_last_applied(obj: &mut ManagedObject) -> Result<()> {
    let applied = strip(obj.to_value()?);
    let encoded = serde_json::to_string(&applied)?;
    obj.metadata_mut()
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(LAST_APPLIED_ANNOTATION.to_string(), encoded);
    Ok(())
}

/// Remove fields that never take part in the comparison
fn strip(mut value: Value) -> Value {
    if let Some(obj) = value.as_object_mut() {
        obj.remove("status");
        if let Some(Value::Object(meta)) = obj.get_mut("metadata") {
            let drop_annotations = match meta.get_mut("annotations") {
                Some(Value::Object(annotations)) => {
                    annotations.remove(LAST_APPLIED_ANNOTATION);
                    annotations.is_empty()
                }
                Some(Value::Null) => true,
                _ => false,
            };
            if drop_annotations {
                meta.remove("annotations");
            }
        }
    }
    value
}

/// Three-way patch between the last-applied, desired and live states
///
/// Returns the top-level fields that differ; an empty map means the live
/// object already matches.
pub fn calculate_patch(
    current: &ManagedObject,
    desired: &ManagedObject,
) -> Result<Map<String, Value>> {
    let original = match current
        .metadata()
        .annotations
        .as_ref()
        .and_then(|a| a.get(LAST_APPLIED_ANNOTATION))
    {
        Some(raw) => Some(strip(serde_json::from_str(raw)?)),
        None => None,
    };
    let modified = strip(desired.to_value()?);
    let current = strip(current.to_value()?);

    Ok(match (&modified, &current) {
        (Value::Object(m), Value::Object(c)) => {
            let o = original.as_ref().and_then(Value::as_object);
            diff_objects(o, m, c)
        }
        _ => Map::new(),
    })
}

fn diff_objects(
    original: Option<&Map<String, Value>>,
    modified: &Map<String, Value>,
    current: &Map<String, Value>,
) -> Map<String, Value> {
    let mut patch = Map::new();

    for (key, want) in modified {
        match (want, current.get(key)) {
            (_, None | Some(Value::Null)) => {
                if !is_empty_value(want) {
                    patch.insert(key.clone(), want.clone());
                }
            }
            (Value::Object(want), Some(Value::Object(have))) => {
                let orig = original
                    .and_then(|o| o.get(key))
                    .and_then(Value::as_object);
                let nested = diff_objects(orig, want, have);
                if !nested.is_empty() {
                    patch.insert(key.clone(), Value::Object(nested));
                }
            }
            (_, Some(have)) => {
                if !is_subset(want, have) {
                    patch.insert(key.clone(), want.clone());
                }
            }
        }
    }

    // Fields we applied before but no longer want
    if let Some(original) = original {
        for key in original.keys() {
            if !modified.contains_key(key) && current.contains_key(key) {
                patch.insert(key.clone(), Value::Null);
            }
        }
    }

    patch
}

/// Whether every field of `want` is present with the same value in `have`
///
/// The API server fills in defaults on the live object, so extra fields in
/// `have` are ignored. Arrays must match in length and element-wise.
fn is_subset(want: &Value, have: &Value) -> bool {
    match (want, have) {
        (Value::Object(w), Value::Object(h)) => w.iter().all(|(k, wv)| match h.get(k) {
            Some(hv) => is_subset(wv, hv),
            None => is_empty_value(wv),
        }),
        (Value::Array(w), Value::Array(h)) => {
            w.len() == h.len() && w.iter().zip(h).all(|(wv, hv)| is_subset(wv, hv))
        }
        (w, Value::Null) => is_empty_value(w),
        (w, h) => w == h,
    }
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(o) => o.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}
