//! Condition management helpers following Kubernetes API conventions

use crate::crd::{ComponentCondition, VaultStatus};

/// The single condition type reported on a Vault
pub const CONDITION_TYPE_HEALTHY: &str = "Healthy";

/// Standard condition statuses
pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

pub const MISSING_STORAGE_MESSAGE: &str = "storage configuration is missing";

/// Healthy condition from the outcome of a leader probe
pub fn healthy_condition(leader_found: bool, error: Option<String>) -> ComponentCondition {
    let status = if leader_found && error.is_none() {
        CONDITION_STATUS_TRUE
    } else {
        CONDITION_STATUS_FALSE
    };
    ComponentCondition {
        type_: CONDITION_TYPE_HEALTHY.to_string(),
        status: status.to_string(),
        message: None,
        error,
    }
}

pub fn missing_storage_condition() -> ComponentCondition {
    ComponentCondition {
        type_: CONDITION_TYPE_HEALTHY.to_string(),
        status: CONDITION_STATUS_FALSE.to_string(),
        message: Some(MISSING_STORAGE_MESSAGE.to_string()),
        error: None,
    }
}

/// Find a condition by type
pub fn find_condition<'a>(
    conditions: &'a [ComponentCondition],
    type_: &str,
) -> Option<&'a ComponentCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Whether `new` differs from `old` in anything worth a status write
///
/// Only the first condition's status and error are compared, so a changed
/// message alone does not cause a write.
pub fn status_needs_update(old: &VaultStatus, new: &VaultStatus) -> bool {
    if old.nodes != new.nodes || old.leader != new.leader || old.conditions.is_empty() {
        return true;
    }
    match (old.conditions.first(), new.conditions.first()) {
        (Some(o), Some(n)) => o.status != n.status || o.error != n.error,
        (Some(_), None) => true,
        _ => false,
    }
}
