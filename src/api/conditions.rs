//! Condition list upkeep for status subresources.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

/// Condition type: resource is ready for use
pub const CONDITION_READY: &str = "Ready";
/// Condition type: last connectivity probe succeeded
pub const CONDITION_CONNECTED: &str = "Connected";
/// Condition type: gateway deployment has available replicas
pub const CONDITION_AVAILABLE: &str = "Available";

/// Insert or update a condition by type, keeping the list ordered by type.
///
/// The transition time is refreshed only when the status value flips, so a
/// steady condition keeps its original timestamp across reconciles.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    let status_str = if status { "True" } else { "False" };
    let now = Time(Utc::now());

    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != status_str {
                existing.last_transition_time = now;
            }
            existing.status = status_str.to_string();
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = observed_generation;
        }
        None => {
            conditions.push(Condition {
                type_: type_.to_string(),
                status: status_str.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
                observed_generation,
            });
            conditions.sort_by(|a, b| a.type_.cmp(&b.type_));
        }
    }
}

/// Look up a condition's boolean status by type
pub fn condition_is_true(conditions: &[Condition], type_: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.type_ == type_)
        .map(|c| c.status == "True")
        .unwrap_or(false)
}
