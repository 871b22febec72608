//! Pod readiness evaluation.

use k8s_openapi::api::core::v1::Pod;

/// Returns `true` if the pod's `Ready` condition has status `True`.
///
/// A pod without a status, without conditions, or without a `Ready`
/// condition is not ready.
#[must_use]
pub fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|c| c.status == "True")
}
