//! Condition types and reasons written to Gateway API resources.

use meshgateway_controller_k8s_api::{Condition, Time};

pub(crate) const ACCEPTED: &str = "Accepted";
pub(crate) const PROGRAMMED: &str = "Programmed";
pub(crate) const RESOLVED_REFS: &str = "ResolvedRefs";

pub(crate) const REASON_ACCEPTED: &str = "Accepted";
pub(crate) const REASON_UNACCEPTED: &str = "Unaccepted";
pub(crate) const REASON_PROGRAMMED: &str = "Programmed";
pub(crate) const REASON_INVALID: &str = "Invalid";
pub(crate) const REASON_ADDRESS_NOT_ASSIGNED: &str = "AddressNotAssigned";
pub(crate) const REASON_NO_RESOURCES: &str = "NoResources";
pub(crate) const REASON_INVALID_ROUTE_KINDS: &str = "InvalidRouteKinds";
pub(crate) const REASON_REF_NOT_PERMITTED: &str = "RefNotPermitted";
pub(crate) const REASON_INVALID_CERTIFICATE_REF: &str = "InvalidCertificateRef";
pub(crate) const REASON_NO_MATCHING_PARENT: &str = "NoMatchingParent";
pub(crate) const REASON_NO_MATCHING_LISTENER_HOSTNAME: &str = "NoMatchingListenerHostname";
pub(crate) const REASON_NOT_ALLOWED_BY_LISTENERS: &str = "NotAllowedByListeners";
pub(crate) const REASON_BACKEND_NOT_FOUND: &str = "BackendNotFound";
pub(crate) const REASON_INVALID_KIND: &str = "InvalidKind";
pub(crate) const REASON_RESOLVED_REFS: &str = "ResolvedRefs";

#[cfg(not(test))]
pub(crate) fn now() -> Time {
    Time(chrono::Utc::now())
}

// Tests compare generated patches against literal values, so the timestamp
// must be predictable.
#[cfg(test)]
pub(crate) fn now() -> Time {
    Time(chrono::DateTime::<chrono::Utc>::MIN_UTC)
}

pub(crate) fn condition(
    type_: &str,
    status: bool,
    reason: &str,
    message: String,
    observed_generation: Option<i64>,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if status { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message,
        last_transition_time: now(),
        observed_generation,
    }
}

/// Compares conditions ignoring their transition timestamps.
pub(crate) fn eq_time_insensitive(a: &Condition, b: &Condition) -> bool {
    a.type_ == b.type_
        && a.status == b.status
        && a.reason == b.reason
        && a.message == b.message
        && a.observed_generation == b.observed_generation
}
