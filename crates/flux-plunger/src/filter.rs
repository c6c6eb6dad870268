//! Event filter deciding which `HelmRelease` objects are worth a reconcile

use kube::ResourceExt;

use crate::crds::helmrelease::READY_CONDITION;
use crate::crds::HelmRelease;
use crate::release::LAST_PROCESSED_VERSION_ANNOTATION;

/// Message fragment helm-controller reports when the last release is gone
pub const NO_DEPLOYED_RELEASES: &str = "has no deployed releases";

/// `Ready=False` with a message containing [`NO_DEPLOYED_RELEASES`]
#[must_use]
pub fn has_no_deployed_releases_error(hr: &HelmRelease) -> bool {
    hr.conditions().iter().any(|condition| {
        condition.type_ == READY_CONDITION
            && condition.status == "False"
            && condition.message.contains(NO_DEPLOYED_RELEASES)
    })
}

/// Whether the processed-version annotation is present at all
#[must_use]
pub fn has_processed_annotation(hr: &HelmRelease) -> bool {
    hr.annotations()
        .contains_key(LAST_PROCESSED_VERSION_ANNOTATION)
}

/// Parsed processed-version annotation; unparseable counts as absent
#[must_use]
pub fn processed_version(hr: &HelmRelease) -> Option<u64> {
    hr.annotations()
        .get(LAST_PROCESSED_VERSION_ANNOTATION)
        .and_then(|raw| raw.parse().ok())
}

/// Eligible when stuck on the error, or suspended with our annotation
/// (a previous pass may have stopped between delete and unsuspend).
#[must_use]
pub fn should_reconcile(hr: &HelmRelease) -> bool {
    has_no_deployed_releases_error(hr) || (hr.is_suspended() && has_processed_annotation(hr))
}
