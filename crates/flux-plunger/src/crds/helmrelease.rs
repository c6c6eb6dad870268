//! Typed view of the Flux `HelmRelease` resource
//!
//! Only the fields the plunger reads are modelled. Everything else on the
//! object is ignored on deserialization and is never written back: every
//! mutation goes out as a merge patch, not as a full object replace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type the plunger inspects
pub const READY_CONDITION: &str = "Ready";

/// `HelmRelease` spec, reduced to the suspend toggle
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "helm.toolkit.fluxcd.io",
    version = "v2",
    kind = "HelmRelease",
    plural = "helmreleases"
)]
#[kube(namespaced)]
#[kube(status = "HelmReleaseStatus")]
pub struct HelmReleaseSpec {
    /// When true, helm-controller does not act on this release
    #[serde(default)]
    pub suspend: bool,
}

/// `HelmRelease` status, reduced to its conditions
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct HelmReleaseStatus {
    #[serde(default)]
    pub conditions: Vec<ReleaseCondition>,
}

/// A status condition as written by helm-controller
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ReleaseCondition {
    /// Condition type, e.g. "Ready"
    #[serde(rename = "type")]
    pub type_: String,

    /// "True", "False" or "Unknown"
    pub status: String,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub message: String,
}

impl HelmRelease {
    /// Whether helm-controller is currently told to leave this release alone
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.spec.suspend
    }

    /// Conditions reported on the release, empty when there is no status yet
    #[must_use]
    pub fn conditions(&self) -> &[ReleaseCondition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_ignores_unmodelled_fields() {
        let raw = serde_json::json!({
            "apiVersion": "helm.toolkit.fluxcd.io/v2",
            "kind": "HelmRelease",
            "metadata": {
                "name": "app",
                "namespace": "ns1",
                "resourceVersion": "42"
            },
            "spec": {
                "interval": "5m",
                "chart": {"spec": {"chart": "app", "version": "1.0.0"}},
                "suspend": true
            },
            "status": {
                "observedGeneration": 3,
                "conditions": [{
                    "type": "Ready",
                    "status": "False",
                    "reason": "UpgradeFailed",
                    "message": "Helm upgrade failed: \"app\" has no deployed releases",
                    "lastTransitionTime": "2025-01-01T00:00:00Z"
                }]
            }
        });

        let hr: HelmRelease = serde_json::from_value(raw).unwrap();
        assert!(hr.is_suspended());
        assert_eq!(hr.conditions().len(), 1);
        assert_eq!(hr.conditions()[0].type_, READY_CONDITION);
        assert_eq!(hr.conditions()[0].reason, "UpgradeFailed");
    }

    #[test]
    fn test_missing_suspend_defaults_to_false() {
        let raw = serde_json::json!({
            "apiVersion": "helm.toolkit.fluxcd.io/v2",
            "kind": "HelmRelease",
            "metadata": {"name": "app", "namespace": "ns1"},
            "spec": {"interval": "5m"}
        });

        let hr: HelmRelease = serde_json::from_value(raw).unwrap();
        assert!(!hr.is_suspended());
        assert!(hr.conditions().is_empty());
    }
}
