//! # HelmRelease Access
//!
//! Every mutation re-reads the release to pick up its current
//! `resourceVersion` and sends a JSON merge patch that carries that version.
//! The API server rejects the patch with 409 if helm-controller (or anyone
//! else) wrote in between, which surfaces as [`StoreError::Conflict`].

use std::fmt;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::crds::HelmRelease;
use crate::error::StoreError;

/// Annotation recording the highest history revision the plunger deleted
pub const LAST_PROCESSED_VERSION_ANNOTATION: &str =
    "flux-plunger.cozystack.io/last-processed-version";

/// Field manager attached to every patch the plunger sends
pub const FIELD_MANAGER: &str = "flux-client-side-apply";

/// Namespace and name of a `HelmRelease`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseKey {
    pub namespace: String,
    pub name: String,
}

impl ReleaseKey {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of `hr`, or `None` when it has no namespace or name
    #[must_use]
    pub fn from_release(hr: &HelmRelease) -> Option<Self> {
        let namespace = hr.metadata.namespace.clone()?;
        let name = hr.metadata.name.clone()?;
        Some(Self { namespace, name })
    }
}

impl fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Optimistically locked mutations of a `HelmRelease`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Set `spec.suspend = true`; no write if it already is
    async fn suspend(&self, key: &ReleaseKey) -> Result<(), StoreError>;

    /// Set `spec.suspend = false`; no write if it already is
    async fn unsuspend(&self, key: &ReleaseKey) -> Result<(), StoreError>;

    /// Write [`LAST_PROCESSED_VERSION_ANNOTATION`] = `version`
    async fn set_processed_version(&self, key: &ReleaseKey, version: u64)
        -> Result<(), StoreError>;
}

/// Merge patch toggling `spec.suspend`, guarded by `resource_version`
#[must_use]
pub fn suspend_patch(resource_version: &str, suspend: bool) -> Value {
    json!({
        "metadata": { "resourceVersion": resource_version },
        "spec": { "suspend": suspend }
    })
}

/// Merge patch writing the processed-version annotation, guarded by `resource_version`.
///
/// A merge patch creates `metadata.annotations` when the object has none.
#[must_use]
pub fn processed_version_patch(resource_version: &str, version: u64) -> Value {
    json!({
        "metadata": {
            "resourceVersion": resource_version,
            "annotations": {
                LAST_PROCESSED_VERSION_ANNOTATION: version.to_string()
            }
        }
    })
}

/// [`ReleaseStore`] talking to the API server
#[derive(Clone)]
pub struct KubeReleaseStore {
    client: Client,
}

impl KubeReleaseStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, key: &ReleaseKey) -> Api<HelmRelease> {
        Api::namespaced(self.client.clone(), &key.namespace)
    }

    async fn fetch(&self, key: &ReleaseKey) -> Result<HelmRelease, StoreError> {
        self.api(key)
            .get(&key.name)
            .await
            .map_err(|e| StoreError::from_kube(format!("helmrelease {key}"), e))
    }

    async fn patch(&self, key: &ReleaseKey, patch: Value) -> Result<(), StoreError> {
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PatchParams::default()
        };

        self.api(key)
            .patch(&key.name, &params, &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(format!("helmrelease {key}"), e))
    }

    async fn set_suspend(&self, key: &ReleaseKey, suspend: bool) -> Result<(), StoreError> {
        let latest = self.fetch(key).await?;

        if latest.spec.suspend == suspend {
            debug!(suspend, "HelmRelease already in requested suspend state");
            return Ok(());
        }

        let resource_version = latest.resource_version().unwrap_or_default();
        self.patch(key, suspend_patch(&resource_version, suspend))
            .await
    }
}

#[async_trait]
impl ReleaseStore for KubeReleaseStore {
    #[instrument(skip(self), fields(release = %key))]
    async fn suspend(&self, key: &ReleaseKey) -> Result<(), StoreError> {
        self.set_suspend(key, true).await
    }

    #[instrument(skip(self), fields(release = %key))]
    async fn unsuspend(&self, key: &ReleaseKey) -> Result<(), StoreError> {
        self.set_suspend(key, false).await
    }

    #[instrument(skip(self), fields(release = %key))]
    async fn set_processed_version(
        &self,
        key: &ReleaseKey,
        version: u64,
    ) -> Result<(), StoreError> {
        let latest = self.fetch(key).await?;
        let resource_version = latest.resource_version().unwrap_or_default();

        self.patch(key, processed_version_patch(&resource_version, version))
            .await
    }
}
