//! # Helm Release History
//!
//! Helm persists one Secret per release revision, named
//! `sh.helm.release.v1.<release>.v<N>`, labelled `owner=helm` and
//! `name=<release>` and typed `helm.sh/release.v1`. This module lists and
//! deletes those records and knows how to read the revision number back
//! out of the record name.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams};
use kube::{Client, ResourceExt};
use tracing::{debug, instrument};

use crate::error::StoreError;

/// Secret type Helm uses for release records
pub const RELEASE_SECRET_TYPE: &str = "helm.sh/release.v1";

/// Label Helm sets to mark its own storage objects
pub const OWNER_LABEL: &str = "owner";

/// Value of [`OWNER_LABEL`] on Helm storage objects
pub const OWNER_HELM: &str = "helm";

/// Label carrying the release name
pub const NAME_LABEL: &str = "name";

/// One persisted revision of a Helm release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub namespace: String,
    /// Object name, `sh.helm.release.v1.<release>.v<N>`
    pub name: String,
    pub release: String,
}

impl HistoryRecord {
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        release: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            release: release.into(),
        }
    }

    /// Revision number encoded in the record name, 0 if it cannot be read
    #[must_use]
    pub fn version(&self) -> u64 {
        extract_version(&self.name)
    }
}

/// Extract the revision from a record name.
///
/// Takes the segment after the last `.`, drops one leading `v` and parses
/// the rest as a decimal number. Anything unparseable yields 0.
///
/// ```
/// use flux_plunger::history::extract_version;
///
/// assert_eq!(extract_version("sh.helm.release.v1.foo.v10"), 10);
/// assert_eq!(extract_version("sh.helm.release.v1.foo.vX"), 0);
/// ```
#[must_use]
pub fn extract_version(record_name: &str) -> u64 {
    let suffix = record_name.rsplit('.').next().unwrap_or_default();
    let digits = suffix.strip_prefix('v').unwrap_or(suffix);
    digits.parse().unwrap_or(0)
}

/// Record with the highest revision, if any
#[must_use]
pub fn latest_record(records: &[HistoryRecord]) -> Option<&HistoryRecord> {
    records.iter().max_by_key(|record| record.version())
}

/// Highest revision across `records`, 0 when there are none
#[must_use]
pub fn latest_version(records: &[HistoryRecord]) -> u64 {
    latest_record(records).map_or(0, HistoryRecord::version)
}

/// Read/delete access to the history of a release
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// All records of `release` in `namespace`, in no particular order
    async fn list(&self, namespace: &str, release: &str)
        -> Result<Vec<HistoryRecord>, StoreError>;

    /// Delete a single record
    async fn delete(&self, record: &HistoryRecord) -> Result<(), StoreError>;
}

/// [`HistoryStore`] backed by Helm's Secret storage driver
#[derive(Clone)]
pub struct SecretHistoryStore {
    client: Client,
}

impl SecretHistoryStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Keep only Helm release Secrets and turn them into records
#[must_use]
pub fn records_from_secrets(
    namespace: &str,
    release: &str,
    secrets: Vec<Secret>,
) -> Vec<HistoryRecord> {
    secrets
        .into_iter()
        .filter(|secret| secret.type_.as_deref() == Some(RELEASE_SECRET_TYPE))
        .map(|secret| HistoryRecord::new(namespace, release, secret.name_any()))
        .collect()
}

#[async_trait]
impl HistoryStore for SecretHistoryStore {
    #[instrument(skip(self))]
    async fn list(
        &self,
        namespace: &str,
        release: &str,
    ) -> Result<Vec<HistoryRecord>, StoreError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!("{OWNER_LABEL}={OWNER_HELM},{NAME_LABEL}={release}");

        let list = secrets
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| StoreError::from_kube(format!("secrets {namespace} ({selector})"), e))?;

        let records = records_from_secrets(namespace, release, list.items);
        debug!(count = records.len(), "Listed Helm release history");
        Ok(records)
    }

    #[instrument(skip(self), fields(namespace = %record.namespace, secret = %record.name))]
    async fn delete(&self, record: &HistoryRecord) -> Result<(), StoreError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &record.namespace);

        secrets
            .delete(&record.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| {
                StoreError::from_kube(format!("secret {}/{}", record.namespace, record.name), e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn record(name: &str) -> HistoryRecord {
        HistoryRecord::new("ns1", "foo", name)
    }

    fn secret(name: &str, type_: Option<&str>) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns1".to_string()),
                ..ObjectMeta::default()
            },
            type_: type_.map(str::to_string),
            ..Secret::default()
        }
    }

    #[test]
    fn test_extract_version() {
        assert_eq!(extract_version("sh.helm.release.v1.foo.v10"), 10);
        assert_eq!(extract_version("sh.helm.release.v1.foo.v1"), 1);
        assert_eq!(extract_version("sh.helm.release.v1.foo.vX"), 0);
        assert_eq!(extract_version("nodots"), 0);
        assert_eq!(extract_version(""), 0);
    }

    #[test]
    fn test_extract_version_edge_shapes() {
        // bare number after the last dot
        assert_eq!(extract_version("release.7"), 7);
        assert_eq!(extract_version("sh.helm.release.v1.foo.v"), 0);
        assert_eq!(extract_version("sh.helm.release.v1.foo."), 0);
        assert_eq!(extract_version("sh.helm.release.v1.foo.vv3"), 0);
        assert_eq!(extract_version("sh.helm.release.v1.foo.v-3"), 0);
    }

    #[test]
    fn test_latest_is_numeric_not_lexical() {
        let records = vec![
            record("sh.helm.release.v1.foo.v9"),
            record("sh.helm.release.v1.foo.v10"),
            record("sh.helm.release.v1.foo.v2"),
        ];

        let latest = latest_record(&records).unwrap();
        assert_eq!(latest.name, "sh.helm.release.v1.foo.v10");
        assert_eq!(latest_version(&records), 10);
    }

    #[test]
    fn test_latest_of_empty_history_is_zero() {
        assert!(latest_record(&[]).is_none());
        assert_eq!(latest_version(&[]), 0);
    }

    #[test]
    fn test_records_from_secrets_filters_by_type() {
        let secrets = vec![
            secret("sh.helm.release.v1.foo.v1", Some(RELEASE_SECRET_TYPE)),
            secret("sh.helm.release.v1.foo.v2", Some(RELEASE_SECRET_TYPE)),
            secret("foo-credentials", Some("Opaque")),
            secret("untyped", None),
        ];

        let records = records_from_secrets("ns1", "foo", secrets);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.namespace == "ns1" && r.release == "foo"));
        assert_eq!(latest_version(&records), 2);
    }
}
