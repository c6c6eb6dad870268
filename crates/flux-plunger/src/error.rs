//! Error types for the plunger
//!
//! Adapters return [`StoreError`], which keeps the distinction the
//! reconciler cares about: a stale resource version, an object that is
//! already gone, or anything else. Only [`Error`] ever reaches the
//! controller runtime.

use kube::Error as KubeError;
use thiserror::Error;

/// Failure of a single remote read, write or delete
#[derive(Debug, Error)]
pub enum StoreError {
    /// The write was rejected because the observed resource version is stale
    #[error("Conflict updating {resource}: {message}")]
    Conflict { resource: String, message: String },

    /// The object does not exist (anymore)
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    /// Transport failure or any other API error
    #[error("Kubernetes API error on {resource}: {source}")]
    Kube {
        resource: String,
        #[source]
        source: KubeError,
    },
}

impl StoreError {
    /// Classify a kube error raised while touching `resource`
    pub fn from_kube(resource: impl Into<String>, err: KubeError) -> Self {
        let resource = resource.into();
        match err {
            KubeError::Api(api_err) if api_err.code == 409 => StoreError::Conflict {
                resource,
                message: api_err.message,
            },
            KubeError::Api(api_err) if api_err.code == 404 => StoreError::NotFound { resource },
            source => StoreError::Kube { resource, source },
        }
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Errors surfaced to the controller runtime
#[derive(Debug, Error)]
pub enum Error {
    /// Listing or deleting Helm release history failed; retried by the error policy
    #[error("Helm release history error: {0}")]
    History(#[source] StoreError),

    #[error("HelmRelease is missing namespace or name")]
    MissingObjectKey,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
