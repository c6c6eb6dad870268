//! # Leader Election
//!
//! Only one replica may drive the suspend/delete/unsuspend sequence at a
//! time, so the controller first takes a `coordination.k8s.io/v1` Lease.
//! The lease is created when missing, or taken over when it is expired or
//! released. Updates go through `replace`, which carries the observed
//! `resourceVersion`, so two candidates can never both win the same round.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease as K8sLease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::{Client, Error as KubeError};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::LeaderElectionConfig;

/// Errors that can occur during leader election
#[derive(Error, Debug)]
pub enum LeaseError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] KubeError),

    #[error("Lease is held by another holder: {holder}")]
    LockHeld { holder: String },
}

/// Whether `holder` may take `spec` at `now`
#[must_use]
pub fn lease_available(spec: &LeaseSpec, holder: &str, now: DateTime<Utc>) -> bool {
    match spec.holder_identity.as_deref() {
        None | Some("") => true,
        Some(current) if current == holder => true,
        Some(_) => lease_expired(spec, now),
    }
}

/// Whether the last renewal of `spec` is older than its duration
#[must_use]
pub fn lease_expired(spec: &LeaseSpec, now: DateTime<Utc>) -> bool {
    let Some(renew_time) = &spec.renew_time else {
        return true;
    };

    let Some(duration_seconds) = spec.lease_duration_seconds else {
        return true;
    };

    let expiration_time = renew_time.0 + chrono::Duration::seconds(i64::from(duration_seconds));
    expiration_time < now
}

fn current_holder(spec: Option<&LeaseSpec>) -> String {
    spec.and_then(|spec| spec.holder_identity.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Lease-based leader election
#[derive(Clone)]
pub struct LeaderElector {
    client: Client,
    namespace: String,
    lease_name: String,
    holder_name: String,
    lease_duration: Duration,
    renewal_interval: Duration,
}

impl LeaderElector {
    #[must_use]
    pub fn new(client: Client, namespace: &str, lease_name: &str, holder_name: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            lease_name: lease_name.to_string(),
            holder_name: holder_name.to_string(),
            lease_duration: Duration::from_secs(15),
            renewal_interval: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn from_config(client: Client, config: &LeaderElectionConfig, holder_name: &str) -> Self {
        Self::new(client, &config.lease_namespace, &config.lease_name, holder_name)
            .with_lease_duration(config.lease_duration())
            .with_renewal_interval(config.renew_interval())
    }

    /// Set the lease duration (default: 15 seconds)
    #[must_use]
    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    /// Set the renewal interval (default: 5 seconds)
    #[must_use]
    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = interval;
        self
    }

    fn api(&self) -> Api<K8sLease> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Block until leadership is acquired.
    ///
    /// Returns `None` when `shutdown` fires first.
    pub async fn acquire(&self, shutdown: &CancellationToken) -> Option<LeaderLease> {
        info!(
            lease = %self.lease_name,
            namespace = %self.namespace,
            holder = %self.holder_name,
            "Waiting for leadership"
        );

        loop {
            match self.try_acquire().await {
                Ok(()) => {
                    info!(lease = %self.lease_name, holder = %self.holder_name, "Acquired leadership");
                    return Some(LeaderLease::start(self.clone()));
                }
                Err(LeaseError::LockHeld { holder }) => {
                    debug!(lease = %self.lease_name, holder = %holder, "Lease is held by another replica");
                }
                Err(e) => {
                    warn!(lease = %self.lease_name, error = %e, "Failed to acquire lease");
                }
            }

            tokio::select! {
                () = shutdown.cancelled() => return None,
                () = tokio::time::sleep(self.renewal_interval) => {}
            }
        }
    }

    /// One acquisition attempt
    pub async fn try_acquire(&self) -> Result<(), LeaseError> {
        let lease_api = self.api();
        let now = Utc::now();

        let Some(existing) = lease_api.get_opt(&self.lease_name).await? else {
            return match lease_api
                .create(&PostParams::default(), &self.lease_object(now))
                .await
            {
                Ok(_) => Ok(()),
                // someone else created it first
                Err(KubeError::Api(err)) if err.code == 409 => Err(LeaseError::LockHeld {
                    holder: "unknown".to_string(),
                }),
                Err(e) => Err(e.into()),
            };
        };

        let spec = existing.spec.clone().unwrap_or_default();
        if !lease_available(&spec, &self.holder_name, now) {
            return Err(LeaseError::LockHeld {
                holder: current_holder(Some(&spec)),
            });
        }

        let already_ours = spec.holder_identity.as_deref() == Some(self.holder_name.as_str());
        let mut updated = existing;
        updated.spec = Some(LeaseSpec {
            holder_identity: Some(self.holder_name.clone()),
            lease_duration_seconds: Some(self.lease_duration_seconds()),
            acquire_time: if already_ours {
                spec.acquire_time.clone()
            } else {
                Some(MicroTime(now))
            },
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(
                spec.lease_transitions.unwrap_or(0) + i32::from(!already_ours),
            ),
            ..LeaseSpec::default()
        });

        self.replace(&lease_api, &updated).await
    }

    /// Refresh `renewTime`, failing with `LockHeld` if someone else took over
    async fn renew(&self) -> Result<(), LeaseError> {
        let lease_api = self.api();
        let mut lease = lease_api.get(&self.lease_name).await?;

        let held = lease
            .spec
            .as_ref()
            .and_then(|spec| spec.holder_identity.as_deref())
            == Some(self.holder_name.as_str());
        if !held {
            return Err(LeaseError::LockHeld {
                holder: current_holder(lease.spec.as_ref()),
            });
        }

        if let Some(spec) = lease.spec.as_mut() {
            spec.renew_time = Some(MicroTime(Utc::now()));
        }
        self.replace(&lease_api, &lease).await
    }

    /// Clear the holder so another replica can take over immediately
    async fn step_down(&self) -> Result<(), LeaseError> {
        let lease_api = self.api();
        let Some(mut lease) = lease_api.get_opt(&self.lease_name).await? else {
            return Ok(());
        };

        match lease.spec.as_mut() {
            Some(spec) if spec.holder_identity.as_deref() == Some(self.holder_name.as_str()) => {
                spec.holder_identity = None;
                spec.renew_time = None;
            }
            _ => return Ok(()),
        }

        self.replace(&lease_api, &lease).await
    }

    async fn replace(&self, lease_api: &Api<K8sLease>, lease: &K8sLease) -> Result<(), LeaseError> {
        match lease_api
            .replace(&self.lease_name, &PostParams::default(), lease)
            .await
        {
            Ok(_) => Ok(()),
            Err(KubeError::Api(err)) if err.code == 409 => Err(LeaseError::LockHeld {
                holder: "unknown".to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn lease_duration_seconds(&self) -> i32 {
        i32::try_from(self.lease_duration.as_secs()).unwrap_or(i32::MAX)
    }

    fn lease_object(&self, now: DateTime<Utc>) -> K8sLease {
        K8sLease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.holder_name.clone()),
                lease_duration_seconds: Some(self.lease_duration_seconds()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(0),
                ..LeaseSpec::default()
            }),
        }
    }
}

/// Held leadership, renewed in the background until released or lost
pub struct LeaderLease {
    elector: LeaderElector,
    lost: CancellationToken,
    renewal_handle: Option<tokio::task::JoinHandle<()>>,
}

impl LeaderLease {
    fn start(elector: LeaderElector) -> Self {
        let lost = CancellationToken::new();

        let handle = tokio::spawn({
            let elector = elector.clone();
            let lost = lost.clone();
            async move {
                let mut interval = tokio::time::interval(elector.renewal_interval);
                let mut last_renewed = Instant::now();

                loop {
                    interval.tick().await;

                    match elector.renew().await {
                        Ok(()) => {
                            last_renewed = Instant::now();
                            debug!(lease = %elector.lease_name, "Lease renewed successfully");
                        }
                        Err(LeaseError::LockHeld { holder }) => {
                            error!(lease = %elector.lease_name, holder = %holder, "Leadership lost");
                            lost.cancel();
                            break;
                        }
                        Err(e) if last_renewed.elapsed() >= elector.lease_duration => {
                            error!(
                                lease = %elector.lease_name,
                                error = %e,
                                "Failed to renew lease before it expired, giving up leadership"
                            );
                            lost.cancel();
                            break;
                        }
                        Err(e) => {
                            warn!(lease = %elector.lease_name, error = %e, "Failed to renew lease");
                        }
                    }
                }
            }
        });

        Self {
            elector,
            lost,
            renewal_handle: Some(handle),
        }
    }

    /// Cancelled once leadership can no longer be guaranteed
    #[must_use]
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    /// Stop renewing and hand the lease back
    pub async fn release(mut self) -> Result<(), LeaseError> {
        if let Some(handle) = self.renewal_handle.take() {
            handle.abort();
        }

        if self.lost.is_cancelled() {
            return Ok(());
        }

        self.elector.step_down().await?;
        info!(lease = %self.elector.lease_name, "Lease released successfully");
        Ok(())
    }
}

impl Drop for LeaderLease {
    fn drop(&mut self) {
        if let Some(handle) = self.renewal_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(holder: Option<&str>, renewed_secs_ago: i64, duration: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: holder.map(str::to_string),
            lease_duration_seconds: Some(duration),
            renew_time: Some(MicroTime(
                Utc::now() - chrono::Duration::seconds(renewed_secs_ago),
            )),
            ..LeaseSpec::default()
        }
    }

    #[test]
    fn test_fresh_lease_of_other_holder_is_unavailable() {
        let spec = spec(Some("replica-a"), 2, 15);
        assert!(!lease_expired(&spec, Utc::now()));
        assert!(!lease_available(&spec, "replica-b", Utc::now()));
    }

    #[test]
    fn test_own_lease_is_always_available() {
        let spec = spec(Some("replica-a"), 2, 15);
        assert!(lease_available(&spec, "replica-a", Utc::now()));
    }

    #[test]
    fn test_expired_lease_can_be_taken_over() {
        let spec = spec(Some("replica-a"), 30, 15);
        assert!(lease_expired(&spec, Utc::now()));
        assert!(lease_available(&spec, "replica-b", Utc::now()));
    }

    #[test]
    fn test_released_lease_is_available() {
        let mut released = spec(None, 1, 15);
        assert!(lease_available(&released, "replica-b", Utc::now()));

        released.holder_identity = Some(String::new());
        assert!(lease_available(&released, "replica-b", Utc::now()));
    }

    #[test]
    fn test_incomplete_spec_counts_as_expired() {
        assert!(lease_expired(&LeaseSpec::default(), Utc::now()));

        let mut no_duration = spec(Some("replica-a"), 0, 15);
        no_duration.lease_duration_seconds = None;
        assert!(lease_expired(&no_duration, Utc::now()));
    }

    #[test]
    fn test_current_holder_falls_back_to_unknown() {
        assert_eq!(current_holder(None), "unknown");
        assert_eq!(current_holder(Some(&spec(Some("replica-a"), 0, 15))), "replica-a");
    }
}
