//! # Remediation Reconciler
//!
//! helm-controller refuses to upgrade a release whose newest history record
//! is not in a deployed state and reports `has no deployed releases`. The
//! way out is to drop that newest record so Helm falls back to the previous
//! one. Doing so while helm-controller is working on the release races with
//! it, so the release is suspended around the delete:
//!
//! 1. suspend the `HelmRelease`
//! 2. delete the newest history record
//! 3. record the deleted revision in the processed-version annotation
//! 4. unsuspend
//!
//! Every step is a remote write that can fail or be cut short. Each pass
//! therefore starts from what it observes instead of from where the last
//! pass stopped. The annotation is the ledger: a suspended release whose
//! newest remaining revision is exactly one below the annotation was
//! suspended by us after a completed delete, and only then is it resumed.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use crate::config::PlungerConfig;
use crate::crds::HelmRelease;
use crate::error::{Error, Result, StoreError};
use crate::filter::{
    has_no_deployed_releases_error, has_processed_annotation, processed_version, should_reconcile,
};
use crate::history::{latest_record, latest_version, HistoryRecord, HistoryStore};
use crate::release::{ReleaseKey, ReleaseStore};

/// Release write that did not go through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Suspend,
    RecordProgress,
    Unsuspend,
}

/// What a single pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Rejected by the event filter, nothing was read
    Ignored,

    /// The release is stuck but has no history left to drop
    NoHistory,

    /// The newest record was already dropped by an earlier pass
    AlreadyProcessed { latest: u64, processed: u64 },

    /// Record `version` was deleted and the release resumed
    Remediated { version: u64 },

    /// A suspended release was resumed after an interrupted pass
    Resumed { latest: u64 },

    /// Suspended by someone else; left alone
    ExternallySuspended { latest: u64 },

    /// A release write failed; the pass stopped at `step`.
    /// `requeue` is false when a change event is already on its way.
    Deferred { step: Step, requeue: bool },
}

impl Outcome {
    /// Controller action following this outcome
    #[must_use]
    pub fn action(&self, config: &PlungerConfig) -> Action {
        match self {
            Outcome::Deferred { requeue: true, .. } => Action::requeue(config.retry_requeue()),
            _ => Action::await_change(),
        }
    }
}

/// The remediation state machine, over a history store and a release store
#[derive(Clone)]
pub struct Plunger {
    history: Arc<dyn HistoryStore>,
    releases: Arc<dyn ReleaseStore>,
}

impl Plunger {
    #[must_use]
    pub fn new(history: Arc<dyn HistoryStore>, releases: Arc<dyn ReleaseStore>) -> Self {
        Self { history, releases }
    }

    /// Run one pass over `hr`
    pub async fn remediate(&self, hr: &HelmRelease) -> Result<Outcome> {
        if !should_reconcile(hr) {
            debug!(release = %hr.name_any(), "HelmRelease not eligible, skipping");
            return Ok(Outcome::Ignored);
        }

        let key = ReleaseKey::from_release(hr).ok_or(Error::MissingObjectKey)?;

        if hr.is_suspended() {
            info!(release = %key, "HelmRelease is suspended, checking if we need to unsuspend");
            return self.resume_if_ours(hr, &key).await;
        }

        if !has_no_deployed_releases_error(hr) {
            debug!(release = %key, "HelmRelease does not have 'has no deployed releases' error");
            return Ok(Outcome::Ignored);
        }

        info!(release = %key, "Detected HelmRelease with 'has no deployed releases' error");
        self.unwedge(hr, &key).await
    }

    #[instrument(skip(self, hr), fields(release = %key))]
    async fn resume_if_ours(&self, hr: &HelmRelease, key: &ReleaseKey) -> Result<Outcome> {
        let records = self.list_history(key).await?;
        if records.is_empty() {
            info!("No Helm release secrets found while suspended, treating as version 0");
        }
        let latest = latest_version(&records);

        match processed_version(hr) {
            Some(processed) if follows(latest, processed) => {
                info!(
                    latest,
                    processed, "Secret was already deleted in previous run, removing suspend"
                );
                if let Err(err) = self.releases.unsuspend(key).await {
                    return Ok(deferred(Step::Unsuspend, &err));
                }
                Ok(Outcome::Resumed { latest })
            }
            _ => {
                info!(latest, "HelmRelease is suspended by external process, skipping");
                Ok(Outcome::ExternallySuspended { latest })
            }
        }
    }

    #[instrument(skip(self, hr), fields(release = %key))]
    async fn unwedge(&self, hr: &HelmRelease, key: &ReleaseKey) -> Result<Outcome> {
        let records = self.list_history(key).await?;

        let Some(target) = latest_record(&records).cloned() else {
            info!("No Helm release secrets found, skipping");
            return Ok(Outcome::NoHistory);
        };
        let latest = target.version();
        info!(version = latest, secret = %target.name, "Found latest Helm release version");

        match processed_version(hr) {
            Some(processed) if follows(latest, processed) => {
                info!(
                    latest,
                    processed, "Already processed, secret was deleted previously"
                );
                return Ok(Outcome::AlreadyProcessed { latest, processed });
            }
            None if has_processed_annotation(hr) => {
                info!("Failed to parse processed-version annotation, will process");
            }
            _ => {}
        }

        info!("Suspending HelmRelease");
        if let Err(err) = self.releases.suspend(key).await {
            return Ok(deferred(Step::Suspend, &err));
        }

        self.delete_record(&target).await?;

        info!(version = latest, "Updating annotation with processed version");
        if let Err(err) = self.releases.set_processed_version(key, latest).await {
            return Ok(deferred(Step::RecordProgress, &err));
        }

        info!("Unsuspending HelmRelease");
        if let Err(err) = self.releases.unsuspend(key).await {
            return Ok(deferred(Step::Unsuspend, &err));
        }

        info!(version = latest, "Successfully processed HelmRelease");
        Ok(Outcome::Remediated { version: latest })
    }

    async fn list_history(&self, key: &ReleaseKey) -> Result<Vec<HistoryRecord>> {
        self.history
            .list(&key.namespace, &key.name)
            .await
            .map_err(|err| {
                error!(error = %err, "Failed to list Helm release secrets");
                Error::History(err)
            })
    }

    async fn delete_record(&self, record: &HistoryRecord) -> Result<()> {
        info!(secret = %record.name, "Deleting latest Helm release secret");
        match self.history.delete(record).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                info!(secret = %record.name, "Helm release secret already gone");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "Failed to delete Helm release secret");
                Err(Error::History(err))
            }
        }
    }
}

/// Whether `processed` is exactly one past `latest`, i.e. the record an
/// earlier pass deleted is the only one missing
fn follows(latest: u64, processed: u64) -> bool {
    latest.checked_add(1) == Some(processed)
}

fn deferred(step: Step, err: &StoreError) -> Outcome {
    if err.is_conflict() {
        // helm-controller writes the same object; its update will redeliver
        info!(?step, error = %err, "Could not update HelmRelease, will retry on next reconcile");
    } else {
        warn!(?step, error = %err, "Could not update HelmRelease, will retry on next reconcile");
    }

    Outcome::Deferred {
        step,
        requeue: !(err.is_conflict() || err.is_not_found()),
    }
}

/// Shared state handed to every reconcile
pub struct Context {
    pub plunger: Plunger,
    pub config: Arc<PlungerConfig>,
}

/// Reconcile entry point for the kube-runtime controller
#[instrument(skip(hr, ctx), fields(name = %hr.name_any(), namespace = %hr.namespace().unwrap_or_default()))]
pub async fn reconcile(hr: Arc<HelmRelease>, ctx: Arc<Context>) -> Result<Action> {
    let outcome = ctx.plunger.remediate(&hr).await?;
    debug!(?outcome, "Reconcile finished");
    Ok(outcome.action(&ctx.config))
}

/// Error policy: log and try again after the configured delay
pub fn error_policy(hr: Arc<HelmRelease>, err: &Error, ctx: Arc<Context>) -> Action {
    error!(
        error = %err,
        name = %hr.name_any(),
        namespace = %hr.namespace().unwrap_or_default(),
        "HelmRelease reconciliation failed, requeueing"
    );
    Action::requeue(ctx.config.error_requeue())
}
