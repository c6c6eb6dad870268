//! In-memory stand-in for the API server: one `HelmRelease` plus its Helm
//! history, with resource versions and failure injection.

#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flux_plunger::crds::{HelmRelease, HelmReleaseSpec, HelmReleaseStatus, ReleaseCondition};
use flux_plunger::history::{HistoryRecord, HistoryStore};
use flux_plunger::release::{ReleaseKey, ReleaseStore, LAST_PROCESSED_VERSION_ANNOTATION};
use flux_plunger::{Plunger, StoreError};
use kube::ResourceExt;

pub const NAMESPACE: &str = "ns1";
pub const RELEASE: &str = "app";

/// Calls that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    List,
    Delete,
    Suspend,
    Unsuspend,
    SetProcessedVersion,
}

/// A mutation that reached the fake cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    Suspend,
    Unsuspend,
    SetProcessedVersion(u64),
    DeleteRecord(u64),
}

struct State {
    release: HelmRelease,
    resource_version: u64,
    history: BTreeSet<u64>,
    writes: Vec<Write>,
    failures: VecDeque<(Op, StoreError)>,
}

pub struct FakeCluster {
    state: Mutex<State>,
}

pub fn record_name(version: u64) -> String {
    format!("sh.helm.release.v1.{RELEASE}.v{version}")
}

pub fn conflict() -> StoreError {
    StoreError::Conflict {
        resource: format!("{NAMESPACE}/{RELEASE}"),
        message: "the object has been modified; please apply your changes to the latest version"
            .to_string(),
    }
}

pub fn not_found() -> StoreError {
    StoreError::NotFound {
        resource: format!("{NAMESPACE}/{RELEASE}"),
    }
}

fn stuck_condition() -> ReleaseCondition {
    ReleaseCondition {
        type_: "Ready".to_string(),
        status: "False".to_string(),
        reason: "UpgradeFailed".to_string(),
        message: format!("Helm upgrade failed for release {NAMESPACE}/{RELEASE}: \"{RELEASE}\" has no deployed releases"),
    }
}

impl FakeCluster {
    /// A release stuck on "has no deployed releases" with the given history
    pub fn stuck(history: &[u64]) -> Arc<Self> {
        let mut release = HelmRelease::new(RELEASE, HelmReleaseSpec::default());
        release.metadata.namespace = Some(NAMESPACE.to_string());
        release.metadata.resource_version = Some("1".to_string());
        release.status = Some(HelmReleaseStatus {
            conditions: vec![stuck_condition()],
        });

        Arc::new(Self {
            state: Mutex::new(State {
                release,
                resource_version: 1,
                history: history.iter().copied().collect(),
                writes: Vec::new(),
                failures: VecDeque::new(),
            }),
        })
    }

    /// Seed state without recording it as a write
    pub fn with_suspend(self: Arc<Self>, suspend: bool) -> Arc<Self> {
        self.state().release.spec.suspend = suspend;
        self
    }

    pub fn with_annotation(self: Arc<Self>, value: &str) -> Arc<Self> {
        self.state().release.annotations_mut().insert(
            LAST_PROCESSED_VERSION_ANNOTATION.to_string(),
            value.to_string(),
        );
        self
    }

    pub fn with_conditions(self: Arc<Self>, conditions: Vec<ReleaseCondition>) -> Arc<Self> {
        self.state().release.status = Some(HelmReleaseStatus { conditions });
        self
    }

    /// Make the next call of `op` fail with `err`
    pub fn fail_next(&self, op: Op, err: StoreError) {
        self.state().failures.push_back((op, err));
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn take_failure(state: &mut State, op: Op) -> Result<(), StoreError> {
        match state.failures.iter().position(|(pending, _)| *pending == op) {
            Some(index) => Err(state.failures.remove(index).unwrap().1),
            None => Ok(()),
        }
    }

    fn bump(state: &mut State) {
        state.resource_version += 1;
        state.release.metadata.resource_version = Some(state.resource_version.to_string());
    }

    /// A new revision written by helm-controller
    pub fn add_record(&self, version: u64) {
        self.state().history.insert(version);
    }

    /// What a watch would deliver right now
    pub fn observe(&self) -> HelmRelease {
        self.state().release.clone()
    }

    pub fn history(&self) -> Vec<u64> {
        self.state().history.iter().copied().collect()
    }

    pub fn writes(&self) -> Vec<Write> {
        self.state().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    pub fn is_suspended(&self) -> bool {
        self.state().release.spec.suspend
    }

    pub fn annotation(&self) -> Option<String> {
        self.state()
            .release
            .annotations()
            .get(LAST_PROCESSED_VERSION_ANNOTATION)
            .cloned()
    }

    pub fn resource_version(&self) -> u64 {
        self.state().resource_version
    }

    pub fn plunger(self: &Arc<Self>) -> Plunger {
        Plunger::new(self.clone(), self.clone())
    }

    fn set_suspend(&self, key: &ReleaseKey, suspend: bool, op: Op) -> Result<(), StoreError> {
        let mut state = self.state();
        assert_eq!(key, &ReleaseKey::new(NAMESPACE, RELEASE));
        Self::take_failure(&mut state, op)?;

        if state.release.spec.suspend == suspend {
            return Ok(());
        }
        state.release.spec.suspend = suspend;
        state.writes.push(if suspend { Write::Suspend } else { Write::Unsuspend });
        Self::bump(&mut state);
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for FakeCluster {
    async fn list(&self, namespace: &str, release: &str) -> Result<Vec<HistoryRecord>, StoreError> {
        let mut state = self.state();
        Self::take_failure(&mut state, Op::List)?;

        if namespace != NAMESPACE || release != RELEASE {
            return Ok(Vec::new());
        }
        Ok(state
            .history
            .iter()
            .map(|version| HistoryRecord::new(NAMESPACE, RELEASE, record_name(*version)))
            .collect())
    }

    async fn delete(&self, record: &HistoryRecord) -> Result<(), StoreError> {
        let mut state = self.state();
        Self::take_failure(&mut state, Op::Delete)?;

        let version = record.version();
        if !state.history.remove(&version) {
            return Err(not_found());
        }
        state.writes.push(Write::DeleteRecord(version));
        Ok(())
    }
}

#[async_trait]
impl ReleaseStore for FakeCluster {
    async fn suspend(&self, key: &ReleaseKey) -> Result<(), StoreError> {
        self.set_suspend(key, true, Op::Suspend)
    }

    async fn unsuspend(&self, key: &ReleaseKey) -> Result<(), StoreError> {
        self.set_suspend(key, false, Op::Unsuspend)
    }

    async fn set_processed_version(&self, key: &ReleaseKey, version: u64) -> Result<(), StoreError> {
        let mut state = self.state();
        assert_eq!(key, &ReleaseKey::new(NAMESPACE, RELEASE));
        Self::take_failure(&mut state, Op::SetProcessedVersion)?;

        state.release.annotations_mut().insert(
            LAST_PROCESSED_VERSION_ANNOTATION.to_string(),
            version.to_string(),
        );
        state.writes.push(Write::SetProcessedVersion(version));
        Self::bump(&mut state);
        Ok(())
    }
}
