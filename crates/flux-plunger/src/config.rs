//! Plunger Configuration
//!
//! Loaded from a mounted YAML file. Every key has a default so an empty
//! file (or no file at all) yields a working single-replica setup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default location of the mounted configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

/// Main plunger configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlungerConfig {
    /// Namespace to watch; empty watches the whole cluster
    #[serde(default)]
    pub watch_namespace: String,

    /// Upper bound of reconciles running at the same time (distinct releases)
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: u16,

    /// Requeue delay after a reconcile returned an error
    #[serde(default = "default_error_requeue_seconds")]
    pub error_requeue_seconds: u64,

    /// Requeue delay after a release write failed for a reason other than a conflict
    #[serde(default = "default_retry_requeue_seconds")]
    pub retry_requeue_seconds: u64,

    #[serde(default)]
    pub leader_election: LeaderElectionConfig,

    #[serde(default)]
    pub health: HealthConfig,
}

/// Leader election configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderElectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_lease_name")]
    pub lease_name: String,

    #[serde(default = "default_lease_namespace")]
    pub lease_namespace: String,

    #[serde(default = "default_lease_duration_seconds")]
    pub lease_duration_seconds: u64,

    /// Must be shorter than `lease_duration_seconds`
    #[serde(default = "default_renew_interval_seconds")]
    pub renew_interval_seconds: u64,
}

/// Health probe server configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_reconciles() -> u16 {
    4
}

fn default_error_requeue_seconds() -> u64 {
    30
}

fn default_retry_requeue_seconds() -> u64 {
    10
}

fn default_lease_name() -> String {
    "flux-plunger-leader".to_string()
}

fn default_lease_namespace() -> String {
    "cozy-system".to_string()
}

fn default_lease_duration_seconds() -> u64 {
    15
}

fn default_renew_interval_seconds() -> u64 {
    5
}

fn default_bind_address() -> String {
    "0.0.0.0:8081".to_string()
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            lease_name: default_lease_name(),
            lease_namespace: default_lease_namespace(),
            lease_duration_seconds: default_lease_duration_seconds(),
            renew_interval_seconds: default_renew_interval_seconds(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for PlungerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: String::new(),
            max_concurrent_reconciles: default_max_concurrent_reconciles(),
            error_requeue_seconds: default_error_requeue_seconds(),
            retry_requeue_seconds: default_retry_requeue_seconds(),
            leader_election: LeaderElectionConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl PlungerConfig {
    /// Load configuration from a mounted file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        Self::from_yaml(&config_str)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(config_str: &str) -> Result<Self, anyhow::Error> {
        // an empty document deserializes to unit, not to a mapping
        if config_str.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
    }

    /// Check the values the controller cannot run with
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.max_concurrent_reconciles == 0 {
            return Err(anyhow::anyhow!("maxConcurrentReconciles must be at least 1"));
        }

        if self.error_requeue_seconds == 0 || self.retry_requeue_seconds == 0 {
            return Err(anyhow::anyhow!(
                "errorRequeueSeconds and retryRequeueSeconds must be at least 1"
            ));
        }

        let election = &self.leader_election;
        if election.enabled {
            if election.lease_name.trim().is_empty() || election.lease_namespace.trim().is_empty()
            {
                return Err(anyhow::anyhow!(
                    "leaderElection.leaseName and leaderElection.leaseNamespace must be set"
                ));
            }

            if election.renew_interval_seconds == 0
                || election.renew_interval_seconds >= election.lease_duration_seconds
            {
                return Err(anyhow::anyhow!(format!(
                    "leaderElection.renewIntervalSeconds ({}) must be between 1 and leaseDurationSeconds ({})",
                    election.renew_interval_seconds, election.lease_duration_seconds
                )));
            }
        }

        if self.health.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(format!(
                "health.bindAddress '{}' is not a valid socket address",
                self.health.bind_address
            )));
        }

        Ok(())
    }

    /// Namespace to watch, `None` for all namespaces
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        let ns = self.watch_namespace.trim();
        (!ns.is_empty()).then_some(ns)
    }

    #[must_use]
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_seconds)
    }

    #[must_use]
    pub fn retry_requeue(&self) -> Duration {
        Duration::from_secs(self.retry_requeue_seconds)
    }
}

impl LeaderElectionConfig {
    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_seconds)
    }

    #[must_use]
    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_seconds)
    }
}
