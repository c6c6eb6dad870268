/*
 * Flux Plunger - HelmRelease remediation controller
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Flux Plunger - unwedges Flux `HelmRelease` objects
//!
//! This binary:
//! - Loads configuration from a mounted file and command line flags
//! - Takes the leader Lease when leader election is enabled
//! - Serves liveness and readiness probes
//! - Runs the HelmRelease remediation controller until shutdown

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use clap::{Parser, ValueEnum};
use flux_plunger::config::{PlungerConfig, DEFAULT_CONFIG_PATH};
use flux_plunger::health::{self, Readiness};
use flux_plunger::leader::LeaderElector;
use flux_plunger::run_controller;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "flux-plunger", version, about = "Unwedges Flux HelmReleases stuck without a deployed release")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, env = "PLUNGER_CONFIG_PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Namespace to watch (all namespaces when unset)
    #[arg(long)]
    namespace: Option<String>,

    #[arg(long)]
    max_concurrent_reconciles: Option<u16>,

    /// Enable or disable Lease-based leader election
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    leader_elect: Option<bool>,

    /// Address the health probe endpoint binds to
    #[arg(long)]
    health_probe_bind_address: Option<String>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Args {
    fn apply_overrides(&self, config: &mut PlungerConfig) {
        if let Some(namespace) = &self.namespace {
            config.watch_namespace.clone_from(namespace);
        }
        if let Some(max) = self.max_concurrent_reconciles {
            config.max_concurrent_reconciles = max;
        }
        if let Some(enabled) = self.leader_elect {
            config.leader_election.enabled = enabled;
        }
        if let Some(address) = &self.health_probe_bind_address {
            config.health.bind_address.clone_from(address);
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn load_config(config_path: &str) -> PlungerConfig {
    if !Path::new(config_path).exists() {
        warn!("Configuration file {} not found. Using defaults.", config_path);
        return PlungerConfig::default();
    }

    match PlungerConfig::from_mounted_file(config_path) {
        Ok(cfg) => {
            info!("Loaded plunger configuration from {}", config_path);
            cfg
        }
        Err(err) => {
            warn!(
                "Failed to load configuration from {}: {}. Using defaults.",
                config_path, err
            );
            PlungerConfig::default()
        }
    }
}

fn holder_identity() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("flux-plunger-{}", uuid::Uuid::new_v4()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Flux Plunger v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(&args.config);
    args.apply_overrides(&mut config);
    config.validate().context("invalid configuration")?;
    let config = Arc::new(config);

    let health_address: SocketAddr = config
        .health
        .bind_address
        .parse()
        .with_context(|| format!("invalid health bind address {}", config.health.bind_address))?;

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let readiness = Readiness::default();
    let health_handle = tokio::spawn(health::serve(
        health_address,
        readiness.clone(),
        shutdown.clone(),
    ));

    let lease = if config.leader_election.enabled {
        let elector = LeaderElector::from_config(client.clone(), &config.leader_election, &holder_identity());
        let Some(lease) = elector.acquire(&shutdown).await else {
            info!("Shutdown requested before leadership was acquired");
            return Ok(());
        };
        Some(lease)
    } else {
        info!("Leader election disabled");
        None
    };

    // the controller stops on either a shutdown signal or lost leadership
    let controller_shutdown = shutdown.child_token();
    let leadership_lost = lease.as_ref().map(flux_plunger::leader::LeaderLease::lost);
    if let Some(lost) = leadership_lost.clone() {
        let controller_shutdown = controller_shutdown.clone();
        tokio::spawn(async move {
            lost.cancelled().await;
            controller_shutdown.cancel();
        });
    }

    let result = run_controller(client, config, readiness, controller_shutdown).await;

    shutdown.cancel();
    if let Some(lease) = lease {
        if let Err(e) = lease.release().await {
            warn!("Failed to release leader lease: {}", e);
        }
    }

    match health_handle.await {
        Ok(Err(e)) => warn!("Health probe server error: {}", e),
        Err(e) => warn!("Health probe server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    result?;

    if leadership_lost.is_some_and(|lost| lost.is_cancelled()) {
        bail!("leadership lost, exiting so another replica can take over");
    }

    info!("Flux Plunger stopped");
    Ok(())
}
