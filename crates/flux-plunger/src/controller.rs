//! Wires the remediation reconciler into a kube-runtime controller.

use std::sync::Arc;

use anyhow::Context as _;
use futures::StreamExt;
use kube::api::ListParams;
use kube::runtime::controller::{self, Controller};
use kube::runtime::watcher::Config;
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::config::PlungerConfig;
use crate::crds::HelmRelease;
use crate::health::Readiness;
use crate::history::SecretHistoryStore;
use crate::reconcile::{error_policy, reconcile, Context, Plunger};
use crate::release::KubeReleaseStore;

fn helm_release_api(client: Client, config: &PlungerConfig) -> Api<HelmRelease> {
    match config.namespace() {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    }
}

/// Run the HelmRelease controller until `shutdown` fires.
///
/// Fails fast when the HelmRelease CRD cannot be listed, which usually
/// means Flux is not installed or RBAC is missing.
#[instrument(skip_all, fields(namespace = config.namespace().unwrap_or("<all>")))]
pub async fn run_controller(
    client: Client,
    config: Arc<PlungerConfig>,
    readiness: Readiness,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let releases = helm_release_api(client.clone(), &config);

    releases
        .list(&ListParams::default().limit(1))
        .await
        .context("HelmRelease resources are not accessible")?;

    let plunger = Plunger::new(
        Arc::new(SecretHistoryStore::new(client.clone())),
        Arc::new(KubeReleaseStore::new(client)),
    );
    let context = Arc::new(Context {
        plunger,
        config: config.clone(),
    });

    info!(
        max_concurrent_reconciles = config.max_concurrent_reconciles,
        "Starting HelmRelease controller"
    );
    readiness.set_ready(true);

    Controller::new(releases, Config::default().any_semantic())
        .with_config(controller::Config::default().concurrency(config.max_concurrent_reconciles))
        .graceful_shutdown_on(async move { shutdown.cancelled().await })
        .run(reconcile, error_policy, context)
        .for_each(|reconciliation_result| {
            let span = tracing::info_span!("helmrelease_reconciliation_result");
            async move {
                match reconciliation_result {
                    Ok((object, action)) => {
                        debug!(resource = %object, ?action, "HelmRelease reconciliation finished");
                    }
                    Err(reconciliation_err) => {
                        warn!(error = %reconciliation_err, "HelmRelease reconciliation error");
                    }
                }
            }
            .instrument(span)
        })
        .await;

    readiness.set_ready(false);
    info!("HelmRelease controller shutting down");
    Ok(())
}
