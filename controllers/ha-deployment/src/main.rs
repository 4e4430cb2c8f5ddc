//! HADeployment Controller
//!
//! Drives the cluster toward declared HADeployment intent.
//!
//! This controller watches `HADeployment` CRDs and, for every HADeployment
//! added to the cluster, creates a managed `Deployment` named
//! `<name>-deployment` with the declared replica count and image.

mod config;
mod controller;
mod deployment_client;
mod error;
mod informer;
mod key;
mod lister;
mod reconciler;
mod recorder;
#[cfg(test)]
mod test_utils;

use crate::config::{Args, ControllerConfig};
use crate::controller::Controller;
use crate::deployment_client::KubeDeploymentClient;
use crate::error::ControllerError;
use crate::informer::Informer;
use crate::reconciler::Reconciler;
use crate::recorder::{EVENT_SOURCE, KubeEventRecorder};
use clap::Parser;
use crds::HADeployment;
use kube::Api;
use kube_runtime::{WatchStreamExt, watcher};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use workqueue::{RateLimitingQueue, default_controller_rate_limiter};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting HADeployment Controller");

    // kube uses rustls; install the ring provider before the first TLS handshake
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider was already installed");
    }

    let args = Args::parse();
    let config = ControllerConfig::from_env()?;
    let kubeconfig = args.kubeconfig_path();

    info!("Configuration:");
    info!("  Kubeconfig: {}", kubeconfig.as_ref().map_or_else(|| "<in-cluster>".to_string(), |p| p.display().to_string()));
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Resync period: {:?}", config.resync_period);
    info!("  Connection policy: {:?}", config.connection_policy);
    info!("  Requeue on error: {}", config.worker.requeue_on_error);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let client = config::connect(kubeconfig.as_deref(), config.connection_policy, &shutdown).await?;

    let api: Api<HADeployment> = match config.namespace.as_deref() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let mut informer = Informer::new(config.resync_period);
    let queue = Arc::new(RateLimitingQueue::new(EVENT_SOURCE, default_controller_rate_limiter()));
    let reconciler = Reconciler::new(
        Arc::new(KubeDeploymentClient::new(client.clone())),
        Arc::new(KubeEventRecorder::new(client, EVENT_SOURCE)),
    );
    let controller = Arc::new(Controller::new(queue, &mut informer, reconciler, config.worker));

    let stream = watcher(api, watcher::Config::default()).default_backoff();
    let informer_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = informer.run(stream, shutdown.clone()).await;
            if result.is_err() {
                // A dead watch stream stops the controller
                shutdown.cancel();
            }
            result
        })
    };

    let result = controller.run(shutdown.clone()).await;
    if let Err(e) = &result {
        error!("Error running controller: {}", e);
    }

    shutdown.cancel();
    match informer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Informer stopped with error: {}", e),
        Err(e) => warn!("Informer task panicked: {}", e),
    }

    info!("HADeployment Controller exited");
    result
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn shutdown_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
    shutdown.cancel();
}
