//! # ClusterSecret Controller
//!
//! Controller binary: serves probes and metrics, waits for the leader lease,
//! then runs the informers and workers until leadership is lost or the
//! process is asked to stop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use clustersecret_controller::config::{load_config, ControllerConfig};
use clustersecret_controller::constants::{CONTROLLER_NAME, SERVICE_ACCOUNT_NAMESPACE_FILE};
use clustersecret_controller::observability::KubeEventPublisher;
use clustersecret_controller::runtime::initialization::initialize;
use clustersecret_controller::runtime::leader_election::{LeaderElectionConfig, LeaderElector};
use clustersecret_controller::runtime::worker::Controller;

/// Fans ClusterSecret templates out into matching namespaces
#[derive(Parser, Debug)]
#[command(name = "clustersecret-controller", version, long_about = None)]
struct Args {
    /// Path to a kubeconfig file; only valid outside a cluster (falls back to KUBECONFIG)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,
    /// Namespace holding the leader election lease
    #[arg(long)]
    lease_namespace: Option<String>,
    /// Name of the leader election lease
    #[arg(long)]
    lease_name: Option<String>,
    /// Holder identity for the leader election lease (defaults to a random UUID)
    #[arg(long)]
    lease_id: Option<String>,
}

/// Namespace of the service account mounted into the pod, `None` outside a cluster
fn in_cluster_namespace() -> Option<String> {
    std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE_FILE)
        .ok()
        .map(|ns| ns.trim().to_string())
        .filter(|ns| !ns.is_empty())
}

async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context("failed to load kubeconfig")?;
            Client::try_from(config).context("failed to create client")
        }
        None => Client::try_default()
            .await
            .context("failed to create in-cluster client"),
    }
}

fn lease_config(
    args: &Args,
    config: &ControllerConfig,
    in_cluster_ns: Option<String>,
) -> Result<LeaderElectionConfig> {
    let Some(namespace) = args
        .lease_namespace
        .clone()
        .or(in_cluster_ns)
        .or_else(|| config.controller_namespace.clone())
    else {
        bail!("unable to determine lease namespace; set --lease-namespace or POD_NAMESPACE");
    };

    Ok(LeaderElectionConfig {
        lease_name: args
            .lease_name
            .clone()
            .unwrap_or_else(|| config.lease_name.clone()),
        namespace,
        identity: args
            .lease_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        lease_duration: config.lease_duration(),
        renew_interval: config.lease_renew_interval(),
        retry_interval: config.lease_retry_interval(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (controller_config, server_config) = load_config();

    let server_shutdown = CancellationToken::new();
    let init = initialize(&server_config, server_shutdown.clone()).await?;

    let in_cluster_ns = in_cluster_namespace();
    let kubeconfig = args.kubeconfig.clone().or_else(|| {
        std::env::var_os("KUBECONFIG")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    });
    if in_cluster_ns.is_some() && kubeconfig.is_some() {
        bail!("--kubeconfig (or KUBECONFIG) must not be set when running in-cluster");
    }

    let client = create_client(kubeconfig.as_deref()).await?;
    let lease = lease_config(&args, &controller_config, in_cluster_ns)?;
    let identity = lease.identity.clone();
    let elector = Arc::new(LeaderElector::new(client.clone(), lease));

    let mut guard = tokio::select! {
        guard = Arc::clone(&elector).acquire() => guard,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal before acquiring leadership");
            server_shutdown.cancel();
            let _ = init.server_handle.await;
            return Ok(());
        }
    };

    let work_cancel = CancellationToken::new();
    let events = Arc::new(KubeEventPublisher::new(
        client.clone(),
        CONTROLLER_NAME,
        Some(identity),
    ));
    let controller_cancel = work_cancel.clone();
    let mut controller_task = tokio::spawn(async move {
        let controller =
            Controller::start(client, &controller_config, events, controller_cancel).await?;
        controller.wait().await
    });

    let mut lost_leadership = false;
    let finished = tokio::select! {
        () = guard.lost() => {
            error!("Leadership lost, stopping controller");
            lost_leadership = true;
            None
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
            None
        }
        result = &mut controller_task => Some(result),
    };

    init.server_state.set_ready(false);
    work_cancel.cancel();
    let result = match finished {
        Some(result) => result,
        None => controller_task.await,
    };
    let controller_result = result.context("controller task panicked")?;
    if let Err(e) = &controller_result {
        error!("Controller failed: {:#}", e);
    }

    if !lost_leadership {
        if let Err(e) = guard.release_leadership().await {
            warn!("Failed to release lease: {}", e);
        }
    }
    drop(guard);

    server_shutdown.cancel();
    if let Err(e) = init.server_handle.await {
        warn!("HTTP server task failed: {}", e);
    }

    controller_result?;
    if lost_leadership {
        bail!("leader election lost");
    }
    info!("Shutdown complete");
    Ok(())
}
