//! pod-affinity-webhook - co-locates the pods of a pipeline run on one node.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Creates the Kubernetes client
//! - Runs leader election (gates writes to the webhook registration)
//! - Starts the controller, health server, and webhook server

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::signal;
use tracing::{error, info};

use pod_affinity_webhook::controller::store::LeaseLeadership;
use pod_affinity_webhook::health::{HealthState, run_health_server};
use pod_affinity_webhook::leadership::run_leader_election;
use pod_affinity_webhook::{
    Config, MutationEngine, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WebhookState, run_controller,
    run_webhook_server,
};

/// Grace period for in-flight requests to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pod_affinity_webhook=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();

    info!("Starting pod-affinity-webhook");

    let config = Config::from_env()?;

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server immediately (probes should work even as non-leader)
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let leadership = LeaseLeadership::new(&config.webhook_name);
    let (promotions_tx, promotions_rx) = futures::channel::mpsc::unbounded();

    let lease_handle = {
        let client = client.clone();
        let namespace = config.system_namespace.clone();
        let holder_id = config.pod_name.clone();
        let lease_name = config.lease_name.clone();
        let leadership = leadership.clone();
        let health_state = health_state.clone();
        tokio::spawn(async move {
            run_leader_election(
                client,
                &namespace,
                &holder_id,
                &lease_name,
                leadership,
                Some(health_state),
                promotions_tx,
            )
            .await;
        })
    };

    // Every replica runs the controller; non-leaders skip each pass
    let controller_handle = {
        let health_state = health_state.clone();
        let client = client.clone();
        let config = config.clone();
        tokio::spawn(async move {
            run_controller(
                client,
                &config,
                Arc::new(leadership),
                Some(health_state),
                promotions_rx,
            )
            .await;
        })
    };

    // Start webhook server if certificates are available
    let webhook_handle =
        if Path::new(WEBHOOK_CERT_PATH).exists() && Path::new(WEBHOOK_KEY_PATH).exists() {
            info!("TLS certificates found, starting webhook server");
            let state = Arc::new(WebhookState::new(
                MutationEngine::default(),
                Some(health_state.clone()),
            ));
            let path = config.webhook_path.clone();
            let port = config.webhook_port;
            health_state.set_ready(true).await;
            Some(tokio::spawn(async move {
                if let Err(e) =
                    run_webhook_server(state, &path, port, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH)
                        .await
                {
                    error!("Webhook server error: {}", e);
                }
            }))
        } else {
            error!("Webhook certificates not found, admission endpoint disabled");
            None
        };

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        result = async {
            match webhook_handle {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
        }
        // The election loop never returns, so this branch is only reached on panic
        Err(e) = lease_handle => {
            error!("Leader election task panicked: {}", e);
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready so the Service stops routing admissions here
            health_state.set_ready(false).await;
            info!("Marked webhook as not ready");

            info!(
                "Waiting {}s for in-flight requests to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("Webhook stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Signal handler setup failures are fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
