//! Admission webhook server.
//!
//! Serves the pod mutation endpoint over TLS. The serving certificate is
//! issued and rotated outside this process and mounted at
//! /etc/webhook/certs/; the CA that signed it is what the controller writes
//! into the MutatingWebhookConfiguration.

use axum::{Json, Router, extract::State, routing::post};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::health::HealthState;
use crate::webhooks::mutation::MutationEngine;

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";

/// Shared state for webhook handlers
pub struct WebhookState {
    pub engine: MutationEngine,
    pub health_state: Option<Arc<HealthState>>,
}

impl WebhookState {
    pub fn new(engine: MutationEngine, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            engine,
            health_state,
        }
    }
}

/// Create the webhook router serving the mutation endpoint on `path`
pub fn create_webhook_router(state: Arc<WebhookState>, path: &str) -> Router {
    Router::new()
        .route(path, post(mutate_pods))
        .with_state(state)
}

/// Pod mutation admission handler
pub async fn mutate_pods(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to extract admission request");
            return Json(
                AdmissionResponse::invalid(format!("Invalid AdmissionReview: {}", e))
                    .into_review(),
            );
        }
    };

    debug!(
        uid = %request.uid,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = %request.name,
        "Processing admission request"
    );

    let (response, decision) = state.engine.admit(&request);

    if let Some(ref health_state) = state.health_state {
        health_state.metrics.record_admission(decision.as_str());
    }

    Json(response.into_review())
}

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0 on `port` and serves the mutation endpoint on `path`.
/// TLS certificates are loaded from the paths specified.
pub async fn run_webhook_server(
    state: Arc<WebhookState>,
    path: &str,
    port: u16,
    cert_path: &str,
    key_path: &str,
) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let app = create_webhook_router(state, path);

    let config = RustlsConfig::from_pem_file(PathBuf::from(cert_path), PathBuf::from(key_path))
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port = port, path = %path, "Webhook server listening with TLS");

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
