//! Webhook module for mutating admission requests.
//!
//! - `mutation`: decodes incoming pods and computes the affinity patch
//! - `server`: TLS HTTP endpoint carrying AdmissionReviews to the engine

pub mod mutation;
mod server;

pub use mutation::{AdmissionDecision, MutationEngine, MutationError, PodCodec};
pub use server::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WebhookError, WebhookState, create_webhook_router,
    mutate_pods, run_webhook_server,
};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
