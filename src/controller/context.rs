//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler,
//! including the webhook reconciler and optional health state.

use std::sync::Arc;

use kube::Client;

use crate::config::Config;
use crate::controller::desired::RuleTemplate;
use crate::controller::reconciler::WebhookConfigReconciler;
use crate::controller::store::{
    KubeCertificateSource, KubeClusterIdentity, KubeRegistrationStore, LeadershipOracle,
};
use crate::health::HealthState;

/// Shared context for the controller
pub struct Context {
    /// Registration reconciler
    pub reconciler: WebhookConfigReconciler,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Create a context around an already-built reconciler
    pub fn new(
        reconciler: WebhookConfigReconciler,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            reconciler,
            health_state,
        }
    }

    /// Wire the reconciler to the Kubernetes API
    pub fn from_client(
        client: Client,
        config: &Config,
        leadership: Arc<dyn LeadershipOracle>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let reconciler = WebhookConfigReconciler::new(
            Arc::new(KubeRegistrationStore::new(client.clone())),
            Arc::new(KubeCertificateSource::new(
                client.clone(),
                &config.system_namespace,
                &config.secret_name,
            )),
            Arc::new(KubeClusterIdentity::new(client, &config.system_namespace)),
            leadership,
            RuleTemplate::pod_create(config.webhook_path.clone()),
            config.api_timeout,
        );
        Self::new(reconciler, health_state)
    }
}
