//! Reconciliation of the mutating webhook registration.
//!
//! Keeps the `MutatingWebhookConfiguration` that routes pod creation to this
//! process in sync with the desired state: current CA bundle, callback path,
//! rules, namespace exclusion and owner reference. Only the leader writes.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, warn};

use crate::controller::context::Context;
use crate::controller::desired::{
    ClusterIdentity, RuleTemplate, build_desired, ca_bundle_from_secret, semantically_equal,
};
use crate::controller::error::{Error, Result};
use crate::controller::store::{
    CertificateSource, ClusterIdentitySource, LeadershipOracle, RegistrationStore,
};

/// What a reconcile pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Not the leader for the key; nothing was read or written
    Skipped,
    /// Observed state already matched the desired state
    Unchanged,
    /// The registration was replaced with the desired document
    Updated,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Skipped => "skipped",
            ReconcileOutcome::Unchanged => "unchanged",
            ReconcileOutcome::Updated => "updated",
        }
    }
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Converges the webhook registration toward its desired state
pub struct WebhookConfigReconciler {
    registrations: Arc<dyn RegistrationStore>,
    certificates: Arc<dyn CertificateSource>,
    identity: Arc<dyn ClusterIdentitySource>,
    leadership: Arc<dyn LeadershipOracle>,
    template: RuleTemplate,
    api_timeout: Duration,
}

impl WebhookConfigReconciler {
    pub fn new(
        registrations: Arc<dyn RegistrationStore>,
        certificates: Arc<dyn CertificateSource>,
        identity: Arc<dyn ClusterIdentitySource>,
        leadership: Arc<dyn LeadershipOracle>,
        template: RuleTemplate,
        api_timeout: Duration,
    ) -> Self {
        Self {
            registrations,
            certificates,
            identity,
            leadership,
            template,
            api_timeout,
        }
    }

    /// Run one convergence pass for the registration named `key`.
    ///
    /// Issues at most one write, and only when observed and desired differ.
    /// Errors are returned as-is; retrying is left to the work queue.
    pub async fn reconcile(&self, key: &str) -> Result<ReconcileOutcome> {
        if !self.leadership.is_leader_for(key) {
            debug!(name = %key, "Not leader, skipping webhook reconcile");
            return Ok(ReconcileOutcome::Skipped);
        }

        let secret = self
            .bounded(
                "get certificate secret",
                self.certificates.certificate_secret(),
            )
            .await?;
        let ca_bundle = ca_bundle_from_secret(&secret)?;

        let observed = self
            .bounded("get webhook configuration", self.registrations.get(key))
            .await?;

        let namespace = self
            .bounded("get home namespace", self.identity.home_namespace())
            .await?;
        let identity = ClusterIdentity::from_namespace(&namespace);

        let desired = build_desired(&observed, &identity, &ca_bundle, &self.template)?;

        if semantically_equal(&observed, &desired)? {
            info!(name = %key, "Webhook is valid");
            return Ok(ReconcileOutcome::Unchanged);
        }

        info!(name = %key, "Updating webhook");
        self.bounded(
            "replace webhook configuration",
            self.registrations.replace(&desired),
        )
        .await?;
        Ok(ReconcileOutcome::Updated)
    }

    /// Bound an API call by the configured timeout
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.api_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation,
                timeout: self.api_timeout,
            }),
        }
    }
}

/// Reconcile entry point for `kube::runtime::Controller`.
///
/// Every trigger (registration or secret change, leadership promotion) maps
/// to the one registration object, so the controller serializes passes.
pub async fn reconcile(
    obj: Arc<MutatingWebhookConfiguration>,
    ctx: Arc<Context>,
) -> std::result::Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();

    let outcome = ctx.reconciler.reconcile(&name).await?;

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_reconcile(
            &name,
            outcome.as_str(),
            start_time.elapsed().as_secs_f64(),
        );
    }

    debug!(name = %name, outcome = %outcome, "Reconcile finished");
    Ok(Action::await_change())
}

/// Error policy for the controller
pub fn error_policy(
    obj: Arc<MutatingWebhookConfiguration>,
    error: &Error,
    ctx: Arc<Context>,
) -> Action {
    let name = obj.name_any();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Webhook configuration or dependency not found");
        return Action::requeue(error.requeue_after());
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}
