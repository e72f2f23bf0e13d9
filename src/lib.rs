//! pod-affinity-webhook library crate
//!
//! A mutating admission webhook that co-locates the pods of a pipeline run on
//! one node, plus the controller that keeps the webhook's own
//! MutatingWebhookConfiguration in sync.

pub mod affinity;
pub mod config;
pub mod controller;
pub mod health;
pub mod leadership;
pub mod patch;
pub mod webhooks;

pub use config::Config;
pub use health::HealthState;
pub use webhooks::{
    MutationEngine, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WebhookError, WebhookState,
    run_webhook_server,
};

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::Controller;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};
use tracing::{debug, error, info};

use controller::context::Context;
use controller::reconciler::{error_policy, reconcile};
use controller::store::LeadershipOracle;

/// Watcher configuration narrowed to a single object name.
fn named_watcher_config(name: &str) -> WatcherConfig {
    WatcherConfig::default()
        .any_semantic()
        .fields(&format!("metadata.name={}", name))
}

/// Run the webhook configuration controller.
///
/// Watches the named MutatingWebhookConfiguration and the certificate secret;
/// changes to either reconcile the configuration. `promotions` yields once
/// per leadership promotion and triggers a reconcile as well.
pub async fn run_controller<S>(
    client: Client,
    config: &Config,
    leadership: Arc<dyn LeadershipOracle>,
    health_state: Option<Arc<HealthState>>,
    promotions: S,
) where
    S: Stream<Item = ()> + Send + Sync + 'static,
{
    info!(
        webhook = %config.webhook_name,
        secret = %config.secret_name,
        namespace = %config.system_namespace,
        "Starting webhook configuration controller"
    );

    let ctx = Arc::new(Context::from_client(
        client.clone(),
        config,
        leadership,
        health_state,
    ));

    let registrations: Api<MutatingWebhookConfiguration> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::namespaced(client, &config.system_namespace);

    // Secret changes all map onto the one registration key
    let webhook_name = config.webhook_name.clone();
    Controller::new(registrations, named_watcher_config(&config.webhook_name))
        .watches(
            secrets,
            named_watcher_config(&config.secret_name),
            move |_secret: Secret| {
                Some(ObjectRef::<MutatingWebhookConfiguration>::new(
                    &webhook_name,
                ))
            },
        )
        .reconcile_all_on(promotions)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Webhook configuration not found: {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
}
