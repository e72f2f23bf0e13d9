//! In-memory cluster used by the functional tests.
//!
//! `MockCluster` stands in for the Kubernetes API behind the reconciler's
//! store traits. It keeps the registrations, the certificate secret and the
//! home namespace, and counts every write so tests can assert on exactly how
//! many replacements a reconcile pass issued.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, ServiceReference, WebhookClientConfig,
};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use pod_affinity_webhook::controller::desired::{CA_CERT_KEY, RuleTemplate};
use pod_affinity_webhook::controller::error::{Error, Result};
use pod_affinity_webhook::controller::reconciler::WebhookConfigReconciler;
use pod_affinity_webhook::controller::store::{
    CertificateSource, ClusterIdentitySource, LeaseLeadership, RegistrationStore,
};

/// Name of the registration (and of its managed webhook entry)
pub const WEBHOOK_NAME: &str = "podaffinity.webhook.dev";
/// Namespace the webhook is installed in
pub const SYSTEM_NAMESPACE: &str = "podaffinity-system";
/// UID of the home namespace
pub const NAMESPACE_UID: &str = "6f1c7a52-0d0e-4c1b-9a1f-3d6b8e0c2a11";
/// Certificate secret name
pub const SECRET_NAME: &str = "podaffinity-webhook-certs";
/// Callback path
pub const WEBHOOK_PATH: &str = "/podaffinity";

fn not_found(what: &str) -> Error {
    Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{what} not found"),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

/// Mock cluster state shared by every store handle.
#[derive(Debug, Default)]
pub struct MockCluster {
    registrations: Mutex<BTreeMap<String, MutatingWebhookConfiguration>>,
    secret: Mutex<Option<Secret>>,
    namespace: Mutex<Option<Namespace>>,
    writes: AtomicUsize,
    reject_writes: AtomicBool,
}

impl MockCluster {
    /// Cluster holding a namespace and a certificate secret with `ca`
    pub fn with_ca(ca: &[u8]) -> Arc<Self> {
        let cluster = Arc::new(Self::default());
        cluster.set_namespace(namespace());
        cluster.set_ca(ca);
        cluster
    }

    pub fn set_ca(&self, ca: &[u8]) {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(SECRET_NAME.to_string()),
                namespace: Some(SYSTEM_NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                CA_CERT_KEY.to_string(),
                ByteString(ca.to_vec()),
            )])),
            ..Default::default()
        };
        *self.secret.lock().unwrap() = Some(secret);
    }

    pub fn set_secret(&self, secret: Option<Secret>) {
        *self.secret.lock().unwrap() = secret;
    }

    pub fn set_namespace(&self, ns: Namespace) {
        *self.namespace.lock().unwrap() = Some(ns);
    }

    /// Store a registration without counting it as a write
    pub fn seed(&self, registration: MutatingWebhookConfiguration) {
        self.registrations
            .lock()
            .unwrap()
            .insert(registration.name_any(), registration);
    }

    pub fn registration(&self, name: &str) -> Option<MutatingWebhookConfiguration> {
        self.registrations.lock().unwrap().get(name).cloned()
    }

    /// Number of replace calls that reached the store
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistrationStore for MockCluster {
    async fn get(&self, name: &str) -> Result<MutatingWebhookConfiguration> {
        self.registration(name)
            .ok_or_else(|| not_found("mutatingwebhookconfiguration"))
    }

    async fn replace(
        &self,
        desired: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: "the object has been modified".to_string(),
                reason: "Conflict".to_string(),
                code: 409,
            })));
        }
        self.seed(desired.clone());
        Ok(desired.clone())
    }
}

#[async_trait]
impl CertificateSource for MockCluster {
    async fn certificate_secret(&self) -> Result<Secret> {
        self.secret
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| not_found("secret"))
    }
}

#[async_trait]
impl ClusterIdentitySource for MockCluster {
    async fn home_namespace(&self) -> Result<Namespace> {
        self.namespace
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| not_found("namespace"))
    }
}

/// Home namespace object
pub fn namespace() -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(SYSTEM_NAMESPACE.to_string()),
            uid: Some(NAMESPACE_UID.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Registration as installed by the deployment manifests.
///
/// `service` controls whether the managed entry has a service target.
pub fn installed_registration(ca: &[u8], service: bool) -> MutatingWebhookConfiguration {
    MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(WEBHOOK_NAME.to_string()),
            ..Default::default()
        },
        webhooks: Some(vec![MutatingWebhook {
            name: WEBHOOK_NAME.to_string(),
            admission_review_versions: vec!["v1".to_string()],
            side_effects: "None".to_string(),
            client_config: WebhookClientConfig {
                ca_bundle: Some(ByteString(ca.to_vec())),
                service: service.then(|| ServiceReference {
                    name: "podaffinity-webhook".to_string(),
                    namespace: SYSTEM_NAMESPACE.to_string(),
                    path: None,
                    port: Some(443),
                }),
                url: None,
            },
            ..Default::default()
        }]),
    }
}

/// Reconciler over `cluster` with the given leadership flag
pub fn reconciler(
    cluster: &Arc<MockCluster>,
    leadership: LeaseLeadership,
) -> WebhookConfigReconciler {
    WebhookConfigReconciler::new(
        cluster.clone(),
        cluster.clone(),
        cluster.clone(),
        Arc::new(leadership),
        RuleTemplate::pod_create(WEBHOOK_PATH),
        Duration::from_secs(5),
    )
}

/// Leadership flag that already holds the lease for the registration
pub fn leader() -> LeaseLeadership {
    let leadership = LeaseLeadership::new(WEBHOOK_NAME);
    leadership.set_leader(true);
    leadership
}
