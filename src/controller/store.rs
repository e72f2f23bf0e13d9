//! Cluster access used by the reconciler.
//!
//! Each read or write the reconciler performs goes through one of these
//! traits, so tests can swap the Kubernetes API for in-memory doubles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::PostParams;
use kube::{Api, Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

use crate::controller::error::Result;

/// Read and replace the webhook registration
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Fetch the registration by name
    async fn get(&self, name: &str) -> Result<MutatingWebhookConfiguration>;

    /// Replace the whole registration with `desired`
    async fn replace(
        &self,
        desired: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration>;
}

/// Read the secret holding the webhook CA bundle
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertificateSource: Send + Sync {
    /// Fetch the certificate secret
    async fn certificate_secret(&self) -> Result<Secret>;
}

/// Read the namespace the webhook runs in
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterIdentitySource: Send + Sync {
    /// Fetch the home namespace
    async fn home_namespace(&self) -> Result<Namespace>;
}

/// Answers whether this replica may write a given registration
#[cfg_attr(test, automock)]
pub trait LeadershipOracle: Send + Sync {
    /// True when this replica is the single writer for `key`
    fn is_leader_for(&self, key: &str) -> bool;
}

/// `RegistrationStore` backed by the admissionregistration API
pub struct KubeRegistrationStore {
    api: Api<MutatingWebhookConfiguration>,
}

impl KubeRegistrationStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl RegistrationStore for KubeRegistrationStore {
    async fn get(&self, name: &str) -> Result<MutatingWebhookConfiguration> {
        Ok(self.api.get(name).await?)
    }

    async fn replace(
        &self,
        desired: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration> {
        let name = desired.name_any();
        Ok(self
            .api
            .replace(&name, &PostParams::default(), desired)
            .await?)
    }
}

/// `CertificateSource` reading a named secret in the home namespace
pub struct KubeCertificateSource {
    api: Api<Secret>,
    secret_name: String,
}

impl KubeCertificateSource {
    pub fn new(client: Client, namespace: &str, secret_name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            secret_name: secret_name.to_string(),
        }
    }
}

#[async_trait]
impl CertificateSource for KubeCertificateSource {
    async fn certificate_secret(&self) -> Result<Secret> {
        Ok(self.api.get(&self.secret_name).await?)
    }
}

/// `ClusterIdentitySource` reading the home namespace object
pub struct KubeClusterIdentity {
    api: Api<Namespace>,
    namespace: String,
}

impl KubeClusterIdentity {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::all(client),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl ClusterIdentitySource for KubeClusterIdentity {
    async fn home_namespace(&self) -> Result<Namespace> {
        Ok(self.api.get(&self.namespace).await?)
    }
}

/// Leadership flag for a single registration key.
///
/// The lease loop flips the flag; the reconciler reads it. Clones share the
/// same flag.
#[derive(Clone, Debug)]
pub struct LeaseLeadership {
    key: String,
    is_leader: Arc<AtomicBool>,
}

impl LeaseLeadership {
    /// Create a flag guarding `key`, initially not leader
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            is_leader: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record the outcome of the latest lease attempt.
    ///
    /// Returns true when this call promoted the replica to leader.
    pub fn set_leader(&self, leader: bool) -> bool {
        let was = self.is_leader.swap(leader, Ordering::SeqCst);
        leader && !was
    }

    /// Whether the lease is currently held
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }
}

impl LeadershipOracle for LeaseLeadership {
    fn is_leader_for(&self, key: &str) -> bool {
        key == self.key && self.is_leader()
    }
}
