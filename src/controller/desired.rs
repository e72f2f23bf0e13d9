//! Desired state of the webhook registration.
//!
//! Pure functions that take the observed `MutatingWebhookConfiguration` plus
//! the current cluster identity and CA bundle, and return what the
//! configuration should look like. No API access happens here so the
//! convergence rules can be tested without a cluster.

use k8s_openapi::ByteString;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, RuleWithOperations,
};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, OwnerReference,
};
use kube::ResourceExt;

use crate::controller::error::{Error, Result};

/// Key of the CA certificate inside the webhook certificate secret
pub const CA_CERT_KEY: &str = "ca-cert.pem";

/// Namespaces carrying this label are never sent to the webhook
pub const EXCLUDE_LABEL: &str = "webhooks.knative.dev/exclude";

/// Rule scope the API server fills in when none is given
pub const RULE_SCOPE_ALL: &str = "*";

/// Reinvocation policy applied to the managed webhook entry
pub const REINVOCATION_IF_NEEDED: &str = "IfNeeded";

/// Identity of the namespace the webhook is installed in.
///
/// The registration is owned by this namespace, so deleting the namespace
/// lets the cluster garbage collector remove the registration too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIdentity {
    pub namespace: String,
    pub uid: String,
}

impl ClusterIdentity {
    /// Build the identity from the home namespace object
    pub fn from_namespace(ns: &Namespace) -> Self {
        Self {
            namespace: ns.name_any(),
            uid: ns.uid().unwrap_or_default(),
        }
    }

    /// Controller owner reference pointing at the home namespace
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: "v1".to_string(),
            kind: "Namespace".to_string(),
            name: self.namespace.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Static part of the desired webhook entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTemplate {
    /// Callback path on the webhook service
    pub path: String,
    /// Namespace label that opts a namespace out of interception
    pub exclude_label: String,
    /// Interception rules
    pub rules: Vec<RuleWithOperations>,
    /// Reinvocation policy
    pub reinvocation_policy: String,
}

impl RuleTemplate {
    /// Intercept creation of core/v1 pods and call back on `path`
    pub fn pod_create(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            exclude_label: EXCLUDE_LABEL.to_string(),
            rules: vec![RuleWithOperations {
                operations: Some(vec!["CREATE".to_string()]),
                api_groups: Some(vec![String::new()]),
                api_versions: Some(vec!["v1".to_string()]),
                resources: Some(vec!["pods".to_string()]),
                scope: Some(RULE_SCOPE_ALL.to_string()),
            }],
            reinvocation_policy: REINVOCATION_IF_NEEDED.to_string(),
        }
    }

    /// Selector requiring the exclusion label to be absent
    pub fn exclusion_selector(&self) -> LabelSelector {
        LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: self.exclude_label.clone(),
                operator: "DoesNotExist".to_string(),
                values: None,
            }]),
            match_labels: None,
        }
    }
}

/// Read the CA bundle out of the certificate secret
pub fn ca_bundle_from_secret(secret: &Secret) -> Result<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(CA_CERT_KEY))
        .map(|ca| ca.0.clone())
        .ok_or_else(|| Error::MissingCaCert {
            secret: secret.name_any(),
            key: CA_CERT_KEY.to_string(),
        })
}

/// Merge `want`'s match expressions into `current`.
///
/// Expressions already present are not appended again, so merging the same
/// selector any number of times gives the same result as merging it once.
/// Match labels of `current` are kept as they are.
pub fn ensure_label_selector_expressions(
    current: Option<LabelSelector>,
    want: &LabelSelector,
) -> LabelSelector {
    let Some(current) = current else {
        return want.clone();
    };

    let mut expressions = current.match_expressions.unwrap_or_default();
    if expressions.is_empty() {
        return LabelSelector {
            match_labels: current.match_labels,
            match_expressions: want.match_expressions.clone(),
        };
    }

    for requirement in want.match_expressions.iter().flatten() {
        if !expressions.contains(requirement) {
            expressions.push(requirement.clone());
        }
    }

    LabelSelector {
        match_labels: current.match_labels,
        match_expressions: Some(expressions),
    }
}

/// Compute the desired registration from the observed one.
///
/// Only the webhook entry named after the configuration itself is touched;
/// any other entries are carried over unchanged.
pub fn build_desired(
    observed: &MutatingWebhookConfiguration,
    identity: &ClusterIdentity,
    ca_bundle: &[u8],
    template: &RuleTemplate,
) -> Result<MutatingWebhookConfiguration> {
    let mut desired = observed.clone();
    let name = observed.name_any();

    desired.metadata.owner_references = Some(vec![identity.owner_reference()]);

    for webhook in desired.webhooks.iter_mut().flatten() {
        if webhook.name != name {
            continue;
        }

        webhook.rules = Some(template.rules.clone());
        webhook.namespace_selector = Some(ensure_label_selector_expressions(
            webhook.namespace_selector.take(),
            &template.exclusion_selector(),
        ));
        webhook.client_config.ca_bundle = Some(ByteString(ca_bundle.to_vec()));

        let service = webhook
            .client_config
            .service
            .as_mut()
            .ok_or_else(|| Error::MissingServiceReference(webhook.name.clone()))?;
        service.path = Some(template.path.clone());

        webhook.reinvocation_policy = Some(template.reinvocation_policy.clone());
    }

    Ok(desired)
}

/// Deep equality of two registrations on their serialized form.
///
/// Map ordering does not matter; list ordering does.
pub fn semantically_equal(
    observed: &MutatingWebhookConfiguration,
    desired: &MutatingWebhookConfiguration,
) -> Result<bool> {
    Ok(serde_json::to_value(observed)? == serde_json::to_value(desired)?)
}
