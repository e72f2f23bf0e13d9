//! Pod affinity mutation.
//!
//! Pods created for a pipeline run get a required pod-affinity term on
//! `kubernetes.io/hostname` matching a token derived from the run name, so all
//! pods of the run end up on the same node. Pods already placed by the
//! pipeline's own affinity assistant are left alone.

use k8s_openapi::api::core::v1::{Affinity, Pod, PodAffinityTerm};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::affinity::{self, AffinityToken};
use crate::patch::{self, PatchError};

/// Label carrying the owning pipeline run
pub const PIPELINE_RUN_LABEL: &str = "tekton.dev/pipelineRun";

/// Annotation set on pods whose placement is handled by an affinity assistant
pub const AFFINITY_ASSISTANT_ANNOTATION: &str = "pipeline.tekton.dev/affinity-assistant";

/// Label key matched by the injected affinity term
pub const AFFINITY_INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// Topology scope of the injected affinity term
pub const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

/// Errors that turn an admission into a denial
#[derive(Error, Debug)]
pub enum MutationError {
    /// The request carried no object
    #[error("admission request has no object")]
    MissingObject,

    /// The request declared a kind this webhook does not handle
    #[error("unsupported kind {0}")]
    UnsupportedKind(String),

    /// The object did not decode as a Pod
    #[error("failed to decode pod: {0}")]
    Decode(#[source] serde_json::Error),

    /// The before/after snapshots could not be diffed
    #[error("failed to generate patch: {0}")]
    Patch(#[from] PatchError),
}

impl MutationError {
    /// Short machine-readable reason used in denial messages and logs
    pub fn reason(&self) -> &'static str {
        match self {
            MutationError::MissingObject => "InvalidRequest",
            MutationError::UnsupportedKind(_) => "UnsupportedKind",
            MutationError::Decode(_) => "DecodeFailed",
            MutationError::Patch(_) => "PatchFailed",
        }
    }
}

/// Decision recorded for an admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Allowed with a non-empty patch
    Mutated,
    /// Allowed without changes
    Unchanged,
    /// Denied because the request could not be processed
    Denied,
}

impl AdmissionDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionDecision::Mutated => "mutated",
            AdmissionDecision::Unchanged => "unchanged",
            AdmissionDecision::Denied => "denied",
        }
    }
}

/// Decodes admission objects into Pods.
///
/// Held by the engine instead of living in a process-wide scheme so tests can
/// build engines with their own codec.
#[derive(Debug, Clone)]
pub struct PodCodec {
    kind: GroupVersionKind,
}

impl Default for PodCodec {
    fn default() -> Self {
        Self {
            kind: GroupVersionKind::gvk("", "v1", "Pod"),
        }
    }
}

impl PodCodec {
    /// Decode `object`, declared by the caller as `declared`
    pub fn decode(
        &self,
        declared: &GroupVersionKind,
        object: &DynamicObject,
    ) -> Result<Pod, MutationError> {
        if declared != &self.kind {
            return Err(MutationError::UnsupportedKind(format!(
                "{}/{}/{}",
                declared.group, declared.version, declared.kind
            )));
        }
        let value = serde_json::to_value(object).map_err(MutationError::Decode)?;
        serde_json::from_value(value).map_err(MutationError::Decode)
    }
}

/// Result of a successful mutation pass
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Token injected into the pod, if any
    pub token: Option<AffinityToken>,
    /// Patch from the decoded pod to the mutated pod
    pub patch: json_patch::Patch,
}

/// Admission mutation engine.
///
/// Stateless apart from its codec; one instance is shared by all request
/// handlers.
#[derive(Debug, Clone, Default)]
pub struct MutationEngine {
    codec: PodCodec,
}

impl MutationEngine {
    pub fn new(codec: PodCodec) -> Self {
        Self { codec }
    }

    /// Admit one request. Always returns a response.
    pub fn admit(
        &self,
        request: &AdmissionRequest<DynamicObject>,
    ) -> (AdmissionResponse, AdmissionDecision) {
        let uid = &request.uid;

        let mutation = match self.mutate(request) {
            Ok(mutation) => mutation,
            Err(e) => {
                warn!(uid = %uid, reason = e.reason(), error = %e, "Admission request denied");
                return (
                    AdmissionResponse::from(request).deny(format!("[{}] {}", e.reason(), e)),
                    AdmissionDecision::Denied,
                );
            }
        };

        if mutation.patch.0.is_empty() {
            debug!(uid = %uid, "Admission request allowed unchanged");
            return (AdmissionResponse::from(request), AdmissionDecision::Unchanged);
        }

        let ops = mutation.patch.0.len();
        match AdmissionResponse::from(request).with_patch(mutation.patch) {
            Ok(response) => {
                info!(
                    uid = %uid,
                    token = ?mutation.token.as_ref().map(AffinityToken::as_str),
                    derivation_version = affinity::DERIVATION_VERSION,
                    patch_ops = ops,
                    "Admission request allowed with pod affinity patch"
                );
                (response, AdmissionDecision::Mutated)
            }
            Err(e) => {
                warn!(uid = %uid, error = %e, "Failed to serialize patch");
                (
                    AdmissionResponse::from(request)
                        .deny(format!("[PatchFailed] patch serialization error: {e}")),
                    AdmissionDecision::Denied,
                )
            }
        }
    }

    /// Decode, mutate and diff the pod carried by `request`
    pub fn mutate(
        &self,
        request: &AdmissionRequest<DynamicObject>,
    ) -> Result<Mutation, MutationError> {
        let object = request.object.as_ref().ok_or(MutationError::MissingObject)?;
        let origin = self.codec.decode(&request.kind, object)?;

        let mut target = origin.clone();
        let token = mutate_pod_affinity(&mut target);

        let patch = patch::diff(&origin, &target)?;
        Ok(Mutation { token, patch })
    }
}

/// Apply the pipeline-run affinity to `pod`.
///
/// Returns the injected token, or `None` when the pod was left untouched.
pub fn mutate_pod_affinity(pod: &mut Pod) -> Option<AffinityToken> {
    let pipeline_run = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(PIPELINE_RUN_LABEL))?
        .clone();

    if pod
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(AFFINITY_ASSISTANT_ANNOTATION))
    {
        debug!(pipeline_run = %pipeline_run, "Affinity assistant exists, skipping pod affinity");
        return None;
    }

    let token = affinity::derive(&pipeline_run);
    let spec = pod.spec.get_or_insert_with(Default::default);
    let affinity = spec.affinity.get_or_insert_with(Affinity::default);
    merge_affinity_term(affinity, affinity_term(&token));
    Some(token)
}

/// Append `term` to the required pod-affinity terms unless an identical term
/// is already present.
pub fn merge_affinity_term(affinity: &mut Affinity, term: PodAffinityTerm) -> bool {
    let required = affinity
        .pod_affinity
        .get_or_insert_with(Default::default)
        .required_during_scheduling_ignored_during_execution
        .get_or_insert_with(Vec::new);

    if required.contains(&term) {
        return false;
    }
    required.push(term);
    true
}

/// Required co-location term for pods labelled with `token`
pub fn affinity_term(token: &AffinityToken) -> PodAffinityTerm {
    PodAffinityTerm {
        label_selector: Some(LabelSelector {
            match_labels: Some(BTreeMap::from([(
                AFFINITY_INSTANCE_LABEL.to_string(),
                token.as_str().to_string(),
            )])),
            match_expressions: None,
        }),
        topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
        ..Default::default()
    }
}
