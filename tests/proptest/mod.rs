// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for pod-affinity-webhook.
//!
//! Uses proptest to generate random inputs and verify invariants.

use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use proptest::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;

use pod_affinity_webhook::affinity::{AFFINITY_TOKEN_PREFIX, DIGEST_PREFIX_LEN, derive};
use pod_affinity_webhook::controller::desired::ensure_label_selector_expressions;
use pod_affinity_webhook::patch;
use pod_affinity_webhook::webhooks::mutation::{PIPELINE_RUN_LABEL, mutate_pod_affinity};

/// Strategy for JSON objects of bounded depth, shaped like API objects.
///
/// Keys include `~` and `/` to exercise pointer escaping.
fn json_object() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        "[a-z0-9/~-]{0,8}".prop_map(Value::String),
    ];
    let tree = leaf.prop_recursive(3, 24, 4, |inner| {
        prop::collection::btree_map("[a-z~/]{1,6}", inner, 0..4)
            .prop_map(|m| Value::Object(m.into_iter().collect()))
    });
    prop::collection::btree_map("[a-z~/]{1,6}", tree, 0..5)
        .prop_map(|m| Value::Object(m.into_iter().collect()))
}

/// Strategy for label selector requirements.
fn requirement() -> impl Strategy<Value = LabelSelectorRequirement> {
    (
        "[a-z]{1,8}(/[a-z]{1,8})?",
        prop_oneof![Just("Exists"), Just("DoesNotExist")],
    )
        .prop_map(|(key, op)| LabelSelectorRequirement {
            key,
            operator: op.to_string(),
            values: None,
        })
}

fn selector() -> impl Strategy<Value = Option<LabelSelector>> {
    prop::option::of(prop::collection::vec(requirement(), 0..4).prop_map(|reqs| {
        LabelSelector {
            match_labels: None,
            match_expressions: Some(reqs),
        }
    }))
}

/// Strategy for Kubernetes-style workflow names.
fn workflow_name() -> impl Strategy<Value = String> {
    "[a-z0-9]([a-z0-9-]{0,40}[a-z0-9])?"
}

fn pipeline_pod(run: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some("step".to_string()),
            labels: Some(BTreeMap::from([(
                PIPELINE_RUN_LABEL.to_string(),
                run.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "step".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

proptest! {
    /// Applying the generated patch to the origin yields the target.
    #[test]
    fn patch_transforms_origin_into_target(origin in json_object(), target in json_object()) {
        let p = patch::diff_values(&origin, &target);
        let applied = patch::apply(&origin, &p).unwrap();
        prop_assert_eq!(applied, target);
    }

    /// Identical documents never produce operations.
    #[test]
    fn identical_documents_yield_empty_patch(doc in json_object()) {
        prop_assert!(patch::diff_values(&doc, &doc).0.is_empty());
    }

    /// Tokens are deterministic and keep the fixed shape.
    #[test]
    fn derived_token_shape(name in ".{0,64}") {
        let token = derive(&name);
        prop_assert_eq!(&token, &derive(&name));
        let prefix = format!("{AFFINITY_TOKEN_PREFIX}-");
        prop_assert!(token.as_str().starts_with(&prefix));
        prop_assert_eq!(token.as_str().len(), AFFINITY_TOKEN_PREFIX.len() + 1 + DIGEST_PREFIX_LEN);
    }

    /// Merging the same wanted selector twice equals merging it once.
    #[test]
    fn selector_merge_is_idempotent(current in selector(), want in selector()) {
        let want = want.unwrap_or_default();
        let once = ensure_label_selector_expressions(current, &want);
        let twice = ensure_label_selector_expressions(Some(once.clone()), &want);
        prop_assert_eq!(twice, once);
    }

    /// Merged selectors contain every wanted expression.
    #[test]
    fn selector_merge_contains_wanted(current in selector(), want in selector()) {
        let want = want.unwrap_or_default();
        let merged = ensure_label_selector_expressions(current, &want);
        let merged_exprs = merged.match_expressions.unwrap_or_default();
        for req in want.match_expressions.iter().flatten() {
            prop_assert!(merged_exprs.contains(req));
        }
    }

    /// Mutating an already-mutated pod changes nothing.
    #[test]
    fn pod_mutation_is_idempotent(run in workflow_name()) {
        let mut pod = pipeline_pod(&run);
        let first = mutate_pod_affinity(&mut pod);
        prop_assert_eq!(first.as_ref(), Some(&derive(&run)));

        let snapshot = pod.clone();
        mutate_pod_affinity(&mut pod);
        prop_assert_eq!(pod, snapshot);
    }
}
