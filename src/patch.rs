//! JSON Patch generation between two object snapshots.
//!
//! Thin layer over `json_patch::diff` that takes typed objects, so callers
//! hand in the decoded Pod before and after mutation and get back an RFC 6902
//! patch that turns the first into the second.

use json_patch::Patch;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors produced while computing or applying a patch
#[derive(Error, Debug)]
pub enum PatchError {
    /// One of the snapshots could not be serialized
    #[error("failed to serialize {side} snapshot: {source}")]
    Serialize {
        side: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Applying the patch to a document failed
    #[error("failed to apply patch: {0}")]
    Apply(#[from] json_patch::PatchError),
}

/// Compute the patch from `origin` to `target`.
pub fn diff<T: Serialize>(origin: &T, target: &T) -> Result<Patch, PatchError> {
    let origin = serde_json::to_value(origin).map_err(|source| PatchError::Serialize {
        side: "origin",
        source,
    })?;
    let target = serde_json::to_value(target).map_err(|source| PatchError::Serialize {
        side: "target",
        source,
    })?;
    Ok(diff_values(&origin, &target))
}

/// Compute the patch between two raw JSON documents.
///
/// The output only depends on the two inputs, so the same pair always yields
/// the same operations targeting the same paths.
pub fn diff_values(origin: &Value, target: &Value) -> Patch {
    json_patch::diff(origin, target)
}

/// Apply `patch` to a copy of `doc` and return the result.
pub fn apply(doc: &Value, patch: &Patch) -> Result<Value, PatchError> {
    let mut out = doc.clone();
    json_patch::patch(&mut out, &patch.0)?;
    Ok(out)
}
