//! Affinity token derivation.
//!
//! Pods belonging to the same pipeline run are co-scheduled by giving them a
//! required pod-affinity term that matches a label value derived from the run
//! name. The derivation must be stable: a pod admitted today and a pod admitted
//! after an operator upgrade have to land on the same token, otherwise their
//! affinity terms stop matching each other.

use std::fmt;

use sha2::{Digest, Sha256};

/// Prefix joined in front of every derived token.
pub const AFFINITY_TOKEN_PREFIX: &str = "custom-pod-affinity";

/// Number of hex characters of the digest kept in the token.
pub const DIGEST_PREFIX_LEN: usize = 10;

/// Version of the derivation (SHA-256, 10 hex chars).
///
/// Bump this if the hash or prefix length ever changes; existing pods carry
/// terms computed with the previous version.
pub const DERIVATION_VERSION: u32 = 1;

/// A derived scheduling-group token, e.g. `custom-pod-affinity-1a2b3c4d5e`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AffinityToken(String);

impl AffinityToken {
    /// Token as a label value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the token and return the label value.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for AffinityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AffinityToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the affinity token for an owning-workflow identifier.
pub fn derive(workflow_id: &str) -> AffinityToken {
    let digest = Sha256::digest(workflow_id.as_bytes());
    let encoded = hex::encode(digest);
    let short: String = encoded.chars().take(DIGEST_PREFIX_LEN).collect();
    AffinityToken(format!("{AFFINITY_TOKEN_PREFIX}-{short}"))
}
