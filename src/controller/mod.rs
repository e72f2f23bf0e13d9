//! Controller module for the webhook registration.
//!
//! Keeps the MutatingWebhookConfiguration that routes pod admissions to this
//! process in its desired state: CA bundle, namespace exclusion, rules and
//! owner reference.

pub mod context;
pub mod desired;
pub mod error;
pub mod reconciler;
pub mod store;
