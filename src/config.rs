//! Process configuration read from the environment.
//!
//! Every setting has a default suitable for the in-cluster deployment; the
//! manifests only override what differs per install.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Default name of the MutatingWebhookConfiguration (and of its webhook entry)
pub const DEFAULT_WEBHOOK_NAME: &str = "podaffinity.webhook.dev";
/// Default callback path served by the admission endpoint
pub const DEFAULT_WEBHOOK_PATH: &str = "/podaffinity";
/// Default name of the secret holding the serving certificate and CA
pub const DEFAULT_SECRET_NAME: &str = "podaffinity-webhook-certs";
/// Default webhook server port
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;
/// Default health server port
pub const DEFAULT_HEALTH_PORT: u16 = 8080;
/// Default lease name for leader election
pub const DEFAULT_LEASE_NAME: &str = "podaffinity-webhook-leader";
/// Default bound on each Kubernetes API call made while reconciling
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 10;

/// Errors for malformed configuration values
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric variable did not parse
    #[error("invalid value {value:?} for {name}: expected a number")]
    InvalidNumber { name: &'static str, value: String },

    /// The callback path must be absolute
    #[error("invalid webhook path {0:?}: must start with '/'")]
    InvalidPath(String),

    /// A name variable was set to an empty string
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Identity used as the lease holder
    pub pod_name: String,
    /// Namespace the webhook is installed in (owner of the registration)
    pub system_namespace: String,
    /// Name of the MutatingWebhookConfiguration to keep in sync
    pub webhook_name: String,
    /// Callback path of the admission endpoint
    pub webhook_path: String,
    /// Secret holding `ca-cert.pem`
    pub secret_name: String,
    /// Port of the TLS admission server
    pub webhook_port: u16,
    /// Port of the health and metrics server
    pub health_port: u16,
    /// Lease used for leader election
    pub lease_name: String,
    /// Bound on each API call made during a reconcile pass
    pub api_timeout: Duration,
}

impl Config {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Build the configuration from an explicit variable map
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |name: &str| vars.get(name).map(|v| v.trim().to_string());

        let pod_name = get("POD_NAME").unwrap_or_else(|| {
            warn!("POD_NAME not set, using hostname");
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        });

        let system_namespace = get("SYSTEM_NAMESPACE")
            .or_else(|| get("POD_NAMESPACE"))
            .unwrap_or_else(|| {
                warn!("SYSTEM_NAMESPACE not set, using 'default'");
                "default".to_string()
            });

        let webhook_name = non_empty(
            "WEBHOOK_NAME",
            get("WEBHOOK_NAME").unwrap_or_else(|| DEFAULT_WEBHOOK_NAME.to_string()),
        )?;
        let secret_name = non_empty(
            "WEBHOOK_SECRET_NAME",
            get("WEBHOOK_SECRET_NAME").unwrap_or_else(|| DEFAULT_SECRET_NAME.to_string()),
        )?;
        let lease_name = non_empty(
            "LEASE_NAME",
            get("LEASE_NAME").unwrap_or_else(|| DEFAULT_LEASE_NAME.to_string()),
        )?;

        let webhook_path = get("WEBHOOK_PATH").unwrap_or_else(|| DEFAULT_WEBHOOK_PATH.to_string());
        if !webhook_path.starts_with('/') {
            return Err(ConfigError::InvalidPath(webhook_path));
        }

        let webhook_port = parse_number("WEBHOOK_PORT", get("WEBHOOK_PORT"), DEFAULT_WEBHOOK_PORT)?;
        let health_port = parse_number("HEALTH_PORT", get("HEALTH_PORT"), DEFAULT_HEALTH_PORT)?;
        let api_timeout_secs = parse_number(
            "API_TIMEOUT_SECS",
            get("API_TIMEOUT_SECS"),
            DEFAULT_API_TIMEOUT_SECS,
        )?;

        Ok(Self {
            pod_name,
            system_namespace,
            webhook_name,
            webhook_path,
            secret_name,
            webhook_port,
            health_port,
            lease_name,
            api_timeout: Duration::from_secs(api_timeout_secs),
        })
    }
}

fn non_empty(name: &'static str, value: String) -> Result<String, ConfigError> {
    if value.is_empty() {
        Err(ConfigError::Empty(name))
    } else {
        Ok(value)
    }
}

fn parse_number<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value: v }),
    }
}
