//! Lease-based leader election.
//!
//! Every replica serves admissions, but only the lease holder may write the
//! webhook registration. The election loop keeps a [`LeaseLeadership`] flag
//! up to date and signals each promotion so the controller can reconcile
//! straight away instead of waiting for the next watch event.

use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc::UnboundedSender;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tracing::{debug, error, info, warn};

use crate::controller::store::LeaseLeadership;
use crate::health::HealthState;

/// Lease time-to-live
pub const LEASE_TTL_SECS: u64 = 15;
/// Interval between acquire/renew attempts
pub const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// What changed after a lease attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipChange {
    Promoted,
    Demoted,
    Unchanged,
}

/// Record the outcome of one lease attempt on `leadership`
pub fn observe_lease(leadership: &LeaseLeadership, acquired: bool) -> LeadershipChange {
    let was_leader = leadership.is_leader();
    if leadership.set_leader(acquired) {
        LeadershipChange::Promoted
    } else if was_leader && !acquired {
        LeadershipChange::Demoted
    } else {
        LeadershipChange::Unchanged
    }
}

/// Run the election loop forever.
///
/// `promotions` receives one message each time this replica becomes leader.
pub async fn run_leader_election(
    client: Client,
    namespace: &str,
    holder_id: &str,
    lease_name: &str,
    leadership: LeaseLeadership,
    health_state: Option<Arc<HealthState>>,
    promotions: UnboundedSender<()>,
) {
    info!(
        holder_id = %holder_id,
        namespace = %namespace,
        lease_name = %lease_name,
        "Initializing leader election"
    );

    let lease_lock = LeaseLock::new(
        client,
        namespace,
        LeaseLockParams {
            holder_id: holder_id.to_string(),
            lease_name: lease_name.to_string(),
            lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
        },
    );

    loop {
        let acquired = match lease_lock.try_acquire_or_renew().await {
            Ok(result) => result.acquired_lease,
            Err(e) => {
                warn!("Failed to acquire or renew lease: {}", e);
                false
            }
        };

        match observe_lease(&leadership, acquired) {
            LeadershipChange::Promoted => {
                info!("Acquired leadership");
                if promotions.unbounded_send(()).is_err() {
                    debug!("Controller is gone, promotion not delivered");
                }
            }
            LeadershipChange::Demoted => error!("Lost leadership, stepping down"),
            LeadershipChange::Unchanged if !acquired => {
                debug!("Another instance is leader, waiting...");
            }
            LeadershipChange::Unchanged => {}
        }

        if let Some(ref state) = health_state {
            state.metrics.set_leader(acquired);
        }

        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }
}
