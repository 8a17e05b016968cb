//! Eviction of etcd members whose instance left the autoscaling group
//!
//! Terminated instances keep their voter seat until someone removes it,
//! which skews quorum. Every tick compares the membership with the live
//! roster and deletes the leftovers. Failures are retried on the next tick.

use crate::cloud::Instance;
use crate::etcd::Member;
use crate::manager::{Manager, ManagerError};
use crate::server::ShutdownSignal;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Result of one housekeeping pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Nothing was attempted
    Skipped(&'static str),
    Reconciled(HousekeepingReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    /// Ids of members removed (or found already gone)
    pub evicted: Vec<String>,
    /// Ids of members whose removal failed
    pub failed: Vec<String>,
}

impl HousekeepingReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.failed.is_empty()
    }
}

/// Periodic eviction loop
///
/// Holds the manager weakly: the loop ends once the manager is gone.
pub struct Housekeeper {
    interval: Duration,
    manager: Weak<Manager>,
}

impl Housekeeper {
    pub fn new(manager: &Arc<Manager>, interval: Duration) -> Self {
        Self {
            interval,
            manager: Arc::downgrade(manager),
        }
    }

    /// Spawn the loop on the current runtime
    pub fn start(self, shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: ShutdownSignal) {
        info!(interval = ?self.interval, "Starting housekeeper");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if shutdown.run_until(ticker.tick()).await.is_none() {
                break;
            }
            let Some(manager) = self.manager.upgrade() else {
                debug!("Manager dropped, stopping housekeeper");
                break;
            };

            match shutdown.run_until(reconcile(&manager)).await {
                None => break,
                Some(Ok(Tick::Skipped(reason))) => {
                    debug!(reason = reason, "Housekeeping skipped");
                }
                Some(Ok(Tick::Reconciled(report))) => {
                    if !report.is_empty() {
                        info!(
                            evicted = ?report.evicted,
                            failed = ?report.failed,
                            "Housekeeping pass finished"
                        );
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Housekeeping pass failed, retrying next tick");
                }
            }
        }

        info!("Housekeeper stopped");
    }
}

/// Delete every member that no roster instance accounts for
///
/// Skips the pass when the roster is empty, nothing answered, or no leader
/// is known. Individual delete failures are logged and reported, never
/// returned as errors.
pub async fn reconcile(manager: &Manager) -> Result<Tick, ManagerError> {
    let (cluster, roster) = manager.load_cluster().await?;

    if roster.is_empty() {
        return Ok(Tick::Skipped("autoscaling roster is empty"));
    }
    let Some(via) = cluster.accessible_member() else {
        return Ok(Tick::Skipped("no accessible etcd member"));
    };
    if cluster.leader_id().is_none() {
        return Ok(Tick::Skipped("etcd cluster has no leader"));
    }

    let mut report = HousekeepingReport::default();
    for member in cluster.members().filter(|m| !in_roster(m, &roster)) {
        let Some(id) = member.id.as_deref() else {
            continue;
        };
        info!(
            member_id = %id,
            name = %member.name,
            peer_urls = ?member.peer_urls,
            "Evicting etcd member without a live instance"
        );

        match manager.etcd().delete_member(via, id).await {
            Err(e) if !e.is_already_absent() => {
                warn!(member_id = %id, error = %e, "Failed to evict etcd member");
                if let Some(metrics) = manager.metrics() {
                    metrics.record_eviction_failure();
                }
                report.failed.push(id.to_string());
            }
            _ => {
                if let Some(metrics) = manager.metrics() {
                    metrics.record_eviction();
                }
                report.evicted.push(id.to_string());
            }
        }
    }

    Ok(Tick::Reconciled(report))
}

/// Whether a roster instance accounts for `member`
///
/// Named members match on instance id. Members added but never started
/// have no name and match on the private IP of their peer URL.
fn in_roster(member: &Member, roster: &[Instance]) -> bool {
    if !member.name.is_empty() {
        return roster.iter().any(|i| i.id == member.name);
    }
    let address = member.peer_address();
    roster
        .iter()
        .any(|i| address.as_deref() == Some(i.private_ip.as_str()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "housekeeper_test.rs"]
mod tests;
