//! Reconciling this instance's etcd membership against a cluster view
//!
//! Membership changes are only attempted while a leader is known; the
//! admin write path forwards to the leader and fails without one.

use super::{Manager, ManagerError};
use crate::etcd::{Cluster, Member, MemberError};
use tracing::{info, warn};

/// How this instance relates to the cluster it is about to run in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Nothing reachable; etcd starts a new cluster
    Founding,
    /// Added to an existing cluster during this cycle
    Joined,
    /// Already a member under the id we hold
    AlreadyMember,
}

impl Registration {
    /// Value for `--initial-cluster-state`
    pub fn cluster_state(self) -> &'static str {
        match self {
            Registration::Founding => "new",
            Registration::Joined | Registration::AlreadyMember => "existing",
        }
    }
}

impl Manager {
    /// Make sure this instance is a member of `cluster`
    ///
    /// Works on the snapshot it is given and never re-queries. Stale entries
    /// for this instance (same name or peer URL, different id) are deleted
    /// before the add, since etcd refuses two members with one peer URL.
    pub async fn register_me(&self, cluster: &Cluster) -> Result<Registration, ManagerError> {
        let Some(via) = cluster.accessible_member() else {
            info!("No accessible etcd cluster, founding a new one");
            return Ok(Registration::Founding);
        };

        if cluster.leader_id().is_none() {
            return Err(ManagerError::ClusterNotReady);
        }

        let me = self.me().ok_or_else(|| {
            ManagerError::IdentityUnavailable("identity not discovered yet".to_string())
        })?;

        let entries = cluster.entries_for(&me);
        if me.id.is_some() && entries.iter().any(|m| m.id == me.id) {
            info!(member_id = %me.display_id(), "Already a member of the etcd cluster");
            return Ok(Registration::AlreadyMember);
        }

        let via = write_endpoint(cluster, via, &me);
        for stale in entries {
            let Some(id) = stale.id.as_deref() else {
                continue;
            };
            info!(
                member_id = %id,
                name = %stale.name,
                "Removing stale etcd member for this instance"
            );
            remove(self, via, id).await.map_err(|e| {
                ManagerError::Registration(format!("cannot remove stale member {}: {}", id, e))
            })?;
        }

        let added = self
            .etcd
            .add_member(via, &me.peer_urls)
            .await
            .map_err(|e| ManagerError::Registration(format!("cannot add myself: {}", e)))?;

        info!(
            member_id = %added.display_id(),
            peer_urls = ?added.peer_urls,
            "Registered in etcd cluster"
        );
        self.set_member_id(added.id);
        if let Some(metrics) = self.metrics() {
            metrics.record_registration();
        }
        Ok(Registration::Joined)
    }

    /// Best-effort removal of this instance from the cluster on shutdown
    ///
    /// Returns whether this instance is known to be out of the cluster.
    /// The housekeeper of a surviving member evicts us anyway if this fails.
    pub async fn deregister(&self) -> bool {
        let Some(identity) = self.identity() else {
            info!("Identity never discovered, nothing to deregister");
            return false;
        };

        let cluster = match self.load_cluster().await {
            Ok((cluster, _)) => cluster,
            Err(e) => {
                warn!(error = %e, "Cannot load etcd cluster, skipping deregistration");
                return false;
            }
        };

        let Some(via) = cluster.accessible_member() else {
            info!("No accessible etcd member, skipping deregistration");
            return false;
        };

        let via = write_endpoint(&cluster, via, &identity.me);
        let mut removed = true;
        for entry in cluster.entries_for(&identity.me) {
            let Some(id) = entry.id.as_deref() else {
                continue;
            };
            match remove(self, via, id).await {
                Ok(()) => info!(member_id = %id, "Deregistered from etcd cluster"),
                Err(e) => {
                    warn!(member_id = %id, error = %e, "Failed to deregister from etcd cluster");
                    removed = false;
                }
            }
        }
        removed
    }
}

/// Member to send membership changes to
///
/// When the endpoint that answered discovery is one of our own entries, a
/// delete of that entry would cut off the follow-up add. The leader, then
/// any other member with an HTTP client URL, is used instead; `via` remains
/// the fallback.
fn write_endpoint<'a>(cluster: &'a Cluster, via: &'a Member, me: &Member) -> &'a Member {
    if !via.same_instance(me) {
        return via;
    }
    let usable = |m: &&Member| {
        !m.same_instance(me) && m.client_url().is_some_and(|url| url.starts_with("http"))
    };
    let leader = cluster
        .leader_id()
        .and_then(|id| cluster.member(id))
        .filter(usable);
    leader
        .or_else(|| cluster.members().find(usable))
        .unwrap_or(via)
}

/// Delete `id`, treating an already absent member as success
async fn remove(manager: &Manager, via: &Member, id: &str) -> Result<(), MemberError> {
    match manager.etcd.delete_member(via, id).await {
        Err(e) if e.is_already_absent() => Ok(()),
        other => other,
    }
}
