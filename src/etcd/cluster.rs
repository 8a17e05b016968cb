//! Point-in-time view of etcd cluster membership
//!
//! A `Cluster` is rebuilt from scratch by every `load_members` call and is
//! never mutated afterwards; callers hold it for one reconciliation pass.

use super::{EtcdApi, Member};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Cluster {
    members: BTreeMap<String, Member>,
    /// Id of the member whose endpoint answered the membership query
    accessible_member: Option<String>,
    leader_id: Option<String>,
    region: String,
    self_instance_id: String,
}

impl Cluster {
    /// A view with no reachable member
    pub fn empty(region: impl Into<String>, self_instance_id: impl Into<String>) -> Self {
        Self {
            members: BTreeMap::new(),
            accessible_member: None,
            leader_id: None,
            region: region.into(),
            self_instance_id: self_instance_id.into(),
        }
    }

    /// Assemble a view from already-parsed parts
    ///
    /// Members without an id are dropped. `accessible_id` is ignored unless
    /// it names one of the members.
    pub fn from_parts(
        members: Vec<Member>,
        accessible_id: Option<&str>,
        leader_id: Option<String>,
        region: impl Into<String>,
        self_instance_id: impl Into<String>,
    ) -> Self {
        let mut cluster = Self::empty(region, self_instance_id);
        for member in members {
            if let Some(id) = member.id.clone() {
                cluster.members.insert(id, member);
            }
        }
        cluster.accessible_member = accessible_id
            .filter(|id| cluster.members.contains_key(*id))
            .map(str::to_string);
        cluster.leader_id = leader_id;
        cluster
    }

    /// Probe the discovery list in order and build a view from the first
    /// endpoint that answers with a membership list naming itself
    ///
    /// Probing is sequential and stops at the first success. When nothing
    /// answers, the returned view has no accessible member and no leader;
    /// whether that means "new cluster" or "outage" is for the caller to
    /// decide.
    pub async fn load_members(
        api: &dyn EtcdApi,
        discovery: &[Member],
        region: &str,
        self_instance_id: &str,
    ) -> Self {
        for candidate in discovery {
            let members = match api.members(candidate).await {
                Ok(members) => members,
                Err(e) => {
                    debug!(
                        candidate = %candidate.name,
                        error = %e,
                        "Candidate did not answer membership query"
                    );
                    continue;
                }
            };

            let Some(responder) = members
                .iter()
                .find(|m| m.id.is_some() && m.same_instance(candidate))
                .cloned()
            else {
                debug!(
                    candidate = %candidate.name,
                    members = members.len(),
                    "Membership response does not list the responding member"
                );
                continue;
            };

            let mut leader_id = match api.leader(candidate).await {
                Ok(leader) => leader,
                Err(e) => {
                    warn!(candidate = %candidate.name, error = %e, "Failed to query leader");
                    None
                }
            };
            if let Some(leader) = &leader_id {
                if !members.iter().any(|m| m.id.as_deref() == Some(leader.as_str())) {
                    warn!(leader = %leader, "Leader is not part of the membership response");
                    leader_id = None;
                }
            }

            // The responder's advertised client URLs may be stale or empty;
            // keep the endpoint that actually answered.
            let accessible_id = responder.id.clone();
            let members = members
                .into_iter()
                .map(|mut m| {
                    if m.id == accessible_id {
                        m.client_urls = candidate.client_urls.clone();
                    }
                    m
                })
                .collect();

            let cluster = Self::from_parts(
                members,
                accessible_id.as_deref(),
                leader_id,
                region,
                self_instance_id,
            );
            info!(
                accessible = %candidate.name,
                members = cluster.members.len(),
                leader = cluster.leader_id.as_deref().unwrap_or("<none>"),
                "Loaded etcd cluster membership"
            );
            return cluster;
        }

        info!(
            candidates = discovery.len(),
            "No candidate answered, no accessible etcd cluster"
        );
        Self::empty(region, self_instance_id)
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member(&self, id: &str) -> Option<&Member> {
        self.members.get(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn accessible_member(&self) -> Option<&Member> {
        self.accessible_member
            .as_deref()
            .and_then(|id| self.members.get(id))
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.leader_id.as_deref()
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn self_instance_id(&self) -> &str {
        &self.self_instance_id
    }

    /// Entries that describe the same instance as `member`
    pub fn entries_for(&self, member: &Member) -> Vec<&Member> {
        self.members
            .values()
            .filter(|m| m.same_instance(member))
            .collect()
    }

    #[cfg(test)]
    pub fn clear_leader(&mut self) {
        self.leader_id = None;
    }

    #[cfg(test)]
    pub fn clear_accessible_member(&mut self) {
        self.accessible_member = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "cluster_test.rs"]
mod tests;
