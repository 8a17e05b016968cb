//! HTTP client for the etcd v2 admin API

use super::{EtcdApi, Member, MemberError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct MembersResponse {
    #[serde(default)]
    members: Vec<Member>,
}

#[derive(Debug, Deserialize)]
struct SelfStats {
    #[serde(rename = "leaderInfo", default)]
    leader_info: Option<LeaderInfo>,
}

#[derive(Debug, Deserialize)]
struct LeaderInfo {
    #[serde(default)]
    leader: Option<String>,
}

#[derive(Debug, Serialize)]
struct AddMemberRequest<'a> {
    #[serde(rename = "peerURLs")]
    peer_urls: &'a [String],
}

/// Production `EtcdApi` speaking HTTP/JSON to `/v2/members` and `/v2/stats/self`
pub struct HttpEtcdApi {
    client: reqwest::Client,
}

impl HttpEtcdApi {
    /// Create a client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Self {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build etcd HTTP client, using default");
                reqwest::Client::new()
            }
        };
        Self { client }
    }

    fn url(via: &Member, path: &str) -> Result<String, MemberError> {
        let base = via
            .client_url()
            .ok_or_else(|| MemberError::NoClientUrl(via.name.clone()))?;
        Ok(format!("{}/v2/{}", base.trim_end_matches('/'), path))
    }

    async fn unexpected_status(response: reqwest::Response) -> MemberError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        MemberError::Status {
            status,
            body: body.chars().take(200).collect(),
        }
    }
}

fn request_error(e: reqwest::Error) -> MemberError {
    MemberError::Http(e.to_string())
}

#[async_trait]
impl EtcdApi for HttpEtcdApi {
    async fn members(&self, via: &Member) -> Result<Vec<Member>, MemberError> {
        let url = Self::url(via, "members")?;
        let response = self.client.get(&url).send().await.map_err(request_error)?;
        debug!(url = %url, status = %response.status(), "GET members");

        if response.status() != StatusCode::OK {
            return Err(Self::unexpected_status(response).await);
        }

        let body: MembersResponse = response
            .json()
            .await
            .map_err(|e| MemberError::InvalidResponse(e.to_string()))?;
        Ok(body.members)
    }

    async fn leader(&self, via: &Member) -> Result<Option<String>, MemberError> {
        let url = Self::url(via, "stats/self")?;
        let response = self.client.get(&url).send().await.map_err(request_error)?;
        debug!(url = %url, status = %response.status(), "GET stats/self");

        if response.status() != StatusCode::OK {
            return Err(Self::unexpected_status(response).await);
        }

        let stats: SelfStats = response
            .json()
            .await
            .map_err(|e| MemberError::InvalidResponse(e.to_string()))?;
        Ok(stats
            .leader_info
            .and_then(|info| info.leader)
            .filter(|leader| !leader.is_empty()))
    }

    async fn add_member(&self, via: &Member, peer_urls: &[String]) -> Result<Member, MemberError> {
        let url = Self::url(via, "members")?;
        let response = self
            .client
            .post(&url)
            .json(&AddMemberRequest { peer_urls })
            .send()
            .await
            .map_err(request_error)?;
        debug!(url = %url, status = %response.status(), "POST members");

        if !response.status().is_success() {
            return Err(Self::unexpected_status(response).await);
        }

        let member: Member = response
            .json()
            .await
            .map_err(|e| MemberError::InvalidResponse(e.to_string()))?;
        if member.id.is_none() {
            return Err(MemberError::InvalidResponse(
                "created member has no id".to_string(),
            ));
        }
        Ok(member)
    }

    async fn delete_member(&self, via: &Member, id: &str) -> Result<(), MemberError> {
        let url = Self::url(via, &format!("members/{}", id))?;
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(request_error)?;
        debug!(url = %url, status = %response.status(), "DELETE member");

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(MemberError::NotFound),
            _ => Err(Self::unexpected_status(response).await),
        }
    }
}

/// A call recorded by `MockEtcdApi`
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EtcdCall {
    Members(String),
    Leader(String),
    Add { via: String, peer_urls: Vec<String> },
    Delete { via: String, id: String },
}

/// Mock etcd API keyed by the client URL of the member addressed
///
/// Endpoints without configured members answer with HTTP 404. Adds fail
/// with 403 until `set_add_result` provides a member.
#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[derive(Default)]
pub struct MockEtcdApi {
    members: std::sync::Mutex<std::collections::HashMap<String, Vec<Member>>>,
    leaders: std::sync::Mutex<std::collections::HashMap<String, String>>,
    add_result: std::sync::Mutex<Option<Member>>,
    failing_deletes: std::sync::Mutex<std::collections::HashSet<String>>,
    absent_deletes: std::sync::Mutex<std::collections::HashSet<String>>,
    calls: std::sync::Mutex<Vec<EtcdCall>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockEtcdApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_members(&self, client_url: &str, members: Vec<Member>) {
        self.members
            .lock()
            .unwrap()
            .insert(client_url.to_string(), members);
    }

    pub fn set_leader(&self, client_url: &str, leader: &str) {
        self.leaders
            .lock()
            .unwrap()
            .insert(client_url.to_string(), leader.to_string());
    }

    pub fn set_add_result(&self, member: Option<Member>) {
        *self.add_result.lock().unwrap() = member;
    }

    pub fn fail_delete(&self, id: &str) {
        self.failing_deletes.lock().unwrap().insert(id.to_string());
    }

    pub fn absent_on_delete(&self, id: &str) {
        self.absent_deletes.lock().unwrap().insert(id.to_string());
    }

    pub fn calls(&self) -> Vec<EtcdCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn member_queries(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EtcdCall::Members(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EtcdCall::Delete { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn adds(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EtcdCall::Add { peer_urls, .. } => Some(peer_urls),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: EtcdCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl EtcdApi for MockEtcdApi {
    async fn members(&self, via: &Member) -> Result<Vec<Member>, MemberError> {
        let url = via.client_url().unwrap_or_default().to_string();
        self.record(EtcdCall::Members(url.clone()));
        self.members
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .ok_or(MemberError::Status {
                status: 404,
                body: String::new(),
            })
    }

    async fn leader(&self, via: &Member) -> Result<Option<String>, MemberError> {
        let url = via.client_url().unwrap_or_default().to_string();
        self.record(EtcdCall::Leader(url.clone()));
        Ok(self.leaders.lock().unwrap().get(&url).cloned())
    }

    async fn add_member(&self, via: &Member, peer_urls: &[String]) -> Result<Member, MemberError> {
        self.record(EtcdCall::Add {
            via: via.client_url().unwrap_or_default().to_string(),
            peer_urls: peer_urls.to_vec(),
        });
        self.add_result
            .lock()
            .unwrap()
            .clone()
            .ok_or(MemberError::Status {
                status: 403,
                body: String::new(),
            })
    }

    async fn delete_member(&self, via: &Member, id: &str) -> Result<(), MemberError> {
        self.record(EtcdCall::Delete {
            via: via.client_url().unwrap_or_default().to_string(),
            id: id.to_string(),
        });
        if self.failing_deletes.lock().unwrap().contains(id) {
            return Err(MemberError::Status {
                status: 500,
                body: String::new(),
            });
        }
        if self.absent_deletes.lock().unwrap().contains(id) {
            return Err(MemberError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "client_test.rs"]
mod tests;
