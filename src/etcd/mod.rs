//! etcd administrative API access
//!
//! - `Member` - one participant of the cluster
//! - `EtcdApi` - the admin calls (list, leader, add, delete) sent to a reachable member
//! - `Cluster` - point-in-time view of membership and leadership

pub mod client;
pub mod cluster;
pub mod member;

use async_trait::async_trait;
use thiserror::Error;

pub use client::HttpEtcdApi;
pub use cluster::Cluster;
pub use member::{Member, DEFAULT_CLIENT_PORT, DEFAULT_PEER_PORT};

#[cfg(test)]
pub use client::{EtcdCall, MockEtcdApi};

#[derive(Debug, Error)]
pub enum MemberError {
    #[error("member {0} has no client URL")]
    NoClientUrl(String),

    #[error("etcd request failed: {0}")]
    Http(String),

    #[error("etcd returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("member not found")]
    NotFound,

    #[error("invalid etcd response: {0}")]
    InvalidResponse(String),
}

impl MemberError {
    /// Whether the desired state of a delete ("not a member") already holds
    pub fn is_already_absent(&self) -> bool {
        matches!(self, MemberError::NotFound)
    }
}

/// Admin operations against a running etcd member
///
/// Every call is addressed to `via`, the member whose client URL receives
/// the request. Production code uses `HttpEtcdApi`; tests use `MockEtcdApi`.
/// Implementations never retry; retry policy belongs to the caller.
#[async_trait]
pub trait EtcdApi: Send + Sync {
    /// List the cluster members as seen by `via`
    async fn members(&self, via: &Member) -> Result<Vec<Member>, MemberError>;

    /// Current leader id as seen by `via`, if one is known
    async fn leader(&self, via: &Member) -> Result<Option<String>, MemberError>;

    /// Add a member with the given peer URLs, returning the created entry
    async fn add_member(&self, via: &Member, peer_urls: &[String]) -> Result<Member, MemberError>;

    /// Remove the member with the given id
    async fn delete_member(&self, via: &Member, id: &str) -> Result<(), MemberError>;
}
