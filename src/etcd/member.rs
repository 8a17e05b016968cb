//! etcd member value object
//!
//! By convention a member's `name` is the EC2 instance id that hosts it.
//! Reconciliation against the autoscaling roster relies on that convention,
//! so it never needs the cluster-assigned `id` to decide whether a member
//! still has a live instance behind it.

use serde::{Deserialize, Serialize};

/// Default etcd client port
pub const DEFAULT_CLIENT_PORT: u16 = 2379;

/// Default etcd peer port
pub const DEFAULT_PEER_PORT: u16 = 2380;

/// One participant of the etcd cluster
///
/// Serialized in the shape used by the etcd v2 members API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Assigned by the cluster when the member is added; absent before that
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Instance id of the owning EC2 instance (empty until the member starts)
    #[serde(default)]
    pub name: String,

    #[serde(rename = "peerURLs", default)]
    pub peer_urls: Vec<String>,

    #[serde(rename = "clientURLs", default)]
    pub client_urls: Vec<String>,
}

impl Member {
    /// Build the local view of a member hosted on `private_ip`
    ///
    /// Used both for this instance and for every roster sibling when the
    /// discovery list is assembled.
    pub fn for_instance(instance_id: &str, private_ip: &str, client_port: u16, peer_port: u16) -> Self {
        Self {
            id: None,
            name: instance_id.to_string(),
            peer_urls: vec![format!("http://{}:{}", private_ip, peer_port)],
            client_urls: vec![format!("http://{}:{}", private_ip, client_port)],
        }
    }

    /// First client URL, the endpoint admin requests are sent to
    pub fn client_url(&self) -> Option<&str> {
        self.client_urls.first().map(String::as_str)
    }

    /// First peer URL
    pub fn peer_url(&self) -> Option<&str> {
        self.peer_urls.first().map(String::as_str)
    }

    /// Host part of the first parseable peer URL
    pub fn peer_address(&self) -> Option<String> {
        self.peer_urls.iter().find_map(|url| host_of(url))
    }

    /// Whether this entry and `other` describe the same instance
    ///
    /// Names are compared when both are known. A member that was added but
    /// never started has no name yet and is recognised by its peer URLs.
    pub fn same_instance(&self, other: &Member) -> bool {
        if !self.name.is_empty() && !other.name.is_empty() {
            return self.name == other.name;
        }
        self.peer_urls
            .iter()
            .any(|url| other.peer_urls.iter().any(|o| o == url))
    }

    /// `id` rendered for logs
    pub fn display_id(&self) -> &str {
        self.id.as_deref().unwrap_or("<unregistered>")
    }
}

/// Host of an URL, if it parses and has one
pub fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_instance_derives_urls_from_private_ip() {
        let member = Member::for_instance("i-deadbeef3", "127.0.0.3", 2379, 2380);

        assert_eq!(member.id, None);
        assert_eq!(member.name, "i-deadbeef3");
        assert_eq!(member.peer_url(), Some("http://127.0.0.3:2380"));
        assert_eq!(member.client_url(), Some("http://127.0.0.3:2379"));
        assert_eq!(member.peer_address().as_deref(), Some("127.0.0.3"));
    }

    #[test]
    fn test_deserialize_etcd_member() {
        let json = r#"{"id":"ifoobari3","name":"i-deadbeef3","peerURLs":["http://127.0.0.3:2380"],"clientURLs":["ttp://127.0.0.3:2379"]}"#;

        let member: Member = serde_json::from_str(json).unwrap();

        assert_eq!(member.id.as_deref(), Some("ifoobari3"));
        assert_eq!(member.name, "i-deadbeef3");
        assert_eq!(member.peer_address().as_deref(), Some("127.0.0.3"));
    }

    #[test]
    fn test_deserialize_unstarted_member_has_empty_name() {
        let json = r#"{"id":"ifoobar","peerURLs":["http://127.0.0.2:2380"],"clientURLs":[]}"#;

        let member: Member = serde_json::from_str(json).unwrap();

        assert!(member.name.is_empty());
        assert_eq!(member.client_url(), None);
    }

    #[test]
    fn test_same_instance_by_name() {
        let a = Member::for_instance("i-1", "10.0.0.1", 2379, 2380);
        let mut b = Member::for_instance("i-1", "10.0.0.9", 2379, 2380);
        b.id = Some("other".to_string());

        assert!(a.same_instance(&b));
        assert!(!a.same_instance(&Member::for_instance("i-2", "10.0.0.1", 2379, 2380)));
    }

    #[test]
    fn test_same_instance_by_peer_url_when_unnamed() {
        let me = Member::for_instance("i-1", "10.0.0.1", 2379, 2380);
        let unnamed = Member {
            id: Some("abc".to_string()),
            name: String::new(),
            peer_urls: vec!["http://10.0.0.1:2380".to_string()],
            client_urls: vec![],
        };

        assert!(me.same_instance(&unnamed));
        assert!(unnamed.same_instance(&me));
    }

    #[test]
    fn test_host_of_rejects_garbage() {
        assert_eq!(host_of("not a url"), None);
        assert_eq!(host_of("http://10.1.2.3:2380").as_deref(), Some("10.1.2.3"));
    }
}
