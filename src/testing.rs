//! Shared fixtures for unit tests
//!
//! Mirrors a three-instance autoscaling group (i-deadbeef1..3 on
//! 127.0.0.1..3) whose etcd cluster still lists a fourth member,
//! i-deadbeef4, left behind by a terminated instance.

use crate::cloud::{
    Instance, InstanceIdentity, MockInventory, MockMetadata, AUTOSCALING_GROUP_TAG, STACK_NAME_TAG,
};
use crate::config::KeeperConfig;
use crate::etcd::{Member, MockEtcdApi};
use crate::manager::{Manager, MockLauncher};
use crate::server::{create_metrics, ReadinessState, SharedMetrics};
use std::sync::Arc;
use std::time::Duration;

pub const REGION: &str = "eu-west-1";
pub const GROUP: &str = "etc-cluster-postgres";
pub const STACK: &str = "etc-cluster";

pub fn instance(id: &str, ip: &str) -> Instance {
    Instance {
        id: id.to_string(),
        private_ip: ip.to_string(),
        tags: [
            (AUTOSCALING_GROUP_TAG.to_string(), GROUP.to_string()),
            (STACK_NAME_TAG.to_string(), STACK.to_string()),
        ]
        .into_iter()
        .collect(),
    }
}

pub fn roster() -> Vec<Instance> {
    vec![
        instance("i-deadbeef1", "127.0.0.1"),
        instance("i-deadbeef2", "127.0.0.2"),
        instance("i-deadbeef3", "127.0.0.3"),
    ]
}

pub fn client_url(ip: &str) -> String {
    format!("http://{}:2379", ip)
}

pub fn etcd_member(id: &str, name: &str, ip: &str) -> Member {
    Member {
        id: Some(id.to_string()),
        name: name.to_string(),
        peer_urls: vec![format!("http://{}:2380", ip)],
        client_urls: vec![client_url(ip)],
    }
}

/// The membership every live instance reports
pub fn etcd_members() -> Vec<Member> {
    vec![
        etcd_member("ifoobari1", "i-deadbeef1", "127.0.0.1"),
        etcd_member("ifoobari2", "i-deadbeef2", "127.0.0.2"),
        Member {
            client_urls: vec!["ttp://127.0.0.3:2379".to_string()],
            ..etcd_member("ifoobari3", "i-deadbeef3", "127.0.0.3")
        },
        Member {
            client_urls: vec![],
            ..etcd_member("ifoobari4", "i-deadbeef4", "127.0.0.4")
        },
    ]
}

/// Mock etcd where every roster instance answers with `etcd_members()`
/// and reports ifoobari1 as leader
pub fn healthy_etcd() -> MockEtcdApi {
    let etcd = MockEtcdApi::new();
    for ip in ["127.0.0.1", "127.0.0.2", "127.0.0.3"] {
        etcd.set_members(&client_url(ip), etcd_members());
        etcd.set_leader(&client_url(ip), "ifoobari1");
    }
    etcd
}

/// Discovery list in the order the manager builds it for i-deadbeef3
pub fn discovery_list() -> Vec<Member> {
    ["127.0.0.3", "127.0.0.1", "127.0.0.2"]
        .iter()
        .zip(["i-deadbeef3", "i-deadbeef1", "i-deadbeef2"])
        .map(|(ip, id)| Member::for_instance(id, ip, 2379, 2380))
        .collect()
}

/// Metadata document of i-deadbeef3
pub fn document() -> InstanceIdentity {
    InstanceIdentity {
        instance_id: "i-deadbeef3".to_string(),
        region: REGION.to_string(),
        private_ip: "127.0.0.3".to_string(),
    }
}

/// A manager running as i-deadbeef3 on mocks, with handles to every mock
pub struct Harness {
    pub manager: Arc<Manager>,
    pub metadata: Arc<MockMetadata>,
    pub inventory: Arc<MockInventory>,
    pub etcd: Arc<MockEtcdApi>,
    pub launcher: Arc<MockLauncher>,
    pub metrics: SharedMetrics,
    pub readiness: ReadinessState,
    _data: tempfile::TempDir,
}

#[allow(clippy::unwrap_used)]
pub fn harness_with(etcd: MockEtcdApi, launcher: MockLauncher) -> Harness {
    let data = tempfile::tempdir().unwrap();
    let config = KeeperConfig {
        data_dir: data.path().join("data"),
        retry_delay: Duration::from_millis(10),
        housekeeper_interval: Duration::from_millis(10),
        shutdown_grace: Duration::from_millis(10),
        ..KeeperConfig::default()
    };

    let metadata = Arc::new(MockMetadata::new(document()));
    let inventory = Arc::new(MockInventory::new(roster()));
    let etcd = Arc::new(etcd);
    let launcher = Arc::new(launcher);
    let metrics = create_metrics().unwrap();
    let readiness = ReadinessState::new();

    let manager = Manager::new(
        config,
        metadata.clone(),
        inventory.clone(),
        etcd.clone(),
        launcher.clone(),
    )
    .with_readiness(readiness.clone())
    .with_metrics(metrics.clone());

    Harness {
        manager: Arc::new(manager),
        metadata,
        inventory,
        etcd,
        launcher,
        metrics,
        readiness,
        _data: data,
    }
}

/// Harness whose launcher fails every launch
pub fn harness(etcd: MockEtcdApi) -> Harness {
    harness_with(etcd, MockLauncher::new(vec![]))
}
