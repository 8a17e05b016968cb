//! EC2 inventory: the autoscaling roster
//!
//! The roster is the ground truth for which instances should hold etcd
//! membership. Terminated and shutting-down instances, and instances
//! without a private IP, never appear in it.

use super::{CloudError, Instance};
use async_trait::async_trait;
use aws_sdk_ec2::types::{Filter, InstanceStateName};
use std::collections::HashMap;
use tracing::debug;

/// Trait for querying the cloud inventory
///
/// Production code uses `Ec2Inventory`; tests use `MockInventory`.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Look up one instance by id
    async fn instance(&self, region: &str, instance_id: &str)
        -> Result<Option<Instance>, CloudError>;

    /// Live instances carrying the given autoscaling group tag, in API order
    async fn autoscaling_group(&self, region: &str, group: &str)
        -> Result<Vec<Instance>, CloudError>;
}

/// `Inventory` backed by EC2 `DescribeInstances`
///
/// SDK clients are built lazily per region and reused.
#[derive(Default)]
pub struct Ec2Inventory {
    clients: tokio::sync::Mutex<HashMap<String, aws_sdk_ec2::Client>>,
}

impl Ec2Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, region: &str) -> aws_sdk_ec2::Client {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(region) {
            return client.clone();
        }

        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        let client = aws_sdk_ec2::Client::new(&config);
        clients.insert(region.to_string(), client.clone());
        client
    }

    async fn describe(&self, region: &str, filter: Filter) -> Result<Vec<Instance>, CloudError> {
        let client = self.client(region).await;
        let mut instances = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = client
                .describe_instances()
                .filters(filter.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| {
                    CloudError::Ec2(aws_sdk_ec2::error::DisplayErrorContext(&e).to_string())
                })?;

            for reservation in output.reservations() {
                instances.extend(reservation.instances().iter().filter_map(live_instance));
            }

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(region = %region, count = instances.len(), "Described EC2 instances");
        Ok(instances)
    }
}

/// Convert an SDK instance, dropping the ones that cannot host etcd
fn live_instance(instance: &aws_sdk_ec2::types::Instance) -> Option<Instance> {
    let state = instance.state().and_then(|s| s.name());
    if matches!(
        state,
        Some(InstanceStateName::Terminated) | Some(InstanceStateName::ShuttingDown)
    ) {
        return None;
    }

    let id = instance.instance_id()?.to_string();
    let private_ip = instance.private_ip_address()?.to_string();
    let tags = instance
        .tags()
        .iter()
        .filter_map(|tag| Some((tag.key()?.to_string(), tag.value()?.to_string())))
        .collect();

    Some(Instance {
        id,
        private_ip,
        tags,
    })
}

#[async_trait]
impl Inventory for Ec2Inventory {
    async fn instance(
        &self,
        region: &str,
        instance_id: &str,
    ) -> Result<Option<Instance>, CloudError> {
        let filter = Filter::builder()
            .name("instance-id")
            .values(instance_id)
            .build();
        let instances = self.describe(region, filter).await?;
        Ok(instances.into_iter().find(|i| i.id == instance_id))
    }

    async fn autoscaling_group(
        &self,
        region: &str,
        group: &str,
    ) -> Result<Vec<Instance>, CloudError> {
        let filter = Filter::builder()
            .name(format!("tag:{}", super::AUTOSCALING_GROUP_TAG))
            .values(group)
            .build();
        let instances = self.describe(region, filter).await?;
        Ok(instances
            .into_iter()
            .filter(|i| i.autoscaling_group() == Some(group))
            .collect())
    }
}

/// In-memory inventory for tests
#[cfg(test)]
pub struct MockInventory {
    instances: std::sync::Mutex<Vec<Instance>>,
    failing: std::sync::atomic::AtomicBool,
    roster_calls: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockInventory {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self {
            instances: std::sync::Mutex::new(instances),
            failing: std::sync::atomic::AtomicBool::new(false),
            roster_calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn set_instances(&self, instances: Vec<Instance>) {
        *self.instances.lock().unwrap() = instances;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn roster_calls(&self) -> u32 {
        self.roster_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), CloudError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CloudError::Ec2("RequestLimitExceeded".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl Inventory for MockInventory {
    async fn instance(
        &self,
        _region: &str,
        instance_id: &str,
    ) -> Result<Option<Instance>, CloudError> {
        self.check()?;
        Ok(self
            .instances
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == instance_id)
            .cloned())
    }

    async fn autoscaling_group(
        &self,
        _region: &str,
        group: &str,
    ) -> Result<Vec<Instance>, CloudError> {
        self.roster_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.check()?;
        Ok(self
            .instances
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.autoscaling_group() == Some(group))
            .cloned()
            .collect())
    }
}
