//! etcd membership manager
//!
//! Owns this instance's identity and drives the supervision cycle:
//! identity discovery, cluster discovery, data directory cleanup,
//! registration, and the etcd process itself.

pub mod data_dir;
pub mod launch;
pub mod registration;
pub mod supervisor;

pub use launch::{
    DaemonCommand, DaemonExit, DaemonLauncher, LaunchError, ProcessLauncher, RunningDaemon,
};
pub use registration::Registration;
pub use supervisor::CycleOutcome;

#[cfg(test)]
pub use launch::{MockLauncher, MockRun};

use crate::cloud::{Instance, InstanceMetadata, Inventory};
use crate::config::KeeperConfig;
use crate::etcd::{Cluster, EtcdApi, Member};
use crate::server::{ReadinessState, SharedMetrics};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("instance identity unavailable: {0}")]
    IdentityUnavailable(String),

    #[error("etcd cluster unreachable: {0}")]
    ClusterUnreachable(String),

    #[error("etcd cluster has no leader, membership cannot be changed yet")]
    ClusterNotReady,

    #[error("etcd cluster registration failed: {0}")]
    Registration(String),

    #[error("failed to launch etcd: {0}")]
    Launch(#[from] LaunchError),
}

/// Everything this instance knows about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub instance_id: String,
    pub region: String,
    pub private_ip: String,
    pub autoscaling_group: String,
    /// `--initial-cluster-token`: the CloudFormation stack name, or the group name
    pub cluster_token: String,
    /// This instance as an etcd member; `id` is set once registered
    pub me: Member,
}

pub struct Manager {
    config: KeeperConfig,
    metadata: Arc<dyn InstanceMetadata>,
    inventory: Arc<dyn Inventory>,
    etcd: Arc<dyn EtcdApi>,
    launcher: Arc<dyn DaemonLauncher>,
    readiness: ReadinessState,
    metrics: Option<SharedMetrics>,
    /// Written by identity discovery and registration only; the housekeeper reads it
    identity: RwLock<Option<Identity>>,
}

impl Manager {
    pub fn new(
        config: KeeperConfig,
        metadata: Arc<dyn InstanceMetadata>,
        inventory: Arc<dyn Inventory>,
        etcd: Arc<dyn EtcdApi>,
        launcher: Arc<dyn DaemonLauncher>,
    ) -> Self {
        Self {
            config,
            metadata,
            inventory,
            etcd,
            launcher,
            readiness: ReadinessState::new(),
            metrics: None,
            identity: RwLock::new(None),
        }
    }

    /// Share a readiness flag with the health server
    pub fn with_readiness(mut self, readiness: ReadinessState) -> Self {
        self.readiness = readiness;
        self
    }

    /// Record decisions in the given metrics registry
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub(crate) fn etcd(&self) -> &dyn EtcdApi {
        self.etcd.as_ref()
    }

    pub(crate) fn metrics(&self) -> Option<&SharedMetrics> {
        self.metrics.as_ref()
    }

    /// Identity discovered so far, if any
    pub fn identity(&self) -> Option<Identity> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn instance_id(&self) -> Option<String> {
        self.identity().map(|i| i.instance_id)
    }

    pub fn region(&self) -> Option<String> {
        self.identity().map(|i| i.region)
    }

    /// This instance as an etcd member
    pub fn me(&self) -> Option<Member> {
        self.identity().map(|i| i.me)
    }

    fn set_member_id(&self, id: Option<String>) {
        let mut slot = self.identity.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(identity) = slot.as_mut() {
            identity.me.id = id;
        }
    }

    /// Discover who this instance is
    ///
    /// Reads the metadata service, then looks the instance up in EC2 for its
    /// autoscaling group and stack tags. The result is cached; later calls
    /// return it without network I/O.
    pub async fn find_my_instance(&self) -> Result<Identity, ManagerError> {
        if let Some(identity) = self.identity() {
            return Ok(identity);
        }

        let document = self
            .metadata
            .identity()
            .await
            .map_err(|e| ManagerError::IdentityUnavailable(e.to_string()))?;

        let instance = self
            .inventory
            .instance(&document.region, &document.instance_id)
            .await
            .map_err(|e| ManagerError::IdentityUnavailable(e.to_string()))?
            .ok_or_else(|| {
                ManagerError::IdentityUnavailable(format!(
                    "instance {} not found in EC2",
                    document.instance_id
                ))
            })?;

        let autoscaling_group = instance
            .autoscaling_group()
            .ok_or_else(|| {
                ManagerError::IdentityUnavailable(format!(
                    "instance {} is not part of an autoscaling group",
                    document.instance_id
                ))
            })?
            .to_string();
        let cluster_token = instance
            .stack_name()
            .unwrap_or(&autoscaling_group)
            .to_string();

        let me = Member::for_instance(
            &document.instance_id,
            &document.private_ip,
            self.config.client_port,
            self.config.peer_port,
        );
        let identity = Identity {
            instance_id: document.instance_id,
            region: document.region,
            private_ip: document.private_ip,
            autoscaling_group,
            cluster_token,
            me,
        };

        info!(
            instance_id = %identity.instance_id,
            region = %identity.region,
            private_ip = %identity.private_ip,
            autoscaling_group = %identity.autoscaling_group,
            "Discovered instance identity"
        );

        // The housekeeper may have raced us here; keep whichever landed first
        // so a registered member id is never overwritten.
        let mut slot = self.identity.write().unwrap_or_else(PoisonError::into_inner);
        Ok(slot.get_or_insert(identity).clone())
    }

    /// Live instances of this instance's autoscaling group
    pub async fn get_autoscaling_members(&self) -> Result<Vec<Instance>, ManagerError> {
        let identity = self.find_my_instance().await?;
        self.inventory
            .autoscaling_group(&identity.region, &identity.autoscaling_group)
            .await
            .map_err(|e| {
                ManagerError::ClusterUnreachable(format!("autoscaling roster unavailable: {}", e))
            })
    }

    /// Candidate endpoints to probe: this instance first, then the roster
    pub fn discovery_list(&self, identity: &Identity, roster: &[Instance]) -> Vec<Member> {
        std::iter::once(identity.me.clone())
            .chain(
                roster
                    .iter()
                    .filter(|i| i.id != identity.instance_id)
                    .map(|i| {
                        Member::for_instance(
                            &i.id,
                            &i.private_ip,
                            self.config.client_port,
                            self.config.peer_port,
                        )
                    }),
            )
            .collect()
    }

    /// Build a fresh cluster view, returning it with the roster it was built from
    pub async fn load_cluster(&self) -> Result<(Cluster, Vec<Instance>), ManagerError> {
        let roster = self.get_autoscaling_members().await?;
        let cluster = self.load_cluster_from(&roster).await?;
        Ok((cluster, roster))
    }

    /// Build a fresh cluster view from an already fetched roster
    pub async fn load_cluster_from(&self, roster: &[Instance]) -> Result<Cluster, ManagerError> {
        let identity = self.find_my_instance().await?;
        let discovery = self.discovery_list(&identity, roster);
        Ok(Cluster::load_members(
            self.etcd.as_ref(),
            &discovery,
            &identity.region,
            &identity.instance_id,
        )
        .await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "manager_test.rs"]
mod tests;
