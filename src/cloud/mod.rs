//! Cloud collaborators: instance metadata service and EC2 inventory

pub mod inventory;
pub mod metadata;

use std::collections::HashMap;
use thiserror::Error;

pub use inventory::{Ec2Inventory, Inventory};
pub use metadata::{ImdsClient, InstanceIdentity, InstanceMetadata};

#[cfg(test)]
pub use inventory::MockInventory;
#[cfg(test)]
pub use metadata::MockMetadata;

/// Tag EC2 puts on every instance launched by an autoscaling group
pub const AUTOSCALING_GROUP_TAG: &str = "aws:autoscaling:groupName";

/// Tag CloudFormation puts on every instance of a stack
pub const STACK_NAME_TAG: &str = "aws:cloudformation:stack-name";

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("instance metadata service unreachable: {0}")]
    MetadataUnreachable(String),

    #[error("invalid instance metadata: {0}")]
    InvalidMetadata(String),

    #[error("EC2 API error: {0}")]
    Ec2(String),
}

/// A live EC2 instance as seen by the inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub private_ip: String,
    pub tags: HashMap<String, String>,
}

impl Instance {
    pub fn autoscaling_group(&self) -> Option<&str> {
        self.tags.get(AUTOSCALING_GROUP_TAG).map(String::as_str)
    }

    pub fn stack_name(&self) -> Option<&str> {
        self.tags.get(STACK_NAME_TAG).map(String::as_str)
    }
}
