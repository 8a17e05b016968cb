//! Keeps an etcd member running on every instance of an EC2 autoscaling
//! group and the etcd membership in line with the group.

pub mod cloud;
pub mod config;
pub mod etcd;
pub mod housekeeper;
pub mod keeper;
pub mod manager;
pub mod server;

#[cfg(test)]
mod testing;
