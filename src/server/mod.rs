//! Process-level plumbing around the keeper loops
//!
//! - health/readiness/metrics HTTP endpoints
//! - graceful shutdown on SIGTERM/SIGINT

mod health;
pub mod metrics;
pub mod shutdown;

pub use health::{run_health_server, ReadinessState};
pub use metrics::{create_metrics, KeeperMetrics, SharedMetrics};
pub use shutdown::{shutdown_channel, wait_for_signal, ShutdownController, ShutdownSignal};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
