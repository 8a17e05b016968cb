//! Prometheus metrics for the keeper
//!
//! Counters cover the membership decisions and daemon lifecycle; the gauge
//! reflects whether etcd is currently running under supervision.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

pub type SharedMetrics = Arc<KeeperMetrics>;

pub struct KeeperMetrics {
    registry: Registry,
    registrations: IntCounter,
    registration_failures: IntCounter,
    daemon_launches: IntCounter,
    daemon_exits: IntCounter,
    daemon_running: IntGauge,
    evictions: IntCounter,
    eviction_failures: IntCounter,
}

/// Create and register all keeper metrics
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    let registry = Registry::new();

    let registrations = IntCounter::new(
        "etcd_keeper_registrations_total",
        "Times this instance was added to an existing etcd cluster",
    )?;
    let registration_failures = IntCounter::new(
        "etcd_keeper_registration_failures_total",
        "Registration attempts that failed and were retried",
    )?;
    let daemon_launches =
        IntCounter::new("etcd_keeper_daemon_launches_total", "etcd processes started")?;
    let daemon_exits =
        IntCounter::new("etcd_keeper_daemon_exits_total", "etcd processes that exited")?;
    let daemon_running = IntGauge::new(
        "etcd_keeper_daemon_running",
        "1 while an etcd process is supervised",
    )?;
    let evictions = IntCounter::new(
        "etcd_keeper_evictions_total",
        "Members removed because their instance left the autoscaling group",
    )?;
    let eviction_failures = IntCounter::new(
        "etcd_keeper_eviction_failures_total",
        "Member removals that failed and will be retried",
    )?;

    registry.register(Box::new(registrations.clone()))?;
    registry.register(Box::new(registration_failures.clone()))?;
    registry.register(Box::new(daemon_launches.clone()))?;
    registry.register(Box::new(daemon_exits.clone()))?;
    registry.register(Box::new(daemon_running.clone()))?;
    registry.register(Box::new(evictions.clone()))?;
    registry.register(Box::new(eviction_failures.clone()))?;

    Ok(Arc::new(KeeperMetrics {
        registry,
        registrations,
        registration_failures,
        daemon_launches,
        daemon_exits,
        daemon_running,
        evictions,
        eviction_failures,
    }))
}

impl KeeperMetrics {
    pub fn record_registration(&self) {
        self.registrations.inc();
    }

    pub fn record_registration_failure(&self) {
        self.registration_failures.inc();
    }

    pub fn record_daemon_started(&self) {
        self.daemon_launches.inc();
        self.daemon_running.set(1);
    }

    pub fn record_daemon_exited(&self) {
        self.daemon_exits.inc();
        self.daemon_running.set(0);
    }

    pub fn record_eviction(&self) {
        self.evictions.inc();
    }

    pub fn record_eviction_failure(&self) {
        self.eviction_failures.inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
