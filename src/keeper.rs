//! Wiring of the two keeper loops and the shutdown path

use crate::housekeeper::Housekeeper;
use crate::manager::Manager;
use crate::server::ShutdownSignal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Run the keeper until shutdown is requested
///
/// Starts the housekeeper next to the supervision loop. Once supervision
/// stops, the housekeeper is joined and one deregistration attempt is made;
/// its outcome only affects logging.
pub async fn run_keeper(manager: Arc<Manager>, housekeeper_interval: Duration, shutdown: ShutdownSignal) {
    let housekeeper = Housekeeper::new(&manager, housekeeper_interval).start(shutdown.clone());

    manager.run(shutdown).await;

    if let Err(e) = housekeeper.await {
        warn!(error = %e, "Housekeeper task failed");
    }

    if manager.deregister().await {
        info!("Left the etcd cluster");
    } else {
        info!("Could not leave the etcd cluster, surviving members will evict us");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::etcd::EtcdCall;
    use crate::manager::{MockLauncher, MockRun};
    use crate::server::shutdown_channel;
    use crate::testing::{client_url, harness_with, healthy_etcd};

    #[tokio::test]
    async fn test_keeper_supervises_evicts_and_deregisters() {
        let etcd = healthy_etcd();
        etcd.set_add_result(Some(crate::testing::etcd_member(
            "ifoobari5",
            "",
            "127.0.0.3",
        )));
        let h = harness_with(etcd, MockLauncher::new(vec![MockRun::RunForever]));
        let (controller, shutdown) = shutdown_channel();

        let manager = h.manager.clone();
        let task = tokio::spawn(async move {
            run_keeper(manager, Duration::from_millis(10), shutdown).await
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while !h.readiness.is_ready() || !h.etcd.deleted_ids().contains(&"ifoobari4".to_string())
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("etcd should run and the leftover member be evicted");

        controller.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("keeper should stop on shutdown")
            .unwrap();

        assert_eq!(h.launcher.terminations(), 1);
        assert!(!h.readiness.is_ready());

        // Deregistration happens after etcd was stopped
        let calls = h.etcd.calls();
        let last = calls.last().expect("etcd calls");
        assert!(matches!(
            last,
            EtcdCall::Delete { id, .. } if id == "ifoobari3"
        ));
        assert!(calls
            .iter()
            .any(|c| matches!(c, EtcdCall::Members(url) if *url == client_url("127.0.0.3"))));
    }

    #[tokio::test]
    async fn test_keeper_stops_immediately_when_already_shut_down() {
        let h = harness_with(healthy_etcd(), MockLauncher::new(vec![]));
        let (controller, shutdown) = shutdown_channel();
        controller.shutdown();

        tokio::time::timeout(
            Duration::from_secs(5),
            run_keeper(h.manager.clone(), Duration::from_millis(10), shutdown),
        )
        .await
        .expect("keeper should stop");

        assert!(h.launcher.commands().is_empty());
        // Identity was never discovered, so there is nothing to deregister
        assert!(h.etcd.deleted_ids().is_empty());
    }
}
