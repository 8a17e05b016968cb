//! The supervision loop
//!
//! discover identity -> discover cluster -> clean data dir -> register ->
//! launch -> supervise, then back to cluster discovery after a delay. Every
//! failure is retried; only shutdown leaves the loop.

use super::{DaemonExit, Manager, ManagerError};
use crate::server::ShutdownSignal;
use tracing::{info, warn};

/// How one supervision cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Shutdown was requested; the daemon (if any) has been stopped
    Shutdown,
    /// etcd exited on its own and should be restarted
    DaemonExited(DaemonExit),
}

impl Manager {
    /// Keep etcd running until shutdown is requested
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        info!(retry_delay = ?self.config.retry_delay, "Starting supervision loop");

        loop {
            match self.run_cycle(&mut shutdown).await {
                Ok(CycleOutcome::Shutdown) => break,
                Ok(CycleOutcome::DaemonExited(exit)) => {
                    warn!(exit_code = ?exit.code, "etcd exited, restarting after delay");
                }
                Err(e) => {
                    warn!(error = %e, "Supervision cycle failed, retrying after delay");
                }
            }

            if shutdown
                .run_until(tokio::time::sleep(self.config.retry_delay))
                .await
                .is_none()
            {
                break;
            }
        }

        info!("Supervision loop stopped");
    }

    /// One pass through the supervision state machine
    pub async fn run_cycle(&self, shutdown: &mut ShutdownSignal) -> Result<CycleOutcome, ManagerError> {
        let Some(loaded) = shutdown.run_until(self.load_cluster()).await else {
            info!("Shutdown during cluster discovery");
            return Ok(CycleOutcome::Shutdown);
        };
        let (cluster, roster) = loaded?;

        self.clean_data_dir();

        let Some(registered) = shutdown.run_until(self.register_me(&cluster)).await else {
            info!("Shutdown during registration");
            return Ok(CycleOutcome::Shutdown);
        };
        let registration = registered.inspect_err(|_| {
            if let Some(metrics) = self.metrics() {
                metrics.record_registration_failure();
            }
        })?;

        // Cached; carries the member id registration may have assigned
        let identity = self.find_my_instance().await?;
        let command = self.daemon_command(&identity, &cluster, &roster, registration);
        info!(
            program = %command.program.display(),
            initial_cluster_state = registration.cluster_state(),
            initial_cluster = command.arg("--initial-cluster"),
            "Launching etcd"
        );

        let mut daemon = self.launcher.launch(&command).await?;
        info!(pid = ?daemon.pid(), "etcd started");
        self.readiness.set_ready();
        if let Some(metrics) = self.metrics() {
            metrics.record_daemon_started();
        }

        let waited = shutdown.run_until(daemon.wait()).await;

        self.readiness.set_not_ready();
        let outcome = match waited {
            Some(exit) => Ok(CycleOutcome::DaemonExited(exit?)),
            None => {
                info!(grace = ?self.config.shutdown_grace, "Stopping etcd");
                daemon.terminate(self.config.shutdown_grace).await;
                Ok(CycleOutcome::Shutdown)
            }
        };
        if let Some(metrics) = self.metrics() {
            metrics.record_daemon_exited();
        }
        outcome
    }
}
