//! Cooperative shutdown for the supervision and housekeeping loops
//!
//! SIGTERM/SIGINT are turned into a single shutdown flag. Both loops hold a
//! `ShutdownSignal` and check it around every blocking call; the supervision
//! loop terminates etcd and main deregisters this member before exiting.

use std::future::Future;
use tokio::sync::watch;
use tracing::info;

/// Receiving half of the shutdown flag, cloned into every loop
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait until shutdown is requested
    pub async fn wait(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                // Controller dropped, nobody can cancel us any more
                break;
            }
        }
    }

    /// Check if shutdown was requested (non-blocking)
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Drive `fut` to completion unless shutdown is requested first
    ///
    /// Returns `None` when shutdown won; `fut` is dropped at that point.
    pub async fn run_until<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        if self.is_shutdown() {
            return None;
        }
        tokio::select! {
            output = fut => Some(output),
            _ = self.wait() => None,
        }
    }
}

/// Sending half of the shutdown flag
pub struct ShutdownController {
    sender: watch::Sender<bool>,
}

impl ShutdownController {
    /// Request shutdown; idempotent
    pub fn shutdown(&self) {
        let _ = self.sender.send(true);
        info!("Shutdown requested");
    }
}

/// Create the shutdown flag
///
/// Returns (controller, signal); clone the signal into each loop.
pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// Wait for SIGTERM or SIGINT
///
/// Returns the signal name that was received.
///
/// # Panics
/// Panics if signal handlers cannot be registered (OS resource exhaustion).
#[cfg(unix)]
pub async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::error;

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to register SIGTERM handler");
            panic!("Cannot register SIGTERM handler: {}", e);
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to register SIGINT handler");
            panic!("Cannot register SIGINT handler: {}", e);
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
            "SIGTERM"
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
            "SIGINT"
        }
    }
}

/// Wait for Ctrl+C (non-unix)
///
/// # Panics
/// Panics if the Ctrl+C handler cannot be registered.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> &'static str {
    use tracing::error;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to wait for Ctrl+C");
        panic!("Cannot wait for Ctrl+C: {}", e);
    }
    info!("Received Ctrl+C");
    "CTRL_C"
}
