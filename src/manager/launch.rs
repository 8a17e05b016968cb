//! Launching and stopping the etcd process

use super::{Identity, Manager, Registration};
use crate::cloud::Instance;
use crate::etcd::{Cluster, Member};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("cannot start {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("cannot wait for etcd: {0}")]
    Wait(String),
}

/// Program and arguments of one etcd run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl DaemonCommand {
    /// Value following `flag` in the argument list
    pub fn arg(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

/// How an etcd run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonExit {
    /// Exit code; `None` when the process was killed by a signal
    pub code: Option<i32>,
}

/// Trait for starting etcd
///
/// Production code uses `ProcessLauncher`; tests use `MockLauncher`.
#[async_trait]
pub trait DaemonLauncher: Send + Sync {
    async fn launch(&self, command: &DaemonCommand) -> Result<Box<dyn RunningDaemon>, LaunchError>;
}

/// A started etcd process
#[async_trait]
pub trait RunningDaemon: Send {
    fn pid(&self) -> Option<u32>;

    /// Wait for the process to exit on its own
    async fn wait(&mut self) -> Result<DaemonExit, LaunchError>;

    /// Ask the process to stop, killing it if it is still alive after `grace`
    async fn terminate(&mut self, grace: Duration);
}

/// Runs etcd as a child process
pub struct ProcessLauncher;

#[async_trait]
impl DaemonLauncher for ProcessLauncher {
    async fn launch(&self, command: &DaemonCommand) -> Result<Box<dyn RunningDaemon>, LaunchError> {
        let child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LaunchError::Spawn {
                program: command.program.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(ChildDaemon { child }))
    }
}

struct ChildDaemon {
    child: tokio::process::Child,
}

#[async_trait]
impl RunningDaemon for ChildDaemon {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<DaemonExit, LaunchError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| LaunchError::Wait(e.to_string()))?;
        Ok(DaemonExit {
            code: status.code(),
        })
    }

    async fn terminate(&mut self, grace: Duration) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(pid = pid, error = %e, "Failed to send SIGTERM to etcd");
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => info!(status = %status, "etcd stopped"),
            Ok(Err(e)) => warn!(error = %e, "Error waiting for etcd to stop"),
            Err(_) => {
                warn!(grace = ?grace, "etcd did not stop in time, killing");
                if let Err(e) = self.child.kill().await {
                    warn!(error = %e, "Failed to kill etcd");
                }
            }
        }
    }
}

impl Manager {
    /// etcd command line for this cycle
    pub fn daemon_command(
        &self,
        identity: &Identity,
        cluster: &Cluster,
        roster: &[Instance],
        registration: Registration,
    ) -> DaemonCommand {
        let peer_url = identity.me.peer_url().unwrap_or_default().to_string();
        let client_url = identity.me.client_url().unwrap_or_default().to_string();
        let data_dir = self.config.data_dir.display().to_string();

        let args = vec![
            "--name".to_string(),
            identity.instance_id.clone(),
            "--data-dir".to_string(),
            data_dir,
            "--listen-peer-urls".to_string(),
            format!("http://0.0.0.0:{}", self.config.peer_port),
            "--initial-advertise-peer-urls".to_string(),
            peer_url,
            "--listen-client-urls".to_string(),
            format!("http://0.0.0.0:{}", self.config.client_port),
            "--advertise-client-urls".to_string(),
            client_url,
            "--initial-cluster".to_string(),
            initial_cluster(identity, cluster, roster, registration, self.config.peer_port),
            "--initial-cluster-token".to_string(),
            identity.cluster_token.clone(),
            "--initial-cluster-state".to_string(),
            registration.cluster_state().to_string(),
        ];

        DaemonCommand {
            program: self.config.etcd_binary.clone(),
            args,
        }
    }
}

/// `--initial-cluster` value
///
/// A founding member lists the whole roster. A joining member lists every
/// current member except stale entries for itself, then itself.
pub fn initial_cluster(
    identity: &Identity,
    cluster: &Cluster,
    roster: &[Instance],
    registration: Registration,
    peer_port: u16,
) -> String {
    let my_peer_url = identity.me.peer_url().unwrap_or_default().to_string();

    let mut peers: Vec<(String, String)> = match registration {
        Registration::Founding => roster
            .iter()
            .filter(|i| i.id != identity.instance_id)
            .map(|i| (i.id.clone(), format!("http://{}:{}", i.private_ip, peer_port)))
            .collect(),
        Registration::Joined | Registration::AlreadyMember => cluster
            .members()
            .filter(|m| !m.same_instance(&identity.me))
            .filter_map(|m| Some((member_name(m, roster)?, m.peer_url()?.to_string())))
            .collect(),
    };
    peers.push((identity.instance_id.clone(), my_peer_url));

    peers
        .iter()
        .map(|(name, url)| format!("{}={}", name, url))
        .collect::<Vec<_>>()
        .join(",")
}

/// Name to list a member under
///
/// Members added but not started yet have no name; they are named after the
/// roster instance owning their peer address, or their id as a last resort.
fn member_name(member: &Member, roster: &[Instance]) -> Option<String> {
    if !member.name.is_empty() {
        return Some(member.name.clone());
    }
    let address = member.peer_address();
    roster
        .iter()
        .find(|i| address.as_deref() == Some(i.private_ip.as_str()))
        .map(|i| i.id.clone())
        .or_else(|| member.id.clone())
}

/// Scripted outcome of one `MockLauncher::launch` call
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub enum MockRun {
    /// Spawning fails
    FailToStart,
    /// The process exits right away with this code
    Exit(i32),
    /// The process runs until terminated
    RunForever,
}

/// Launcher recording every command and replaying scripted runs
///
/// Once the script is exhausted every launch fails to start. When built
/// with `stop_after`, the given controller is triggered after that many
/// launches so supervision tests terminate.
#[cfg(test)]
pub struct MockLauncher {
    script: std::sync::Mutex<std::collections::VecDeque<MockRun>>,
    commands: std::sync::Mutex<Vec<DaemonCommand>>,
    terminated: std::sync::Arc<std::sync::atomic::AtomicU32>,
    stop_after: Option<(usize, crate::server::ShutdownController)>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockLauncher {
    pub fn new(script: Vec<MockRun>) -> Self {
        Self {
            script: std::sync::Mutex::new(script.into()),
            commands: std::sync::Mutex::new(Vec::new()),
            terminated: std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0)),
            stop_after: None,
        }
    }

    pub fn stop_after(mut self, launches: usize, controller: crate::server::ShutdownController) -> Self {
        self.stop_after = Some((launches, controller));
        self
    }

    pub fn commands(&self) -> Vec<DaemonCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn terminations(&self) -> u32 {
        self.terminated.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl DaemonLauncher for MockLauncher {
    async fn launch(&self, command: &DaemonCommand) -> Result<Box<dyn RunningDaemon>, LaunchError> {
        let launches = {
            let mut commands = self.commands.lock().unwrap();
            commands.push(command.clone());
            commands.len()
        };
        if let Some((limit, controller)) = &self.stop_after {
            if launches >= *limit {
                controller.shutdown();
            }
        }

        let run = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MockRun::FailToStart);
        match run {
            MockRun::FailToStart => Err(LaunchError::Spawn {
                program: command.program.display().to_string(),
                reason: "exec format error".to_string(),
            }),
            MockRun::Exit(code) => Ok(Box::new(MockDaemon {
                exit: Some(code),
                terminated: self.terminated.clone(),
            })),
            MockRun::RunForever => Ok(Box::new(MockDaemon {
                exit: None,
                terminated: self.terminated.clone(),
            })),
        }
    }
}

#[cfg(test)]
struct MockDaemon {
    exit: Option<i32>,
    terminated: std::sync::Arc<std::sync::atomic::AtomicU32>,
}

#[cfg(test)]
#[async_trait]
impl RunningDaemon for MockDaemon {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn wait(&mut self) -> Result<DaemonExit, LaunchError> {
        match self.exit {
            Some(code) => Ok(DaemonExit { code: Some(code) }),
            None => std::future::pending().await,
        }
    }

    async fn terminate(&mut self, _grace: Duration) {
        self.terminated
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}
