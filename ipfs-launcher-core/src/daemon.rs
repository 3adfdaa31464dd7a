//! IPFS daemon lifecycle
//!
//! Detects a daemon that is already running (for instance one the user
//! runs independently) and otherwise starts a private instance from an
//! isolated binary and repo. The returned [`DaemonHandle`] records whether
//! this process owns the daemon; only owned daemons are ever stopped.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::ipfs_api::DaemonApi;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("Failed to start IPFS daemon: {0}")]
    StartFailure(String),

    #[error("Failed to stop IPFS daemon: {0}")]
    StopFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings for detecting and launching the daemon
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Binary used to start an owned daemon
    pub bin_path: PathBuf,
    /// Repo (`IPFS_PATH`) of the owned daemon
    pub repo_dir: PathBuf,
    /// Readiness probes before giving up on a freshly spawned daemon
    pub ready_attempts: u32,
    /// Delay between readiness probes
    pub ready_interval: Duration,
    /// How long to wait for an owned daemon to exit after the stop command
    pub stop_timeout: Duration,
}

impl DaemonConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            bin_path: config.ipfs_bin(),
            repo_dir: config.ipfs_repo(),
            ready_attempts: config.ready_attempts,
            ready_interval: config.ready_interval(),
            stop_timeout: config.stop_timeout(),
        }
    }
}

/// A daemon process started by this launcher
#[async_trait]
pub trait DaemonProcess: Send {
    /// True once the process has terminated
    fn has_exited(&mut self) -> bool;

    /// Wait for the process to terminate
    async fn wait(&mut self) -> std::io::Result<()>;

    /// Forcefully terminate the process
    async fn kill(&mut self) -> std::io::Result<()>;
}

/// Starts daemon processes
#[async_trait]
pub trait Spawner: Send + Sync {
    /// Initialise the repo if it does not exist yet
    async fn init_repo(&self, bin: &Path, repo: &Path) -> Result<(), DaemonError>;

    /// Launch a daemon serving `repo`
    async fn spawn(&self, bin: &Path, repo: &Path) -> Result<Box<dyn DaemonProcess>, DaemonError>;
}

/// Spawns the real `ipfs` binary
#[derive(Debug, Default, Clone)]
pub struct KuboSpawner;

#[async_trait]
impl Spawner for KuboSpawner {
    async fn init_repo(&self, bin: &Path, repo: &Path) -> Result<(), DaemonError> {
        if tokio::fs::metadata(repo.join("config")).await.is_ok() {
            debug!("IPFS repo already initialised at {:?}", repo);
            return Ok(());
        }

        tokio::fs::create_dir_all(repo).await?;
        info!("Initialising IPFS repo at {:?}", repo);

        let output = Command::new(bin)
            .arg("init")
            .env("IPFS_PATH", repo)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DaemonError::StartFailure(format!("{:?} init: {}", bin, e)))?;

        if !output.status.success() {
            return Err(DaemonError::StartFailure(format!(
                "ipfs init exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn spawn(&self, bin: &Path, repo: &Path) -> Result<Box<dyn DaemonProcess>, DaemonError> {
        let child = Command::new(bin)
            .arg("daemon")
            .env("IPFS_PATH", repo)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DaemonError::StartFailure(format!("{:?} daemon: {}", bin, e)))?;

        info!("Spawned IPFS daemon (pid {:?})", child.id());
        Ok(Box::new(child))
    }
}

#[async_trait]
impl DaemonProcess for Child {
    fn has_exited(&mut self) -> bool {
        !matches!(self.try_wait(), Ok(None))
    }

    async fn wait(&mut self) -> std::io::Result<()> {
        Child::wait(self).await.map(|_| ())
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        Child::kill(self).await
    }
}

/// Result of [`DaemonManager::ensure_running`]
pub struct DaemonHandle {
    pub is_running: bool,
    /// True only when this process launched the daemon
    pub owned_by_self: bool,
    process: Option<Box<dyn DaemonProcess>>,
}

impl DaemonHandle {
    fn external() -> Self {
        Self {
            is_running: true,
            owned_by_self: false,
            process: None,
        }
    }

    fn owned(process: Box<dyn DaemonProcess>) -> Self {
        Self {
            is_running: true,
            owned_by_self: true,
            process: Some(process),
        }
    }
}

impl fmt::Debug for DaemonHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonHandle")
            .field("is_running", &self.is_running)
            .field("owned_by_self", &self.owned_by_self)
            .field("has_process", &self.process.is_some())
            .finish()
    }
}

/// Detect-or-start manager for the IPFS daemon
pub struct DaemonManager {
    api: Arc<dyn DaemonApi>,
    spawner: Arc<dyn Spawner>,
    config: DaemonConfig,
    /// Serialises start attempts
    start_lock: Mutex<()>,
}

impl DaemonManager {
    pub fn new(api: Arc<dyn DaemonApi>, spawner: Arc<dyn Spawner>, config: DaemonConfig) -> Self {
        Self {
            api,
            spawner,
            config,
            start_lock: Mutex::new(()),
        }
    }

    /// Probe for a running daemon and start an owned one if none answers
    pub async fn ensure_running(&self) -> Result<DaemonHandle, DaemonError> {
        let _guard = self.start_lock.lock().await;

        match self.api.version().await {
            Ok(version) => {
                info!("Found running IPFS daemon (version {})", version);
                return Ok(DaemonHandle::external());
            }
            Err(e) => {
                info!("No IPFS daemon answering ({}), starting one", e);
            }
        }

        self.spawner
            .init_repo(&self.config.bin_path, &self.config.repo_dir)
            .await?;
        let mut process = self
            .spawner
            .spawn(&self.config.bin_path, &self.config.repo_dir)
            .await?;

        match self.wait_ready(process.as_mut()).await {
            Ok(version) => {
                info!("Owned IPFS daemon ready (version {})", version);
                Ok(DaemonHandle::owned(process))
            }
            Err(e) => {
                error!("IPFS daemon never became ready: {}", e);
                if !process.has_exited() {
                    let _ = process.kill().await;
                }
                Err(e)
            }
        }
    }

    async fn wait_ready(&self, process: &mut dyn DaemonProcess) -> Result<String, DaemonError> {
        let mut last_error = String::from("no probe attempted");

        for attempt in 1..=self.config.ready_attempts {
            if process.has_exited() {
                return Err(DaemonError::StartFailure(
                    "daemon process exited during startup".to_string(),
                ));
            }

            match self.api.version().await {
                Ok(version) => return Ok(version),
                Err(e) => {
                    debug!("Readiness probe {} failed: {}", attempt, e);
                    last_error = e.to_string();
                }
            }

            sleep(self.config.ready_interval).await;
        }

        Err(DaemonError::StartFailure(format!(
            "not ready after {} probes: {}",
            self.config.ready_attempts, last_error
        )))
    }

    /// Stop the daemon if, and only if, this process started it
    ///
    /// Safe to call repeatedly and after the daemon already exited.
    pub async fn shutdown(&self, handle: &mut DaemonHandle) -> Result<(), DaemonError> {
        if !handle.owned_by_self {
            debug!("IPFS daemon not owned by us, leaving it running");
            return Ok(());
        }

        let Some(mut process) = handle.process.take() else {
            debug!("Owned IPFS daemon already stopped");
            return Ok(());
        };
        handle.is_running = false;

        if process.has_exited() {
            info!("Owned IPFS daemon already exited");
            return Ok(());
        }

        info!("Stopping owned IPFS daemon");
        if let Err(e) = self.api.shutdown().await {
            // The daemon drops the connection while exiting
            if !e.is_unreachable() {
                warn!("Graceful shutdown request failed: {}", e);
            }
        }

        match timeout(self.config.stop_timeout, process.wait()).await {
            Ok(Ok(())) => {
                info!("Owned IPFS daemon stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(DaemonError::StopFailure(e.to_string())),
            Err(_) => {
                warn!(
                    "IPFS daemon still running after {:?}, killing it",
                    self.config.stop_timeout
                );
                process
                    .kill()
                    .await
                    .map_err(|e| DaemonError::StopFailure(e.to_string()))
            }
        }
    }
}
