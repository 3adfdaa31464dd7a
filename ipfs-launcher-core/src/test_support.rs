//! In-memory doubles for the daemon, registry and OS opener

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::ipfs_api::{DaemonApi, IpfsApiError, Result as ApiResult};
use crate::navigation::ExternalOpener;
use crate::resolver::{Registry, ResolveError};

pub(crate) const BUNDLED_HASH: &str = "QmUNLLsPACCz1vLxQVkXqqLX5R1X345qqfHbsf67hvA3Nn";
pub(crate) const MAIN_V1: &str = "QmWATWQ7fVPP2EFGu71UkfnqhYXDYH566qy47CnJDgvs8u";
pub(crate) const MAIN_V2: &str = "QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5o";
pub(crate) const RINKEBY_V1: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";
pub(crate) const RESOURCE_HASH: &str = "QmXoypizjW3WknFiJnKLwHCnL72vedxjQkDDP1mXWo6uco";
pub(crate) const STALE_HASH: &str = "QmbFMke1KXqnYyBBWxB74N4c5SBnJMVAiMNRcGu6x1AwQH";

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Daemon whose pin set lives in memory
#[derive(Default)]
pub(crate) struct MockDaemon {
    online: AtomicBool,
    pins: Mutex<HashSet<String>>,
    failing_pins: Mutex<HashSet<String>>,
    fail_add: AtomicBool,
    pin_delay: Mutex<Option<Duration>>,
    version_calls: AtomicUsize,
    add_calls: AtomicUsize,
    pin_add_calls: AtomicUsize,
    pin_rm_calls: AtomicUsize,
    pin_ls_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
}

impl MockDaemon {
    pub fn new() -> Self {
        let daemon = Self::default();
        daemon.set_online(true);
        daemon
    }

    pub fn offline() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn with_pins(pins: &[&str]) -> Self {
        let daemon = Self::new();
        daemon
            .pins
            .lock()
            .unwrap()
            .extend(pins.iter().map(|p| p.to_string()));
        daemon
    }

    pub fn pins(&self) -> HashSet<String> {
        self.pins.lock().unwrap().clone()
    }

    pub fn is_pinned(&self, hash: &str) -> bool {
        self.pins.lock().unwrap().contains(hash)
    }

    pub fn fail_pin(&self, hash: &str) {
        self.failing_pins.lock().unwrap().insert(hash.to_string());
    }

    pub fn fail_add(&self) {
        self.fail_add.store(true, Ordering::SeqCst);
    }

    pub fn set_pin_delay(&self, delay: Duration) {
        *self.pin_delay.lock().unwrap() = Some(delay);
    }

    pub fn version_calls(&self) -> usize {
        self.version_calls.load(Ordering::SeqCst)
    }

    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn pin_add_calls(&self) -> usize {
        self.pin_add_calls.load(Ordering::SeqCst)
    }

    pub fn pin_rm_calls(&self) -> usize {
        self.pin_rm_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.version_calls()
            + self.add_calls()
            + self.pin_add_calls()
            + self.pin_rm_calls()
            + self.pin_ls_calls.load(Ordering::SeqCst)
            + self.shutdown_calls()
    }

    fn ensure_online(&self) -> ApiResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IpfsApiError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "daemon offline",
            )))
        }
    }
}

#[async_trait]
impl DaemonApi for MockDaemon {
    async fn version(&self) -> ApiResult<String> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        Ok("0.29.0".to_string())
    }

    async fn add_recursive(&self, path: &Path) -> ApiResult<String> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(IpfsApiError::Daemon {
                status: 500,
                message: "add failed".to_string(),
            });
        }
        // Snapshot roots are named after their hash
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| IpfsApiError::InvalidResponse("no file name".to_string()))
    }

    async fn pin_add(&self, hash: &str) -> ApiResult<()> {
        self.pin_add_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        let delay = *self.pin_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_pins.lock().unwrap().contains(hash) {
            return Err(IpfsApiError::Daemon {
                status: 500,
                message: format!("cannot pin {hash}"),
            });
        }
        self.pins.lock().unwrap().insert(hash.to_string());
        Ok(())
    }

    async fn pin_rm(&self, hash: &str) -> ApiResult<()> {
        self.pin_rm_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        if self.pins.lock().unwrap().remove(hash) {
            Ok(())
        } else {
            Err(IpfsApiError::Daemon {
                status: 500,
                message: "not pinned or pinned indirectly".to_string(),
            })
        }
    }

    async fn pin_ls(&self) -> ApiResult<HashSet<String>> {
        self.pin_ls_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        Ok(self.pins())
    }

    async fn shutdown(&self) -> ApiResult<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        self.set_online(false);
        Ok(())
    }
}

/// Registry answering from a table of `(name, network) -> hash`
#[derive(Default)]
pub(crate) struct MockRegistry {
    records: Mutex<HashMap<(String, String), String>>,
    unreachable: AtomicBool,
    delays: Mutex<HashMap<String, Duration>>,
    calls: AtomicUsize,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, name: &str, network: &str, hash: &str) {
        self.records
            .lock()
            .unwrap()
            .insert((name.to_string(), network.to_string()), hash.to_string());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Delay answers for lookups returning `hash`
    pub fn delay_hash(&self, hash: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(hash.to_string(), delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Registry for MockRegistry {
    async fn resolve(&self, name: &str, network: &str) -> Result<String, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ResolveError::Unreachable("registry offline".to_string()));
        }
        let hash = self
            .records
            .lock()
            .unwrap()
            .get(&(name.to_string(), network.to_string()))
            .cloned()
            .ok_or_else(|| ResolveError::NotPublished {
                name: name.to_string(),
                network: network.to_string(),
            })?;
        let delay = self.delays.lock().unwrap().get(&hash).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(hash)
    }
}

/// Opener that records URLs instead of launching a browser
#[derive(Default)]
pub(crate) struct RecordingOpener {
    opened: Mutex<Vec<String>>,
}

impl RecordingOpener {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl ExternalOpener for RecordingOpener {
    fn open(&self, url: &str) -> std::io::Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}
