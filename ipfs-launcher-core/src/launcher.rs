//! Launcher core
//!
//! Wires the components together and drives the control path:
//! daemon → bootstrap → resolve → pin → render. Navigation re-enters
//! through [`Launcher::resolve_and_load`] whenever the UI switches network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bootstrap::{BootstrapError, BootstrapOutcome, BootstrapSequencer};
use crate::config::{Config, ConfigError};
use crate::daemon::{DaemonConfig, DaemonError, DaemonHandle, DaemonManager, KuboSpawner, Spawner};
use crate::flags::{FlagStore, FlagStoreError};
use crate::ipfs_api::{DaemonApi, HttpDaemonApi};
use crate::metrics::Metrics;
use crate::navigation::{
    normalize_network, ExternalOpener, NavigationClassifier, NavigationController, SystemOpener,
};
use crate::pin_cache::{PinCache, PinOutcome};
use crate::resolver::{HttpRegistry, Registry, ResolveError, VersionResolver};
use crate::resources::{ResourceError, ResourceListener, ResourceReporter};

const REGISTRY_TIMEOUT: Duration = Duration::from_secs(15);

/// Fatal errors while building, starting or stopping the launcher
#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Flag store error: {0}")]
    Flags(#[from] FlagStoreError),

    #[error("Daemon error: {0}")]
    Daemon(#[from] DaemonError),

    #[error("Bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("Registry error: {0}")]
    Registry(#[from] ResolveError),

    #[error("Resource listener error: {0}")]
    Resource(#[from] ResourceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a network could not be loaded
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("A newer load of {0} superseded this one")]
    Superseded(String),
}

/// Resolve the latest client for a network and return the URL to render
#[async_trait]
pub trait ResolveAndLoad: Send + Sync {
    async fn resolve_and_load(&self, network: &str) -> Result<String, LoadError>;
}

/// External collaborators of the launcher
pub struct LauncherParts {
    pub api: Arc<dyn DaemonApi>,
    pub spawner: Arc<dyn Spawner>,
    pub registry: Arc<dyn Registry>,
    pub opener: Arc<dyn ExternalOpener>,
    pub flags: FlagStore,
}

pub struct Launcher {
    config: Config,
    metrics: Metrics,
    daemon: DaemonManager,
    handle: Mutex<Option<DaemonHandle>>,
    bootstrap: BootstrapSequencer,
    resolver: VersionResolver,
    pin_cache: Arc<PinCache>,
    listener: ResourceListener,
    opener: Arc<dyn ExternalOpener>,
    /// Set once the first load of the session has purged stale pins
    purged: AtomicBool,
}

impl Launcher {
    /// Build a launcher talking to the real daemon, registry and OS
    pub fn from_config(mut config: Config) -> Result<Self, LauncherError> {
        config.normalize_networks();
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let parts = LauncherParts {
            api: Arc::new(HttpDaemonApi::new(
                config.ipfs_api_url.clone(),
                config.probe_timeout(),
            )),
            spawner: Arc::new(KuboSpawner),
            registry: Arc::new(HttpRegistry::new(
                config.registry_url.clone(),
                REGISTRY_TIMEOUT,
            )?),
            opener: Arc::new(SystemOpener),
            flags: FlagStore::open(config.flag_store_path())?,
        };

        Ok(Self::new(config, parts))
    }

    pub fn new(mut config: Config, parts: LauncherParts) -> Self {
        config.normalize_networks();
        let metrics = Metrics::new();
        let pin_cache = Arc::new(PinCache::new(Arc::clone(&parts.api), metrics.clone()));

        let daemon = DaemonManager::new(
            Arc::clone(&parts.api),
            parts.spawner,
            DaemonConfig::from_config(&config),
        );
        let bootstrap = BootstrapSequencer::new(
            parts.api,
            Arc::clone(&pin_cache),
            parts.flags,
            config.snapshot_dir.clone(),
            config.snapshot_policy,
        );
        let listener = ResourceListener::new(
            Arc::clone(&pin_cache),
            metrics.clone(),
            config.resource_queue,
        );

        Self {
            resolver: VersionResolver::new(parts.registry),
            opener: parts.opener,
            handle: Mutex::new(None),
            purged: AtomicBool::new(false),
            config,
            metrics,
            daemon,
            bootstrap,
            pin_cache,
            listener,
        }
    }

    /// Bring the daemon up, run the first-run import and start the listener
    ///
    /// Any error here is fatal for the launch.
    pub async fn start(&self) -> Result<BootstrapOutcome, LauncherError> {
        let handle = self.daemon.ensure_running().await?;
        info!(
            "IPFS daemon running ({})",
            if handle.owned_by_self { "owned" } else { "external" }
        );
        *self.handle.lock().await = Some(handle);

        let outcome = self.bootstrap.run_if_needed().await?;

        match self.listener.start().await {
            Ok(()) | Err(ResourceError::AlreadyRunning) => {}
            Err(e) => return Err(e.into()),
        }

        Ok(outcome)
    }

    /// Stop the listener and, if this process started it, the daemon
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) -> Result<(), LauncherError> {
        match self.listener.stop().await {
            Ok(()) | Err(ResourceError::NotRunning) => {}
            Err(e) => return Err(e.into()),
        }

        let mut handle = self.handle.lock().await;
        if let Some(handle) = handle.as_mut() {
            self.daemon.shutdown(handle).await?;
        }

        info!("Launcher stopped");
        Ok(())
    }

    /// Whether the daemon in use was started by this process
    pub async fn owns_daemon(&self) -> Option<bool> {
        self.handle.lock().await.as_ref().map(|h| h.owned_by_self)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn pin_cache(&self) -> &Arc<PinCache> {
        &self.pin_cache
    }

    pub fn reporter(&self) -> ResourceReporter {
        self.listener.reporter()
    }

    pub fn classifier(&self) -> NavigationClassifier {
        NavigationClassifier::new(
            &self.config.app_host_suffix,
            &self.config.networks,
            &self.config.gateway_url,
        )
    }

    /// Navigation controller that loads in-scope URLs through this launcher
    pub fn navigation(self: &Arc<Self>) -> NavigationController {
        NavigationController::new(
            self.classifier(),
            Arc::clone(self) as Arc<dyn ResolveAndLoad>,
            Arc::clone(&self.opener),
            self.metrics.clone(),
        )
    }

    /// Gateway URL rendering `hash`
    pub fn gateway_url(&self, hash: &str) -> String {
        format!("{}/ipfs/{}", self.config.gateway_url.trim_end_matches('/'), hash)
    }

    /// Purge failures never reach the caller
    async fn purge(&self) {
        if let Err(e) = self.pin_cache.purge_unused_resources().await {
            warn!("Purge of unused pins failed: {}", e);
        }
    }
}

#[async_trait]
impl ResolveAndLoad for Launcher {
    /// Resolution failures are returned without touching any pin; pin
    /// failures are logged and the content is rendered anyway.
    async fn resolve_and_load(&self, network: &str) -> Result<String, LoadError> {
        let network = normalize_network(network);
        if !self.config.networks.contains(&network) {
            return Err(LoadError::UnknownNetwork(network));
        }

        let ticket = self.pin_cache.begin_resolution(&network).await;
        let hash = match self
            .resolver
            .resolve_latest(&self.config.app_name, &network)
            .await
        {
            Ok(hash) => {
                self.metrics.resolution_succeeded();
                hash
            }
            Err(e) => {
                self.metrics.resolution_failed();
                return Err(e.into());
            }
        };

        match self.pin_cache.pin_resolved(&ticket, &hash).await {
            Ok(PinOutcome::Superseded) => return Err(LoadError::Superseded(network)),
            Ok(outcome) => {
                let superseded = matches!(outcome, PinOutcome::Pinned { superseded: Some(_) });
                let first_load = !self.purged.swap(true, Ordering::SeqCst);
                if first_load || superseded {
                    debug!("Purging unused pins after loading {}", network);
                    self.purge().await;
                }
            }
            Err(e) => {
                warn!("Rendering {} for {} without a pin: {}", hash, network, e);
            }
        }

        let url = self.gateway_url(&hash);
        info!("Loading {} for {}", url, network);
        Ok(url)
    }
}
