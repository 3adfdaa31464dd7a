//! IPFS Launcher Core
//!
//! Keeps a local IPFS daemon running, pins the latest published web client
//! for each network and decides which navigations stay in-app.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod daemon;
pub mod flags;
pub mod ipfs_api;
pub mod launcher;
pub mod metrics;
pub mod navigation;
pub mod pin_cache;
pub mod resolver;
pub mod resources;
pub mod runtime;

#[cfg(test)]
mod test_support;

pub use bootstrap::{BootstrapError, BootstrapOutcome, BootstrapSequencer, BUNDLED_NETWORK};
pub use config::{Config, ConfigError, SnapshotPolicy};
pub use daemon::{DaemonConfig, DaemonError, DaemonHandle, DaemonManager, KuboSpawner, Spawner};
pub use flags::{BootstrapFlag, FlagStore, FlagStoreError};
pub use ipfs_api::{DaemonApi, HttpDaemonApi, IpfsApiError};
pub use launcher::{Launcher, LauncherError, LauncherParts, LoadError, ResolveAndLoad};
pub use metrics::Metrics;
pub use navigation::{
    normalize_network, ExternalOpener, Navigation, NavigationClassifier, NavigationController,
    NavigationOutcome, SystemOpener,
};
pub use pin_cache::{PinCache, PinError, PinOutcome, PurgeReport, ResolutionTicket};
pub use resolver::{HttpRegistry, Registry, ResolveError, VersionResolver};
pub use resources::{ResourceError, ResourceListener, ResourceReporter};
pub use runtime::run_node;
