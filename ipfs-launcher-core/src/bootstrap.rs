//! First-run import of the bundled client snapshot
//!
//! The installer ships a pre-built copy of the client so something can be
//! rendered before the registry has ever been reached. It is imported and
//! pinned once per installation; the flag is written only after both steps
//! succeeded, so an interrupted import simply runs again on the next launch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::SnapshotPolicy;
use crate::flags::{BootstrapFlag, FlagStore, FlagStoreError};
use crate::ipfs_api::{DaemonApi, IpfsApiError};
use crate::pin_cache::{PinCache, PinError};

/// Network the bundled snapshot is pinned under
pub const BUNDLED_NETWORK: &str = "main";

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Bundled snapshot directory {0:?} is missing")]
    MissingSnapshot(PathBuf),

    #[error("Bundled snapshot directory {0:?} is empty")]
    EmptySnapshot(PathBuf),

    #[error("Bundled snapshot directory {dir:?} has {count} entries")]
    AmbiguousSnapshot { dir: PathBuf, count: usize },

    #[error("Failed to import bundled snapshot: {0}")]
    Import(#[from] IpfsApiError),

    #[error("Failed to pin bundled snapshot: {0}")]
    Pin(#[from] PinError),

    #[error("Flag store error: {0}")]
    Flags(#[from] FlagStoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What [`BootstrapSequencer::run_if_needed`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The snapshot was imported in an earlier run
    AlreadyPinned,
    /// The snapshot was imported and pinned now
    Imported { content_hash: String },
}

pub struct BootstrapSequencer {
    api: Arc<dyn DaemonApi>,
    pin_cache: Arc<PinCache>,
    flags: FlagStore,
    snapshot_dir: PathBuf,
    policy: SnapshotPolicy,
}

impl BootstrapSequencer {
    pub fn new(
        api: Arc<dyn DaemonApi>,
        pin_cache: Arc<PinCache>,
        flags: FlagStore,
        snapshot_dir: impl Into<PathBuf>,
        policy: SnapshotPolicy,
    ) -> Self {
        Self {
            api,
            pin_cache,
            flags,
            snapshot_dir: snapshot_dir.into(),
            policy,
        }
    }

    /// Import and pin the bundled snapshot unless that already happened
    pub async fn run_if_needed(&self) -> Result<BootstrapOutcome, BootstrapError> {
        if let Some(flag) = self.flags.bootstrap_flag().await? {
            if flag.is_pinned {
                info!("Bundled snapshot already pinned, skipping bootstrap");
                return Ok(BootstrapOutcome::AlreadyPinned);
            }
        }

        let root = self.snapshot_root().await?;
        info!("Bootstrapping from bundled snapshot {:?}", root);

        let content_hash = self.api.add_recursive(&root).await?;
        self.pin_cache
            .pin_for_network(&content_hash, BUNDLED_NETWORK)
            .await?;

        self.flags
            .set_bootstrap_flag(&BootstrapFlag {
                is_pinned: true,
                content_hash: Some(content_hash.clone()),
            })
            .await?;

        info!("Bundled snapshot pinned as {}", content_hash);
        Ok(BootstrapOutcome::Imported { content_hash })
    }

    /// Pick the content root inside the snapshot directory
    async fn snapshot_root(&self) -> Result<PathBuf, BootstrapError> {
        let mut entries = list_entries(&self.snapshot_dir).await?;

        match entries.len() {
            0 => Err(BootstrapError::EmptySnapshot(self.snapshot_dir.clone())),
            1 => Ok(entries.swap_remove(0)),
            count => match self.policy {
                SnapshotPolicy::Strict => Err(BootstrapError::AmbiguousSnapshot {
                    dir: self.snapshot_dir.clone(),
                    count,
                }),
                SnapshotPolicy::First => {
                    warn!(
                        "Bundled snapshot directory {:?} has {} entries, using {:?}",
                        self.snapshot_dir, count, entries[0]
                    );
                    Ok(entries.swap_remove(0))
                }
            },
        }
    }
}

/// Entries of `dir` in sorted order
async fn list_entries(dir: &Path) -> Result<Vec<PathBuf>, BootstrapError> {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BootstrapError::MissingSnapshot(dir.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    let mut entries = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}
