//! Pin cache for client versions
//!
//! Tracks which hash is current for every network resolved this session
//! and keeps the daemon's recursive pin set in line with it:
//!
//! - **Pin**: a resolved hash is pinned before it becomes current, so a
//!   network's previous hash only turns purge-eligible once its
//!   replacement is safely stored.
//! - **Purge**: everything recursively pinned that is neither current for
//!   some network nor a resource observed this session is unpinned.
//! - **Ordering**: pins share a gate that purge takes exclusively, and each
//!   network's resolve/pin/supersede runs under its own lock. Resolutions
//!   carry a ticket; once a newer ticket has committed a hash for the
//!   network, an older one never pins or becomes current. A newer
//!   resolution that failed does not void an older one.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::ipfs_api::{DaemonApi, IpfsApiError};
use crate::metrics::Metrics;

#[derive(Debug, thiserror::Error)]
pub enum PinError {
    #[error("Failed to pin {hash}: {source}")]
    PinFailed {
        hash: String,
        #[source]
        source: IpfsApiError,
    },

    #[error("Failed to list pins: {0}")]
    ListFailed(#[source] IpfsApiError),

    #[error("Refusing to purge before any network has a current version")]
    NothingLive,
}

/// Proof of having started a resolution for a network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionTicket {
    network: String,
    seq: u64,
}

impl ResolutionTicket {
    pub fn network(&self) -> &str {
        &self.network
    }
}

/// What [`PinCache::pin_resolved`] did with a hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutcome {
    /// Pinned and now current; carries the hash it superseded, if any
    Pinned { superseded: Option<String> },
    /// Already pinned and current, nothing to do
    AlreadyCurrent,
    /// A newer resolution for the same network exists; nothing was pinned
    Superseded,
}

/// Result of a purge run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub kept: Vec<String>,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Default)]
struct PinState {
    /// Current hash per network
    current: HashMap<String, String>,
    /// Ticket whose hash is current, per network
    committed: HashMap<String, u64>,
    next_seq: u64,
    /// Resources pinned by the listener this session
    resources: HashSet<String>,
    /// Hashes known to be pinned this session
    pinned: HashSet<String>,
}

/// Pin bookkeeping shared by the foreground path and the resource listener
pub struct PinCache {
    api: Arc<dyn DaemonApi>,
    metrics: Metrics,
    state: Mutex<PinState>,
    /// Shared by pins, exclusive for purge
    gate: RwLock<()>,
    network_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PinCache {
    pub fn new(api: Arc<dyn DaemonApi>, metrics: Metrics) -> Self {
        Self {
            api,
            metrics,
            state: Mutex::new(PinState::default()),
            gate: RwLock::new(()),
            network_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn network_lock(&self, network: &str) -> Arc<Mutex<()>> {
        let mut locks = self.network_locks.lock().await;
        Arc::clone(locks.entry(network.to_string()).or_default())
    }

    /// Register the start of a resolution; later tickets win once committed
    pub async fn begin_resolution(&self, network: &str) -> ResolutionTicket {
        let mut state = self.state.lock().await;
        state.next_seq += 1;
        let seq = state.next_seq;
        ResolutionTicket {
            network: network.to_string(),
            seq,
        }
    }

    /// True if a newer resolution for the ticket's network already committed
    pub async fn is_superseded(&self, ticket: &ResolutionTicket) -> bool {
        let state = self.state.lock().await;
        state
            .committed
            .get(&ticket.network)
            .is_some_and(|committed| *committed > ticket.seq)
    }

    /// Pin `hash` and make it current for `network`
    ///
    /// Never unpins the hash it supersedes; that is left to
    /// [`purge_unused_resources`](Self::purge_unused_resources).
    pub async fn pin_for_network(&self, hash: &str, network: &str) -> Result<PinOutcome, PinError> {
        let ticket = self.begin_resolution(network).await;
        self.pin_resolved(&ticket, hash).await
    }

    /// Pin the result of the resolution identified by `ticket`
    pub async fn pin_resolved(
        &self,
        ticket: &ResolutionTicket,
        hash: &str,
    ) -> Result<PinOutcome, PinError> {
        let network_lock = self.network_lock(&ticket.network).await;
        let _network_guard = network_lock.lock().await;

        if self.is_superseded(ticket).await {
            debug!(
                "Dropping {} for {}: a newer resolution is already current",
                hash, ticket.network
            );
            return Ok(PinOutcome::Superseded);
        }

        let _gate = self.gate.read().await;

        {
            let mut state = self.state.lock().await;
            if state.current.get(&ticket.network).map(String::as_str) == Some(hash)
                && state.pinned.contains(hash)
            {
                state.committed.insert(ticket.network.clone(), ticket.seq);
                debug!("{} already current for {}", hash, ticket.network);
                return Ok(PinOutcome::AlreadyCurrent);
            }
        }

        if let Err(source) = self.api.pin_add(hash).await {
            self.metrics.pin_failed();
            warn!("Failed to pin {} for {}: {}", hash, ticket.network, source);
            return Err(PinError::PinFailed {
                hash: hash.to_string(),
                source,
            });
        }
        self.metrics.pin_succeeded();

        let mut state = self.state.lock().await;
        state.pinned.insert(hash.to_string());
        state.committed.insert(ticket.network.clone(), ticket.seq);
        let superseded = state
            .current
            .insert(ticket.network.clone(), hash.to_string())
            .filter(|previous| previous != hash);

        match &superseded {
            Some(previous) => info!(
                "Pinned {} for {} (supersedes {})",
                hash, ticket.network, previous
            ),
            None => info!("Pinned {} for {}", hash, ticket.network),
        }

        Ok(PinOutcome::Pinned { superseded })
    }

    /// Pin a resource observed at runtime; returns false if it was already pinned
    pub async fn pin_resource(&self, hash: &str) -> Result<bool, PinError> {
        let _gate = self.gate.read().await;

        if self.is_pinned(hash).await {
            return Ok(false);
        }

        self.api
            .pin_add(hash)
            .await
            .map_err(|source| PinError::PinFailed {
                hash: hash.to_string(),
                source,
            })?;

        let mut state = self.state.lock().await;
        state.pinned.insert(hash.to_string());
        state.resources.insert(hash.to_string());
        debug!("Pinned observed resource {}", hash);
        Ok(true)
    }

    pub async fn is_pinned(&self, hash: &str) -> bool {
        self.state.lock().await.pinned.contains(hash)
    }

    pub async fn current_for(&self, network: &str) -> Option<String> {
        self.state.lock().await.current.get(network).cloned()
    }

    /// Current hash of every network resolved this session
    pub async fn current_versions(&self) -> BTreeMap<String, String> {
        self.state
            .lock()
            .await
            .current
            .iter()
            .map(|(n, h)| (n.clone(), h.clone()))
            .collect()
    }

    pub async fn pinned_count(&self) -> usize {
        self.state.lock().await.pinned.len()
    }

    /// Hashes a purge must keep
    pub async fn live_set(&self) -> HashSet<String> {
        let state = self.state.lock().await;
        state
            .current
            .values()
            .chain(state.resources.iter())
            .cloned()
            .collect()
    }

    /// Unpin every recursive pin that is no longer live
    ///
    /// Individual unpin failures are logged and reported, not returned.
    pub async fn purge_unused_resources(&self) -> Result<PurgeReport, PinError> {
        let _gate = self.gate.write().await;

        let live = self.live_set().await;
        if self.state.lock().await.current.is_empty() {
            return Err(PinError::NothingLive);
        }

        let mut pinned: Vec<String> = self
            .api
            .pin_ls()
            .await
            .map_err(PinError::ListFailed)?
            .into_iter()
            .collect();
        pinned.sort();

        let mut report = PurgeReport::default();
        for hash in pinned {
            if live.contains(&hash) {
                report.kept.push(hash);
                continue;
            }

            match self.api.pin_rm(&hash).await {
                Ok(()) => {
                    debug!("Unpinned {}", hash);
                    self.state.lock().await.pinned.remove(&hash);
                    report.removed.push(hash);
                }
                Err(e) => {
                    warn!("Failed to unpin {}: {}", hash, e);
                    report.failed.push(hash);
                }
            }
        }

        self.metrics.purge_completed(report.removed.len());
        info!(
            "Purge complete: kept {}, removed {}, failed {}",
            report.kept.len(),
            report.removed.len(),
            report.failed.len()
        );
        Ok(report)
    }
}
