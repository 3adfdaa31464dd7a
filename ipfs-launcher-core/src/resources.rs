//! Background pinning of resources observed at runtime
//!
//! The loaded client pulls further content (apps, assets) through the
//! gateway. Whoever renders it reports those requests through a
//! [`ResourceReporter`]; the [`ResourceListener`] extracts content hashes
//! and pins the ones not pinned yet.
//!
//! ## Architecture
//!
//! - **Bounded queue**: reports never block; when the queue is full the
//!   report is dropped
//! - **Best effort**: pin failures are logged and counted, never surfaced
//! - **Lifecycle management**: start/stop methods for clean shutdown

use cid::Cid;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;
use crate::pin_cache::PinCache;

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Resource listener is already running")]
    AlreadyRunning,

    #[error("Resource listener is not running")]
    NotRunning,
}

type Result<T> = std::result::Result<T, ResourceError>;

/// Message types for the listener queue
#[derive(Debug, Clone)]
enum ResourceMessage {
    /// A URL or bare hash seen by the renderer
    Observed(String),
    /// Stop the listener
    Stop,
}

/// Cheap, cloneable handle used to report observed resources
#[derive(Clone)]
pub struct ResourceReporter {
    tx: mpsc::Sender<ResourceMessage>,
}

impl ResourceReporter {
    /// Queue a resource without waiting; returns false if it was dropped
    pub fn report(&self, resource: impl Into<String>) -> bool {
        match self.tx.try_send(ResourceMessage::Observed(resource.into())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Resource queue full, dropping report");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Background task pinning observed resources
pub struct ResourceListener {
    pin_cache: Arc<PinCache>,
    metrics: Metrics,
    tx: mpsc::Sender<ResourceMessage>,
    rx: Arc<Mutex<mpsc::Receiver<ResourceMessage>>>,
    task_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
    running: Arc<RwLock<bool>>,
}

impl ResourceListener {
    /// Create a listener whose queue holds at most `capacity` reports
    pub fn new(pin_cache: Arc<PinCache>, metrics: Metrics, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        Self {
            pin_cache,
            metrics,
            tx,
            rx: Arc::new(Mutex::new(rx)),
            task_handle: Arc::new(RwLock::new(None)),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn reporter(&self) -> ResourceReporter {
        ResourceReporter {
            tx: self.tx.clone(),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Spawn the listen-and-pin loop
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.write().await;
        if *running {
            return Err(ResourceError::AlreadyRunning);
        }

        info!("Starting resource listener");
        *running = true;
        drop(running);

        let handle = self.spawn_listen_loop();
        *self.task_handle.write().await = Some(handle);

        Ok(())
    }

    /// Stop the listener and wait for the loop to exit
    ///
    /// Reports already queued ahead of the stop message are still handled.
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.running.write().await;
        if !*running {
            return Err(ResourceError::NotRunning);
        }

        info!("Stopping resource listener");
        *running = false;
        drop(running);

        if self.tx.send(ResourceMessage::Stop).await.is_err() {
            warn!("Resource queue closed before stop");
        }

        if let Some(handle) = self.task_handle.write().await.take() {
            let _ = handle.await;
        }

        info!("Resource listener stopped");
        Ok(())
    }

    fn spawn_listen_loop(&self) -> JoinHandle<()> {
        let pin_cache = Arc::clone(&self.pin_cache);
        let metrics = self.metrics.clone();
        let rx = Arc::clone(&self.rx);

        tokio::spawn(async move {
            let mut rx = rx.lock().await;

            loop {
                match rx.recv().await {
                    Some(ResourceMessage::Observed(resource)) => {
                        let Some(hash) = extract_hash(&resource) else {
                            debug!("No content hash in {}", resource);
                            continue;
                        };

                        match pin_cache.pin_resource(&hash).await {
                            Ok(true) => {
                                metrics.background_pin_succeeded();
                                debug!("Pinned resource {} from {}", hash, resource);
                            }
                            Ok(false) => {
                                debug!("Resource {} already pinned", hash);
                            }
                            Err(e) => {
                                metrics.background_pin_failed();
                                warn!("Background pin of {} failed: {}", hash, e);
                            }
                        }
                    }
                    Some(ResourceMessage::Stop) => {
                        info!("Received stop message, shutting down resource listener");
                        break;
                    }
                    None => {
                        warn!("Resource queue channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Find the content hash in an `/ipfs/<hash>/...` URL or a bare hash
pub fn extract_hash(resource: &str) -> Option<String> {
    let candidate = match resource.find("/ipfs/") {
        Some(start) => resource[start + "/ipfs/".len()..]
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default(),
        None => resource.trim(),
    };

    candidate.parse::<Cid>().ok().map(|_| candidate.to_string())
}
