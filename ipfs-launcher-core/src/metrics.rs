//! Prometheus metrics for the launcher
//!
//! Thread-safe metrics collection using atomic types

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Global metrics collector for the launcher
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Version resolution
    resolutions: AtomicU64,
    resolution_failures: AtomicU64,

    // Foreground pins (resolved client versions and the bundled snapshot)
    pins: AtomicU64,
    pin_failures: AtomicU64,

    // Pins issued by the resource listener
    background_pins: AtomicU64,
    background_pin_failures: AtomicU64,

    // Garbage collection
    unpins: AtomicU64,
    purges: AtomicU64,

    // Navigation handed to the OS browser
    external_navigations: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                resolutions: AtomicU64::new(0),
                resolution_failures: AtomicU64::new(0),
                pins: AtomicU64::new(0),
                pin_failures: AtomicU64::new(0),
                background_pins: AtomicU64::new(0),
                background_pin_failures: AtomicU64::new(0),
                unpins: AtomicU64::new(0),
                purges: AtomicU64::new(0),
                external_navigations: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    // Resolution

    pub fn resolution_succeeded(&self) {
        self.inner.resolutions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resolution_failed(&self) {
        self.inner.resolution_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resolutions(&self) -> u64 {
        self.inner.resolutions.load(Ordering::Relaxed)
    }

    pub fn resolution_failures(&self) -> u64 {
        self.inner.resolution_failures.load(Ordering::Relaxed)
    }

    // Pinning

    pub fn pin_succeeded(&self) {
        self.inner.pins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pin_failed(&self) {
        self.inner.pin_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn background_pin_succeeded(&self) {
        self.inner.background_pins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn background_pin_failed(&self) {
        self.inner.background_pin_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pins(&self) -> u64 {
        self.inner.pins.load(Ordering::Relaxed)
    }

    pub fn pin_failures(&self) -> u64 {
        self.inner.pin_failures.load(Ordering::Relaxed)
    }

    pub fn background_pins(&self) -> u64 {
        self.inner.background_pins.load(Ordering::Relaxed)
    }

    pub fn background_pin_failures(&self) -> u64 {
        self.inner.background_pin_failures.load(Ordering::Relaxed)
    }

    // Garbage collection

    pub fn purge_completed(&self, unpinned: usize) {
        self.inner.purges.fetch_add(1, Ordering::Relaxed);
        self.inner.unpins.fetch_add(unpinned as u64, Ordering::Relaxed);
    }

    pub fn unpins(&self) -> u64 {
        self.inner.unpins.load(Ordering::Relaxed)
    }

    pub fn purges(&self) -> u64 {
        self.inner.purges.load(Ordering::Relaxed)
    }

    // Navigation

    pub fn external_navigation(&self) {
        self.inner.external_navigations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn external_navigations(&self) -> u64 {
        self.inner.external_navigations.load(Ordering::Relaxed)
    }

    // Uptime

    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-formatted metrics text
    pub fn to_prometheus(&self, pinned_count: usize, network_count: usize) -> String {
        format!(
            "# HELP launcher_pinned_hashes Hashes pinned by the launcher this session\n\
             # TYPE launcher_pinned_hashes gauge\n\
             launcher_pinned_hashes {}\n\
             \n\
             # HELP launcher_networks_resolved Networks with a current client version\n\
             # TYPE launcher_networks_resolved gauge\n\
             launcher_networks_resolved {}\n\
             \n\
             # HELP launcher_uptime_seconds Time since the launcher started in seconds\n\
             # TYPE launcher_uptime_seconds counter\n\
             launcher_uptime_seconds {}\n\
             \n\
             # HELP launcher_resolutions_total Successful version resolutions\n\
             # TYPE launcher_resolutions_total counter\n\
             launcher_resolutions_total {}\n\
             \n\
             # HELP launcher_resolution_failures_total Failed version resolutions\n\
             # TYPE launcher_resolution_failures_total counter\n\
             launcher_resolution_failures_total {}\n\
             \n\
             # HELP launcher_pins_total Client versions pinned\n\
             # TYPE launcher_pins_total counter\n\
             launcher_pins_total {}\n\
             \n\
             # HELP launcher_pin_failures_total Client versions that failed to pin\n\
             # TYPE launcher_pin_failures_total counter\n\
             launcher_pin_failures_total {}\n\
             \n\
             # HELP launcher_background_pins_total Observed resources pinned\n\
             # TYPE launcher_background_pins_total counter\n\
             launcher_background_pins_total {}\n\
             \n\
             # HELP launcher_background_pin_failures_total Observed resources that failed to pin\n\
             # TYPE launcher_background_pin_failures_total counter\n\
             launcher_background_pin_failures_total {}\n\
             \n\
             # HELP launcher_unpins_total Hashes removed by purges\n\
             # TYPE launcher_unpins_total counter\n\
             launcher_unpins_total {}\n\
             \n\
             # HELP launcher_external_navigations_total Navigations opened in the OS browser\n\
             # TYPE launcher_external_navigations_total counter\n\
             launcher_external_navigations_total {}\n",
            pinned_count,
            network_count,
            self.uptime_seconds(),
            self.resolutions(),
            self.resolution_failures(),
            self.pins(),
            self.pin_failures(),
            self.background_pins(),
            self.background_pin_failures(),
            self.unpins(),
            self.external_navigations(),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
