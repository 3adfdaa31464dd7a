//! Navigation decisions
//!
//! Classification is a pure function of the URL so it can be tested
//! without any rendering surface; [`NavigationController`] adds the side
//! effects (resolve-and-load, or hand off to the OS browser).

use reqwest::Url;
use std::net::IpAddr;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::launcher::{LoadError, ResolveAndLoad};
use crate::metrics::Metrics;

/// Where a navigation request should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// A client host for a known network; resolve and load it in-app
    InScope(String),
    /// Content already served by the local gateway; load as-is
    Gateway,
    /// Anything else; open in the OS default handler
    OutOfScope,
}

/// Map host aliases to the network keys used internally
pub fn normalize_network(alias: &str) -> String {
    let alias = alias.to_ascii_lowercase();
    match alias.as_str() {
        "mainnet" => "main".to_string(),
        _ => alias,
    }
}

/// Pure URL classifier
#[derive(Debug, Clone)]
pub struct NavigationClassifier {
    host_suffix: String,
    networks: Vec<String>,
    gateway: Option<Url>,
}

impl NavigationClassifier {
    /// `host_suffix` is the domain under which `<network>.<suffix>` hosts
    /// are in scope; `gateway_url` is the local gateway base
    pub fn new(host_suffix: &str, networks: &[String], gateway_url: &str) -> Self {
        Self {
            host_suffix: host_suffix.trim_start_matches('.').to_ascii_lowercase(),
            networks: networks.iter().map(|n| normalize_network(n)).collect(),
            gateway: Url::parse(gateway_url).ok(),
        }
    }

    pub fn classify(&self, url: &str) -> Navigation {
        let Ok(parsed) = Url::parse(url) else {
            return Navigation::OutOfScope;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return Navigation::OutOfScope;
        }
        let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
            return Navigation::OutOfScope;
        };

        if self.is_gateway(&parsed, &host) {
            return Navigation::Gateway;
        }

        let Some(label) = host
            .strip_suffix(&self.host_suffix)
            .and_then(|rest| rest.strip_suffix('.'))
        else {
            return Navigation::OutOfScope;
        };
        if label.is_empty() || label.contains('.') {
            return Navigation::OutOfScope;
        }

        let network = normalize_network(label);
        if self.networks.contains(&network) {
            Navigation::InScope(network)
        } else {
            Navigation::OutOfScope
        }
    }

    /// Loopback spellings (`localhost`, `127.0.0.1`, `[::1]`) all name the same gateway
    fn is_gateway(&self, url: &Url, host: &str) -> bool {
        let Some(gateway) = &self.gateway else {
            return false;
        };
        let Some(gateway_host) = gateway.host_str().map(str::to_ascii_lowercase) else {
            return false;
        };
        let same_host =
            gateway_host == host || (is_loopback(&gateway_host) && is_loopback(host));
        same_host
            && gateway.port_or_known_default() == url.port_or_known_default()
            && url.path().starts_with("/ipfs/")
    }
}

fn is_loopback(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|ip| ip.is_loopback())
}

/// Hands URLs to the operating system's default handler
pub trait ExternalOpener: Send + Sync {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// Opens URLs with `xdg-open`, `open` or `start` depending on the platform
#[derive(Debug, Default, Clone)]
pub struct SystemOpener;

impl ExternalOpener for SystemOpener {
    fn open(&self, url: &str) -> std::io::Result<()> {
        let mut command = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", "start", ""]);
            c
        } else if cfg!(target_os = "macos") {
            Command::new("open")
        } else {
            Command::new("xdg-open")
        };

        command
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
    }
}

/// What happened to a navigation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// Render this URL in-app
    Load { url: String },
    /// Handed to the OS browser
    External,
}

/// Applies classification decisions
pub struct NavigationController {
    classifier: NavigationClassifier,
    core: Arc<dyn ResolveAndLoad>,
    opener: Arc<dyn ExternalOpener>,
    metrics: Metrics,
}

impl NavigationController {
    pub fn new(
        classifier: NavigationClassifier,
        core: Arc<dyn ResolveAndLoad>,
        opener: Arc<dyn ExternalOpener>,
        metrics: Metrics,
    ) -> Self {
        Self {
            classifier,
            core,
            opener,
            metrics,
        }
    }

    pub fn classify(&self, url: &str) -> Navigation {
        self.classifier.classify(url)
    }

    /// Route a navigation request
    ///
    /// Failures to resolve are returned so the caller keeps showing what it
    /// had; failures of the OS opener are only logged.
    pub async fn handle(&self, url: &str) -> Result<NavigationOutcome, LoadError> {
        match self.classifier.classify(url) {
            Navigation::InScope(network) => {
                info!("Navigation to {} loads network {}", url, network);
                let url = self.core.resolve_and_load(&network).await?;
                Ok(NavigationOutcome::Load { url })
            }
            Navigation::Gateway => {
                debug!("Navigation to gateway content {}", url);
                Ok(NavigationOutcome::Load {
                    url: url.to_string(),
                })
            }
            Navigation::OutOfScope => {
                info!("Opening {} in external browser", url);
                self.metrics.external_navigation();
                if let Err(e) = self.opener.open(url) {
                    warn!("Failed to open {} externally: {}", url, e);
                }
                Ok(NavigationOutcome::External)
            }
        }
    }
}
