//! Configuration management for IPFS Launcher
//!
//! Handles CLI argument parsing, config file loading, and defaults.

use crate::navigation::normalize_network;
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What to do when the bundled snapshot directory holds more than one content root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotPolicy {
    /// Warn and import the first entry in sorted listing order
    First,
    /// Refuse to bootstrap
    Strict,
}

#[derive(Parser, Debug)]
#[command(name = "ipfs-launcher")]
#[command(about = "Serves the latest published web client from a local IPFS daemon", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the launcher
    Start(StartCommand),
}

#[derive(Parser, Debug, Clone)]
pub struct StartCommand {
    /// Load settings from a TOML file instead of the flags below
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Data directory for the flag store and the owned IPFS repo
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// HTTP port for the UI control API
    #[arg(long, default_value_t = 8787)]
    pub api_port: u16,

    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// IPFS daemon RPC endpoint
    #[arg(long, default_value = "http://127.0.0.1:5001")]
    pub ipfs_api_url: String,

    /// IPFS gateway used to build render URLs
    #[arg(long, default_value = "http://localhost:8080")]
    pub gateway_url: String,

    /// IPFS binary used when no daemon is running (defaults to <data-dir>/bin/ipfs)
    #[arg(long)]
    pub ipfs_bin: Option<PathBuf>,

    /// Repo directory of the owned daemon (defaults to <data-dir>/ipfs)
    #[arg(long)]
    pub ipfs_repo: Option<PathBuf>,

    /// Directory holding the bundled client snapshot
    #[arg(long, default_value = "./assets/ipfs")]
    pub snapshot_dir: PathBuf,

    /// Behaviour when the snapshot directory has more than one entry
    #[arg(long, value_enum, default_value_t = SnapshotPolicy::First)]
    pub snapshot_policy: SnapshotPolicy,

    /// Registry lookup URL; `{network}` and `{name}` are substituted
    #[arg(long, default_value = "https://registry.aragon.org/{network}/{name}/latest")]
    pub registry_url: String,

    /// Registry name of the web client
    #[arg(long, default_value = "aragon.aragonpm.eth")]
    pub app_name: String,

    /// Network loaded at startup
    #[arg(long, default_value = "main")]
    pub default_network: String,

    /// Networks the client may be loaded for (can be specified multiple times)
    #[arg(long = "network", default_values_t = vec!["main".to_string(), "rinkeby".to_string()])]
    pub networks: Vec<String>,

    /// Host suffix of in-app navigation targets (`<network>.<suffix>`)
    #[arg(long, default_value = "aragon.org")]
    pub app_host_suffix: String,

    /// Version probe timeout in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub probe_timeout_ms: u64,

    /// Readiness probes before an owned daemon is considered failed
    #[arg(long, default_value_t = 60)]
    pub ready_attempts: u32,

    /// Delay between readiness probes in milliseconds
    #[arg(long, default_value_t = 500)]
    pub ready_interval_ms: u64,

    /// Time to wait for an owned daemon to exit before killing it, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub stop_timeout_ms: u64,

    /// Capacity of the observed-resource queue
    #[arg(long, default_value_t = 256)]
    pub resource_queue: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    pub api_port: u16,
    pub log_level: String,
    pub ipfs_api_url: String,
    pub gateway_url: String,
    #[serde(default)]
    pub ipfs_bin: Option<PathBuf>,
    #[serde(default)]
    pub ipfs_repo: Option<PathBuf>,
    pub snapshot_dir: PathBuf,
    pub snapshot_policy: SnapshotPolicy,
    pub registry_url: String,
    pub app_name: String,
    pub default_network: String,
    pub networks: Vec<String>,
    pub app_host_suffix: String,
    pub probe_timeout_ms: u64,
    pub ready_attempts: u32,
    pub ready_interval_ms: u64,
    pub stop_timeout_ms: u64,
    pub resource_queue: usize,
}

impl Config {
    /// Create config from CLI arguments
    pub fn from_cli() -> Result<Self, ConfigError> {
        let cli = Cli::parse();

        match cli.command {
            Commands::Start(cmd) => match &cmd.config {
                Some(path) => Self::load_from_file(path),
                None => {
                    let mut config: Config = cmd.into();
                    config.normalize_networks();
                    config.validate()?;
                    Ok(config)
                }
            },
        }
    }

    /// Load config from TOML file
    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.normalize_networks();
        config.validate()?;
        Ok(config)
    }

    /// Get default configuration
    pub fn default() -> Self {
        Config {
            data_dir: PathBuf::from("./data"),
            api_port: 8787,
            log_level: "info".to_string(),
            ipfs_api_url: "http://127.0.0.1:5001".to_string(),
            gateway_url: "http://localhost:8080".to_string(),
            ipfs_bin: None,
            ipfs_repo: None,
            snapshot_dir: PathBuf::from("./assets/ipfs"),
            snapshot_policy: SnapshotPolicy::First,
            registry_url: "https://registry.aragon.org/{network}/{name}/latest".to_string(),
            app_name: "aragon.aragonpm.eth".to_string(),
            default_network: "main".to_string(),
            networks: vec!["main".to_string(), "rinkeby".to_string()],
            app_host_suffix: "aragon.org".to_string(),
            probe_timeout_ms: 2000,
            ready_attempts: 60,
            ready_interval_ms: 500,
            stop_timeout_ms: 10_000,
            resource_queue: 256,
        }
    }

    /// Rewrite network names to their canonical form (`mainnet` becomes `main`)
    pub fn normalize_networks(&mut self) {
        let mut networks: Vec<String> = Vec::with_capacity(self.networks.len());
        for network in self.networks.iter().map(|n| normalize_network(n)) {
            if !networks.contains(&network) {
                networks.push(network);
            }
        }
        self.networks = networks;
        self.default_network = normalize_network(&self.default_network);
    }

    /// Check cross-field constraints the CLI parser cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let default_network = normalize_network(&self.default_network);
        if !self
            .networks
            .iter()
            .any(|n| normalize_network(n) == default_network)
        {
            return Err(ConfigError::Invalid(format!(
                "default network {} is not in the network list",
                self.default_network
            )));
        }
        if self.resource_queue == 0 {
            return Err(ConfigError::Invalid(
                "resource queue capacity must be positive".to_string(),
            ));
        }
        if self.ready_attempts == 0 {
            return Err(ConfigError::Invalid(
                "ready attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Binary of the owned daemon, isolated under the data dir unless overridden
    pub fn ipfs_bin(&self) -> PathBuf {
        self.ipfs_bin
            .clone()
            .unwrap_or_else(|| self.data_dir.join("bin").join("ipfs"))
    }

    /// Repo of the owned daemon, never the user's `~/.ipfs`
    pub fn ipfs_repo(&self) -> PathBuf {
        self.ipfs_repo
            .clone()
            .unwrap_or_else(|| self.data_dir.join("ipfs"))
    }

    pub fn flag_store_path(&self) -> PathBuf {
        self.data_dir.join("flags")
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl From<StartCommand> for Config {
    fn from(cmd: StartCommand) -> Self {
        Config {
            data_dir: cmd.data_dir,
            api_port: cmd.api_port,
            log_level: cmd.log_level,
            ipfs_api_url: cmd.ipfs_api_url,
            gateway_url: cmd.gateway_url,
            ipfs_bin: cmd.ipfs_bin,
            ipfs_repo: cmd.ipfs_repo,
            snapshot_dir: cmd.snapshot_dir,
            snapshot_policy: cmd.snapshot_policy,
            registry_url: cmd.registry_url,
            app_name: cmd.app_name,
            default_network: cmd.default_network,
            networks: cmd.networks,
            app_host_suffix: cmd.app_host_suffix,
            probe_timeout_ms: cmd.probe_timeout_ms,
            ready_attempts: cmd.ready_attempts,
            ready_interval_ms: cmd.ready_interval_ms,
            stop_timeout_ms: cmd.stop_timeout_ms,
            resource_queue: cmd.resource_queue,
        }
    }
}
