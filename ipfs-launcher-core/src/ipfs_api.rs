//! Client for the IPFS daemon's HTTP RPC API
//!
//! [`DaemonApi`] is the control surface the rest of the crate talks to;
//! [`HttpDaemonApi`] implements it against a Kubo-compatible
//! `/api/v0` endpoint.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum IpfsApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Daemon returned {status}: {message}")]
    Daemon { status: u16, message: String },

    #[error("Unexpected daemon response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IpfsApiError {
    /// True when the daemon could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        match self {
            IpfsApiError::Http(e) => e.is_connect() || e.is_timeout(),
            IpfsApiError::Io(e) => e.kind() == std::io::ErrorKind::ConnectionRefused,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IpfsApiError>;

/// Operations the launcher needs from the storage daemon
#[async_trait]
pub trait DaemonApi: Send + Sync {
    /// Query the daemon version; doubles as a liveness probe
    async fn version(&self) -> Result<String>;

    /// Import a directory tree and return its root hash (without pinning)
    async fn add_recursive(&self, path: &Path) -> Result<String>;

    /// Recursively pin a hash; pinning an already pinned hash succeeds
    async fn pin_add(&self, hash: &str) -> Result<()>;

    /// Remove a recursive pin
    async fn pin_rm(&self, hash: &str) -> Result<()>;

    /// All recursively pinned hashes
    async fn pin_ls(&self) -> Result<HashSet<String>>;

    /// Ask the daemon to exit gracefully
    async fn shutdown(&self) -> Result<()>;
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VersionResponse {
    version: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddEntry {
    #[serde(default)]
    name: String,
    hash: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PinLsResponse {
    #[serde(default)]
    keys: HashMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DaemonErrorBody {
    message: String,
}

/// Kubo RPC client
#[derive(Clone)]
pub struct HttpDaemonApi {
    client: reqwest::Client,
    base_url: String,
    probe_timeout: Duration,
}

impl HttpDaemonApi {
    /// Create a client for the RPC endpoint at `base_url` (e.g. `http://127.0.0.1:5001`)
    pub fn new(base_url: impl Into<String>, probe_timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            probe_timeout,
        }
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/api/v0/{}", self.base_url, command)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<DaemonErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(IpfsApiError::Daemon {
            status: status.as_u16(),
            message,
        })
    }

    async fn post(&self, command: &str, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.endpoint(command))
            .query(query)
            .send()
            .await?;
        Self::check(response).await
    }
}

#[async_trait]
impl DaemonApi for HttpDaemonApi {
    async fn version(&self) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint("version"))
            .timeout(self.probe_timeout)
            .send()
            .await?;
        let version: VersionResponse = Self::check(response).await?.json().await?;
        Ok(version.version)
    }

    async fn add_recursive(&self, path: &Path) -> Result<String> {
        let form = directory_form(path).await?;
        info!("Importing {:?} into IPFS", path);

        let response = self
            .client
            .post(self.endpoint("add"))
            .query(&[
                ("recursive", "true"),
                ("pin", "false"),
                ("cid-version", "0"),
                ("quieter", "true"),
            ])
            .multipart(form)
            .send()
            .await?;
        let body = Self::check(response).await?.text().await?;

        // The endpoint streams one JSON object per line; the root comes last
        let root = body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<AddEntry>(line).ok())
            .last()
            .ok_or_else(|| IpfsApiError::InvalidResponse(format!("no root in add output: {body}")))?;

        debug!("Imported {} as {}", root.name, root.hash);
        Ok(root.hash)
    }

    async fn pin_add(&self, hash: &str) -> Result<()> {
        self.post("pin/add", &[("arg", hash), ("recursive", "true")])
            .await?;
        Ok(())
    }

    async fn pin_rm(&self, hash: &str) -> Result<()> {
        self.post("pin/rm", &[("arg", hash), ("recursive", "true")])
            .await?;
        Ok(())
    }

    async fn pin_ls(&self) -> Result<HashSet<String>> {
        let pins: PinLsResponse = self
            .post("pin/ls", &[("type", "recursive")])
            .await?
            .json()
            .await?;
        Ok(pins.keys.into_keys().collect())
    }

    async fn shutdown(&self) -> Result<()> {
        self.post("shutdown", &[]).await?;
        Ok(())
    }
}

/// Build a multipart body describing the tree rooted at `root`
///
/// Parts are named with paths relative to the parent of `root`, so the
/// top-level directory itself becomes the root of the import.
async fn directory_form(root: &Path) -> Result<Form> {
    let base = root.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut form = Form::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        form = form.part(
            "file",
            Part::bytes(Vec::new())
                .file_name(part_name(&base, &dir))
                .mime_str("application/x-directory")?,
        );

        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            children.push(entry.path());
        }
        children.sort();

        for child in children {
            if tokio::fs::metadata(&child).await?.is_dir() {
                pending.push(child);
            } else {
                let data = tokio::fs::read(&child).await?;
                form = form.part(
                    "file",
                    Part::bytes(data)
                        .file_name(part_name(&base, &child))
                        .mime_str("application/octet-stream")?,
                );
            }
        }
    }

    Ok(form)
}

fn part_name(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    encode_path(&joined)
}

/// Percent-encode everything except unreserved characters and `/`
fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let api = HttpDaemonApi::new("http://127.0.0.1:5001/", Duration::from_secs(1));
        assert_eq!(api.endpoint("pin/ls"), "http://127.0.0.1:5001/api/v0/pin/ls");
    }

    #[test]
    fn test_part_name_is_relative_to_parent() {
        let base = Path::new("/bundle");
        let name = part_name(base, Path::new("/bundle/QmRoot/assets/app.js"));
        assert_eq!(name, "QmRoot/assets/app.js");
    }

    #[test]
    fn test_encode_path_escapes_spaces() {
        assert_eq!(encode_path("a b/c+d.txt"), "a%20b/c%2Bd.txt");
    }

    #[tokio::test]
    async fn test_unreachable_daemon() {
        // Port 9 (discard) is closed on test machines
        let api = HttpDaemonApi::new("http://127.0.0.1:9", Duration::from_millis(200));
        let err = api.version().await.unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_directory_form_reads_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("QmRoot");
        std::fs::create_dir_all(root.join("assets")).unwrap();
        std::fs::write(root.join("index.html"), b"<html></html>").unwrap();
        std::fs::write(root.join("assets").join("app.js"), b"console.log(1)").unwrap();

        assert!(directory_form(&root).await.is_ok());
        assert!(directory_form(&dir.path().join("missing")).await.is_err());
    }
}
