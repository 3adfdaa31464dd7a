//! Latest-version resolution
//!
//! Every lookup goes to the registry; nothing is cached. A failed lookup
//! is reported to the caller instead of falling back to whatever was
//! served before, so users never silently run an outdated client.

use async_trait::async_trait;
use cid::Cid;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Registry unreachable: {0}")]
    Unreachable(String),

    #[error("No version of {name} published on {network}")]
    NotPublished { name: String, network: String },

    #[error("Invalid registry record: {0}")]
    InvalidRecord(String),
}

/// Naming/registry service mapping `(name, network)` to a content hash
#[async_trait]
pub trait Registry: Send + Sync {
    async fn resolve(&self, name: &str, network: &str) -> Result<String, ResolveError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestRecord {
    #[serde(rename = "contentURI")]
    content_uri: String,
}

/// Registry reached over HTTP through a URL template
///
/// The template contains `{network}` and `{name}` placeholders and must
/// answer with `{"contentURI": "ipfs:<hash>"}`.
pub struct HttpRegistry {
    client: reqwest::Client,
    url_template: String,
}

impl HttpRegistry {
    pub fn new(url_template: impl Into<String>, request_timeout: Duration) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ResolveError::Unreachable(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url_template: url_template.into(),
        })
    }

    fn lookup_url(&self, name: &str, network: &str) -> String {
        self.url_template
            .replace("{network}", network)
            .replace("{name}", name)
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn resolve(&self, name: &str, network: &str) -> Result<String, ResolveError> {
        let url = self.lookup_url(name, network);
        debug!("Registry lookup {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ResolveError::Unreachable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ResolveError::NotPublished {
                name: name.to_string(),
                network: network.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(ResolveError::Unreachable(format!(
                "registry answered HTTP {}",
                response.status()
            )));
        }

        let record: LatestRecord = response
            .json()
            .await
            .map_err(|e| ResolveError::InvalidRecord(e.to_string()))?;
        parse_content_uri(&record.content_uri)
    }
}

/// Extract the hash from an `ipfs:<hash>` content URI
pub fn parse_content_uri(uri: &str) -> Result<String, ResolveError> {
    let (provider, location) = uri
        .split_once(':')
        .ok_or_else(|| ResolveError::InvalidRecord(format!("malformed content URI {uri}")))?;
    if provider != "ipfs" {
        return Err(ResolveError::InvalidRecord(format!(
            "unsupported content provider {provider}"
        )));
    }
    validate_hash(location.trim_start_matches("/ipfs/"))
}

/// Check that `hash` is a well-formed CID and return it normalised
pub fn validate_hash(hash: &str) -> Result<String, ResolveError> {
    let hash = hash.trim();
    hash.parse::<Cid>()
        .map(|_| hash.to_string())
        .map_err(|e| ResolveError::InvalidRecord(format!("{hash} is not a content hash: {e}")))
}

/// Resolves the hash currently published for an application
#[derive(Clone)]
pub struct VersionResolver {
    registry: Arc<dyn Registry>,
}

impl VersionResolver {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }

    /// Ask the registry for the latest hash of `name` on `network`
    pub async fn resolve_latest(&self, name: &str, network: &str) -> Result<String, ResolveError> {
        match self.registry.resolve(name, network).await {
            Ok(hash) => match validate_hash(&hash) {
                Ok(hash) => {
                    info!("Resolved {} on {} to {}", name, network, hash);
                    Ok(hash)
                }
                Err(e) => {
                    warn!("Registry returned an invalid hash for {} on {}: {}", name, network, e);
                    Err(e)
                }
            },
            Err(e) => {
                warn!("Failed to resolve {} on {}: {}", name, network, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockRegistry, MAIN_V1 as MAIN_HASH, RINKEBY_V1 as RINKEBY_HASH};

    #[test]
    fn test_lookup_url_substitution() {
        let registry =
            HttpRegistry::new("https://reg.example/{network}/{name}/latest", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            registry.lookup_url("aragon.aragonpm.eth", "rinkeby"),
            "https://reg.example/rinkeby/aragon.aragonpm.eth/latest"
        );
    }

    #[test]
    fn test_parse_content_uri() {
        assert_eq!(parse_content_uri(&format!("ipfs:{MAIN_HASH}")).unwrap(), MAIN_HASH);
        assert_eq!(
            parse_content_uri(&format!("ipfs:/ipfs/{MAIN_HASH}")).unwrap(),
            MAIN_HASH
        );
        assert!(matches!(
            parse_content_uri(&format!("http:{MAIN_HASH}")),
            Err(ResolveError::InvalidRecord(_))
        ));
        assert!(matches!(
            parse_content_uri("ipfs:not-a-hash"),
            Err(ResolveError::InvalidRecord(_))
        ));
        assert!(parse_content_uri(MAIN_HASH).is_err());
    }

    #[tokio::test]
    async fn test_resolve_latest_queries_every_time() {
        let registry = Arc::new(MockRegistry::new());
        registry.publish("app.eth", "main", MAIN_HASH);
        let resolver = VersionResolver::new(registry.clone());

        assert_eq!(resolver.resolve_latest("app.eth", "main").await.unwrap(), MAIN_HASH);
        registry.publish("app.eth", "main", RINKEBY_HASH);
        assert_eq!(
            resolver.resolve_latest("app.eth", "main").await.unwrap(),
            RINKEBY_HASH
        );
        assert_eq!(registry.calls(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_registry_has_no_fallback() {
        let registry = Arc::new(MockRegistry::new());
        registry.publish("app.eth", "main", MAIN_HASH);
        let resolver = VersionResolver::new(registry.clone());

        resolver.resolve_latest("app.eth", "main").await.unwrap();
        registry.set_unreachable(true);

        let err = resolver.resolve_latest("app.eth", "main").await.unwrap_err();
        assert!(matches!(err, ResolveError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_unknown_network() {
        let registry = Arc::new(MockRegistry::new());
        registry.publish("app.eth", "main", MAIN_HASH);
        let resolver = VersionResolver::new(registry);

        let err = resolver.resolve_latest("app.eth", "kovan").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotPublished { .. }));
    }

    /// Log sink shared between the subscriber and the test
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_garbage_hash_is_rejected() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let registry = Arc::new(MockRegistry::new());
        registry.publish("app.eth", "main", "definitely not a cid");
        let resolver = VersionResolver::new(registry);

        let err = resolver.resolve_latest("app.eth", "main").await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidRecord(_)));

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"));
        assert!(output.contains("invalid hash for app.eth on main"));
    }
}
