//! # Discovery Documents
//!
//! Fetches OpenID discovery documents and keeps successful responses in a
//! per-URI cache for a bounded time.

use super::ResolutionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// The subset of an OpenID discovery document the controller uses
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DiscoveryDocument {
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

/// Endpoints of an identity provider, required fields present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProvider {
    pub issuer: String,
    pub jwks_uri: String,
    pub token_endpoint: String,
    pub authorization_endpoint: Option<String>,
    pub end_session_endpoint: Option<String>,
}

impl DiscoveryDocument {
    /// Check required fields. Authorization and end-session endpoints are
    /// mandatory only for the login flow.
    pub fn into_provider(
        self,
        uri: &str,
        login_required: bool,
    ) -> Result<IdentityProvider, ResolutionError> {
        let (Some(issuer), Some(jwks_uri), Some(token_endpoint)) =
            (self.issuer, self.jwks_uri, self.token_endpoint)
        else {
            return Err(ResolutionError::MalformedDiscoveryDocument {
                uri: uri.to_string(),
            });
        };

        if login_required
            && (self.authorization_endpoint.is_none() || self.end_session_endpoint.is_none())
        {
            return Err(ResolutionError::LoginUnsupported { issuer });
        }

        Ok(IdentityProvider {
            issuer,
            jwks_uri,
            token_endpoint,
            authorization_endpoint: self.authorization_endpoint,
            end_session_endpoint: self.end_session_endpoint,
        })
    }
}

#[async_trait]
pub trait DiscoveryResolver: Send + Sync {
    async fn resolve(&self, well_known_uri: &str) -> Result<DiscoveryDocument, ResolutionError>;
}

#[derive(Debug, Clone)]
struct CachedDocument {
    document: DiscoveryDocument,
    fetched_at: Instant,
}

/// Fetches discovery documents over HTTP.
#[derive(Clone)]
pub struct HttpDiscoveryResolver {
    client: reqwest::Client,
    ttl: Duration,
    cache: Arc<Mutex<HashMap<String, CachedDocument>>>,
}

impl std::fmt::Debug for HttpDiscoveryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDiscoveryResolver")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl HttpDiscoveryResolver {
    /// # Errors
    /// Fails when the HTTP client cannot be built.
    pub fn new(timeout: Duration, ttl: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            client,
            ttl,
            cache: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn cached(&self, uri: &str) -> Option<DiscoveryDocument> {
        let cache = self.cache.lock().ok()?;
        cache
            .get(uri)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.document.clone())
    }

    fn remember(&self, uri: &str, document: &DiscoveryDocument) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                uri.to_string(),
                CachedDocument {
                    document: document.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }
    }
}

#[async_trait]
impl DiscoveryResolver for HttpDiscoveryResolver {
    async fn resolve(&self, well_known_uri: &str) -> Result<DiscoveryDocument, ResolutionError> {
        if let Some(document) = self.cached(well_known_uri) {
            debug!("Using cached discovery document for {}", well_known_uri);
            return Ok(document);
        }

        info!("Fetching discovery document from {}", well_known_uri);
        let unreachable = |message: String| ResolutionError::DiscoveryUnavailable {
            uri: well_known_uri.to_string(),
            message,
        };

        let response = self
            .client
            .get(well_known_uri)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unreachable(format!("HTTP {status}")));
        }

        let document: DiscoveryDocument = response.json().await.map_err(|e| {
            debug!("Discovery document from {} is not valid JSON: {}", well_known_uri, e);
            ResolutionError::MalformedDiscoveryDocument {
                uri: well_known_uri.to_string(),
            }
        })?;

        self.remember(well_known_uri, &document);
        Ok(document)
    }
}
