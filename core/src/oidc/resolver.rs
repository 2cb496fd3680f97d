//! Provider metadata resolution
//!
//! Discovery plus JWKS, cached per issuer. Entries are never evicted by a
//! failed fetch; a failure only means "provider unavailable" for this call.

use std::collections::HashMap;
use std::sync::Arc;

use jsonwebtoken::jwk::JwkSet;
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::discovery::fetch_discovery;
use super::jwks::fetch_jwks;
use crate::config::ALLOWED_SCOPES;
use crate::error::{OidcError, Result};
use crate::platform::HttpClient;

/// Endpoints and signing keys of one issuer
#[derive(Debug, Clone)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub userinfo_endpoint: Option<Url>,
    pub end_session_endpoint: Option<Url>,
    pub jwks_uri: Url,
    pub jwks: JwkSet,
    pub scopes_supported: Vec<String>,
}

/// Outcome of a metadata lookup
#[derive(Debug, Clone)]
pub enum Resolution {
    Available(Arc<ProviderMetadata>),
    Unavailable { reason: String },
}

impl Resolution {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn into_result(self) -> Result<Arc<ProviderMetadata>> {
        match self {
            Self::Available(metadata) => Ok(metadata),
            Self::Unavailable { reason } => Err(OidcError::provider_unavailable(reason)),
        }
    }
}

/// Per-issuer metadata cache, safe to share across concurrent attempts
#[derive(Default)]
pub struct ProviderMetadataResolver {
    cache: RwLock<HashMap<String, Arc<ProviderMetadata>>>,
}

impl ProviderMetadataResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver pre-seeded with fixed metadata (no network access needed)
    pub fn with_static(metadata: ProviderMetadata) -> Self {
        let resolver = Self::new();
        resolver
            .cache
            .write()
            .insert(cache_key(&metadata.issuer), Arc::new(metadata));
        resolver
    }

    /// Look up metadata for an issuer, fetching on first use
    #[instrument(skip(self, http))]
    pub async fn resolve(&self, issuer: &str, http: &dyn HttpClient) -> Resolution {
        let key = cache_key(issuer);

        let cached = self.cache.read().get(&key).cloned();
        if let Some(metadata) = cached {
            debug!("provider metadata cache hit");
            return Resolution::Available(metadata);
        }

        match fetch_metadata(issuer, http).await {
            Ok(metadata) => {
                let metadata = Arc::new(metadata);
                // Concurrent first fetches may both land here; last write wins
                self.cache.write().insert(key, metadata.clone());
                info!(keys = metadata.jwks.keys.len(), "provider metadata discovered");
                Resolution::Available(metadata)
            }
            Err(e) => {
                warn!(error = %e, "provider metadata unavailable");
                Resolution::Unavailable { reason: e.to_string() }
            }
        }
    }

    /// Drop a cached entry so the next lookup refetches it
    pub fn invalidate(&self, issuer: &str) {
        self.cache.write().remove(&cache_key(issuer));
    }
}

fn cache_key(issuer: &str) -> String {
    issuer.trim_end_matches('/').to_string()
}

async fn fetch_metadata(issuer: &str, http: &dyn HttpClient) -> Result<ProviderMetadata> {
    let doc = fetch_discovery(issuer, http).await?;
    let jwks = fetch_jwks(doc.jwks_uri.as_str(), http).await?;

    Ok(ProviderMetadata {
        issuer: doc.issuer,
        authorization_endpoint: doc.authorization_endpoint,
        token_endpoint: doc.token_endpoint,
        userinfo_endpoint: doc.userinfo_endpoint,
        end_session_endpoint: doc.end_session_endpoint,
        jwks_uri: doc.jwks_uri,
        jwks,
        // scopes_supported is only RECOMMENDED; assume the standard set
        scopes_supported: doc
            .scopes_supported
            .unwrap_or_else(|| ALLOWED_SCOPES.iter().map(|s| s.to_string()).collect()),
    })
}
