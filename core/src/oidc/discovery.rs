//! OIDC Discovery document fetching
//!
//! Fetches and parses OpenID Connect discovery documents.

use serde::Deserialize;
use url::Url;

use crate::error::{OidcError, Result};
use crate::platform::HttpClient;

/// OIDC Discovery document (partial)
#[derive(Debug, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub jwks_uri: Url,
    #[serde(default)]
    pub userinfo_endpoint: Option<Url>,
    #[serde(default)]
    pub end_session_endpoint: Option<Url>,
    #[serde(default)]
    pub scopes_supported: Option<Vec<String>>,
}

/// Fetch OIDC discovery document for an issuer
pub async fn fetch_discovery(issuer: &str, http: &dyn HttpClient) -> Result<DiscoveryDocument> {
    validate_issuer_url(issuer)?;

    let discovery_url = format!("{}/.well-known/openid-configuration", issuer.trim_end_matches('/'));

    let response = http
        .get(
            &discovery_url,
            &[
                ("Accept", "application/json"),
                ("User-Agent", "oidc-session"),
            ],
        )
        .await
        .map_err(|e| OidcError::provider_unavailable(format!("failed to fetch discovery document: {}", e)))?;

    if response.status != 200 {
        return Err(OidcError::provider_unavailable(format!(
            "failed to fetch discovery document: HTTP {}",
            response.status
        )));
    }

    let doc: DiscoveryDocument = response
        .json()
        .map_err(|e| OidcError::provider_unavailable(format!("invalid discovery document: {}", e)))?;

    // The document must describe the issuer we asked for
    if doc.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
        return Err(OidcError::provider_unavailable(format!(
            "issuer mismatch: expected '{}', got '{}'",
            issuer, doc.issuer
        )));
    }

    Ok(doc)
}

/// Validate issuer URL format per RFC 8414 and OpenID Connect Core 1.0
pub fn validate_issuer_url(issuer: &str) -> Result<()> {
    let url = Url::parse(issuer).map_err(|_| OidcError::config("invalid issuer URL"))?;

    let is_localhost = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"));
    if url.scheme() != "https" && !is_localhost {
        return Err(OidcError::config("issuer must use HTTPS"));
    }

    if url.query().is_some() {
        return Err(OidcError::config("issuer URL must not have query string"));
    }

    if url.fragment().is_some() {
        return Err(OidcError::config("issuer URL must not have fragment"));
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(OidcError::config("issuer URL must not have userinfo"));
    }

    Ok(())
}
