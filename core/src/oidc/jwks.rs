//! JWKS (JSON Web Key Set) handling
//!
//! Fetches the provider's signing keys for ID-token validation.

use jsonwebtoken::jwk::JwkSet;

use crate::error::{OidcError, Result};
use crate::platform::HttpClient;

/// Fetch JWKS from a URI
pub async fn fetch_jwks(jwks_uri: &str, http: &dyn HttpClient) -> Result<JwkSet> {
    let response = http
        .get(
            jwks_uri,
            &[
                ("Accept", "application/json"),
                ("User-Agent", "oidc-session"),
            ],
        )
        .await
        .map_err(|e| OidcError::provider_unavailable(format!("failed to fetch JWKS: {}", e)))?;

    if response.status != 200 {
        return Err(OidcError::provider_unavailable(format!(
            "failed to fetch JWKS: HTTP {}",
            response.status
        )));
    }

    let jwks: JwkSet = response
        .json()
        .map_err(|e| OidcError::provider_unavailable(format!("invalid JWKS: {}", e)))?;

    Ok(jwks)
}
