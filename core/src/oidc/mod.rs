//! OIDC (OpenID Connect) module
//!
//! Provider discovery, JWKS fetching, metadata caching and ID-token verification.

mod discovery;
mod jwks;
mod resolver;
mod verify;

pub use discovery::{fetch_discovery, validate_issuer_url, DiscoveryDocument};
pub use jwks::fetch_jwks;
pub use resolver::{ProviderMetadata, ProviderMetadataResolver, Resolution};
pub use verify::{verify_session, verify_session_with, ExpiryCheck, IdTokenClaims, TokenVerifier, VerifiedClaims};
