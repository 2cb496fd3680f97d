//! Platform abstraction traits
//!
//! These traits define the boundary between the relying-party core and the
//! host it is embedded in (web framework session, routing, HTTP transport).

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::Result;

/// HTTP client for outbound requests (discovery, JWKS, token endpoint)
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse>;
    async fn post(&self, url: &str, headers: &[(&str, &str)], body: &[u8]) -> Result<HttpResponse>;
}

/// HTTP response from an outbound request
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Parse body as UTF-8 string
    pub fn text(&self) -> std::result::Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.body.clone())
    }

    /// Parse body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Clock for current time (enables testing with deterministic timestamps)
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

/// Environment/secrets access
pub trait Environment {
    fn get_var(&self, name: &str) -> Result<String>;
    fn get_secret(&self, name: &str) -> Result<String>;
}

/// The host's per-user session, seen as a mutable key-value map
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&mut self, key: &str, value: serde_json::Value);
    fn remove(&mut self, key: &str);
}

/// Absolute URLs owned by the host's router
pub trait Routes: Send + Sync {
    /// Used as `redirect_uri` on the authorization and token requests
    fn callback_url(&self) -> String;
    /// Where the provider sends the browser after end-session
    fn post_logout_url(&self) -> String;
}

/// Source of fresh nonce values
pub trait NonceSource: Send + Sync {
    fn generate(&self) -> String;
}

/// Random UUID v4 nonces
pub struct UuidNonce;

impl NonceSource for UuidNonce {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
