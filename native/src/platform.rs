//! Native platform implementations
//!
//! Implements core platform traits using native Rust libraries:
//! - HttpClient: reqwest
//! - Clock: std::time::SystemTime
//! - Environment: std::env, with `<NAME>_FILE` fallback for secrets
//! - SessionStore: in-memory sessions keyed by a cookie
//! - Routes: absolute URLs under `APP_BASE_URL`

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

use oidc_session_core::error::{OidcError, Result};
use oidc_session_core::platform::{Clock, Environment, HttpClient, HttpResponse, Routes, SessionStore};

/// reqwest-based HTTP client
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn read(response: reqwest::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| OidcError::internal(format!("failed to read response: {}", e)))?
            .to_vec();

        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse> {
        let mut builder = self.client.get(url);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| OidcError::internal(format!("HTTP GET failed: {}", e)))?;

        Self::read(response).await
    }

    async fn post(&self, url: &str, headers: &[(&str, &str)], body: &[u8]) -> Result<HttpResponse> {
        let mut builder = self.client.post(url).body(body.to_vec());
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| OidcError::internal(format!("HTTP POST failed: {}", e)))?;

        Self::read(response).await
    }
}

/// System clock using std::time
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }
}

/// Process environment; secrets may also be mounted as files
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn get_var(&self, name: &str) -> Result<String> {
        std::env::var(name)
            .map_err(|_| OidcError::config(format!("environment variable '{}' not set", name)))
    }

    fn get_secret(&self, name: &str) -> Result<String> {
        if let Ok(value) = std::env::var(name) {
            return Ok(value);
        }

        let path = std::env::var(format!("{}_FILE", name))
            .map_err(|_| OidcError::config(format!("secret '{}' not found in environment", name)))?;
        std::fs::read_to_string(&path)
            .map(|value| value.trim_end().to_string())
            .map_err(|e| OidcError::config(format!("failed to read secret file '{}': {}", path, e)))
    }
}

/// One browser session's key-value map
#[derive(Clone, Default)]
pub struct HostSession {
    values: HashMap<String, serde_json::Value>,
}

impl HostSession {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SessionStore for HostSession {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: serde_json::Value) {
        self.values.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
}

/// Routes of this server, mounted under a public base URL
pub struct HostRoutes {
    base: Url,
}

impl HostRoutes {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    fn absolute(&self, path: &str) -> String {
        self.base
            .join(path)
            .map(String::from)
            .unwrap_or_else(|_| format!("{}{}", self.base, path))
    }
}

impl Routes for HostRoutes {
    fn callback_url(&self) -> String {
        self.absolute("oidc/callback")
    }

    fn post_logout_url(&self) -> String {
        self.absolute("oidc/local_logout")
    }
}
