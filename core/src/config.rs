//! Configuration and secrets management

use crate::error::{OidcError, Result};
use crate::platform::Environment;

/// Session-store slot holding the serialized session record
pub const SESSION_KEY: &str = "oidc_session";

/// Scopes the relying party will ever request
pub const ALLOWED_SCOPES: [&str; 4] = ["openid", "email", "profile", "address"];

/// Relying-party configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Settings {
    /// Issuer URL (e.g., "https://idp.example/realms/r1")
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Optional whitespace-separated scope restriction
    pub scope: Option<String>,
    /// ID-token claim used as the stable external identifier
    pub unique_id_claim: String,
    /// Role granting the administrator flag
    pub admin_role: String,
    /// Comma-separated roles that constitute "authorized"
    pub access_roles: String,
}

impl Settings {
    pub fn new(
        issuer_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: None,
            unique_id_claim: "sub".to_string(),
            admin_role: String::new(),
            access_roles: String::new(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_unique_id_claim(mut self, claim: impl Into<String>) -> Self {
        self.unique_id_claim = claim.into();
        self
    }

    pub fn with_admin_role(mut self, role: impl Into<String>) -> Self {
        self.admin_role = role.into();
        self
    }

    pub fn with_access_roles(mut self, roles: impl Into<String>) -> Self {
        self.access_roles = roles.into();
        self
    }

    /// Load configuration from platform environment
    pub fn from_env(env: &dyn Environment) -> Result<Self> {
        let settings = Self {
            issuer_url: env
                .get_var("OIDC_ISSUER_URL")
                .map_err(|_| OidcError::config("OIDC_ISSUER_URL not configured"))?,
            client_id: env
                .get_var("OIDC_CLIENT_ID")
                .map_err(|_| OidcError::config("OIDC_CLIENT_ID not configured"))?,
            client_secret: env
                .get_secret("OIDC_CLIENT_SECRET")
                .map_err(|_| OidcError::config("OIDC_CLIENT_SECRET secret not set"))?,
            scope: env.get_var("OIDC_SCOPE").ok().filter(|s| !s.trim().is_empty()),
            unique_id_claim: env
                .get_var("OIDC_UNIQUE_ID_CLAIM")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "sub".to_string()),
            admin_role: env.get_var("OIDC_ADMIN_ROLE").unwrap_or_default(),
            access_roles: env.get_var("OIDC_ACCESS_ROLES").unwrap_or_default(),
        };

        if settings.access_roles.trim().is_empty() {
            tracing::warn!("OIDC_ACCESS_ROLES is empty; no user will be authorized");
        }

        Ok(settings)
    }

    /// Configured scope restriction, split on whitespace
    pub fn scope_restriction(&self) -> Vec<&str> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }
}
