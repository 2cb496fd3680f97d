//! Authorization-code flow driver
//!
//! Builds the authorization and end-session redirects and exchanges
//! authorization codes and refresh tokens at the provider's token endpoint.
//!
//! ```text
//! Unstarted -> AwaitingCallback -> AwaitingTokenExchange -> Complete
//!                    any failed exchange -> Failed (absorbing)
//! ```

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};
use url::form_urlencoded;
use url::Url;

use crate::config::{Settings, ALLOWED_SCOPES};
use crate::error::{OidcError, Result, VerificationCheck};
use crate::oidc::ProviderMetadata;
use crate::platform::{HttpClient, Routes};
use crate::session::{SessionRecord, TokenSet};

/// Position of one authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Unstarted,
    AwaitingCallback,
    AwaitingTokenExchange,
    Complete,
    Failed,
}

/// Successful token endpoint response
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

/// OAuth2 error response (RFC 6749 section 5.2)
#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Drives one attempt; the persistent part of its state lives in the session record
pub struct FlowDriver<'a> {
    record: SessionRecord<'a>,
    settings: &'a Settings,
    metadata: &'a ProviderMetadata,
    http: &'a dyn HttpClient,
    routes: &'a dyn Routes,
    failed: bool,
}

impl<'a> FlowDriver<'a> {
    pub fn new(
        record: SessionRecord<'a>,
        settings: &'a Settings,
        metadata: &'a ProviderMetadata,
        http: &'a dyn HttpClient,
        routes: &'a dyn Routes,
    ) -> Self {
        Self {
            record,
            settings,
            metadata,
            http,
            routes,
            failed: false,
        }
    }

    pub fn record(&self) -> &SessionRecord<'a> {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut SessionRecord<'a> {
        &mut self.record
    }

    pub fn state(&self) -> FlowState {
        if self.failed {
            FlowState::Failed
        } else if self.record.is_complete() {
            FlowState::Complete
        } else if self.record.code().is_some() {
            FlowState::AwaitingTokenExchange
        } else if self.record.stored_nonce().is_some() {
            FlowState::AwaitingCallback
        } else {
            FlowState::Unstarted
        }
    }

    /// Authorization endpoint URL to redirect the browser to.
    ///
    /// Calling this again before the callback returns the same nonce/state.
    pub fn build_authorization_redirect(&mut self) -> Result<Url> {
        match self.state() {
            FlowState::Unstarted | FlowState::AwaitingCallback => {}
            other => {
                return Err(OidcError::invalid_state(format!(
                    "cannot start authorization from {:?}",
                    other
                )))
            }
        }

        let nonce = self.record.nonce();
        let state = self.record.state().unwrap_or(nonce.as_str()).to_string();
        let scope = negotiated_scope(self.metadata, self.settings).join(" ");

        let mut url = self.metadata.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.routes.callback_url())
            .append_pair("scope", &scope)
            .append_pair("state", &state)
            .append_pair("nonce", &nonce);

        info!(scope = %scope, "built authorization redirect");
        Ok(url)
    }

    /// Provider logout URL, if the provider advertises an end-session endpoint
    pub fn build_end_session_redirect(&self) -> Option<Url> {
        let mut url = self.metadata.end_session_endpoint.clone()?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(session_state) = self.record.session_state() {
                query.append_pair("session_state", session_state);
            }
            query.append_pair("post_logout_redirect_uri", &self.routes.post_logout_url());
            if let Some(id_token) = self.record.id_token() {
                query.append_pair("id_token_hint", id_token);
            }
        }
        Some(url)
    }

    /// Compare the `state` echoed on the callback with the stored one
    pub fn check_state(&self, returned: Option<&str>) -> Result<()> {
        let matches = match (self.record.state(), returned) {
            (Some(expected), Some(returned)) => expected.as_bytes().ct_eq(returned.as_bytes()).into(),
            _ => false,
        };

        if matches {
            Ok(())
        } else {
            warn!("callback state does not match the stored state");
            Err(OidcError::verification(VerificationCheck::State, "callback state mismatch"))
        }
    }

    /// Record the code delivered on the callback
    pub fn receive_callback(&mut self, code: &str, session_state: Option<&str>) -> Result<()> {
        let state = self.state();
        if state != FlowState::AwaitingCallback {
            return Err(OidcError::invalid_state(format!(
                "unexpected callback in {:?}",
                state
            )));
        }

        self.record.update(code, session_state.map(str::to_string));
        Ok(())
    }

    /// Exchange the stored authorization code for tokens
    #[instrument(skip(self))]
    pub async fn exchange_code(&mut self) -> Result<()> {
        let state = self.state();
        if state != FlowState::AwaitingTokenExchange {
            return Err(OidcError::invalid_state(format!(
                "no authorization code to exchange in {:?}",
                state
            )));
        }

        let code = self.record.code().unwrap_or_default().to_string();
        let redirect_uri = self.routes.callback_url();
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
        ];

        let result = self.request_tokens(&params).await;
        let tokens = match result {
            Ok(tokens) if tokens.id_token.as_deref().is_some_and(|t| !t.is_empty()) => tokens,
            Ok(_) => {
                self.failed = true;
                return Err(OidcError::token_exchange("token response did not include an id_token"));
            }
            Err(e) => {
                self.failed = true;
                return Err(e);
            }
        };

        self.record.store_tokens(tokens);
        info!("authorization code exchanged");
        Ok(())
    }

    /// Obtain a new token set with the stored refresh token.
    ///
    /// Returns whether the provider issued a new ID token. On failure the
    /// previously stored tokens are kept untouched.
    #[instrument(skip(self))]
    pub async fn refresh(&mut self) -> Result<bool> {
        if self.state() != FlowState::Complete {
            return Err(OidcError::invalid_state("refresh requires a completed flow"));
        }

        let refresh_token = self
            .record
            .refresh_token()
            .ok_or(OidcError::missing_token("refresh_token"))?
            .to_string();
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];

        let mut tokens = self.request_tokens(&params).await?;
        // An empty id_token must not overwrite the stored one
        tokens.id_token = tokens.id_token.filter(|t| !t.is_empty());
        let new_id_token = tokens.id_token.is_some();
        self.record.store_tokens(tokens);
        info!(new_id_token, "tokens refreshed");
        Ok(new_id_token)
    }

    /// POST a grant to the token endpoint with HTTP Basic client authentication
    async fn request_tokens(&self, params: &[(&str, &str)]) -> Result<TokenSet> {
        let body = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();

        let credentials = format!(
            "{}:{}",
            form_urlencoded::byte_serialize(self.settings.client_id.as_bytes()).collect::<String>(),
            form_urlencoded::byte_serialize(self.settings.client_secret.as_bytes()).collect::<String>(),
        );
        let auth_header = format!("Basic {}", STANDARD.encode(credentials));
        let headers = [
            ("Authorization", auth_header.as_str()),
            ("Content-Type", "application/x-www-form-urlencoded"),
            ("Accept", "application/json"),
            ("User-Agent", "oidc-session"),
        ];

        let response = self
            .http
            .post(self.metadata.token_endpoint.as_str(), &headers, body.as_bytes())
            .await
            .map_err(|e| OidcError::token_exchange(format!("failed to call token endpoint: {}", e)))?;

        if !response.is_success() {
            let message = match response.json::<TokenErrorResponse>() {
                Ok(err) => match err.error_description {
                    Some(description) => format!("{}: {}", err.error, description),
                    None => err.error,
                },
                Err(_) => format!("token endpoint returned HTTP {}", response.status),
            };
            warn!(status = response.status, error = %message, "token endpoint rejected grant");
            return Err(OidcError::token_exchange(message));
        }

        let tokens: TokenResponse = response
            .json()
            .map_err(|e| OidcError::token_exchange(format!("invalid token response: {}", e)))?;

        if let Some(token_type) = &tokens.token_type {
            if !token_type.eq_ignore_ascii_case("bearer") {
                return Err(OidcError::token_exchange(format!(
                    "unsupported token type '{}'",
                    token_type
                )));
            }
        }

        Ok(TokenSet {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            id_token: tokens.id_token,
        })
    }
}

/// Scopes to request: provider-supported, limited to the allow-list and any
/// configured restriction. Provider order is kept.
pub fn negotiated_scope(metadata: &ProviderMetadata, settings: &Settings) -> Vec<String> {
    let restriction = settings.scope_restriction();

    let scopes: Vec<String> = metadata
        .scopes_supported
        .iter()
        .filter(|scope| ALLOWED_SCOPES.contains(&scope.as_str()))
        .filter(|scope| restriction.is_empty() || restriction.contains(&scope.as_str()))
        .cloned()
        .collect();

    if scopes.is_empty() {
        vec!["openid".to_string()]
    } else {
        scopes
    }
}
