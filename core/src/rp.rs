//! Relying-party entry points
//!
//! Sequences the components for each request the host routes to us: login,
//! callback, refresh, logout. A failed callback discards an attempt in
//! progress so the next one starts from scratch; a completed session is left
//! alone.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use url::Url;

use crate::authz::{DecisionEngine, IdentityAttributes};
use crate::config::Settings;
use crate::error::{OidcError, Result, VerificationCheck};
use crate::flow::{FlowDriver, FlowState};
use crate::oidc::{verify_session_with, ExpiryCheck, ProviderMetadata, ProviderMetadataResolver};
use crate::platform::{Clock, HttpClient, NonceSource, Routes, SessionStore, UuidNonce};
use crate::session::SessionRecord;

/// Query parameters delivered to the callback route
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub session_state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Collect the callback parameters from a query string
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => params.code = value,
                "state" => params.state = value,
                "session_state" => params.session_state = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        params
    }
}

/// Outcome of a verified session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub identity: IdentityAttributes,
    pub authorized: bool,
}

/// One configured relying party, shared by all requests
pub struct RelyingParty {
    settings: Settings,
    resolver: Arc<ProviderMetadataResolver>,
    http: Box<dyn HttpClient>,
    clock: Box<dyn Clock>,
    routes: Box<dyn Routes>,
    nonces: Box<dyn NonceSource>,
}

impl RelyingParty {
    pub fn new(
        settings: Settings,
        http: Box<dyn HttpClient>,
        clock: Box<dyn Clock>,
        routes: Box<dyn Routes>,
    ) -> Self {
        Self {
            settings,
            resolver: Arc::new(ProviderMetadataResolver::new()),
            http,
            clock,
            routes,
            nonces: Box::new(UuidNonce),
        }
    }

    /// Share a metadata resolver (or a pre-seeded one) with other instances
    pub fn with_resolver(mut self, resolver: Arc<ProviderMetadataResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_nonce_source(mut self, nonces: Box<dyn NonceSource>) -> Self {
        self.nonces = nonces;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    async fn metadata(&self) -> Result<Arc<ProviderMetadata>> {
        self.resolver
            .resolve(&self.settings.issuer_url, self.http.as_ref())
            .await
            .into_result()
    }

    fn driver<'a>(&'a self, store: &'a mut dyn SessionStore, metadata: &'a ProviderMetadata) -> FlowDriver<'a> {
        let record = SessionRecord::spawn(store, self.nonces.as_ref());
        FlowDriver::new(
            record,
            &self.settings,
            metadata,
            self.http.as_ref(),
            self.routes.as_ref(),
        )
    }

    /// Start (or resume) an attempt and return the provider redirect
    #[instrument(skip_all)]
    pub async fn login(&self, store: &mut dyn SessionStore) -> Result<Url> {
        let metadata = self.metadata().await?;
        let mut driver = self.driver(store, &metadata);

        if !matches!(driver.state(), FlowState::Unstarted | FlowState::AwaitingCallback) {
            info!(state = ?driver.state(), "discarding previous session before new login");
            driver.record_mut().destroy();
        }

        driver.build_authorization_redirect()
    }

    /// Handle the provider's redirect back: exchange, verify, decide
    #[instrument(skip_all)]
    pub async fn callback(&self, store: &mut dyn SessionStore, params: CallbackParams) -> Result<Authenticated> {
        let metadata = self.metadata().await?;
        let mut driver = self.driver(store, &metadata);
        let in_progress = matches!(
            driver.state(),
            FlowState::AwaitingCallback | FlowState::AwaitingTokenExchange
        );

        match self.complete_callback(&mut driver, &metadata, params).await {
            Ok(authenticated) => {
                info!(authorized = authenticated.authorized, "authentication complete");
                Ok(authenticated)
            }
            Err(e) if in_progress => {
                warn!(error = %e, "authentication failed; discarding session");
                driver.record_mut().destroy();
                Err(e)
            }
            // A stray callback must not end a session it did not start
            Err(e) => {
                warn!(error = %e, state = ?driver.state(), "ignoring callback outside an attempt");
                Err(e)
            }
        }
    }

    async fn complete_callback(
        &self,
        driver: &mut FlowDriver<'_>,
        metadata: &ProviderMetadata,
        params: CallbackParams,
    ) -> Result<Authenticated> {
        if let Some(error) = params.error {
            let message = match params.error_description {
                Some(description) => format!("provider returned {}: {}", error, description),
                None => format!("provider returned {}", error),
            };
            return Err(OidcError::token_exchange(message));
        }

        driver.check_state(params.state.as_deref())?;
        let code = params
            .code
            .ok_or_else(|| OidcError::invalid_state("callback without authorization code"))?;
        driver.receive_callback(&code, params.session_state.as_deref())?;
        driver.exchange_code().await?;

        self.decide(driver.record(), metadata, ExpiryCheck::Enforce)
    }

    /// Re-verify the tokens of an already completed session.
    ///
    /// An expired ID token keeps the session so the host can still
    /// [`refresh`](Self::refresh) it; any other failure discards it.
    #[instrument(skip_all)]
    pub async fn authenticate(&self, store: &mut dyn SessionStore) -> Result<Option<Authenticated>> {
        let metadata = self.metadata().await?;
        let mut driver = self.driver(store, &metadata);

        if driver.state() != FlowState::Complete {
            return Ok(None);
        }

        match self.decide(driver.record(), &metadata, ExpiryCheck::Enforce) {
            Ok(authenticated) => Ok(Some(authenticated)),
            Err(e) if e.verification_check() == Some(VerificationCheck::Expired) => {
                info!("ID token expired; session kept for refresh");
                Err(e)
            }
            Err(e) => {
                driver.record_mut().destroy();
                Err(e)
            }
        }
    }

    /// Refresh the token set and re-verify it.
    ///
    /// A rejected refresh keeps the previous tokens; a refreshed token set
    /// that fails verification discards the session. An ID token the
    /// provider did not reissue is not checked for expiry again.
    #[instrument(skip_all)]
    pub async fn refresh(&self, store: &mut dyn SessionStore) -> Result<Authenticated> {
        let metadata = self.metadata().await?;
        let mut driver = self.driver(store, &metadata);

        let expiry = if driver.refresh().await? {
            ExpiryCheck::Enforce
        } else {
            ExpiryCheck::Skip
        };

        match self.decide(driver.record(), &metadata, expiry) {
            Ok(authenticated) => Ok(authenticated),
            Err(e) => {
                warn!(error = %e, "refreshed tokens failed verification; discarding session");
                driver.record_mut().destroy();
                Err(e)
            }
        }
    }

    /// Provider end-session redirect (if any); always clears the local session.
    ///
    /// When the provider is unavailable the local session is still cleared and
    /// the error is returned.
    #[instrument(skip_all)]
    pub async fn logout(&self, store: &mut dyn SessionStore) -> Result<Option<Url>> {
        let metadata = match self.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                SessionRecord::spawn(store, self.nonces.as_ref()).destroy();
                return Err(e);
            }
        };

        let mut driver = self.driver(store, &metadata);
        let redirect = driver.build_end_session_redirect();
        driver.record_mut().destroy();
        info!(end_session = redirect.is_some(), "logged out");
        Ok(redirect)
    }

    fn decide(
        &self,
        record: &SessionRecord<'_>,
        metadata: &ProviderMetadata,
        expiry: ExpiryCheck,
    ) -> Result<Authenticated> {
        let claims = verify_session_with(record, &self.settings, metadata, self.clock.as_ref(), expiry)?;

        // One engine per decision keeps its memo private to this token set
        let engine = DecisionEngine::new(&self.settings);
        Ok(Authenticated {
            identity: engine.identity_attributes(&claims),
            authorized: engine.is_authorized(&claims),
        })
    }
}
