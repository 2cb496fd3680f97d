//! Session record
//!
//! The state that has to survive the redirect to the provider and back. Every
//! mutation is followed by a write to the host session store, since the flow
//! spans at least two independent requests.

use serde::{Deserialize, Serialize};

use crate::config::SESSION_KEY;
use crate::platform::{NonceSource, SessionStore};

/// Persisted fields, stored as a flat map under [`SESSION_KEY`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Raw tokens returned by a successful exchange
#[derive(Debug, Clone, Default)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
}

/// Session record bound to the host's session store for one request
pub struct SessionRecord<'s> {
    store: &'s mut dyn SessionStore,
    nonces: &'s dyn NonceSource,
    fields: SessionFields,
}

impl<'s> SessionRecord<'s> {
    /// Restore an in-flight attempt from the store, or start empty
    pub fn spawn(store: &'s mut dyn SessionStore, nonces: &'s dyn NonceSource) -> Self {
        let fields = match store.get(SESSION_KEY) {
            Some(value) => match serde_json::from_value::<SessionFields>(value) {
                Ok(fields) => fields,
                Err(e) => {
                    tracing::warn!(error = %e, "discarding unreadable session record");
                    SessionFields::default()
                }
            },
            None => SessionFields::default(),
        };

        Self {
            store,
            nonces,
            fields,
        }
    }

    pub fn fields(&self) -> &SessionFields {
        &self.fields
    }

    pub fn state(&self) -> Option<&str> {
        self.fields.state.as_deref()
    }

    pub fn code(&self) -> Option<&str> {
        self.fields.code.as_deref()
    }

    pub fn session_state(&self) -> Option<&str> {
        self.fields.session_state.as_deref()
    }

    pub fn id_token(&self) -> Option<&str> {
        self.fields.id_token.as_deref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.fields.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.fields.refresh_token.as_deref()
    }

    /// Stored nonce, without generating one
    pub fn stored_nonce(&self) -> Option<&str> {
        self.fields.nonce.as_deref()
    }

    /// Nonce for this attempt, generated and persisted on first use.
    ///
    /// `state` carries the same value; both must round-trip through the
    /// provider unmodified.
    pub fn nonce(&mut self) -> String {
        if let Some(nonce) = &self.fields.nonce {
            return nonce.clone();
        }

        let nonce = self.nonces.generate();
        self.fields.nonce = Some(nonce.clone());
        self.fields.state = Some(nonce.clone());
        self.persist();
        nonce
    }

    /// Record the callback payload. Ignored when no flow was started.
    pub fn update(&mut self, code: impl Into<String>, session_state: Option<String>) {
        if self.fields.nonce.is_none() {
            tracing::warn!("ignoring callback for a session with no authentication in progress");
            return;
        }

        self.fields.code = Some(code.into());
        self.fields.session_state = session_state;
        self.persist();
    }

    /// Record an acquired token set.
    ///
    /// Tokens the provider did not return (refresh/ID token on a refresh
    /// grant) keep their previous value.
    pub fn store_tokens(&mut self, tokens: TokenSet) {
        self.fields.access_token = Some(tokens.access_token);
        if let Some(refresh_token) = tokens.refresh_token {
            self.fields.refresh_token = Some(refresh_token);
        }
        if let Some(id_token) = tokens.id_token {
            self.fields.id_token = Some(id_token);
        }
        self.persist();
    }

    /// True once an ID token has been stored
    pub fn is_complete(&self) -> bool {
        self.fields.id_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn persist(&mut self) {
        match serde_json::to_value(&self.fields) {
            Ok(value) => self.store.set(SESSION_KEY, value),
            Err(e) => tracing::error!(error = %e, "failed to serialize session record"),
        }
    }

    /// Remove all record state from the store (logout)
    pub fn destroy(&mut self) {
        self.store.remove(SESSION_KEY);
        self.fields = SessionFields::default();
    }
}
