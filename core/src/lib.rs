//! oidc-session-core: Platform-agnostic OpenID Connect relying-party core
//!
//! Drives the authorization-code flow from redirect through token exchange,
//! verifies the returned ID token, and derives an authorization decision from
//! roles in the access token. It depends only on abstract platform traits
//! (HttpClient, Clock, Environment, SessionStore, Routes) and never imports
//! platform-specific code.

pub mod authz;
pub mod config;
pub mod error;
pub mod flow;
pub mod oidc;
pub mod platform;
pub mod rp;
pub mod session;

#[cfg(test)]
pub mod test_support;

pub use authz::{DecisionEngine, IdentityAttributes};
pub use config::Settings;
pub use error::{OidcError, Result, VerificationCheck};
pub use flow::{FlowDriver, FlowState};
pub use rp::{Authenticated, CallbackParams, RelyingParty};
pub use session::SessionRecord;
