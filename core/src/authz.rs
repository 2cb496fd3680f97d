//! Authorization decision
//!
//! Maps verified claims to identity attributes and an access decision by
//! comparing role sets taken from the access token's `realm_access.roles`.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::Settings;
use crate::oidc::VerifiedClaims;

/// Normalized identity handed to user provisioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAttributes {
    pub oidc_identifier: Option<String>,
    pub login: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub mail: Option<String>,
    pub admin: bool,
}

/// Values derived from one verified token set
struct Derived {
    id_token: String,
    access_token: String,
    identifier: Option<String>,
    roles: BTreeSet<String>,
}

/// Role-based decisions over one verified token set.
///
/// Cheap to build; create one per decision so the memo never outlives the
/// claims it was derived from.
pub struct DecisionEngine {
    admin_role: String,
    access_roles: BTreeSet<String>,
    unique_id_claim: String,
    memo: Mutex<Option<Derived>>,
}

impl DecisionEngine {
    pub fn new(settings: &Settings) -> Self {
        Self {
            admin_role: settings.admin_role.trim().to_lowercase(),
            access_roles: parse_role_list(&settings.access_roles),
            unique_id_claim: settings.unique_id_claim.clone(),
            memo: Mutex::new(None),
        }
    }

    /// Stable external identifier taken from the configured ID-token claim
    pub fn unique_identifier(&self, claims: &VerifiedClaims) -> Option<String> {
        self.with_derived(claims, |derived| derived.identifier.clone())
    }

    /// Lower-cased roles of the access token
    pub fn roles(&self, claims: &VerifiedClaims) -> BTreeSet<String> {
        self.with_derived(claims, |derived| derived.roles.clone())
    }

    pub fn identity_attributes(&self, claims: &VerifiedClaims) -> IdentityAttributes {
        let attributes = claims.id_attributes();
        let admin = !self.admin_role.is_empty()
            && self.with_derived(claims, |derived| derived.roles.contains(&self.admin_role));

        IdentityAttributes {
            oidc_identifier: self.unique_identifier(claims),
            login: string_claim(attributes, "preferred_username"),
            firstname: string_claim(attributes, "given_name"),
            lastname: string_claim(attributes, "family_name"),
            mail: string_claim(attributes, "email"),
            admin,
        }
    }

    /// True iff the configured allow-list and the token's roles overlap.
    ///
    /// An empty allow-list never authorizes anyone.
    pub fn is_authorized(&self, claims: &VerifiedClaims) -> bool {
        self.with_derived(claims, |derived| !self.access_roles.is_disjoint(&derived.roles))
    }

    /// Run `f` on the derived values, recomputing them when the token set changed
    fn with_derived<T>(&self, claims: &VerifiedClaims, f: impl FnOnce(&Derived) -> T) -> T {
        let (id_token, access_token) = claims.source_tokens();
        let mut memo = self.memo.lock();

        let derived = memo
            .take()
            .filter(|derived| derived.id_token == id_token && derived.access_token == access_token)
            .unwrap_or_else(|| Derived {
                id_token: id_token.to_string(),
                access_token: access_token.to_string(),
                identifier: claim_as_identifier(claims.id_attributes().get(&self.unique_id_claim)),
                roles: realm_roles(claims.access_attributes()),
            });

        let result = f(&derived);
        *memo = Some(derived);
        result
    }
}

/// Parse a comma-separated role list: trimmed, lower-cased, empties dropped
pub fn parse_role_list(list: &str) -> BTreeSet<String> {
    list.split(',')
        .map(|role| role.trim().to_lowercase())
        .filter(|role| !role.is_empty())
        .collect()
}

/// `realm_access.roles`, lower-cased; absent claim means no roles
fn realm_roles(access: &Map<String, Value>) -> BTreeSet<String> {
    access
        .get("realm_access")
        .and_then(|realm| realm.get("roles"))
        .and_then(Value::as_array)
        .map(|roles| {
            roles
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_lowercase)
                .collect()
        })
        .unwrap_or_default()
}

fn string_claim(attributes: &Map<String, Value>, name: &str) -> Option<String> {
    attributes.get(name).and_then(Value::as_str).map(str::to_string)
}

fn claim_as_identifier(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
