//! ID-token verification
//!
//! Checks, in order: signature against the provider JWKS, `iss`, `aud`,
//! `nonce`, then expiry. The first failing check is reported; claims are only
//! ever handed out after every check passed.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::resolver::ProviderMetadata;
use crate::config::Settings;
use crate::error::{OidcError, Result, VerificationCheck};
use crate::platform::Clock;
use crate::session::SessionRecord;

/// Allowed clock skew for `exp`
const EXPIRY_LEEWAY_SECS: u64 = 60;

/// Whether an ID token's `exp` is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryCheck {
    Enforce,
    /// For an ID token kept from an earlier verification after a refresh
    /// that did not replace it
    Skip,
}

/// Standard ID-token claims plus the full raw attribute map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer
    pub iss: String,

    /// Subject
    pub sub: String,

    /// Audience (can be string or array)
    #[serde(deserialize_with = "deserialize_audience")]
    pub aud: Vec<String>,

    /// Expiration time
    pub exp: u64,

    #[serde(default)]
    pub iat: Option<u64>,

    #[serde(default)]
    pub nonce: Option<String>,

    /// Every claim of the token, standard ones included
    #[serde(skip)]
    pub raw: Map<String, Value>,
}

/// Deserialize audience as either string or array
fn deserialize_audience<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct AudienceVisitor;

    impl<'de> Visitor<'de> for AudienceVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("string or array of strings")
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Vec<String>, E>
        where
            E: de::Error,
        {
            Ok(vec![value.to_string()])
        }

        fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Vec<String>, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut values = Vec::new();
            while let Some(value) = seq.next_element()? {
                values.push(value);
            }
            Ok(values)
        }
    }

    deserializer.deserialize_any(AudienceVisitor)
}

/// Claims of a verified ID token and access token.
///
/// Only [`verify_session`] constructs this type.
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    id_token: String,
    access_token: String,
    id: IdTokenClaims,
    access: Map<String, Value>,
}

impl VerifiedClaims {
    pub fn id_claims(&self) -> &IdTokenClaims {
        &self.id
    }

    pub fn id_attributes(&self) -> &Map<String, Value> {
        &self.id.raw
    }

    pub fn access_attributes(&self) -> &Map<String, Value> {
        &self.access
    }

    /// Raw (id_token, access_token) these claims came from
    pub fn source_tokens(&self) -> (&str, &str) {
        (&self.id_token, &self.access_token)
    }
}

/// Verifies tokens against one provider's signing keys
pub struct TokenVerifier<'a> {
    jwks: &'a JwkSet,
    clock: &'a dyn Clock,
    expiry: ExpiryCheck,
}

impl<'a> TokenVerifier<'a> {
    pub fn new(jwks: &'a JwkSet, clock: &'a dyn Clock) -> Self {
        Self {
            jwks,
            clock,
            expiry: ExpiryCheck::Enforce,
        }
    }

    pub fn with_expiry_check(mut self, expiry: ExpiryCheck) -> Self {
        self.expiry = expiry;
        self
    }

    /// Verify an ID token and return its claims
    pub fn verify(&self, id_token: &str, issuer: &str, client_id: &str, nonce: &str) -> Result<IdTokenClaims> {
        let raw = self.decode_signed(id_token, "id_token")?;

        let mut claims: IdTokenClaims = serde_json::from_value(Value::Object(raw.clone()))
            .map_err(|e| reject(VerificationCheck::Malformed, format!("invalid ID token claims: {}", e)))?;
        claims.raw = raw;

        if claims.iss != issuer {
            return Err(reject(
                VerificationCheck::Issuer,
                format!("issuer mismatch: expected '{}', got '{}'", issuer, claims.iss),
            ));
        }

        if !claims.aud.iter().any(|aud| aud == client_id) {
            return Err(reject(
                VerificationCheck::Audience,
                format!("token audience does not include client '{}'", client_id),
            ));
        }

        if claims.nonce.as_deref() != Some(nonce) {
            return Err(reject(VerificationCheck::Nonce, "nonce mismatch"));
        }

        let now_secs = self.clock.now_secs();
        if self.expiry == ExpiryCheck::Enforce && claims.exp.saturating_add(EXPIRY_LEEWAY_SECS) <= now_secs {
            return Err(reject(VerificationCheck::Expired, "ID token has expired"));
        }

        Ok(claims)
    }

    /// Verify the signature (and issuer) of an access token and return its claims
    pub fn decode_access_token(&self, access_token: &str, issuer: &str) -> Result<Map<String, Value>> {
        let claims = self.decode_signed(access_token, "access_token")?;

        match claims.get("iss").and_then(Value::as_str) {
            Some(iss) if iss == issuer => Ok(claims),
            other => Err(reject(
                VerificationCheck::Issuer,
                format!("access token issuer mismatch: expected '{}', got {:?}", issuer, other),
            )),
        }
    }

    /// Decode a JWT, verifying only its signature
    fn decode_signed(&self, token: &str, which: &'static str) -> Result<Map<String, Value>> {
        if token.trim().is_empty() {
            return Err(OidcError::missing_token(which));
        }

        let header = decode_header(token)
            .map_err(|e| reject(VerificationCheck::Malformed, format!("invalid JWT header: {}", e)))?;

        let jwk = self.select_key(header.kid.as_deref())?;

        let decoding_key = DecodingKey::from_jwk(jwk)
            .map_err(|e| reject(VerificationCheck::Signature, format!("invalid JWK: {}", e)))?;

        // Claim checks happen afterwards so each failure can be named
        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Map<String, Value>>(token, &decoding_key, &validation).map_err(|e| {
            let check = match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => VerificationCheck::Signature,
                _ => VerificationCheck::Malformed,
            };
            reject(check, format!("{} rejected: {}", which, e))
        })?;

        Ok(data.claims)
    }

    fn select_key(&self, kid: Option<&str>) -> Result<&'a Jwk> {
        match kid {
            Some(kid) => self
                .jwks
                .find(kid)
                .ok_or_else(|| reject(VerificationCheck::Signature, format!("key '{}' not found in JWKS", kid))),
            None if self.jwks.keys.len() == 1 => Ok(&self.jwks.keys[0]),
            None => Err(reject(
                VerificationCheck::Malformed,
                "JWT missing 'kid' header and JWKS has more than one key",
            )),
        }
    }
}

fn reject(check: VerificationCheck, message: impl Into<String>) -> OidcError {
    let err = OidcError::verification(check, message);
    tracing::warn!(check = %check, error = %err, "token rejected");
    err
}

/// Verify the tokens stored in a session record.
///
/// Fails with [`OidcError::MissingToken`] if either token was never stored.
pub fn verify_session(
    record: &SessionRecord<'_>,
    settings: &Settings,
    metadata: &ProviderMetadata,
    clock: &dyn Clock,
) -> Result<VerifiedClaims> {
    verify_session_with(record, settings, metadata, clock, ExpiryCheck::Enforce)
}

/// [`verify_session`] with an explicit policy for the ID token's expiry
pub fn verify_session_with(
    record: &SessionRecord<'_>,
    settings: &Settings,
    metadata: &ProviderMetadata,
    clock: &dyn Clock,
    expiry: ExpiryCheck,
) -> Result<VerifiedClaims> {
    let id_token = record.id_token().ok_or(OidcError::missing_token("id_token"))?;
    let access_token = record
        .access_token()
        .ok_or(OidcError::missing_token("access_token"))?;
    let nonce = record
        .stored_nonce()
        .ok_or_else(|| reject(VerificationCheck::Nonce, "no nonce stored for this session"))?;

    let verifier = TokenVerifier::new(&metadata.jwks, clock).with_expiry_check(expiry);
    let id = verifier.verify(id_token, &settings.issuer_url, &settings.client_id, nonce)?;
    let access = verifier.decode_access_token(access_token, &settings.issuer_url)?;

    Ok(VerifiedClaims {
        id_token: id_token.to_string(),
        access_token: access_token.to_string(),
        id,
        access,
    })
}
