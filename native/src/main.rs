//! oidc-session: native host for the OpenID Connect relying-party core
//!
//! Lightweight HTTP server using hyper. Keeps browser sessions in memory,
//! keyed by a cookie, and routes the OIDC login/callback/logout endpoints to
//! the relying party.

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use oidc_session_core::error::{ErrorResponse, OidcError, VerificationCheck};
use oidc_session_core::{CallbackParams, RelyingParty, Settings};

mod platform;

use platform::{HostRoutes, HostSession, ProcessEnv, ReqwestHttpClient, SystemClock};

const SESSION_COOKIE: &str = "oidc_sid";

/// Shared application state
struct AppState {
    rp: RelyingParty,
    sessions: Mutex<HashMap<String, HostSession>>,
}

impl AppState {
    /// Copy of the caller's session, if the cookie names a known one
    fn load_session(&self, sid: Option<&str>) -> HostSession {
        sid.and_then(|sid| self.sessions.lock().get(sid).cloned())
            .unwrap_or_default()
    }

    fn save_session(&self, sid: &str, session: HostSession) {
        let mut sessions = self.sessions.lock();
        if session.is_empty() {
            sessions.remove(sid);
        } else {
            sessions.insert(sid.to_string(), session);
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(message) = run().await {
        error!("{}", message);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run() -> Result<(), String> {
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()
        .map_err(|_| "PORT must be a number".to_string())?;

    let base_url = std::env::var("APP_BASE_URL").unwrap_or_else(|_| format!("http://localhost:{}/", port));
    let base_url = base_url
        .parse()
        .map_err(|e| format!("invalid APP_BASE_URL '{}': {}", base_url, e))?;

    let settings = Settings::from_env(&ProcessEnv).map_err(|e| e.to_string())?;
    info!(issuer = %settings.issuer_url, client_id = %settings.client_id, "relying party configured");

    let rp = RelyingParty::new(
        settings,
        Box::new(ReqwestHttpClient::new()),
        Box::new(SystemClock),
        Box::new(HostRoutes::new(base_url)),
    );

    let state = Arc::new(AppState {
        rp,
        sessions: Mutex::new(HashMap::new()),
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .map_err(|e| format!("failed to bind port {}: {}", port, e))?;

    info!(port, "oidc-session listening");

    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let state = state.clone();

        tokio::spawn(async move {
            let io = hyper_util::rt::TokioIo::new(stream);
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { handle_request(req, &state).await }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!(error = %e, "connection error");
            }
        });
    }
}

type HyperResponse = Response<Full<Bytes>>;

async fn handle_request(
    req: Request<Incoming>,
    state: &AppState,
) -> Result<HyperResponse, std::convert::Infallible> {
    let result = route_request(req, state).await;
    Ok(result)
}

async fn route_request(req: Request<Incoming>, state: &AppState) -> HyperResponse {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let existing_sid = session_id(req.headers());
    let sid = existing_sid
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut session = state.load_session(existing_sid.as_deref());

    let mut response = match (method, path.as_str()) {
        (Method::GET, "/") => handle_whoami(state, &mut session).await,
        (Method::GET, "/oidc/login") => handle_login(state, &mut session).await,
        (Method::GET, "/oidc/callback") => handle_callback(state, &mut session, &query).await,
        (Method::POST, "/oidc/refresh") => handle_refresh(state, &mut session).await,
        (Method::GET, "/oidc/logout") => handle_logout(state, &mut session).await,
        (Method::GET, "/oidc/local_logout") => {
            session = HostSession::default();
            redirect_response("/")
        }
        _ => json_response(StatusCode::NOT_FOUND, &serde_json::json!({"error": "not_found"})),
    };

    let keep = !session.is_empty();
    state.save_session(&sid, session);
    if keep && existing_sid.is_none() {
        let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, sid);
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(SET_COOKIE, value);
        }
    }
    response
}

async fn handle_whoami(state: &AppState, session: &mut HostSession) -> HyperResponse {
    let outcome = match state.rp.authenticate(session).await {
        Err(e) if e.verification_check() == Some(VerificationCheck::Expired) => {
            state.rp.refresh(session).await.map(Some)
        }
        other => other,
    };

    match outcome {
        Ok(Some(authenticated)) => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "authenticated": true,
                "authorized": authenticated.authorized,
                "identity": authenticated.identity,
            }),
        ),
        Ok(None) => json_response(StatusCode::OK, &serde_json::json!({"authenticated": false})),
        Err(e) => error_response(&e),
    }
}

async fn handle_login(state: &AppState, session: &mut HostSession) -> HyperResponse {
    match state.rp.login(session).await {
        Ok(url) => redirect_response(url.as_str()),
        Err(e) => error_response(&e),
    }
}

async fn handle_callback(state: &AppState, session: &mut HostSession, query: &str) -> HyperResponse {
    let params = CallbackParams::from_query(query);

    match state.rp.callback(session, params).await {
        Ok(authenticated) if authenticated.authorized => {
            info!(login = ?authenticated.identity.login, admin = authenticated.identity.admin, "user signed in");
            redirect_response("/")
        }
        Ok(authenticated) => {
            warn!(login = ?authenticated.identity.login, "user lacks an authorized role");
            // Unauthorized users keep neither a local nor a provider session
            unauthorized_response(state.rp.logout(session).await)
        }
        Err(e) => error_response(&e),
    }
}

/// End the provider session of a user without an authorized role, if possible
fn unauthorized_response(logout: oidc_session_core::Result<Option<url::Url>>) -> HyperResponse {
    match logout {
        Ok(Some(url)) => redirect_response(url.as_str()),
        Ok(None) => json_response(
            StatusCode::FORBIDDEN,
            &serde_json::json!({"error": "not_authorized", "message": "no authorized role"}),
        ),
        Err(e) => {
            warn!(error = %e, "provider logout unavailable for unauthorized user");
            json_response(
                StatusCode::FORBIDDEN,
                &serde_json::json!({"error": "not_authorized", "message": "no authorized role"}),
            )
        }
    }
}

async fn handle_refresh(state: &AppState, session: &mut HostSession) -> HyperResponse {
    match state.rp.refresh(session).await {
        Ok(authenticated) => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "authorized": authenticated.authorized,
                "identity": authenticated.identity,
            }),
        ),
        Err(e) => error_response(&e),
    }
}

async fn handle_logout(state: &AppState, session: &mut HostSession) -> HyperResponse {
    match state.rp.logout(session).await {
        Ok(Some(url)) => redirect_response(url.as_str()),
        Ok(None) => redirect_response("/oidc/local_logout"),
        Err(e) => error_response(&e),
    }
}

/// Session id from the `Cookie` header
fn session_id(headers: &hyper::HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

fn error_response(err: &OidcError) -> HyperResponse {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse::from(err);
    json_response(status, &body)
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> HyperResponse {
    let json = serde_json::to_vec(body).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn redirect_response(location: &str) -> HyperResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::FOUND;
    match HeaderValue::from_str(location) {
        Ok(value) => {
            response.headers_mut().insert(LOCATION, value);
            response
        }
        Err(_) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &serde_json::json!({"error": "internal_error", "message": "invalid redirect location"}),
        ),
    }
}
