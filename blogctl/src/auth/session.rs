//! Cookie-carried sessions.
//!
//! A session maps one cookie to one user id. Handlers and the identity resolver work with a
//! request-scoped [`Session`] handle installed by [`session_layer`]; the handle reads lazily
//! from the configured [`SessionStore`] and writes back on [`Session::save`]. The layer then
//! attaches the resulting `Set-Cookie` before the response leaves.
//!
//! Two backends are provided:
//!
//! - [`CookieSessionStore`]: the cookie itself carries `{uid, iat, exp}`, signed with
//!   HMAC-SHA256. No server state except per-user revocation timestamps.
//! - [`MemorySessionStore`]: the cookie carries a random id; the id → user mapping lives in
//!   process memory. Every write issues a fresh id.
//!
//! Concurrent requests writing the same session race; the last write wins.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, HeaderValue, header, request::Parts},
    middleware::Next,
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use moka::future::Cache;
use rand::prelude::RngExt;
use rand::rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, trace};

use crate::{
    AppState,
    auth::stores::with_deadline,
    config::SessionConfig,
    errors::{Error, Result},
    types::UserId,
};

type HmacSha256 = Hmac<Sha256>;

/// What the response should do with the session cookie after a save
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCookie {
    Set(String),
    Clear,
}

/// Backend holding session state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Resolve the user id a cookie value refers to. Unknown, tampered or expired cookies
    /// load as `Ok(None)`; `Err` is reserved for store failures.
    async fn load(&self, cookie: &str) -> Result<Option<UserId>>;

    /// Persist the session. `cookie` is the value the client sent, if any; `user_id` is the
    /// new value of the single session field (`None` deletes it).
    async fn save(&self, cookie: Option<&str>, user_id: Option<UserId>) -> Result<SessionCookie>;

    /// Invalidate every session belonging to `user_id`
    async fn revoke_user(&self, user_id: UserId) -> Result<()>;
}

// ---------------------------------------------------------------------------------------------
// Signed-cookie backend

#[derive(Debug, Serialize, Deserialize)]
struct CookiePayload {
    uid: UserId,
    iat: i64, // Issued at, milliseconds
    exp: i64, // Expiration, milliseconds
}

pub struct CookieSessionStore {
    key: Vec<u8>,
    max_age: Duration,
    /// user id → revocation time in milliseconds; cookies issued at or before it are void
    revoked: DashMap<UserId, i64>,
}

impl CookieSessionStore {
    pub fn new(secret: &str, max_age: Duration) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
            max_age,
            revoked: DashMap::new(),
        }
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| Error::Store {
            operation: format!("initialise session signer: {e}"),
        })
    }

    fn encode(&self, user_id: UserId, now_ms: i64) -> Result<String> {
        let payload = CookiePayload {
            uid: user_id,
            iat: now_ms,
            exp: now_ms + self.max_age.as_millis() as i64,
        };
        let json = serde_json::to_vec(&payload).map_err(|e| Error::Store {
            operation: format!("serialize session: {e}"),
        })?;
        let body = URL_SAFE_NO_PAD.encode(json);

        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{body}.{signature}"))
    }

    fn decode(&self, cookie: &str, now_ms: i64) -> Result<Option<UserId>> {
        let Some((body, signature)) = cookie.split_once('.') else {
            trace!("Session cookie has no signature");
            return Ok(None);
        };
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return Ok(None);
        };

        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        if mac.verify_slice(&signature).is_err() {
            debug!("Session cookie signature mismatch");
            return Ok(None);
        }

        let Some(payload) = URL_SAFE_NO_PAD
            .decode(body)
            .ok()
            .and_then(|json| serde_json::from_slice::<CookiePayload>(&json).ok())
        else {
            return Ok(None);
        };

        if payload.exp <= now_ms {
            trace!("Session cookie expired");
            return Ok(None);
        }
        if let Some(revoked_at) = self.revoked.get(&payload.uid)
            && payload.iat <= *revoked_at
        {
            debug!("Session cookie for user {} was revoked", payload.uid);
            return Ok(None);
        }

        Ok(Some(payload.uid))
    }
}

#[async_trait]
impl SessionStore for CookieSessionStore {
    async fn load(&self, cookie: &str) -> Result<Option<UserId>> {
        self.decode(cookie, Utc::now().timestamp_millis())
    }

    async fn save(&self, _cookie: Option<&str>, user_id: Option<UserId>) -> Result<SessionCookie> {
        match user_id {
            Some(user_id) => Ok(SessionCookie::Set(self.encode(user_id, Utc::now().timestamp_millis())?)),
            None => Ok(SessionCookie::Clear),
        }
    }

    async fn revoke_user(&self, user_id: UserId) -> Result<()> {
        self.revoked.insert(user_id, Utc::now().timestamp_millis());
        Ok(())
    }
}

// ---------------------------------------------------------------------------------------------
// In-memory backend

pub struct MemorySessionStore {
    /// session id → user id; entries expire `max_age` after their last write
    sessions: Cache<String, UserId>,
}

impl MemorySessionStore {
    pub fn new(max_age: Duration) -> Self {
        Self {
            sessions: Cache::builder().time_to_live(max_age).build(),
        }
    }

    fn new_session_id() -> String {
        let mut bytes = [0u8; 32];
        rng().fill(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Number of live session entries, after evicting expired ones
    pub async fn len(&self) -> u64 {
        self.sessions.run_pending_tasks().await;
        self.sessions.entry_count()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, cookie: &str) -> Result<Option<UserId>> {
        Ok(self.sessions.get(cookie).await)
    }

    async fn save(&self, cookie: Option<&str>, user_id: Option<UserId>) -> Result<SessionCookie> {
        // Every write issues a fresh id and drops the presented one
        if let Some(existing) = cookie {
            self.sessions.invalidate(existing).await;
        }
        match user_id {
            Some(user_id) => {
                let id = Self::new_session_id();
                self.sessions.insert(id.clone(), user_id).await;
                Ok(SessionCookie::Set(id))
            }
            None => Ok(SessionCookie::Clear),
        }
    }

    async fn revoke_user(&self, user_id: UserId) -> Result<()> {
        let owned: Vec<Arc<String>> = self
            .sessions
            .iter()
            .filter(|(_, owner)| *owner == user_id)
            .map(|(id, _)| id)
            .collect();
        for id in owned {
            self.sessions.invalidate(id.as_str()).await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------------------------
// Request-scoped handle

#[derive(Debug, Default)]
struct SessionState {
    /// Cookie value sent by the client (or produced by an earlier save)
    cookie: Option<String>,
    /// `None` until loaded; then the current value of the user-id field
    value: Option<Option<UserId>>,
    dirty: bool,
    outgoing: Option<SessionCookie>,
}

/// The session of the current request.
///
/// Clones share state, so the copy kept by [`session_layer`] observes writes made by
/// handlers and the resolver.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn SessionStore>,
    timeout: Duration,
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    pub fn new(store: Arc<dyn SessionStore>, timeout: Duration, cookie: Option<String>) -> Self {
        Self {
            store,
            timeout,
            state: Arc::new(Mutex::new(SessionState {
                cookie,
                ..Default::default()
            })),
        }
    }

    /// Current user id in the session, loading from the store on first access.
    #[instrument(skip(self), err)]
    pub async fn get(&self) -> Result<Option<UserId>> {
        let mut state = self.state.lock().await;
        if let Some(value) = state.value {
            return Ok(value);
        }
        let value = match state.cookie.as_deref() {
            Some(cookie) => with_deadline(self.timeout, "load session", self.store.load(cookie)).await?,
            None => None,
        };
        state.value = Some(value);
        Ok(value)
    }

    /// Set the user id. Not persisted until [`Session::save`].
    pub async fn set(&self, user_id: UserId) {
        let mut state = self.state.lock().await;
        state.value = Some(Some(user_id));
        state.dirty = true;
    }

    /// Remove the user id. Not persisted until [`Session::save`].
    pub async fn delete(&self) {
        let mut state = self.state.lock().await;
        state.value = Some(None);
        state.dirty = true;
    }

    /// Persist pending changes. A failure leaves the session dirty and is returned as a
    /// store error.
    #[instrument(skip(self), err)]
    pub async fn save(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.dirty {
            return Ok(());
        }
        let value = state.value.flatten();
        let cookie = with_deadline(self.timeout, "save session", self.store.save(state.cookie.as_deref(), value)).await?;

        state.cookie = match &cookie {
            SessionCookie::Set(value) => Some(value.clone()),
            SessionCookie::Clear => None,
        };
        state.outgoing = Some(cookie);
        state.dirty = false;
        Ok(())
    }

    /// Cookie change produced by the last successful save, if any
    pub async fn take_outgoing(&self) -> Option<SessionCookie> {
        self.state.lock().await.outgoing.take()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts.extensions.get::<Session>().cloned().ok_or_else(|| Error::Internal {
            operation: "read session: session layer is not installed".to_string(),
        })
    }
}

/// Extract a named cookie from the request headers
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(cookie_name, _)| *cookie_name == name)
        .map(|(_, value)| value.to_string())
}

/// Render the `Set-Cookie` header value for a session change
pub fn set_cookie_header(config: &SessionConfig, cookie: &SessionCookie) -> String {
    let same_site = match config.cookie_same_site.as_str() {
        "strict" => "Strict",
        "none" => "None",
        _ => "Lax",
    };
    let secure = if config.cookie_secure { "; Secure" } else { "" };

    match cookie {
        SessionCookie::Set(value) => format!(
            "{}={}; Path=/; HttpOnly; SameSite={}; Max-Age={}{}",
            config.cookie_name,
            value,
            same_site,
            config.max_age.as_secs(),
            secure
        ),
        SessionCookie::Clear => format!("{}=; Path=/; HttpOnly; SameSite={}; Max-Age=0{}", config.cookie_name, same_site, secure),
    }
}

/// Middleware that installs a [`Session`] on the request and writes the cookie back.
pub async fn session_layer(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let config = &state.config.auth.session;
    let session = Session::new(
        state.sessions.clone(),
        state.config.auth.store_timeout,
        read_cookie(request.headers(), &config.cookie_name),
    );
    request.extensions_mut().insert(session.clone());

    let mut response = next.run(request).await;

    if let Some(cookie) = session.take_outgoing().await {
        match HeaderValue::from_str(&set_cookie_header(config, &cookie)) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => error!("Failed to encode session cookie: {}", e),
        }
    }
    response
}
