//! Per-request identity resolution.
//!
//! Sources are tried in fixed precedence and exactly one wins:
//!
//! 1. **Request cache**: an [`Identity`] already stored in the request extensions by an
//!    earlier stage of the same request. No store access.
//! 2. **Session**: the session cookie maps to a user id, which is loaded from the user store.
//! 3. **Bearer token**: the `Authorization: Bearer <token>` header is verified, the user is
//!    loaded, and the user id is written into the session (promotion) so later requests from
//!    the same client skip token verification.
//!
//! Every failure is terminal for the request and is never retried here.

use std::time::Duration;

use axum::http::{HeaderMap, header, request::Parts};
use chrono::Utc;
use tracing::{debug, instrument, trace, warn};

use crate::{
    api::models::users::Identity,
    auth::{
        session::Session,
        stores::{UserStore, with_deadline},
        token::TokenService,
    },
    errors::{Error, Result},
    types::{IdentitySource, UserId},
};

/// Extract the token from an `Authorization` header.
///
/// Returns `TokenNotPresent` when the header is absent and `TokenMalformedHeader` unless the
/// value is exactly `Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Err(Error::TokenNotPresent);
    };
    let value = value.to_str().map_err(|_| Error::TokenMalformedHeader)?;

    let mut pieces = value.split(' ');
    match (pieces.next(), pieces.next(), pieces.next()) {
        (Some("Bearer"), Some(token), None) => Ok(token),
        _ => Err(Error::TokenMalformedHeader),
    }
}

/// Resolves the caller of a request.
pub struct IdentityResolver<'a> {
    tokens: &'a TokenService,
    users: &'a dyn UserStore,
    store_timeout: Duration,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(tokens: &'a TokenService, users: &'a dyn UserStore, store_timeout: Duration) -> Self {
        Self {
            tokens,
            users,
            store_timeout,
        }
    }

    /// Resolve the identity for this request and cache it in the request extensions.
    #[instrument(skip_all, fields(method = %parts.method, uri = %parts.uri))]
    pub async fn resolve(&self, parts: &mut Parts) -> Result<(Identity, IdentitySource)> {
        if let Some(identity) = parts.extensions.get::<Identity>() {
            trace!("Identity for user {} found in request cache", identity.user_id);
            return Ok((identity.clone(), IdentitySource::CacheHit));
        }

        let session = parts.extensions.get::<Session>().cloned();
        if session.is_none() {
            warn!("No session installed on request; falling back to bearer token only");
        }

        if let Some(session) = &session
            && let Some(user_id) = session.get().await?
        {
            let identity = self.load_identity(user_id).await?;
            debug!("Resolved user {} from session", user_id);
            parts.extensions.insert(identity.clone());
            return Ok((identity, IdentitySource::SessionHit));
        }

        let token = bearer_token(&parts.headers)?;
        let claims = self.tokens.verify(token)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(Error::TokenExpired);
        }

        let identity = self.load_identity(claims.user_id).await?;

        if let Some(session) = &session {
            session.set(identity.user_id).await;
            session.save().await?;
        }

        debug!("Resolved user {} from bearer token", identity.user_id);
        parts.extensions.insert(identity.clone());
        Ok((identity, IdentitySource::TokenPath))
    }

    async fn load_identity(&self, user_id: UserId) -> Result<Identity> {
        with_deadline(self.store_timeout, "load user", self.users.load_by_id(user_id))
            .await?
            .ok_or_else(|| Error::UserNotExist { user: user_id.to_string() })
    }
}
