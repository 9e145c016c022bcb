//! Route protection middleware.
//!
//! Protected routes run, in order: [`authenticate`] → [`authorize`] → [`listen_online`].
//! Each stage either aborts with an error envelope or passes the request on.

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{debug, instrument, warn};

use crate::{
    AppState,
    api::models::users::Identity,
    auth::{permissions::Decision, session::Session},
    errors::{Error, Result},
};

/// Permission path for a route pattern: the pattern with `prefix` removed.
pub fn resource_path<'a>(pattern: &'a str, prefix: &str) -> &'a str {
    match pattern.strip_prefix(prefix) {
        Some("") => "/",
        Some(rest) if rest.starts_with('/') => rest,
        _ => pattern,
    }
}

/// Resolve the caller and attach the [`Identity`] to the request.
#[instrument(skip_all)]
pub async fn authenticate(State(state): State<AppState>, request: Request, next: Next) -> Result<Response> {
    let (mut parts, body) = request.into_parts();
    let (identity, source) = state.resolver().resolve(&mut parts).await?;
    debug!("Authenticated user {} via {}", identity.user_id, source);

    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Check the caller's roles against the matched route and method.
#[instrument(skip_all)]
pub async fn authorize(State(state): State<AppState>, request: Request, next: Next) -> Result<Response> {
    let (mut parts, body) = request.into_parts();
    let identity = match parts.extensions.get::<Identity>() {
        Some(identity) => identity.clone(),
        None => state.resolver().resolve(&mut parts).await?.0,
    };

    let pattern = match parts.extensions.get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_string(),
        None => parts.uri.path().to_string(),
    };
    let path = resource_path(&pattern, &state.config.auth.resource_prefix);
    let method = parts.method.as_str();

    let decision = state.evaluator().evaluate(&identity, path, method).await?;
    if decision == Decision::Deny {
        return Err(Error::PermissionDenied {
            method: method.to_string(),
            path: path.to_string(),
        });
    }

    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Reject users an administrator forced offline; refresh presence for everyone else.
#[instrument(skip_all)]
pub async fn listen_online(State(state): State<AppState>, request: Request, next: Next) -> Result<Response> {
    let Some(user_id) = request.extensions().get::<Identity>().map(|identity| identity.user_id) else {
        return Ok(next.run(request).await);
    };

    if state.presence.is_forced_offline(user_id).await {
        if let Some(session) = request.extensions().get::<Session>().cloned() {
            session.delete().await;
            if let Err(e) = session.save().await {
                warn!("Failed to clear session of forced-offline user {}: {}", user_id, e);
            }
        }
        return Err(Error::ForceOffline { user_id });
    }

    state.presence.touch(user_id).await;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_path() {
        assert_eq!(resource_path("/api/user/list", "/api"), "/user/list");
        assert_eq!(resource_path("/api/user/offline/{id}", "/api"), "/user/offline/{id}");
        assert_eq!(resource_path("/api", "/api"), "/");
        assert_eq!(resource_path("/apiary/list", "/api"), "/apiary/list");
        assert_eq!(resource_path("/health", "/api"), "/health");
        assert_eq!(resource_path("/user/list", ""), "/user/list");
    }
}
