use axum::{
    Json,
    extract::{Request, State, rejection::JsonRejection},
    http::HeaderMap,
};
use tracing::{debug, warn};

use crate::{
    AppState,
    api::models::{
        auth::{LoginRequest, LoginResponse},
        response::ApiResponse,
        users::Identity,
    },
    auth::{password, session::Session, stores::with_deadline},
    errors::{Error, Result},
};

/// Best-effort client address from proxy headers
fn client_ip(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|value| value.to_str().ok()))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
}

/// Log in with username and password.
///
/// On success the session is bound to the user (the response carries the cookie), the user
/// is marked online and a bearer token is returned for non-browser clients.
#[tracing::instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
    body: std::result::Result<Json<LoginRequest>, JsonRejection>,
) -> Result<ApiResponse<LoginResponse>> {
    let Json(request) = body.map_err(|e| Error::BadRequest { message: e.body_text() })?;
    let timeout = state.config.auth.store_timeout;

    let credentials = with_deadline(timeout, "load credentials", state.users.load_credentials(&request.username))
        .await?
        .ok_or_else(|| Error::UserNotExist {
            user: request.username.clone(),
        })?;

    if !password::verify_password_blocking(request.password, credentials.password_hash.clone()).await? {
        return Err(Error::InvalidPassword);
    }
    if credentials.is_disabled {
        return Err(Error::UserDisabled {
            user: credentials.username,
        });
    }

    let identity = with_deadline(timeout, "load user", state.users.load_by_id(credentials.user_id))
        .await?
        .ok_or_else(|| Error::UserNotExist {
            user: credentials.username.clone(),
        })?;

    let token = state.tokens.generate(identity.user_id, &identity.role_ids)?;

    session.set(identity.user_id).await;
    session.save().await?;

    state.presence.mark_online(identity.user_id).await;
    if let Err(e) = with_deadline(timeout, "record login", state.users.record_login(identity.user_id, client_ip(&headers))).await {
        warn!("Failed to record login for user {}: {}", identity.user_id, e);
    }

    debug!("User {} logged in", identity.user_id);
    Ok(ApiResponse::ok(LoginResponse {
        id: identity.user_id,
        username: identity.username,
        nickname: identity.display_name,
        token,
    }))
}

/// Log out: clear the session and mark the user offline.
///
/// Session store failures are logged, not returned; the client is treated as logged out
/// either way.
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, mut request: Request) -> Result<ApiResponse<()>> {
    request.extensions_mut().remove::<Identity>();

    let Some(session) = request.extensions().get::<Session>().cloned() else {
        return Ok(ApiResponse::ok(()));
    };
    let user_id = match session.get().await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => {
            debug!("Logout without a session");
            return Ok(ApiResponse::ok(()));
        }
        Err(e) => {
            warn!("Failed to read session on logout: {}", e);
            return Ok(ApiResponse::ok(()));
        }
    };

    session.delete().await;
    if let Err(e) = session.save().await {
        warn!("Failed to clear session for user {}: {}", user_id, e);
    }
    state.presence.mark_offline(user_id).await;

    Ok(ApiResponse::ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        build_router,
        errors::codes,
        test_utils::{FailingSessionStore, FixedUserStore, create_test_state},
    };
    use axum::http::{HeaderValue, header};
    use axum_test::TestServer;
    use serde_json::Value;
    use std::sync::Arc;

    #[test]
    fn test_client_ip() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), None);

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers), Some("10.0.0.2"));

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        assert_eq!(client_ip(&headers), Some("203.0.113.9"));
    }

    #[tokio::test]
    async fn test_logout_tolerates_unreadable_session() {
        let mut state = create_test_state(Arc::new(FixedUserStore::default()));
        state.sessions = Arc::new(FailingSessionStore);
        let server = TestServer::new(build_router(&state).unwrap()).unwrap();

        let response = server
            .get("/api/logout")
            .add_header(header::COOKIE, "blog_session=abc")
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["code"], codes::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }
}
