use axum::extract::{Path, State, rejection::PathRejection};
use tracing::info;

use crate::{
    AppState,
    api::models::{
        response::ApiResponse,
        users::{Identity, OnlineUsersResponse, UserInfoResponse},
    },
    auth::stores::with_deadline,
    errors::{Error, Result},
    types::UserId,
};

/// The current caller
#[tracing::instrument(skip_all)]
pub async fn get_user_info(identity: Identity) -> Result<ApiResponse<UserInfoResponse>> {
    Ok(ApiResponse::ok(identity.into()))
}

/// Users seen within the online window
#[tracing::instrument(skip_all)]
pub async fn list_online_users(State(state): State<AppState>) -> Result<ApiResponse<OnlineUsersResponse>> {
    Ok(ApiResponse::ok(OnlineUsersResponse {
        user_ids: state.presence.online_users().await,
    }))
}

/// Force a user offline: mark them and revoke every session they hold.
///
/// Their bearer tokens stay cryptographically valid, so the next request that resolves them
/// is rejected by the presence check until they log in again.
#[tracing::instrument(skip_all)]
pub async fn force_offline(
    State(state): State<AppState>,
    identity: Identity,
    path: std::result::Result<Path<UserId>, PathRejection>,
) -> Result<ApiResponse<()>> {
    let Path(user_id) = path.map_err(|e| Error::BadRequest { message: e.body_text() })?;
    if user_id == identity.user_id {
        return Err(Error::BadRequest {
            message: "Cannot force yourself offline".to_string(),
        });
    }

    state.presence.force_offline(user_id).await;
    with_deadline(state.config.auth.store_timeout, "revoke sessions", state.sessions.revoke_user(user_id)).await?;

    info!("User {} forced offline by {}", user_id, identity.user_id);
    Ok(ApiResponse::ok(()))
}
