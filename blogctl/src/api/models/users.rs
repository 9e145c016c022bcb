use serde::{Deserialize, Serialize};

use crate::types::{RoleId, UserId};

/// The caller as resolved for the current request.
///
/// Built fresh on every request and carried in the request extensions; it is never
/// persisted and never shared between requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
    /// Role ids in stored order
    pub role_ids: Vec<RoleId>,
    pub is_super_admin: bool,
}

/// What login needs to check a password. Never leaves the server.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: UserId,
    pub username: String,
    pub password_hash: String,
    pub is_disabled: bool,
}

/// Current-user payload returned by `GET /api/user/info`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfoResponse {
    pub id: UserId,
    pub username: String,
    pub nickname: String,
    pub role_ids: Vec<RoleId>,
    pub is_super: bool,
}

impl From<Identity> for UserInfoResponse {
    fn from(identity: Identity) -> Self {
        Self {
            id: identity.user_id,
            username: identity.username,
            nickname: identity.display_name,
            role_ids: identity.role_ids,
            is_super: identity.is_super_admin,
        }
    }
}

/// Payload of `GET /api/user/online`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineUsersResponse {
    pub user_ids: Vec<UserId>,
}
