use serde::{Deserialize, Serialize};

use crate::types::UserId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Returned on successful login. The token is also usable as `Authorization: Bearer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub id: UserId,
    pub username: String,
    pub nickname: String,
    pub token: String,
}
