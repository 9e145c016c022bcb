//! Database models for accounts.

use crate::{
    api::models::users::{Identity, UserCredentials},
    types::{RoleId, UserId},
};

/// A `user_auth` row joined with the owning `user_info` row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserAuthRecord {
    pub id: UserId,
    pub username: String,
    pub nickname: String,
    pub password_hash: String,
    pub is_super: bool,
    pub is_disable: bool,
}

impl UserAuthRecord {
    /// Combine with the account's role ids (already in stored order)
    pub fn into_identity(self, role_ids: Vec<RoleId>) -> Identity {
        Identity {
            user_id: self.id,
            username: self.username,
            display_name: self.nickname,
            role_ids,
            is_super_admin: self.is_super,
        }
    }
}

impl From<UserAuthRecord> for UserCredentials {
    fn from(record: UserAuthRecord) -> Self {
        Self {
            user_id: record.id,
            username: record.username,
            password_hash: record.password_hash,
            is_disabled: record.is_disable,
        }
    }
}

/// Database request for creating an account
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub username: String,
    pub nickname: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub is_super: bool,
    pub role_ids: Vec<RoleId>,
}
