//! Postgres-backed implementations of the auth store interfaces.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::{
    api::models::users::{Identity, UserCredentials},
    auth::stores::{RoleGrantStore, UserStore},
    db::{
        errors::DbError,
        handlers::{RoleGrants, Users},
    },
    errors::Result,
    types::{RoleId, UserId},
};

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn load_by_id(&self, id: UserId) -> Result<Option<Identity>> {
        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        Ok(Users::new(&mut conn).get_identity(id).await?)
    }

    async fn load_credentials(&self, username: &str) -> Result<Option<UserCredentials>> {
        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        let user = Users::new(&mut conn).get_by_username(username).await?;
        Ok(user.map(UserCredentials::from))
    }

    async fn record_login(&self, id: UserId, ip_address: Option<&str>) -> Result<()> {
        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        Ok(Users::new(&mut conn).record_login(id, ip_address).await?)
    }
}

#[derive(Clone)]
pub struct PgRoleGrantStore {
    db: PgPool,
}

impl PgRoleGrantStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RoleGrantStore for PgRoleGrantStore {
    async fn check(&self, role_id: RoleId, path: &str, method: &str) -> Result<bool> {
        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        Ok(RoleGrants::new(&mut conn).is_granted(role_id, path, method).await?)
    }
}
