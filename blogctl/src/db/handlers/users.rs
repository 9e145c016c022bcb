use sqlx::{Connection, PgConnection};
use tracing::instrument;

use crate::{
    api::models::users::Identity,
    db::{
        errors::Result,
        models::users::{UserAuthRecord, UserCreateDBRequest},
    },
    types::{RoleId, UserId},
};

const SELECT_USER: &str = r#"
    SELECT ua.id, ua.username, ui.nickname, ua.password_hash, ua.is_super, ua.is_disable
    FROM user_auth ua
    JOIN user_info ui ON ui.id = ua.user_info_id
"#;

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: UserId) -> Result<Option<UserAuthRecord>> {
        let user = sqlx::query_as::<_, UserAuthRecord>(&format!("{SELECT_USER} WHERE ua.id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(user)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_username(&mut self, username: &str) -> Result<Option<UserAuthRecord>> {
        let user = sqlx::query_as::<_, UserAuthRecord>(&format!("{SELECT_USER} WHERE ua.username = $1"))
            .bind(username)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(user)
    }

    /// Role ids of an account, ordered by role id
    #[instrument(skip(self), err)]
    pub async fn get_role_ids(&mut self, id: UserId) -> Result<Vec<RoleId>> {
        let role_ids = sqlx::query_scalar::<_, RoleId>("SELECT role_id FROM user_auth_role WHERE user_auth_id = $1 ORDER BY role_id")
            .bind(id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(role_ids)
    }

    /// Load an account together with its roles
    #[instrument(skip(self), err)]
    pub async fn get_identity(&mut self, id: UserId) -> Result<Option<Identity>> {
        let Some(user) = self.get_by_id(id).await? else {
            return Ok(None);
        };
        let role_ids = self.get_role_ids(id).await?;
        Ok(Some(user.into_identity(role_ids)))
    }

    #[instrument(skip(self, request), fields(username = %request.username), err)]
    pub async fn create(&mut self, request: &UserCreateDBRequest) -> Result<UserId> {
        let mut tx = self.db.begin().await?;

        let user_info_id: i64 = sqlx::query_scalar("INSERT INTO user_info (email, nickname) VALUES ($1, $2) RETURNING id")
            .bind(&request.email)
            .bind(&request.nickname)
            .fetch_one(&mut *tx)
            .await?;

        let user_id: UserId = sqlx::query_scalar(
            r#"
            INSERT INTO user_auth (user_info_id, username, password_hash, is_super)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(user_info_id)
        .bind(&request.username)
        .bind(&request.password_hash)
        .bind(request.is_super)
        .fetch_one(&mut *tx)
        .await?;

        for role_id in &request.role_ids {
            sqlx::query("INSERT INTO user_auth_role (user_auth_id, role_id) VALUES ($1, $2)")
                .bind(user_id)
                .bind(role_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(user_id)
    }

    #[instrument(skip(self, password_hash), err)]
    pub async fn update_password(&mut self, id: UserId, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE user_auth SET password_hash = $1, updated_at = NOW() WHERE id = $2")
            .bind(password_hash)
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn record_login(&mut self, id: UserId, ip_address: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE user_auth SET last_login_at = NOW(), ip_address = COALESCE($1, ip_address) WHERE id = $2")
            .bind(ip_address)
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }
}
