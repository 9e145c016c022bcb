use sqlx::PgConnection;
use tracing::instrument;

use crate::{db::errors::Result, types::RoleId};

/// Read access to the `resource` / `role_resource` grant tables.
pub struct RoleGrants<'c> {
    db: &'c mut PgConnection,
}

impl<'c> RoleGrants<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Whether `role_id` may call `method path`.
    ///
    /// Anonymous resources are granted to every role. Disabled roles and unknown
    /// (path, method) pairs are never granted.
    #[instrument(skip(self), err)]
    pub async fn is_granted(&mut self, role_id: RoleId, path: &str, method: &str) -> Result<bool> {
        let granted: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM resource r
                WHERE r.url = $2
                  AND r.method = $3
                  AND (
                      r.anonymous
                      OR EXISTS (
                          SELECT 1
                          FROM role_resource rr
                          JOIN role ro ON ro.id = rr.role_id
                          WHERE rr.resource_id = r.id
                            AND rr.role_id = $1
                            AND NOT ro.is_disable
                      )
                  )
            )
            "#,
        )
        .bind(role_id)
        .bind(path)
        .bind(method)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(granted)
    }
}
