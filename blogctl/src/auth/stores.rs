//! Interfaces to the external stores the auth pipeline reads from.
//!
//! The pipeline never talks to a database directly; it goes through these traits so the
//! same resolver and evaluator run against Postgres in production and in-memory fakes in
//! tests. Every call is bounded by [`with_deadline`].

use std::{future::Future, time::Duration};

use async_trait::async_trait;

use crate::{
    api::models::users::{Identity, UserCredentials},
    errors::{Error, Result},
    types::{RoleId, UserId},
};

/// Loads users and their roles.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Load the full identity for a user id. `Ok(None)` means the user does not exist.
    async fn load_by_id(&self, id: UserId) -> Result<Option<Identity>>;

    /// Load login credentials by username. `Ok(None)` means the user does not exist.
    async fn load_credentials(&self, username: &str) -> Result<Option<UserCredentials>>;

    /// Record a successful login. Stores without login bookkeeping ignore it.
    async fn record_login(&self, _id: UserId, _ip_address: Option<&str>) -> Result<()> {
        Ok(())
    }
}

/// Answers whether a role is granted a (route pattern, method) pair.
#[async_trait]
pub trait RoleGrantStore: Send + Sync {
    async fn check(&self, role_id: RoleId, path: &str, method: &str) -> Result<bool>;
}

/// Run a store call with an upper bound on its latency. Expiry is reported as a store error.
pub async fn with_deadline<T, F>(timeout: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Store {
            operation: format!("{operation} timed out after {timeout:?}"),
        }),
    }
}
