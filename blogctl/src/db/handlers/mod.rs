//! Repository implementations for database access.
//!
//! Each repository wraps a borrowed `PgConnection` (a pooled connection or an open
//! transaction), so callers decide the transaction boundary:
//!
//! ```ignore
//! use blogctl::db::handlers::Users;
//!
//! let mut conn = pool.acquire().await?;
//! let identity = Users::new(&mut conn).get_identity(user_id).await?;
//! ```
//!
//! - [`Users`]: accounts, credentials and role membership
//! - [`RoleGrants`]: route grants per role

pub mod role_grants;
pub mod users;

pub use role_grants::RoleGrants;
pub use users::Users;
