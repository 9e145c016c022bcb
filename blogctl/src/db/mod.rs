//! Database layer.
//!
//! SQLx over PostgreSQL, following the repository pattern:
//!
//! ```text
//! ┌──────────────┐
//! │ auth stores  │  (UserStore / RoleGrantStore implementations)
//! └──────┬───────┘
//!        ↓
//! ┌──────────────┐
//! │ Repositories │  (db::handlers)
//! └──────┬───────┘
//!        ↓
//! ┌──────────────┐
//! │    Models    │  (db::models)
//! └──────┬───────┘
//!        ↓
//! ┌──────────────┐
//! │  PostgreSQL  │
//! └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: repositories
//! - [`models`]: row structures matching table schemas
//! - [`errors`]: database error type
//! - [`stores`]: pool-backed implementations of the auth store traits

pub mod errors;
pub mod handlers;
pub mod models;
pub mod stores;
