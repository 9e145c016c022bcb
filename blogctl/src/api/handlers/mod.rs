//! HTTP request handlers.
//!
//! - [`auth`]: login and logout (public)
//! - [`users`]: current user, online users and forced logout (protected)

pub mod auth;
pub mod users;
