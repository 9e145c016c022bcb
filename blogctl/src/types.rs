//! Common type definitions.
//!
//! # ID Types
//!
//! Entity IDs are the integer primary keys used by the blog schema, wrapped in type
//! aliases so signatures say which table they point at:
//!
//! - [`UserId`]: `user_auth.id`, the account that logs in
//! - [`RoleId`]: `role.id`, a named permission group

pub type UserId = i64;
pub type RoleId = i64;

/// Where the caller's identity came from on a given request.
///
/// Exactly one source wins per request, in fixed precedence: request cache, then session,
/// then bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// An earlier stage of the same request already resolved the identity
    CacheHit,
    /// The session cookie mapped to a user id
    SessionHit,
    /// A verified bearer token; the session has been seeded from it
    TokenPath,
}

impl std::fmt::Display for IdentitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentitySource::CacheHit => write!(f, "cache"),
            IdentitySource::SessionHit => write!(f, "session"),
            IdentitySource::TokenPath => write!(f, "token"),
        }
    }
}
