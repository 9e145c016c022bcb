//! Authentication and authorization pipeline.
//!
//! Every protected request passes through three stages:
//!
//! 1. **Authenticate**: [`resolver::IdentityResolver`] decides who is calling. Sources are
//!    tried in fixed precedence (request cache, then session cookie, then bearer token) and a
//!    verified bearer token is promoted into the session.
//! 2. **Authorize**: [`permissions::PermissionEvaluator`] checks the caller's roles against
//!    the matched route pattern and HTTP method. Super-admins bypass the check; a caller with
//!    no roles is denied.
//! 3. **Presence**: [`middleware::listen_online`] rejects users an administrator has forced
//!    offline and refreshes the online marker for everyone else.
//!
//! # Authentication Methods
//!
//! ## Session Cookie
//!
//! Browsers log in via `POST /api/login`; the response sets a session cookie mapping to the
//! user id. See [`session`] for the available backends.
//!
//! ## Bearer Token
//!
//! Login also returns a signed token for `Authorization: Bearer <token>`. Tokens are
//! stateless and valid until they expire. See [`token`].
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use blogctl::api::models::users::Identity;
//!
//! async fn protected_handler(identity: Identity) -> String {
//!     format!("Hello, {}!", identity.username)
//! }
//! ```
//!
//! # Modules
//!
//! - [`current_user`]: `Identity` extractor for handlers
//! - [`middleware`]: the authenticate, authorize and presence stages
//! - [`password`]: password hashing and verification using Argon2
//! - [`permissions`]: role-grant evaluation
//! - [`presence`]: online/offline markers
//! - [`resolver`]: identity resolution state machine
//! - [`session`]: session handle, cookie layer and storage backends
//! - [`stores`]: user and role-grant store interfaces
//! - [`token`]: bearer token issuing and verification

pub mod current_user;
pub mod middleware;
pub mod password;
pub mod permissions;
pub mod presence;
pub mod resolver;
pub mod session;
pub mod stores;
pub mod token;
