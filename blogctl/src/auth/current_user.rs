use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{instrument, trace};

use crate::{AppState, api::models::users::Identity, errors::Error};

/// Handlers take `Identity` as an argument to require an authenticated caller.
///
/// Behind the `authenticate` middleware this is a request-cache hit; on routes without it the
/// full resolution runs here.
impl FromRequestParts<AppState> for Identity {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let (identity, source) = state.resolver().resolve(parts).await?;
        trace!("Extracted user {} via {}", identity.user_id, source);
        Ok(identity)
    }
}
