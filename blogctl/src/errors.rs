//! Error taxonomy and the response envelope for failures.
//!
//! Every classified failure is delivered as HTTP 200 with a `{code, message, data}` body;
//! clients branch on `code`. HTTP 500 is produced only by the panic-catching layer.

use crate::api::models::response::ApiResponse;
use crate::auth::token::TokenError;
use crate::db::errors::DbError;
use crate::types::UserId;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

/// Business codes carried in the envelope. `0` is success.
pub mod codes {
    pub const OK: i32 = 0;
    pub const INTERNAL: i32 = 500;
    pub const INVALID_PASSWORD: i32 = 1002;
    pub const USER_NOT_EXIST: i32 = 1003;
    pub const USER_DISABLED: i32 = 1007;
    pub const TOKEN_NOT_PRESENT: i32 = 1201;
    pub const TOKEN_EXPIRED: i32 = 1202;
    pub const TOKEN_INVALID: i32 = 1203;
    pub const TOKEN_MALFORMED_HEADER: i32 = 1204;
    pub const TOKEN_CREATION_FAILED: i32 = 1205;
    pub const PERMISSION_DENIED: i32 = 1206;
    pub const FORCE_OFFLINE: i32 = 1207;
    pub const TOKEN_MALFORMED: i32 = 1209;
    pub const TOKEN_NOT_YET_VALID: i32 = 1210;
    pub const BAD_REQUEST: i32 = 9001;
    pub const STORE_ERROR: i32 = 9004;
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// No Authorization header and no session
    #[error("Authorization token not present")]
    TokenNotPresent,

    /// Authorization header present but not `Bearer <token>`
    #[error("Authorization header must be of the form 'Bearer <token>'")]
    TokenMalformedHeader,

    /// Token body could not be parsed
    #[error("Token is malformed")]
    TokenMalformed,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token is not valid yet")]
    TokenNotYetValid,

    /// Signature mismatch or any other failed validation
    #[error("Token is invalid")]
    TokenInvalid,

    #[error("Failed to create token: {reason}")]
    TokenCreationFailed { reason: String },

    /// The user referenced by a session, token or login request does not exist
    #[error("User {user} does not exist")]
    UserNotExist { user: String },

    #[error("Incorrect password")]
    InvalidPassword,

    #[error("User {user} is disabled")]
    UserDisabled { user: String },

    /// No role of the caller grants the requested route
    #[error("Insufficient permissions to {method} {path}")]
    PermissionDenied { method: String, path: String },

    /// An administrator forced this user offline; they must log in again
    #[error("User {user_id} has been forced offline")]
    ForceOffline { user_id: UserId },

    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// An external store (session, user, role grants) failed or timed out
    #[error("Store operation failed: {operation}")]
    Store { operation: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),
}

impl From<TokenError> for Error {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Malformed => Error::TokenMalformed,
            TokenError::Expired => Error::TokenExpired,
            TokenError::NotYetValid => Error::TokenNotYetValid,
            TokenError::Invalid => Error::TokenInvalid,
        }
    }
}

impl Error {
    /// Business code for the envelope
    pub fn code(&self) -> i32 {
        match self {
            Error::TokenNotPresent => codes::TOKEN_NOT_PRESENT,
            Error::TokenMalformedHeader => codes::TOKEN_MALFORMED_HEADER,
            Error::TokenMalformed => codes::TOKEN_MALFORMED,
            Error::TokenExpired => codes::TOKEN_EXPIRED,
            Error::TokenNotYetValid => codes::TOKEN_NOT_YET_VALID,
            Error::TokenInvalid => codes::TOKEN_INVALID,
            Error::TokenCreationFailed { .. } => codes::TOKEN_CREATION_FAILED,
            Error::UserNotExist { .. } => codes::USER_NOT_EXIST,
            Error::InvalidPassword => codes::INVALID_PASSWORD,
            Error::UserDisabled { .. } => codes::USER_DISABLED,
            Error::PermissionDenied { .. } => codes::PERMISSION_DENIED,
            Error::ForceOffline { .. } => codes::FORCE_OFFLINE,
            Error::BadRequest { .. } => codes::BAD_REQUEST,
            Error::Store { .. } | Error::Database(_) => codes::STORE_ERROR,
            Error::Internal { .. } => codes::INTERNAL,
        }
    }

    /// Fixed message for the code, independent of the detail
    pub fn message(&self) -> &'static str {
        match self {
            Error::TokenNotPresent => "Token does not exist, please log in again",
            Error::TokenMalformedHeader => "Token type error, please log in again",
            Error::TokenMalformed => "Token is malformed, please log in again",
            Error::TokenExpired => "Token has expired, please log in again",
            Error::TokenNotYetValid => "Token is not active yet, please log in again",
            Error::TokenInvalid => "Token is incorrect, please log in again",
            Error::TokenCreationFailed { .. } => "Token creation failed",
            Error::UserNotExist { .. } => "User does not exist",
            Error::InvalidPassword => "Incorrect password",
            Error::UserDisabled { .. } => "User is disabled",
            Error::PermissionDenied { .. } => "Insufficient permissions",
            Error::ForceOffline { .. } => "You have been forced offline",
            Error::BadRequest { .. } => "Request parameter format error",
            Error::Store { .. } | Error::Database(_) => "Database operation error",
            Error::Internal { .. } => "Internal server error",
        }
    }

    /// Returns a user-safe detail string, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Store { .. } | Error::Database(_) => "Database error occurred".to_string(),
            Error::Internal { .. } | Error::TokenCreationFailed { .. } => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// True for failures of infrastructure rather than of the caller
    pub fn is_store_error(&self) -> bool {
        matches!(self, Error::Store { .. } | Error::Database(_))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Store { .. } | Error::Database(_) | Error::Internal { .. } | Error::TokenCreationFailed { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::TokenNotPresent
            | Error::TokenMalformedHeader
            | Error::TokenMalformed
            | Error::TokenExpired
            | Error::TokenNotYetValid
            | Error::TokenInvalid
            | Error::PermissionDenied { .. }
            | Error::ForceOffline { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::UserNotExist { .. } | Error::InvalidPassword | Error::UserDisabled { .. } | Error::BadRequest { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let body = ApiResponse {
            code: self.code(),
            message: self.message().to_string(),
            data: self.user_message(),
        };
        (StatusCode::OK, Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn envelope(error: Error) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_classified_errors_use_status_200() {
        for error in [
            Error::TokenNotPresent,
            Error::TokenMalformedHeader,
            Error::TokenExpired,
            Error::PermissionDenied {
                method: "GET".to_string(),
                path: "/user/list".to_string(),
            },
            Error::Store {
                operation: "load user".to_string(),
            },
        ] {
            let code = error.code();
            let (status, body) = envelope(error).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["code"], code);
            assert!(body["message"].is_string());
            assert!(body["data"].is_string());
        }
    }

    #[tokio::test]
    async fn test_store_error_does_not_leak_details() {
        let (_, body) = envelope(Error::Store {
            operation: "connect to postgres://secret@db".to_string(),
        })
        .await;
        assert_eq!(body["code"], codes::STORE_ERROR);
        assert!(!body["data"].as_str().unwrap().contains("secret"));
    }

    #[test]
    fn test_header_and_body_malformation_are_distinct() {
        assert_ne!(Error::TokenMalformedHeader.code(), Error::TokenMalformed.code());
        assert_ne!(Error::TokenNotPresent.code(), Error::TokenMalformedHeader.code());
    }

    #[test]
    fn test_token_error_maps_one_to_one() {
        assert_eq!(Error::from(TokenError::Malformed).code(), codes::TOKEN_MALFORMED);
        assert_eq!(Error::from(TokenError::Expired).code(), codes::TOKEN_EXPIRED);
        assert_eq!(Error::from(TokenError::NotYetValid).code(), codes::TOKEN_NOT_YET_VALID);
        assert_eq!(Error::from(TokenError::Invalid).code(), codes::TOKEN_INVALID);
    }

    #[test]
    fn test_database_errors_are_store_errors() {
        let error = Error::from(DbError::from(sqlx::Error::PoolTimedOut));
        assert!(error.is_store_error());
        assert_eq!(error.code(), codes::STORE_ERROR);
    }
}
