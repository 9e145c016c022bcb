//! Signed bearer tokens: creation and verification.
//!
//! Tokens are stateless HS256 JWTs. Nothing is recorded server-side; a token is valid
//! until its `exp` claim passes.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tracing::{debug, instrument};

use crate::{
    config::JwtConfig,
    errors::Error,
    types::{RoleId, UserId},
};

/// Claims carried in every bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    pub role_ids: Vec<RoleId>,
    pub iss: String,
    pub iat: i64, // Issued at
    pub exp: i64, // Expiration time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
}

/// The closed set of verification failures.
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token has expired")]
    Expired,
    #[error("token is not valid yet")]
    NotYetValid,
    /// Bad signature, wrong issuer, or any other failed check
    #[error("token is invalid")]
    Invalid,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => TokenError::Malformed,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::ImmatureSignature => TokenError::NotYetValid,
            _ => TokenError::Invalid,
        }
    }
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.validate_nbf = true;
    validation
}

/// Create a signed token for `user_id` valid for `ttl_hours` from now.
///
/// A negative `ttl_hours` produces a token that is already expired.
pub fn generate_token(secret: &str, issuer: &str, ttl_hours: i64, user_id: UserId, role_ids: &[RoleId]) -> Result<String, Error> {
    let now = Utc::now();
    let exp = now + Duration::hours(ttl_hours);
    let claims = Claims {
        user_id,
        role_ids: role_ids.to_vec(),
        iss: issuer.to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
        nbf: None,
    };

    sign_claims(secret, &claims)
}

fn sign_claims(secret: &str, claims: &Claims) -> Result<String, Error> {
    let key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &key).map_err(|e| Error::TokenCreationFailed { reason: e.to_string() })
}

/// Verify signature and time claims of `token` and return its claims.
///
/// The signature is checked before any claim, so a tampered token is always `Invalid`,
/// never `Expired` or `Malformed`.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, TokenError> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let data = decode::<Claims>(token, &key, &validation())?;
    Ok(data.claims)
}

/// Token issuing and verification bound to the process configuration.
///
/// Cheap to clone; holds only the immutable signing configuration.
#[derive(Debug, Clone)]
pub struct TokenService {
    secret: String,
    issuer: String,
    ttl_hours: i64,
}

impl TokenService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            secret: config.secret.clone(),
            issuer: config.issuer.clone(),
            ttl_hours: config.expire_hours,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[instrument(skip(self, role_ids))]
    pub fn generate(&self, user_id: UserId, role_ids: &[RoleId]) -> Result<String, Error> {
        generate_token(&self.secret, &self.issuer, self.ttl_hours, user_id, role_ids)
    }

    /// Verify a token and additionally require it was issued by this service.
    #[instrument(skip_all, err(level = "debug"))]
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = verify_token(&self.secret, token)?;
        if claims.iss != self.issuer {
            debug!("Token issuer '{}' does not match '{}'", claims.iss, self.issuer);
            return Err(TokenError::Invalid);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-for-jwt";
    const ISSUER: &str = "blogctl-test";

    #[test]
    fn test_round_trip_preserves_claims() {
        let before = Utc::now().timestamp();
        let token = generate_token(SECRET, ISSUER, 1, 42, &[1, 2]).unwrap();
        let claims = verify_token(SECRET, &token).unwrap();

        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.role_ids, vec![1, 2]);
        assert_eq!(claims.iss, ISSUER);
        assert!(claims.exp >= before + 59 * 60);
        assert!(claims.exp <= before + 61 * 60);
        assert!(claims.iat >= before);
    }

    #[test]
    fn test_flipped_signature_byte_is_invalid() {
        let token = generate_token(SECRET, ISSUER, 1, 42, &[1, 2]).unwrap();
        let sig_start = token.rfind('.').unwrap() + 1;
        let mut bytes = token.into_bytes();
        let i = sig_start + 5;
        bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        assert_eq!(verify_token(SECRET, &tampered), Err(TokenError::Invalid));
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = generate_token(SECRET, ISSUER, 1, 42, &[]).unwrap();
        assert_eq!(verify_token("different-secret", &token), Err(TokenError::Invalid));
    }

    #[test]
    fn test_negative_ttl_is_expired() {
        let token = generate_token(SECRET, ISSUER, -1, 42, &[1]).unwrap();
        assert_eq!(verify_token(SECRET, &token), Err(TokenError::Expired));
    }

    #[test]
    fn test_expired_token_with_bad_signature_is_invalid() {
        let token = generate_token(SECRET, ISSUER, -1, 42, &[1]).unwrap();
        assert_eq!(verify_token("different-secret", &token), Err(TokenError::Invalid));
    }

    #[test]
    fn test_future_nbf_is_not_yet_valid() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: 7,
            role_ids: vec![],
            iss: ISSUER.to_string(),
            iat: now,
            exp: now + 7200,
            nbf: Some(now + 3600),
        };
        let token = sign_claims(SECRET, &claims).unwrap();
        assert_eq!(verify_token(SECRET, &token), Err(TokenError::NotYetValid));
    }

    #[test]
    fn test_malformed_tokens() {
        for token in ["not-a-token", "", "a.b", "!!!.???.***"] {
            assert_eq!(verify_token(SECRET, token), Err(TokenError::Malformed), "token: {token:?}");
        }
    }

    #[test]
    fn test_service_rejects_foreign_issuer() {
        let service = TokenService::new(&JwtConfig {
            secret: SECRET.to_string(),
            issuer: ISSUER.to_string(),
            expire_hours: 1,
        });
        let foreign = generate_token(SECRET, "someone-else", 1, 42, &[1]).unwrap();
        assert_eq!(service.verify(&foreign), Err(TokenError::Invalid));

        let own = service.generate(42, &[1]).unwrap();
        assert_eq!(service.verify(&own).unwrap().user_id, 42);
    }
}
