use thiserror::Error;

/// Failure talking to Postgres. Both kinds surface to callers as a store error; the split
/// only decides how the failure is logged.
#[derive(Error, Debug)]
pub enum DbError {
    /// No usable connection: the pool timed out or closed, or the socket failed
    #[error("database unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),

    /// A statement was rejected or its rows did not decode
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => DbError::Unavailable(err),
            _ => DbError::Query(err),
        }
    }
}

/// Type alias for database operation results
pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failures_are_unavailable() {
        assert!(matches!(DbError::from(sqlx::Error::PoolTimedOut), DbError::Unavailable(_)));
        assert!(matches!(DbError::from(sqlx::Error::PoolClosed), DbError::Unavailable(_)));
        assert!(matches!(DbError::from(sqlx::Error::RowNotFound), DbError::Query(_)));
    }
}
