// src/db/mod.rs
//
// Local storage for saved scripts:
// 1) schema + migrations (user_version gated)
// 2) entity and boundary converters
// 3) change monitor (sqlite hooks -> live lists)
// 4) dao / database handle / repository

pub mod converters;
pub mod dao;
pub mod database;
pub mod migrations;
pub mod monitor;
pub mod monitoring;
pub mod repository;
pub mod schema;
pub mod script;

use thiserror::Error;

pub use dao::ScriptDao;
pub use database::{DatabaseProvider, ScriptDatabase};
pub use monitor::{InvalidationTracker, LiveList, TableInvalidation};
pub use repository::{LocalScriptRepository, ScriptRepository};
pub use script::{Script, SyncStatus, TemplateType};

/// Errors of the storage layer.
///
/// Not-found is never an error here: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("connection error: {0}")]
    Connection(String),

    /// Fatal for the open attempt, the schema is left at `from`.
    #[error("migration {from} -> {to} failed: {reason}")]
    Migration { from: i32, to: i32, reason: String },

    #[error("database schema version {0} is newer than supported")]
    UnsupportedSchema(i32),

    #[error("invalid script: {0}")]
    InvalidScript(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<tokio_rusqlite::Error> for DbError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::Rusqlite(e) => DbError::Sql(e),
            tokio_rusqlite::Error::Other(e) => match e.downcast::<DbError>() {
                Ok(inner) => *inner,
                Err(other) => DbError::Connection(other.to_string()),
            },
            other => DbError::Connection(other.to_string()),
        }
    }
}

impl DbError {
    /// Wraps the error so it can leave a `Connection::call` closure and be
    /// recovered intact by the `From<tokio_rusqlite::Error>` impl above.
    pub(crate) fn into_call_error(self) -> tokio_rusqlite::Error {
        tokio_rusqlite::Error::Other(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_round_trips_db_error() {
        let err = DbError::Migration { from: 1, to: 2, reason: "boom".into() };
        let back = DbError::from(err.into_call_error());
        match back {
            DbError::Migration { from, to, reason } => {
                assert_eq!((from, to), (1, 2));
                assert_eq!(reason, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rusqlite_error_is_unwrapped() {
        let err = tokio_rusqlite::Error::Rusqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(DbError::from(err), DbError::Sql(rusqlite::Error::QueryReturnedNoRows)));
    }

    #[test]
    fn test_closed_connection_maps_to_connection_error() {
        let err = DbError::from(tokio_rusqlite::Error::ConnectionClosed);
        assert!(matches!(err, DbError::Connection(_)));
    }
}
