// src/db/converters.rs
//
// Boundary coercions between the entity and its stored columns.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use super::script::{SyncStatus, TemplateType};

/// A timestamp stored as INTEGER epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EpochMillis(pub DateTime<Utc>);

impl EpochMillis {
    pub fn from_millis(ms: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(ms).map(EpochMillis)
    }

    pub fn millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl From<DateTime<Utc>> for EpochMillis {
    fn from(ts: DateTime<Utc>) -> Self {
        EpochMillis(ts)
    }
}

impl From<EpochMillis> for DateTime<Utc> {
    fn from(ts: EpochMillis) -> Self {
        ts.0
    }
}

impl ToSql for EpochMillis {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.millis()))
    }
}

impl FromSql for EpochMillis {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let ms = i64::column_result(value)?;
        EpochMillis::from_millis(ms).ok_or(FromSqlError::OutOfRange(ms))
    }
}

impl ToSql for SyncStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.ordinal()))
    }
}

impl FromSql for SyncStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let ordinal = i64::column_result(value)?;
        SyncStatus::from_ordinal(ordinal).ok_or(FromSqlError::OutOfRange(ordinal))
    }
}

impl ToSql for TemplateType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TemplateType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        String::column_result(value).map(TemplateType::from)
    }
}

/// Optional timestamp column helper.
pub fn optional_millis(ts: Option<DateTime<Utc>>) -> Option<EpochMillis> {
    ts.map(EpochMillis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::{params, Connection};

    fn setup_test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory database");
        conn.execute("CREATE TABLE t (ts INTEGER, status INTEGER, tag TEXT)", [])
            .expect("Failed to create table");
        conn
    }

    #[test]
    fn test_timestamp_stored_as_integer_millis() {
        let conn = setup_test_db();
        let ts = EpochMillis::from_millis(1_700_000_123_456).unwrap();
        conn.execute("INSERT INTO t (ts) VALUES (?1)", params![ts]).unwrap();

        let raw: i64 = conn.query_row("SELECT ts FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(raw, 1_700_000_123_456);

        let back: EpochMillis = conn.query_row("SELECT ts FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_sync_status_stored_as_ordinal() {
        let conn = setup_test_db();
        for status in SyncStatus::ALL {
            conn.execute("DELETE FROM t", []).unwrap();
            conn.execute("INSERT INTO t (status) VALUES (?1)", params![status]).unwrap();
            let raw: i64 = conn.query_row("SELECT status FROM t", [], |r| r.get(0)).unwrap();
            assert_eq!(raw, status.ordinal());
            let back: SyncStatus = conn.query_row("SELECT status FROM t", [], |r| r.get(0)).unwrap();
            assert_eq!(back, status);
        }
    }

    #[test]
    fn test_unknown_ordinal_is_a_conversion_fault() {
        let conn = setup_test_db();
        conn.execute("INSERT INTO t (status) VALUES (42)", []).unwrap();
        let result: rusqlite::Result<SyncStatus> =
            conn.query_row("SELECT status FROM t", [], |r| r.get(0));
        assert!(matches!(result, Err(rusqlite::Error::IntegralValueOutOfRange(0, 42))));
    }

    #[test]
    fn test_template_type_as_text() {
        let conn = setup_test_db();
        let tag = TemplateType::from("invoice");
        conn.execute("INSERT INTO t (tag) VALUES (?1)", params![tag]).unwrap();
        let back: TemplateType = conn.query_row("SELECT tag FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(back, tag);
    }
}
