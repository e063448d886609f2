use log::{debug, error, info};
use rusqlite::{Connection, Transaction};

use crate::db::schema::{
    MIGRATION_1_2_COLUMNS, MIGRATION_1_2_INDEXES, SCHEMA_V1, VALIDATE_SYNC_COLUMNS,
};
use crate::db::{DbError, Result as DbResult};

/// Declared schema version of this library.
pub const LATEST_SCHEMA_VERSION: i32 = 2;

/// One step of the schema history.
pub struct Migration {
    pub from: i32,
    pub to: i32,
    pub name: &'static str,
    apply: fn(&Transaction<'_>) -> DbResult<()>,
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    from: 1,
    to: 2,
    name: "add_sync_columns",
    apply: migrate_1_2,
}];

pub fn schema_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.pragma_query_value(None, "user_version", |r| r.get(0))
}

/// Brings the database up to `LATEST_SCHEMA_VERSION` and returns it.
///
/// A brand-new file is created at v1 and then walks the same migration
/// path as an old install. Any failure is fatal for this open: each step
/// runs in its own transaction, so the schema stays at the last good version.
pub fn setup_migrations(conn: &mut Connection) -> DbResult<i32> {
    let mut ver = schema_version(conn)?;

    if ver > LATEST_SCHEMA_VERSION {
        error!("schema version {} is newer than {}", ver, LATEST_SCHEMA_VERSION);
        return Err(DbError::UnsupportedSchema(ver));
    }

    if ver < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        ver = 1;
        debug!("created schema v1");
    }

    while ver < LATEST_SCHEMA_VERSION {
        let step = MIGRATIONS
            .iter()
            .find(|m| m.from == ver)
            .ok_or_else(|| DbError::Migration {
                from: ver,
                to: LATEST_SCHEMA_VERSION,
                reason: "no migration registered".into(),
            })?;
        run_migration(conn, step)?;
        ver = step.to;
    }

    Ok(ver)
}

fn run_migration(conn: &mut Connection, step: &Migration) -> DbResult<()> {
    let fail = |reason: String| DbError::Migration { from: step.from, to: step.to, reason };

    let tx = conn.transaction().map_err(|e| fail(e.to_string()))?;
    (step.apply)(&tx).map_err(|e| match e {
        DbError::Migration { .. } => e,
        other => fail(other.to_string()),
    })?;
    tx.pragma_update(None, "user_version", step.to)
        .map_err(|e| fail(e.to_string()))?;
    tx.commit().map_err(|e| fail(e.to_string()))?;

    info!("migrated schema {} -> {} ({})", step.from, step.to, step.name);
    Ok(())
}

fn migrate_1_2(tx: &Transaction<'_>) -> DbResult<()> {
    tx.execute_batch(MIGRATION_1_2_COLUMNS)?;
    create_sync_indexes(tx)?;

    if !validate_sync_columns(tx) {
        return Err(DbError::Migration {
            from: 1,
            to: 2,
            reason: "sync columns are not readable after migration".into(),
        });
    }
    Ok(())
}

pub fn create_sync_indexes(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(MIGRATION_1_2_INDEXES)
}

/// True when all six sync columns can be read.
pub fn validate_sync_columns(conn: &Connection) -> bool {
    let probe = conn.prepare(VALIDATE_SYNC_COLUMNS).and_then(|mut stmt| {
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for idx in 0..6 {
                row.get_ref(idx)?;
            }
        }
        Ok(())
    });
    match probe {
        Ok(()) => true,
        Err(e) => {
            error!("sync column validation failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn column_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn.prepare("PRAGMA table_info(saved_scripts)").unwrap();
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        names
    }

    fn index_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'saved_scripts' ORDER BY name")
            .unwrap();
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        names
    }

    fn legacy_db() -> Connection {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory database");
        conn.execute_batch(SCHEMA_V1).expect("Failed to create v1 schema");
        conn
    }

    #[test]
    fn test_fresh_database_reaches_latest() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ver = setup_migrations(&mut conn).unwrap();

        assert_eq!(ver, LATEST_SCHEMA_VERSION);
        assert_eq!(schema_version(&conn).unwrap(), 2);
        let cols = column_names(&conn);
        for col in ["firebaseId", "userId", "syncStatus", "lastSyncAt", "version", "isDeleted"] {
            assert!(cols.iter().any(|c| c == col), "missing column {col}");
        }
    }

    #[test]
    fn test_legacy_rows_get_defaults() {
        let mut conn = legacy_db();
        conn.execute(
            "INSERT INTO saved_scripts (templateType, content, createdAt, updatedAt) VALUES (?1, ?2, ?3, ?4)",
            params!["invoice", "legacy body", 1_600_000_000_000_i64, 1_600_000_000_000_i64],
        )
        .unwrap();

        setup_migrations(&mut conn).unwrap();

        let row = conn
            .query_row(
                "SELECT content, syncStatus, version, isDeleted, firebaseId, userId, lastSyncAt FROM saved_scripts",
                [],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, i64>(2)?,
                        r.get::<_, i64>(3)?,
                        r.get::<_, Option<String>>(4)?,
                        r.get::<_, Option<String>>(5)?,
                        r.get::<_, Option<i64>>(6)?,
                    ))
                },
            )
            .unwrap();

        assert_eq!(row, ("legacy body".to_string(), 0, 1, 0, None, None, None));
    }

    #[test]
    fn test_indexes_created_and_rerunnable() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_migrations(&mut conn).unwrap();

        let indexes = index_names(&conn);
        for idx in ["syncStatus", "firebaseId", "userId", "isDeleted"] {
            let name = format!("index_saved_scripts_{idx}");
            assert!(indexes.contains(&name), "missing index {name}");
        }

        create_sync_indexes(&conn).unwrap();
        create_sync_indexes(&conn).unwrap();
        assert_eq!(index_names(&conn), indexes);
    }

    #[test]
    fn test_setup_is_noop_at_latest() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_migrations(&mut conn).unwrap();
        let before = column_names(&conn);

        assert_eq!(setup_migrations(&mut conn).unwrap(), 2);
        assert_eq!(column_names(&conn), before);
    }

    #[test]
    fn test_failed_migration_rolls_back_whole_batch() {
        let mut conn = legacy_db();
        // A column added out of band makes the lastSyncAt ALTER fail.
        conn.execute("ALTER TABLE saved_scripts ADD COLUMN lastSyncAt INTEGER", [])
            .unwrap();

        let err = setup_migrations(&mut conn).unwrap_err();
        assert!(matches!(err, DbError::Migration { from: 1, to: 2, .. }), "{err:?}");

        assert_eq!(schema_version(&conn).unwrap(), 1);
        let cols = column_names(&conn);
        assert!(!cols.iter().any(|c| c == "firebaseId"));
        assert!(!cols.iter().any(|c| c == "syncStatus"));
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 9).unwrap();
        assert!(matches!(setup_migrations(&mut conn), Err(DbError::UnsupportedSchema(9))));
    }

    #[test]
    fn test_validation_reports_failure_on_v1() {
        let conn = legacy_db();
        assert!(!validate_sync_columns(&conn));
    }

    #[test]
    fn test_validation_succeeds_on_empty_table() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_migrations(&mut conn).unwrap();
        assert!(validate_sync_columns(&conn));
    }
}
