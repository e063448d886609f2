pub const SCRIPTS_TABLE: &str = "saved_scripts";

/// Columns in entity order, as read back by the dao.
pub const SCRIPT_COLUMNS: &str = "id, templateType, content, createdAt, updatedAt, \
     firebaseId, userId, syncStatus, lastSyncAt, version, isDeleted";

pub const SCHEMA_V1: &str = r#"
BEGIN;

-- Scripts (timestamps are epoch milliseconds):
CREATE TABLE
    IF NOT EXISTS saved_scripts (
        id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
        templateType TEXT NOT NULL,
        content TEXT NOT NULL,
        createdAt INTEGER NOT NULL,
        updatedAt INTEGER NOT NULL
    );

PRAGMA user_version = 1;

COMMIT;
"#;

/// v1 -> v2: sync-readiness columns. Runs once, gated by user_version.
pub const MIGRATION_1_2_COLUMNS: &str = r#"
ALTER TABLE saved_scripts ADD COLUMN firebaseId TEXT;
ALTER TABLE saved_scripts ADD COLUMN userId TEXT;
ALTER TABLE saved_scripts ADD COLUMN syncStatus INTEGER NOT NULL DEFAULT 0;
ALTER TABLE saved_scripts ADD COLUMN lastSyncAt INTEGER;
ALTER TABLE saved_scripts ADD COLUMN version INTEGER NOT NULL DEFAULT 1;
ALTER TABLE saved_scripts ADD COLUMN isDeleted INTEGER NOT NULL DEFAULT 0;
"#;

/// v2 indexes; safe to re-run.
pub const MIGRATION_1_2_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS index_saved_scripts_syncStatus ON saved_scripts (syncStatus);
CREATE INDEX IF NOT EXISTS index_saved_scripts_firebaseId ON saved_scripts (firebaseId);
CREATE INDEX IF NOT EXISTS index_saved_scripts_userId ON saved_scripts (userId);
CREATE INDEX IF NOT EXISTS index_saved_scripts_isDeleted ON saved_scripts (isDeleted);
"#;

/// Post-migration probe: must succeed over zero or more rows.
pub const VALIDATE_SYNC_COLUMNS: &str = r#"
SELECT firebaseId, userId, syncStatus, lastSyncAt, version, isDeleted
FROM saved_scripts
LIMIT 1
"#;
