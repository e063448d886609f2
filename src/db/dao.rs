// src/db/dao.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Row};
use tokio_rusqlite::Connection;

use crate::db::converters::{optional_millis, EpochMillis};
use crate::db::monitor::{spawn_live_query, InvalidationTracker, LiveList};
use crate::db::monitoring::measure_db_operation;
use crate::db::schema::{SCRIPTS_TABLE, SCRIPT_COLUMNS};
use crate::db::script::{now_millis, Script, SyncStatus, TemplateType};
use crate::db::{DbError, Result as DbResult};

/// Typed access to `saved_scripts`.
///
/// Reads and writes run on the connection's own thread; every successful
/// write re-pushes the open live lists.
#[derive(Clone)]
pub struct ScriptDao {
    conn: Arc<Connection>,
    tracker: Arc<InvalidationTracker>,
}

fn row_to_script(row: &Row<'_>) -> rusqlite::Result<Script> {
    Ok(Script {
        id: Some(row.get(0)?),
        template_type: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get::<_, EpochMillis>(3)?.into(),
        updated_at: row.get::<_, EpochMillis>(4)?.into(),
        firebase_id: row.get(5)?,
        user_id: row.get(6)?,
        sync_status: row.get(7)?,
        last_sync_at: row.get::<_, Option<EpochMillis>>(8)?.map(Into::into),
        version: row.get(9)?,
        is_deleted: row.get(10)?,
    })
}

fn select_live_all(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<Script>> {
    let sql = format!(
        "SELECT {SCRIPT_COLUMNS} FROM saved_scripts WHERE isDeleted = 0 ORDER BY updatedAt DESC"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map([], row_to_script)?;
    rows.collect()
}

fn select_live_by_template(
    conn: &rusqlite::Connection,
    template: &TemplateType,
) -> rusqlite::Result<Vec<Script>> {
    let sql = format!(
        "SELECT {SCRIPT_COLUMNS} FROM saved_scripts \
         WHERE templateType = ?1 AND isDeleted = 0 ORDER BY updatedAt DESC"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![template], row_to_script)?;
    rows.collect()
}

impl ScriptDao {
    pub fn new(conn: Arc<Connection>, tracker: Arc<InvalidationTracker>) -> Self {
        Self { conn, tracker }
    }

    async fn read<T, F>(&self, operation: &str, f: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        measure_db_operation(operation, async {
            let value = self.conn.call(move |c| Ok(f(c)?)).await?;
            Ok::<T, DbError>(value)
        })
        .await
    }

    async fn write<T, F>(&self, operation: &str, f: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let tracker = Arc::clone(&self.tracker);
        self.read(operation, move |c| {
            let result = f(c);
            // Claimed before the next queued call can touch the pending set.
            let touched = tracker.take_pending();
            if result.is_ok() {
                tracker.publish(touched);
            }
            result
        })
        .await
    }

    // ---------------------- Live lists ----------------------

    /// All visible scripts, newest `updatedAt` first.
    pub async fn observe_all(&self) -> DbResult<LiveList<Script>> {
        spawn_live_query(
            Arc::clone(&self.conn),
            &self.tracker,
            SCRIPTS_TABLE,
            "all".to_string(),
            select_live_all,
        )
        .await
    }

    /// Visible scripts of one template, newest `updatedAt` first.
    pub async fn observe_by_template(&self, template: &TemplateType) -> DbResult<LiveList<Script>> {
        let template = template.clone();
        spawn_live_query(
            Arc::clone(&self.conn),
            &self.tracker,
            SCRIPTS_TABLE,
            format!("template={template}"),
            move |c| select_live_by_template(c, &template),
        )
        .await
    }

    // ---------------------- One-shot reads ----------------------

    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Script>> {
        self.read("get_by_id", move |c| {
            let sql = format!("SELECT {SCRIPT_COLUMNS} FROM saved_scripts WHERE id = ?1");
            let mut stmt = c.prepare_cached(&sql)?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_script(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Snapshot of what `observe_all` would currently emit.
    pub async fn all_scripts(&self) -> DbResult<Vec<Script>> {
        self.read("all_scripts", select_live_all).await
    }

    /// Snapshot of what `observe_by_template` would currently emit.
    pub async fn scripts_by_template(&self, template: &TemplateType) -> DbResult<Vec<Script>> {
        let template = template.clone();
        self.read("scripts_by_template", move |c| select_live_by_template(c, &template))
            .await
    }

    pub async fn count(&self) -> DbResult<i64> {
        self.read("count", |c| {
            c.query_row("SELECT COUNT(*) FROM saved_scripts WHERE isDeleted = 0", [], |r| r.get(0))
        })
        .await
    }

    // ---------------------- Writes ----------------------

    /// Inserts the script and returns its id. A row with the same id is
    /// replaced entirely.
    pub async fn insert(&self, script: &Script) -> DbResult<i64> {
        script.validate()?;
        let s = script.clone();
        let id = self
            .write("insert", move |c| {
                let sql = format!(
                    "INSERT OR REPLACE INTO saved_scripts ({SCRIPT_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                );
                c.prepare_cached(&sql)?.execute(params![
                    s.id,
                    s.template_type,
                    s.content,
                    EpochMillis(s.created_at),
                    EpochMillis(s.updated_at),
                    s.firebase_id,
                    s.user_id,
                    s.sync_status,
                    optional_millis(s.last_sync_at),
                    s.version,
                    s.is_deleted,
                ])?;
                Ok(c.last_insert_rowid())
            })
            .await?;
        debug!("inserted script id={}", id);
        Ok(id)
    }

    /// Full-row overwrite by primary key. A missing row is a silent no-op.
    pub async fn update(&self, script: &Script) -> DbResult<()> {
        let id = script
            .id
            .ok_or_else(|| DbError::InvalidScript("update requires an id".into()))?;
        script.validate()?;
        let s = script.clone();
        let changed = self
            .write("update", move |c| {
                c.prepare_cached(
                    "UPDATE saved_scripts SET templateType = ?2, content = ?3, createdAt = ?4, \
                     updatedAt = ?5, firebaseId = ?6, userId = ?7, syncStatus = ?8, \
                     lastSyncAt = ?9, version = ?10, isDeleted = ?11 WHERE id = ?1",
                )?
                .execute(params![
                    id,
                    s.template_type,
                    s.content,
                    EpochMillis(s.created_at),
                    EpochMillis(s.updated_at),
                    s.firebase_id,
                    s.user_id,
                    s.sync_status,
                    optional_millis(s.last_sync_at),
                    s.version,
                    s.is_deleted,
                ])
            })
            .await?;
        if changed == 0 {
            debug!("update of missing script id={} ignored", id);
        }
        Ok(())
    }

    /// Hard delete of the row matching the script's id.
    pub async fn delete(&self, script: &Script) -> DbResult<()> {
        match script.id {
            Some(id) => self.delete_by_id(id).await,
            None => Ok(()),
        }
    }

    /// Hard delete by primary key; deleting a missing id succeeds.
    pub async fn delete_by_id(&self, id: i64) -> DbResult<()> {
        self.write("delete_by_id", move |c| {
            c.prepare_cached("DELETE FROM saved_scripts WHERE id = ?1")?
                .execute(params![id])
        })
        .await?;
        Ok(())
    }

    // ---------------------- Sync contract ----------------------
    //
    // Only firebaseId, userId, syncStatus, version, lastSyncAt and
    // isDeleted are touched here.

    /// Rows the remote copy does not reflect yet, tombstones included,
    /// oldest change first.
    pub async fn pending_sync(&self) -> DbResult<Vec<Script>> {
        self.read("pending_sync", |c| {
            let sql = format!(
                "SELECT {SCRIPT_COLUMNS} FROM saved_scripts WHERE syncStatus != ?1 ORDER BY updatedAt ASC"
            );
            let mut stmt = c.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![SyncStatus::Synced], row_to_script)?;
            rows.collect()
        })
        .await
    }

    /// Records a successful upload. Returns false when the id is unknown.
    pub async fn mark_synced(
        &self,
        id: i64,
        firebase_id: &str,
        synced_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let firebase_id = firebase_id.to_string();
        let changed = self
            .write("mark_synced", move |c| {
                c.prepare_cached(
                    "UPDATE saved_scripts SET firebaseId = ?2, syncStatus = ?3, lastSyncAt = ?4 WHERE id = ?1",
                )?
                .execute(params![id, firebase_id, SyncStatus::Synced, EpochMillis(synced_at)])
            })
            .await?;
        Ok(changed > 0)
    }

    pub async fn mark_conflict(&self, id: i64) -> DbResult<bool> {
        let changed = self
            .write("mark_conflict", move |c| {
                c.prepare_cached("UPDATE saved_scripts SET syncStatus = ?2 WHERE id = ?1")?
                    .execute(params![id, SyncStatus::Conflict])
            })
            .await?;
        Ok(changed > 0)
    }

    /// Claims every ownerless script for `user_id`. Returns the row count.
    pub async fn assign_owner(&self, user_id: &str) -> DbResult<usize> {
        let user_id = user_id.to_string();
        let changed = self
            .write("assign_owner", move |c| {
                c.prepare_cached("UPDATE saved_scripts SET userId = ?1 WHERE userId IS NULL")?
                    .execute(params![user_id])
            })
            .await?;
        info!("assigned {} scripts to owner", changed);
        Ok(changed)
    }

    /// Soft delete: the row stays for sync but leaves the live lists.
    pub async fn mark_deleted(&self, id: i64) -> DbResult<bool> {
        let now = EpochMillis(now_millis());
        let changed = self
            .write("mark_deleted", move |c| {
                c.prepare_cached(
                    "UPDATE saved_scripts SET isDeleted = 1, syncStatus = ?2, version = version + 1, \
                     updatedAt = MAX(updatedAt + 1, ?3) WHERE id = ?1 AND isDeleted = 0",
                )?
                .execute(params![id, SyncStatus::Pending, now])
            })
            .await?;
        Ok(changed > 0)
    }

    /// Hard-deletes tombstones whose deletion already reached the remote.
    pub async fn purge_synced_tombstones(&self) -> DbResult<usize> {
        self.write("purge_synced_tombstones", |c| {
            c.prepare_cached("DELETE FROM saved_scripts WHERE isDeleted = 1 AND syncStatus = ?1")?
                .execute(params![SyncStatus::Synced])
        })
        .await
    }
}
