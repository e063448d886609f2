// src/db/database.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{error, info};
use tokio::sync::OnceCell;
use tokio_rusqlite::Connection;

use crate::config::{DbConfig, DbLocation};
use crate::db::dao::ScriptDao;
use crate::db::migrations::setup_migrations;
use crate::db::monitor::InvalidationTracker;
use crate::db::{DbError, Result as DbResult};

/// Owns the single storage connection.
pub struct ScriptDatabase {
    conn: Arc<Connection>,
    tracker: Arc<InvalidationTracker>,
    schema_version: i32,
}

impl ScriptDatabase {
    /// Opens the database, migrates it to the latest schema and installs
    /// the change hooks. A migration failure is returned as-is; the
    /// connection is not usable afterwards.
    pub async fn open(config: &DbConfig) -> DbResult<Self> {
        let conn = match &config.location {
            DbLocation::Memory => Connection::open_in_memory().await?,
            DbLocation::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path).await?
            }
        };

        let tracker = Arc::new(InvalidationTracker::new(config.notify_capacity));
        let hooks = Arc::clone(&tracker);
        let busy_timeout = config.busy_timeout;

        let migrated = conn
            .call(move |c| {
                c.busy_timeout(busy_timeout)?;
                let version = setup_migrations(c).map_err(|e| e.into_call_error())?;
                hooks.install(c);
                Ok(version)
            })
            .await;
        let schema_version = match migrated {
            Ok(version) => version,
            Err(e) => {
                let e = DbError::from(e);
                error!("Cannot open scripts database {:?}: {}", config.location, e);
                return Err(e);
            }
        };
        // Nothing is subscribed yet; migration writes are not news.
        tracker.discard();

        info!(
            "scripts database ready at {:?} (schema v{})",
            config.location, schema_version
        );
        Ok(Self {
            conn: Arc::new(conn),
            tracker,
            schema_version,
        })
    }

    pub fn schema_version(&self) -> i32 {
        self.schema_version
    }

    pub fn script_dao(&self) -> ScriptDao {
        ScriptDao::new(Arc::clone(&self.conn), Arc::clone(&self.tracker))
    }
}

/// Creates the database at most once, on first use.
///
/// Build one provider at startup and hand it (or what it returns) to every
/// consumer; concurrent first calls to [`DatabaseProvider::get`] share a
/// single open.
pub struct DatabaseProvider {
    config: DbConfig,
    instance: OnceCell<Arc<ScriptDatabase>>,
    opens: AtomicUsize,
}

impl DatabaseProvider {
    pub fn new(config: DbConfig) -> Self {
        Self {
            config,
            instance: OnceCell::new(),
            opens: AtomicUsize::new(0),
        }
    }

    pub async fn get(&self) -> DbResult<Arc<ScriptDatabase>> {
        let db = self
            .instance
            .get_or_try_init(|| async {
                self.opens.fetch_add(1, Ordering::SeqCst);
                ScriptDatabase::open(&self.config).await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(db))
    }

    /// Number of physical opens attempted so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }
}
