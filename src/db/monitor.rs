// src/db/monitor.rs
//
// Change notifications for live lists.
//
//  1) update_hook records every table touched by INSERT/UPDATE/DELETE,
//  2) rollback_hook forgets what a rolled-back transaction touched,
//  3) at the end of each write, still on the connection thread, the dao
//     takes the pending set (so it only ever holds that write's tables) and
//     publishes it as one TableInvalidation when the write succeeded,
//  4) each live list owns a task that re-runs its query on invalidation and
//     publishes the full snapshot through a watch channel.
//
// Several writes landing before a live list task wakes up are coalesced
// into one re-query; the watch channel only keeps the latest snapshot.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, trace, warn};
use rusqlite::hooks::Action;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::watch;
use tokio_rusqlite::Connection;

use crate::db::Result as DbResult;

/// Tables changed by one committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInvalidation {
    pub tables: Vec<String>,
}

impl TableInvalidation {
    pub fn touches(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == table)
    }
}

pub struct InvalidationTracker {
    pending: Arc<Mutex<BTreeSet<String>>>,
    sender: broadcast::Sender<TableInvalidation>,
}

impl InvalidationTracker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            pending: Arc::new(Mutex::new(BTreeSet::new())),
            sender,
        }
    }

    /// Registers the hooks on the connection. Must run on the connection's
    /// own thread, i.e. inside `Connection::call`.
    pub fn install(&self, conn: &rusqlite::Connection) {
        let pending = Arc::clone(&self.pending);
        conn.update_hook(Some(move |action: Action, db: &str, table: &str, rowid: i64| {
            trace!("::HOOK:: {:?} on {}.{} rowid={}", action, db, table, rowid);
            lock_pending(&pending).insert(table.to_string());
        }));

        let pending = Arc::clone(&self.pending);
        conn.rollback_hook(Some(move || {
            debug!("::HOOK:: rollback, dropping pending invalidations");
            lock_pending(&pending).clear();
        }));

        conn.commit_hook(Some(|| {
            trace!("::HOOK:: commit");
            // false keeps the commit
            false
        }));
    }

    /// Broadcasts the tables touched since the last flush. Returns how many
    /// tables were reported.
    pub fn flush(&self) -> usize {
        let tables = self.take_pending();
        self.publish(tables)
    }

    /// Removes and returns what the connection touched since the last take.
    /// Call on the connection thread right after a write so the set never
    /// mixes two writes.
    pub fn take_pending(&self) -> Vec<String> {
        std::mem::take(&mut *lock_pending(&self.pending))
            .into_iter()
            .collect()
    }

    /// Broadcasts one invalidation for `tables`. Returns how many tables
    /// were reported.
    pub fn publish(&self, tables: Vec<String>) -> usize {
        if tables.is_empty() {
            return 0;
        }
        let count = tables.len();
        trace!("invalidating {:?}", tables);
        // Err only means nobody is listening.
        let _ = self.sender.send(TableInvalidation { tables });
        count
    }

    /// Forgets pending changes of a write that failed.
    pub fn discard(&self) {
        lock_pending(&self.pending).clear();
    }

    /// Live lists currently listening.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TableInvalidation> {
        self.sender.subscribe()
    }
}

fn lock_pending(pending: &Mutex<BTreeSet<String>>) -> MutexGuard<'_, BTreeSet<String>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// A continuously updated query result.
///
/// Every snapshot is the full result set; dropping all clones stops the
/// background re-query task.
#[derive(Debug, Clone)]
pub struct LiveList<T> {
    rx: watch::Receiver<Vec<T>>,
}

impl<T: Clone> LiveList<T> {
    /// Latest snapshot without waiting.
    pub fn current(&self) -> Vec<T> {
        self.rx.borrow().clone()
    }

    /// Waits for the next snapshot. `None` once the producer is gone.
    pub async fn changed(&mut self) -> Option<Vec<T>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Runs `query` now and again after every write touching `table`.
pub(crate) async fn spawn_live_query<T, F>(
    conn: Arc<Connection>,
    tracker: &InvalidationTracker,
    table: &'static str,
    label: String,
    query: F,
) -> DbResult<LiveList<T>>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&rusqlite::Connection) -> rusqlite::Result<Vec<T>> + Send + Sync + 'static,
{
    // Subscribe before the first read so no write can slip in between.
    let mut invalidations = tracker.subscribe();
    let query = Arc::new(query);

    let q = Arc::clone(&query);
    let initial = conn.call(move |c| Ok((*q)(c)?)).await?;
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = tx.closed() => None,
                msg = invalidations.recv() => Some(msg),
            };
            match event {
                None => break,
                Some(Ok(inv)) if !inv.touches(table) => continue,
                Some(Ok(_)) => {}
                Some(Err(RecvError::Lagged(skipped))) => {
                    warn!("live list {} lagged by {} invalidations", label, skipped);
                }
                Some(Err(RecvError::Closed)) => break,
            }

            // Coalesce whatever else is already queued.
            loop {
                match invalidations.try_recv() {
                    Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }

            let q = Arc::clone(&query);
            match conn.call(move |c| Ok((*q)(c)?)).await {
                Ok(rows) => {
                    trace!("live list {} -> {} rows", label, rows.len());
                    if tx.send(rows).is_err() {
                        break;
                    }
                }
                Err(tokio_rusqlite::Error::ConnectionClosed) => break,
                Err(e) => error!("live list {} re-query failed: {}", label, e),
            }
        }
        debug!("live list {} stopped", label);
    });

    Ok(LiveList { rx })
}
