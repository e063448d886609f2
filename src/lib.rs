// src/lib.rs
//
// C ABI for the host app. Every call takes the opaque handle returned by
// `scripts_open`; JSON strings returned by Rust must be released with
// `scripts_free_string`.

use std::collections::HashMap;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

pub mod config;
pub mod db;

pub use config::{DbConfig, DbLocation};
pub use db::{
    DatabaseProvider, DbError, LiveList, LocalScriptRepository, Script, ScriptDao,
    ScriptDatabase, ScriptRepository, SyncStatus, TemplateType,
};

static LOGGER: OnceCell<()> = OnceCell::new();

/// Initialises `env_logger` once per process (`RUST_LOG`, default `info`).
pub fn init_logging() {
    LOGGER.get_or_init(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init();
    });
}

/// Host callback receiving a JSON array snapshot and the caller's context.
pub type SnapshotCallback = extern "C" fn(json: *const c_char, user_data: *mut c_void);

/// Everything one host session needs; owned by the host through a raw
/// pointer between `scripts_open` and `scripts_close`.
pub struct ScriptsHandle {
    runtime: Runtime,
    provider: DatabaseProvider,
    repo: Arc<dyn ScriptRepository>,
    subscriptions: Mutex<HashMap<i64, JoinHandle<()>>>,
    next_subscription: AtomicI64,
}

impl ScriptsHandle {
    pub fn open(config: DbConfig) -> Result<Self, DbError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("scripts-db")
            .enable_all()
            .build()?;
        let provider = DatabaseProvider::new(config);
        let db = runtime.block_on(provider.get())?;
        let repo: Arc<dyn ScriptRepository> = Arc::new(LocalScriptRepository::new(db.script_dao()));
        Ok(Self {
            runtime,
            provider,
            repo,
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicI64::new(1),
        })
    }

    pub fn repository(&self) -> Arc<dyn ScriptRepository> {
        Arc::clone(&self.repo)
    }

    pub fn schema_version(&self) -> Result<i32, DbError> {
        let db = self.runtime.block_on(self.provider.get())?;
        Ok(db.schema_version())
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, HashMap<i64, JoinHandle<()>>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn track(&self, task: JoinHandle<()>) -> i64 {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.lock_subscriptions().insert(id, task);
        id
    }

    /// Stops one subscription. Called off the runtime's threads, it returns
    /// only after a callback already in flight has finished.
    pub fn unsubscribe(&self, id: i64) -> bool {
        let Some(task) = self.lock_subscriptions().remove(&id) else {
            return false;
        };
        task.abort();
        if Handle::try_current().is_err() {
            let _ = self.runtime.block_on(task);
        }
        debug!("subscription {} stopped", id);
        true
    }

    /// Stops every subscription and shuts the runtime down. Safe to call
    /// from a snapshot callback; the runtime is then torn down without
    /// waiting for its workers.
    pub fn close(self) {
        for (_, task) in self.lock_subscriptions().drain() {
            task.abort();
        }
        if Handle::try_current().is_ok() {
            // Dropping a runtime inside async context panics.
            self.runtime.shutdown_background();
        }
    }
}

/// Raw host context moved into a background task.
struct HostContext(*mut c_void);

// The host guarantees `user_data` stays valid and thread-safe until the
// subscription is stopped by `scripts_unsubscribe` or `scripts_close`.
unsafe impl Send for HostContext {}

// ---------------------- Exported functions ----------------------

/// Opens (creating and migrating if needed) the database at `db_path`.
/// `":memory:"` opens a throwaway database. Returns null on failure.
#[no_mangle]
pub extern "C" fn scripts_open(db_path: *const c_char) -> *mut ScriptsHandle {
    init_logging();

    if db_path.is_null() {
        error!("scripts_open: db_path is null");
        return std::ptr::null_mut();
    }
    let path = unsafe { c_str_to_string(db_path) };

    let config = DbConfig {
        location: DbLocation::from_path_str(&path),
        ..DbConfig::default()
    };
    match ScriptsHandle::open(config) {
        Ok(handle) => {
            info!("scripts_open: ready");
            Box::into_raw(Box::new(handle))
        }
        Err(e) => {
            error!("scripts_open: cannot open {}: {}", path, e);
            std::ptr::null_mut()
        }
    }
}

/// Releases the handle, stopping every subscription. May be called from
/// inside a snapshot callback.
#[no_mangle]
pub unsafe extern "C" fn scripts_close(handle: *mut ScriptsHandle) {
    if !handle.is_null() {
        Box::from_raw(handle).close();
    }
}

/// JSON array of all visible scripts, newest first. Null on error.
#[no_mangle]
pub unsafe extern "C" fn scripts_list_json(handle: *mut ScriptsHandle) -> *mut c_char {
    let Some(h) = handle.as_ref() else { return std::ptr::null_mut() };
    let result = h.runtime.block_on(h.repo.list_scripts());
    json_or_null("scripts_list_json", result)
}

#[no_mangle]
pub unsafe extern "C" fn scripts_list_by_template_json(
    handle: *mut ScriptsHandle,
    template: *const c_char,
) -> *mut c_char {
    let Some(h) = handle.as_ref() else { return std::ptr::null_mut() };
    if template.is_null() {
        return std::ptr::null_mut();
    }
    let template = TemplateType::from(c_str_to_string(template));
    let result = h.runtime.block_on(h.repo.list_scripts_by_template(&template));
    json_or_null("scripts_list_by_template_json", result)
}

/// The script as JSON, `"null"` when absent, null pointer on error.
#[no_mangle]
pub unsafe extern "C" fn scripts_get_json(handle: *mut ScriptsHandle, id: i64) -> *mut c_char {
    let Some(h) = handle.as_ref() else { return std::ptr::null_mut() };
    let result = h.runtime.block_on(h.repo.script_by_id(id));
    json_or_null("scripts_get_json", result)
}

/// Creates a new script from a template. Returns the id or -1.
#[no_mangle]
pub unsafe extern "C" fn scripts_create(
    handle: *mut ScriptsHandle,
    template: *const c_char,
    content: *const c_char,
) -> i64 {
    let Some(h) = handle.as_ref() else { return -1 };
    if template.is_null() || content.is_null() {
        return -1;
    }
    let script = Script::new(c_str_to_string(template), c_str_to_string(content));
    match h.runtime.block_on(h.repo.insert_script(&script)) {
        Ok(id) => id,
        Err(e) => {
            error!("scripts_create: {}", e);
            -1
        }
    }
}

/// Inserts (or replaces, when `id` is taken) a script given as JSON.
/// Returns the id or -1.
#[no_mangle]
pub unsafe extern "C" fn scripts_insert_json(handle: *mut ScriptsHandle, json: *const c_char) -> i64 {
    let Some(h) = handle.as_ref() else { return -1 };
    let script = match parse_script(json) {
        Ok(s) => s,
        Err(e) => {
            error!("scripts_insert_json: {}", e);
            return -1;
        }
    };
    match h.runtime.block_on(h.repo.insert_script(&script)) {
        Ok(id) => id,
        Err(e) => {
            error!("scripts_insert_json: {}", e);
            -1
        }
    }
}

/// Overwrites a script given as JSON. 0 on success (including a missing
/// id), 1 on error.
#[no_mangle]
pub unsafe extern "C" fn scripts_update_json(handle: *mut ScriptsHandle, json: *const c_char) -> i32 {
    let Some(h) = handle.as_ref() else { return 1 };
    let result = match parse_script(json) {
        Ok(script) => h.runtime.block_on(h.repo.update_script(&script)),
        Err(e) => Err(e),
    };
    status_code("scripts_update_json", result)
}

/// 0 on success (including a missing id), 1 on error.
#[no_mangle]
pub unsafe extern "C" fn scripts_delete_by_id(handle: *mut ScriptsHandle, id: i64) -> i32 {
    let Some(h) = handle.as_ref() else { return 1 };
    let result = h.runtime.block_on(h.repo.delete_script_by_id(id));
    status_code("scripts_delete_by_id", result)
}

/// Pushes the current list and then every change to `callback` until
/// `scripts_unsubscribe` or `scripts_close`. `template` may be null for all
/// scripts. Returns the subscription id (> 0) or -1.
#[no_mangle]
pub unsafe extern "C" fn scripts_subscribe(
    handle: *mut ScriptsHandle,
    template: *const c_char,
    callback: SnapshotCallback,
    user_data: *mut c_void,
) -> i64 {
    let Some(h) = handle.as_ref() else { return -1 };
    let template = if template.is_null() {
        None
    } else {
        Some(TemplateType::from(c_str_to_string(template)))
    };

    let live = h.runtime.block_on(async {
        match &template {
            Some(t) => h.repo.scripts_by_template(t).await,
            None => h.repo.all_scripts().await,
        }
    });
    let mut live = match live {
        Ok(live) => live,
        Err(e) => {
            error!("scripts_subscribe: {}", e);
            return -1;
        }
    };

    let ctx = HostContext(user_data);
    let task = h.runtime.spawn(async move {
        let ctx = ctx;
        deliver_snapshot(callback, &ctx, &live.current());
        while let Some(snapshot) = live.changed().await {
            deliver_snapshot(callback, &ctx, &snapshot);
        }
    });
    h.track(task)
}

/// Stops a subscription; no callback for it runs after this returns
/// (unless called from a callback itself). 0 on success, 1 for an unknown
/// id.
#[no_mangle]
pub unsafe extern "C" fn scripts_unsubscribe(handle: *mut ScriptsHandle, subscription: i64) -> i32 {
    let Some(h) = handle.as_ref() else { return 1 };
    if h.unsubscribe(subscription) {
        0
    } else {
        warn!("scripts_unsubscribe: unknown subscription {}", subscription);
        1
    }
}

/// Prometheus text of the storage metrics.
#[no_mangle]
pub extern "C" fn scripts_metrics() -> *mut c_char {
    CString::new(db::monitoring::gather_metrics())
        .map(CString::into_raw)
        .unwrap_or(std::ptr::null_mut())
}

/// Current schema version, or -1.
#[no_mangle]
pub unsafe extern "C" fn scripts_schema_version(handle: *mut ScriptsHandle) -> i32 {
    let Some(h) = handle.as_ref() else { return -1 };
    h.schema_version().unwrap_or(-1)
}

/// Frees a string previously returned by this library.
#[no_mangle]
pub unsafe extern "C" fn scripts_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

// ---------------------- Internal helpers ----------------------

unsafe fn c_str_to_string(s: *const c_char) -> String {
    CStr::from_ptr(s).to_string_lossy().into_owned()
}

unsafe fn parse_script(json: *const c_char) -> Result<Script, DbError> {
    if json.is_null() {
        return Err(DbError::InvalidScript("null JSON".into()));
    }
    let raw = CStr::from_ptr(json).to_string_lossy();
    Ok(serde_json::from_str(&raw)?)
}

fn json_or_null<T: serde::Serialize>(op: &str, result: Result<T, DbError>) -> *mut c_char {
    let json = result.and_then(|value| Ok(serde_json::to_string(&value)?));
    match json {
        Ok(json) => match CString::new(json) {
            Ok(c) => c.into_raw(),
            Err(e) => {
                error!("{}: {}", op, e);
                std::ptr::null_mut()
            }
        },
        Err(e) => {
            error!("{}: {}", op, e);
            std::ptr::null_mut()
        }
    }
}

fn status_code(op: &str, result: Result<(), DbError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{}: {}", op, e);
            1
        }
    }
}

fn deliver_snapshot(callback: SnapshotCallback, ctx: &HostContext, scripts: &[Script]) {
    let json = match serde_json::to_string(scripts) {
        Ok(json) => json,
        Err(e) => {
            warn!("snapshot serialization failed: {}", e);
            return;
        }
    };
    if let Ok(cstr) = CString::new(json) {
        callback(cstr.as_ptr(), ctx.0);
    }
}
