// src/db/repository.rs

use async_trait::async_trait;

use crate::db::dao::ScriptDao;
use crate::db::monitor::LiveList;
use crate::db::script::{Script, TemplateType};
use crate::db::Result as DbResult;

/// What the app layer sees of script storage.
#[async_trait]
pub trait ScriptRepository: Send + Sync {
    async fn all_scripts(&self) -> DbResult<LiveList<Script>>;
    async fn scripts_by_template(&self, template: &TemplateType) -> DbResult<LiveList<Script>>;
    /// One-shot snapshot of `all_scripts`.
    async fn list_scripts(&self) -> DbResult<Vec<Script>>;
    /// One-shot snapshot of `scripts_by_template`.
    async fn list_scripts_by_template(&self, template: &TemplateType) -> DbResult<Vec<Script>>;
    async fn script_by_id(&self, id: i64) -> DbResult<Option<Script>>;
    async fn insert_script(&self, script: &Script) -> DbResult<i64>;
    async fn update_script(&self, script: &Script) -> DbResult<()>;
    async fn delete_script(&self, script: &Script) -> DbResult<()>;
    async fn delete_script_by_id(&self, id: i64) -> DbResult<()>;
}

/// Forwards every call to the local dao.
#[derive(Clone)]
pub struct LocalScriptRepository {
    dao: ScriptDao,
}

impl LocalScriptRepository {
    pub fn new(dao: ScriptDao) -> Self {
        Self { dao }
    }
}

#[async_trait]
impl ScriptRepository for LocalScriptRepository {
    async fn all_scripts(&self) -> DbResult<LiveList<Script>> {
        self.dao.observe_all().await
    }

    async fn scripts_by_template(&self, template: &TemplateType) -> DbResult<LiveList<Script>> {
        self.dao.observe_by_template(template).await
    }

    async fn list_scripts(&self) -> DbResult<Vec<Script>> {
        self.dao.all_scripts().await
    }

    async fn list_scripts_by_template(&self, template: &TemplateType) -> DbResult<Vec<Script>> {
        self.dao.scripts_by_template(template).await
    }

    async fn script_by_id(&self, id: i64) -> DbResult<Option<Script>> {
        self.dao.get_by_id(id).await
    }

    async fn insert_script(&self, script: &Script) -> DbResult<i64> {
        self.dao.insert(script).await
    }

    async fn update_script(&self, script: &Script) -> DbResult<()> {
        self.dao.update(script).await
    }

    async fn delete_script(&self, script: &Script) -> DbResult<()> {
        self.dao.delete(script).await
    }

    async fn delete_script_by_id(&self, id: i64) -> DbResult<()> {
        self.dao.delete_by_id(id).await
    }
}
