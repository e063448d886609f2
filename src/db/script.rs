// src/db/script.rs

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{DbError, Result as DbResult};

/// Relationship of a local script to its remote copy.
///
/// Stored as its ordinal; the mapping below is the persisted contract and
/// must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    #[default]
    NotSynced,
    Synced,
    Pending,
    Conflict,
}

impl SyncStatus {
    pub const ALL: [SyncStatus; 4] = [
        SyncStatus::NotSynced,
        SyncStatus::Synced,
        SyncStatus::Pending,
        SyncStatus::Conflict,
    ];

    pub fn ordinal(self) -> i64 {
        match self {
            SyncStatus::NotSynced => 0,
            SyncStatus::Synced => 1,
            SyncStatus::Pending => 2,
            SyncStatus::Conflict => 3,
        }
    }

    pub fn from_ordinal(value: i64) -> Option<Self> {
        match value {
            0 => Some(SyncStatus::NotSynced),
            1 => Some(SyncStatus::Synced),
            2 => Some(SyncStatus::Pending),
            3 => Some(SyncStatus::Conflict),
            _ => None,
        }
    }
}

/// Tag of the template a script was created from (e.g. `"invoice"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateType(String);

impl TemplateType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TemplateType {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl From<String> for TemplateType {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn initial_version() -> i64 {
    1
}

/// A saved script, one row of `saved_scripts`.
///
/// Timestamps carry millisecond resolution, the same as the stored form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    /// Assigned by the database on first insert.
    #[serde(default)]
    pub id: Option<i64>,
    pub template_type: TemplateType,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub firebase_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub sync_status: SyncStatus,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default = "initial_version")]
    pub version: i64,
    #[serde(default)]
    pub is_deleted: bool,
}

impl Script {
    /// A fresh, never-saved script.
    pub fn new(template_type: impl Into<TemplateType>, content: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: None,
            template_type: template_type.into(),
            content: content.into(),
            created_at: now,
            updated_at: now,
            firebase_id: None,
            user_id: None,
            sync_status: SyncStatus::NotSynced,
            last_sync_at: None,
            version: initial_version(),
            is_deleted: false,
        }
    }

    /// Replaces the body and records the mutation.
    pub fn edit_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.touch();
    }

    /// Bumps `updated_at` strictly forward and increments `version`.
    /// A synced script becomes pending again.
    pub fn touch(&mut self) {
        let now = now_millis();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::milliseconds(1)
        };
        self.version += 1;
        if self.sync_status == SyncStatus::Synced {
            self.sync_status = SyncStatus::Pending;
        }
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.updated_at < self.created_at {
            return Err(DbError::InvalidScript(format!(
                "updatedAt {} is before createdAt {}",
                self.updated_at, self.created_at
            )));
        }
        let stamps = [
            ("createdAt", Some(self.created_at)),
            ("updatedAt", Some(self.updated_at)),
            ("lastSyncAt", self.last_sync_at),
        ];
        for (column, stamp) in stamps {
            if let Some(stamp) = stamp.filter(|t| !is_whole_millis(t)) {
                return Err(DbError::InvalidScript(format!(
                    "{column} {stamp} is finer than the stored millisecond resolution"
                )));
            }
        }
        if self.version < 1 {
            return Err(DbError::InvalidScript(format!(
                "version must be >= 1, got {}",
                self.version
            )));
        }
        Ok(())
    }
}

fn is_whole_millis(t: &DateTime<Utc>) -> bool {
    t.timestamp_subsec_nanos() % 1_000_000 == 0
}

/// Current time truncated to the stored resolution.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinal_mapping_is_total_and_reversible() {
        for status in SyncStatus::ALL {
            assert_eq!(SyncStatus::from_ordinal(status.ordinal()), Some(status));
        }
        let ordinals: Vec<i64> = SyncStatus::ALL.iter().map(|s| s.ordinal()).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3]);
        assert_eq!(SyncStatus::from_ordinal(4), None);
        assert_eq!(SyncStatus::from_ordinal(-1), None);
    }

    #[test]
    fn test_new_script_defaults() {
        let script = Script::new("invoice", "Dear customer");
        assert_eq!(script.id, None);
        assert_eq!(script.template_type.as_str(), "invoice");
        assert_eq!(script.created_at, script.updated_at);
        assert_eq!(script.sync_status, SyncStatus::NotSynced);
        assert_eq!(script.version, 1);
        assert!(!script.is_deleted);
        assert_eq!(script.created_at.timestamp_subsec_nanos() % 1_000_000, 0);
        script.validate().unwrap();
    }

    #[test]
    fn test_edit_content_moves_updated_at_forward() {
        let mut script = Script::new("letter", "v1");
        script.sync_status = SyncStatus::Synced;
        script.edit_content("v2");

        assert_eq!(script.content, "v2");
        assert!(script.updated_at > script.created_at);
        assert_eq!(script.version, 2);
        assert_eq!(script.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_edit_keeps_conflict_status() {
        let mut script = Script::new("letter", "v1");
        script.sync_status = SyncStatus::Conflict;
        script.edit_content("v2");
        assert_eq!(script.sync_status, SyncStatus::Conflict);
    }

    #[test]
    fn test_validate_rejects_time_travel() {
        let mut script = Script::new("letter", "x");
        script.updated_at = script.created_at - Duration::seconds(1);
        assert!(matches!(script.validate(), Err(DbError::InvalidScript(_))));

        let mut script = Script::new("letter", "x");
        script.version = 0;
        assert!(matches!(script.validate(), Err(DbError::InvalidScript(_))));
    }

    #[test]
    fn test_validate_rejects_sub_millisecond_stamps() {
        let script = Script::new("letter", "x");
        assert!(script.validate().is_ok());

        let mut script = Script::new("letter", "x");
        script.created_at = script.created_at - Duration::nanoseconds(250);
        assert!(matches!(script.validate(), Err(DbError::InvalidScript(_))));

        let mut script = Script::new("letter", "x");
        script.last_sync_at = Some(script.updated_at + Duration::microseconds(3));
        assert!(matches!(script.validate(), Err(DbError::InvalidScript(_))));
    }

    #[test]
    fn test_json_uses_camel_case_and_millis() {
        let mut script = Script::new("invoice", "body");
        script.id = Some(7);
        let json = serde_json::to_value(&script).unwrap();

        assert_eq!(json["templateType"], "invoice");
        assert_eq!(json["syncStatus"], "NOT_SYNCED");
        assert_eq!(json["createdAt"], script.created_at.timestamp_millis());
        assert_eq!(json["isDeleted"], false);

        let back: Script = serde_json::from_value(json).unwrap();
        assert_eq!(back, script);
    }

    #[test]
    fn test_json_sync_fields_default_when_missing() {
        let json = serde_json::json!({
            "templateType": "letter",
            "content": "hi",
            "createdAt": 1_700_000_000_000_i64,
            "updatedAt": 1_700_000_000_500_i64
        });
        let script: Script = serde_json::from_value(json).unwrap();
        assert_eq!(script.id, None);
        assert_eq!(script.version, 1);
        assert_eq!(script.sync_status, SyncStatus::NotSynced);
        assert_eq!(script.last_sync_at, None);
        assert!(!script.is_deleted);
    }
}
