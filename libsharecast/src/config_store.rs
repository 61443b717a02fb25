//! Versioned key/value project configuration
//!
//! Configuration is never written row by row. Callers hand in a diff (key →
//! new value, or `None` to remove) and the store turns it into add, update
//! and remove changes, records them in `project_config_log` and hands each
//! change to the listeners registered for the key's prefix, all inside one
//! transaction. Applying the same diff twice produces no changes the second
//! time, so a serialized snapshot can be replayed on every environment.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::Row;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::{decode_json, encode_json, Database};
use crate::error::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    Add,
    Update,
    Remove,
}

impl ConfigAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigAction::Add => "add",
            ConfigAction::Update => "update",
            ConfigAction::Remove => "remove",
        }
    }
}

impl fmt::Display for ConfigAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One effective change produced by applying a diff
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChange {
    pub key: String,
    pub action: ConfigAction,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub version: i64,
}

impl ConfigChange {
    /// Key with the listener prefix stripped
    pub fn subkey<'a>(&'a self, prefix: &str) -> &'a str {
        self.key.strip_prefix(prefix).unwrap_or(&self.key)
    }
}

/// Reacts to configuration changes under a key prefix
#[async_trait]
pub trait ConfigListener: Send + Sync {
    /// Apply a change inside the config transaction; an error rolls back the whole diff
    async fn apply(&self, change: &ConfigChange, conn: &mut SqliteConnection) -> Result<()>;

    /// Called once after the transaction committed
    fn after_commit(&self, _changes: &[ConfigChange]) {}
}

#[derive(Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
    listeners: Vec<(String, Arc<dyn ConfigListener>)>,
}

impl ConfigStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
            listeners: Vec::new(),
        }
    }

    /// Register `listener` for every key starting with `prefix`
    pub fn listen(&mut self, prefix: impl Into<String>, listener: Arc<dyn ConfigListener>) {
        self.listeners.push((prefix.into(), listener));
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value FROM project_config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(|r| decode_json(r.get("value"), "value")).transpose()
    }

    /// All values under `prefix`, keyed by full key
    pub async fn get_prefix(&self, prefix: &str) -> Result<BTreeMap<String, Value>> {
        let rows = sqlx::query("SELECT key, value FROM project_config WHERE key >= ? ORDER BY key")
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        let mut values = BTreeMap::new();
        for r in rows {
            let key: String = r.get("key");
            if !key.starts_with(prefix) {
                break;
            }
            values.insert(key, decode_json(r.get("value"), "value")?);
        }
        Ok(values)
    }

    /// Highest applied version, 0 for an empty store
    pub async fn version(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(MAX(version), 0) AS version FROM project_config_log")
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        Ok(row.get("version"))
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<Vec<ConfigChange>> {
        self.apply_diff(BTreeMap::from([(key.to_string(), Some(value))]))
            .await
    }

    pub async fn remove(&self, key: &str) -> Result<Vec<ConfigChange>> {
        self.apply_diff(BTreeMap::from([(key.to_string(), None)])).await
    }

    /// Replace everything under `prefix` with `snapshot`
    ///
    /// Keys under the prefix that the snapshot lacks are removed.
    pub async fn apply_snapshot(
        &self,
        prefix: &str,
        snapshot: BTreeMap<String, Value>,
    ) -> Result<Vec<ConfigChange>> {
        let mut diff: BTreeMap<String, Option<Value>> = self
            .get_prefix(prefix)
            .await?
            .into_keys()
            .filter(|key| !snapshot.contains_key(key))
            .map(|key| (key, None))
            .collect();
        diff.extend(snapshot.into_iter().map(|(k, v)| (k, Some(v))));
        self.apply_diff(diff).await
    }

    /// Apply a diff atomically and notify listeners
    pub async fn apply_diff(&self, diff: BTreeMap<String, Option<Value>>) -> Result<Vec<ConfigChange>> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let row = sqlx::query("SELECT COALESCE(MAX(version), 0) AS version FROM project_config_log")
            .fetch_one(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;
        let version: i64 = row.get::<i64, _>("version") + 1;
        let now = Utc::now().timestamp();

        let mut changes = Vec::new();
        for (key, new_value) in diff {
            let current = sqlx::query("SELECT value FROM project_config WHERE key = ?")
                .bind(&key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;
            let old_value: Option<Value> = current
                .map(|r| decode_json(r.get("value"), "value"))
                .transpose()?;

            let action = match (&old_value, &new_value) {
                (None, None) => continue,
                (Some(old), Some(new)) if old == new => continue,
                (None, Some(_)) => ConfigAction::Add,
                (Some(_), Some(_)) => ConfigAction::Update,
                (Some(_), None) => ConfigAction::Remove,
            };

            match &new_value {
                Some(value) => {
                    sqlx::query(
                        r#"
                        INSERT INTO project_config (key, value, version, updated_at)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT(key) DO UPDATE SET
                            value = excluded.value,
                            version = excluded.version,
                            updated_at = excluded.updated_at
                        "#,
                    )
                    .bind(&key)
                    .bind(encode_json(value, "value")?)
                    .bind(version)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(DbError::SqlxError)?;
                }
                None => {
                    sqlx::query("DELETE FROM project_config WHERE key = ?")
                        .bind(&key)
                        .execute(&mut *tx)
                        .await
                        .map_err(DbError::SqlxError)?;
                }
            }

            sqlx::query(
                r#"
                INSERT INTO project_config_log (key, action, old_value, new_value, version, applied_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&key)
            .bind(action.as_str())
            .bind(old_value.as_ref().map(|v| v.to_string()))
            .bind(new_value.as_ref().map(|v| v.to_string()))
            .bind(version)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

            let change = ConfigChange {
                key,
                action,
                old_value,
                new_value,
                version,
            };
            for (prefix, listener) in &self.listeners {
                if change.key.starts_with(prefix.as_str()) {
                    listener.apply(&change, &mut *tx).await?;
                }
            }
            debug!(key = %change.key, action = %change.action, version, "Config change applied");
            changes.push(change);
        }

        tx.commit().await.map_err(DbError::SqlxError)?;

        if !changes.is_empty() {
            info!(version, changes = changes.len(), "Project config updated");
            for (prefix, listener) in &self.listeners {
                let matching: Vec<ConfigChange> = changes
                    .iter()
                    .filter(|c| c.key.starts_with(prefix.as_str()))
                    .cloned()
                    .collect();
                if !matching.is_empty() {
                    listener.after_commit(&matching);
                }
            }
        }

        Ok(changes)
    }
}
