//! Provider registry
//!
//! Loads configured providers through the [`ProviderFactory`], caches the
//! instances and routes every configuration change through the versioned
//! [`ConfigStore`]. Provider rows are never written directly: the registry
//! proposes a diff under `providers.<uid>` and [`ProviderConfigApplier`]
//! materializes it inside the config transaction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteConnection;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use super::events::{Event, EventBus};
use crate::config_store::{ConfigAction, ConfigChange, ConfigListener, ConfigStore};
use crate::db::{delete_provider, upsert_provider};
use crate::error::{ConfigError, Result, SharecastError};
use crate::providers::{Provider, ProviderFactory};
use crate::types::ProviderRecord;
use crate::Database;

/// Config keys owned by the registry
pub const PROVIDERS_PREFIX: &str = "providers.";

type ProviderCache = Arc<RwLock<CacheState>>;

/// Cached providers; `generation` moves on every invalidation
#[derive(Default)]
struct CacheState {
    generation: u64,
    providers: Option<Vec<Arc<dyn Provider>>>,
}

fn invalidate(cache: &ProviderCache) {
    let mut state = cache.write().unwrap_or_else(PoisonError::into_inner);
    state.generation += 1;
    state.providers = None;
}

/// Serialized provider configuration, keyed by uid
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderRecord>,
}

impl ProviderSnapshot {
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw).map_err(ConfigError::ParseError)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self).map_err(ConfigError::SerializeError)?)
    }
}

/// Writes provider rows for `providers.*` config changes
pub struct ProviderConfigApplier {
    cache: ProviderCache,
    events: EventBus,
}

#[async_trait]
impl ConfigListener for ProviderConfigApplier {
    async fn apply(&self, change: &ConfigChange, conn: &mut SqliteConnection) -> Result<()> {
        let uid = change.subkey(PROVIDERS_PREFIX);
        match &change.new_value {
            Some(value) => {
                let record = decode_record(&change.key, value)?;
                let id = upsert_provider(conn, uid, &record).await?;
                debug!(uid, id, handle = %record.handle, "Provider row written");
            }
            None => {
                delete_provider(conn, uid).await?;
                debug!(uid, "Provider row deleted");
            }
        }
        Ok(())
    }

    fn after_commit(&self, changes: &[ConfigChange]) {
        invalidate(&self.cache);

        for change in changes {
            let uid = change.subkey(PROVIDERS_PREFIX).to_string();
            let handle = change
                .new_value
                .as_ref()
                .or(change.old_value.as_ref())
                .and_then(|v| v.get("handle"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            self.events.emit(match change.action {
                ConfigAction::Remove => Event::ProviderDeleted { uid, handle },
                action => Event::ProviderSaved {
                    uid,
                    handle,
                    is_new: action == ConfigAction::Add,
                },
            });
        }
    }
}

fn decode_record(key: &str, value: &Value) -> Result<ProviderRecord> {
    serde_json::from_value(value.clone()).map_err(|e| {
        ConfigError::InvalidValue {
            field: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn encode_record(record: &ProviderRecord) -> Result<Value> {
    serde_json::to_value(record).map_err(|e| {
        ConfigError::InvalidValue {
            field: format!("{}{}", PROVIDERS_PREFIX, record.handle),
            reason: e.to_string(),
        }
        .into()
    })
}

fn config_key(uid: &str) -> String {
    format!("{}{}", PROVIDERS_PREFIX, uid)
}

/// Configured provider adapters
#[derive(Clone)]
pub struct ProviderRegistry {
    db: Arc<Database>,
    store: ConfigStore,
    factory: ProviderFactory,
    cache: ProviderCache,
}

impl ProviderRegistry {
    pub fn new(db: Arc<Database>, factory: ProviderFactory, events: EventBus) -> Self {
        let cache: ProviderCache = Arc::new(RwLock::new(CacheState::default()));
        let mut store = ConfigStore::new(&db);
        store.listen(
            PROVIDERS_PREFIX,
            Arc::new(ProviderConfigApplier {
                cache: cache.clone(),
                events,
            }),
        );

        Self {
            db,
            store,
            factory,
            cache,
        }
    }

    pub fn factory(&self) -> &ProviderFactory {
        &self.factory
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.store
    }

    /// All providers in sort order, served from cache when possible
    pub async fn all(&self) -> Result<Vec<Arc<dyn Provider>>> {
        let generation = {
            let state = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = &state.providers {
                return Ok(cached.clone());
            }
            state.generation
        };

        let providers: Vec<Arc<dyn Provider>> = self
            .db
            .list_providers()
            .await?
            .into_iter()
            .map(|record| self.factory.create(record))
            .collect();

        self.store_cached(generation, &providers);
        Ok(providers)
    }

    /// Cache `providers` unless a config change landed since they were read
    fn store_cached(&self, generation: u64, providers: &[Arc<dyn Provider>]) {
        let mut state = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if state.generation != generation {
            debug!(generation, current = state.generation, "Provider list changed while loading, not cached");
            return;
        }
        debug!(count = providers.len(), "Provider cache loaded");
        state.providers = Some(providers.to_vec());
    }

    pub async fn by_id(&self, id: i64) -> Result<Option<Arc<dyn Provider>>> {
        Ok(self.all().await?.into_iter().find(|p| p.id() == id))
    }

    pub async fn by_uid(&self, uid: &str) -> Result<Option<Arc<dyn Provider>>> {
        Ok(self.all().await?.into_iter().find(|p| p.uid() == uid))
    }

    pub async fn by_handle(&self, handle: &str) -> Result<Option<Arc<dyn Provider>>> {
        Ok(self.all().await?.into_iter().find(|p| p.handle() == handle))
    }

    /// Create or update a provider
    ///
    /// New records get a fresh uid and are appended to the end of the sort
    /// order unless they carry one.
    ///
    /// # Errors
    ///
    /// Returns `SharecastError::InvalidInput` for an empty name or handle, a
    /// handle taken by another provider, or a type the factory does not know.
    pub async fn save(&self, mut record: ProviderRecord) -> Result<Arc<dyn Provider>> {
        record.name = record.name.trim().to_string();
        record.handle = record.handle.trim().to_string();

        if record.name.is_empty() {
            return Err(SharecastError::InvalidInput("Provider name cannot be empty".to_string()));
        }
        if record.handle.is_empty() || record.handle.contains(char::is_whitespace) {
            return Err(SharecastError::InvalidInput(format!(
                "Invalid provider handle \"{}\"",
                record.handle
            )));
        }
        if !self.factory.is_known(&record.kind) {
            return Err(SharecastError::InvalidInput(format!(
                "Unknown provider type \"{}\" (available: {})",
                record.kind,
                self.factory.kinds().join(", ")
            )));
        }

        let existing = self.all().await?;
        let uid = record
            .uid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if existing.iter().any(|p| p.handle() == record.handle && p.uid() != uid) {
            return Err(SharecastError::InvalidInput(format!(
                "Handle \"{}\" is already in use",
                record.handle
            )));
        }
        if record.is_new() && record.sort_order == 0 {
            record.sort_order = existing.iter().map(|p| p.sort_order()).max().unwrap_or(0) + 1;
        }

        self.store.set(&config_key(&uid), encode_record(&record)?).await?;
        info!(uid = %uid, handle = %record.handle, kind = %record.kind, "Provider saved");

        self.by_uid(&uid)
            .await?
            .ok_or_else(|| SharecastError::NotFound(format!("provider {}", uid)))
    }

    /// Remove a provider; its tokens, accounts, shares and posts cascade
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let Some(provider) = self.by_id(id).await? else {
            return Ok(false);
        };

        let changes = self.store.remove(&config_key(provider.uid())).await?;
        info!(id, handle = %provider.handle(), "Provider deleted");
        Ok(!changes.is_empty())
    }

    /// Write a contiguous 1-based sort order following `ids`
    pub async fn reorder(&self, ids: &[i64]) -> Result<()> {
        let providers = self.all().await?;
        let mut diff = BTreeMap::new();

        for (position, id) in ids.iter().enumerate() {
            let provider = providers
                .iter()
                .find(|p| p.id() == *id)
                .ok_or_else(|| SharecastError::NotFound(format!("provider {}", id)))?;

            let mut record = provider.record().clone();
            record.sort_order = position as i64 + 1;
            diff.insert(config_key(provider.uid()), Some(encode_record(&record)?));
        }

        self.store.apply_diff(diff).await?;
        Ok(())
    }

    /// Current provider configuration as a replayable snapshot
    pub async fn export(&self) -> Result<ProviderSnapshot> {
        let mut snapshot = ProviderSnapshot::default();
        for (key, value) in self.store.get_prefix(PROVIDERS_PREFIX).await? {
            let record = decode_record(&key, &value)?;
            let uid = key.trim_start_matches(PROVIDERS_PREFIX).to_string();
            snapshot.providers.insert(uid, record);
        }
        Ok(snapshot)
    }

    /// Replace the provider configuration with `snapshot`
    ///
    /// Applying the same snapshot again yields no changes.
    pub async fn apply(&self, snapshot: ProviderSnapshot) -> Result<Vec<ConfigChange>> {
        let mut values = BTreeMap::new();
        for (uid, record) in &snapshot.providers {
            values.insert(config_key(uid), encode_record(record)?);
        }

        let changes = self.store.apply_snapshot(PROVIDERS_PREFIX, values).await?;
        info!(changes = changes.len(), "Provider snapshot applied");
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::{self, MockConfig};
    use crate::providers::ProviderContext;
    use reqwest::Client;
    use tempfile::TempDir;
    use url::Url;

    async fn setup() -> (ProviderRegistry, EventBus, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("registry.db");
        let db = Arc::new(Database::new(db_path.to_str().unwrap()).await.unwrap());

        let mut factory = ProviderFactory::with_builtin(ProviderContext {
            http: Client::new(),
            redirect_uri: Url::parse("http://localhost/accounts/callback").unwrap(),
        });
        factory.register(mock::KIND, MockConfig::default().builder());

        let events = EventBus::new(16);
        (ProviderRegistry::new(db, factory, events.clone()), events, temp_dir)
    }

    #[tokio::test]
    async fn test_save_assigns_uid_and_sort_order() {
        let (registry, _events, _dir) = setup().await;

        let first = registry.save(ProviderRecord::new("One", "one", mock::KIND)).await.unwrap();
        let second = registry.save(ProviderRecord::new("Two", "two", mock::KIND)).await.unwrap();

        assert!(!first.uid().is_empty());
        assert_eq!(first.sort_order(), 1);
        assert_eq!(second.sort_order(), 2);
        assert_eq!(registry.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_save_rejects_duplicate_handle_and_unknown_type() {
        let (registry, _events, _dir) = setup().await;
        registry.save(ProviderRecord::new("One", "one", mock::KIND)).await.unwrap();

        let err = registry
            .save(ProviderRecord::new("Other", "one", mock::KIND))
            .await
            .err().unwrap();
        assert!(matches!(err, SharecastError::InvalidInput(_)));

        let err = registry
            .save(ProviderRecord::new("Old", "old", "myspace"))
            .await
            .err().unwrap();
        assert!(err.to_string().contains("myspace"));
    }

    #[tokio::test]
    async fn test_update_invalidates_cache() {
        let (registry, _events, _dir) = setup().await;
        let provider = registry.save(ProviderRecord::new("One", "one", mock::KIND)).await.unwrap();
        assert_eq!(registry.by_handle("one").await.unwrap().unwrap().name(), "One");

        let mut record = provider.record().clone();
        record.name = "Renamed".to_string();
        registry.save(record).await.unwrap();

        let reloaded = registry.by_id(provider.id()).await.unwrap().unwrap();
        assert_eq!(reloaded.name(), "Renamed");
        assert_eq!(reloaded.uid(), provider.uid());
    }

    #[tokio::test]
    async fn test_list_read_before_a_change_is_not_cached() {
        let (registry, _events, _dir) = setup().await;
        registry.save(ProviderRecord::new("One", "one", mock::KIND)).await.unwrap();

        let generation = registry.cache.read().unwrap().generation;
        let stale = registry.all().await.unwrap();
        assert_eq!(stale.len(), 1);

        // A save commits between the read and the store
        registry.save(ProviderRecord::new("Two", "two", mock::KIND)).await.unwrap();
        registry.store_cached(generation, &stale);

        // The save reloaded the cache; the older list must not replace it
        let cached = registry.cache.read().unwrap().providers.as_ref().map(Vec::len);
        assert_eq!(cached, Some(2));
        assert_eq!(registry.all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_removes_provider_and_emits_event() {
        let (registry, events, _dir) = setup().await;
        let provider = registry.save(ProviderRecord::new("One", "one", mock::KIND)).await.unwrap();
        let mut receiver = events.subscribe();

        assert!(registry.delete(provider.id()).await.unwrap());
        assert!(registry.by_id(provider.id()).await.unwrap().is_none());
        assert!(!registry.delete(provider.id()).await.unwrap());

        assert_eq!(
            receiver.recv().await.unwrap(),
            Event::ProviderDeleted {
                uid: provider.uid().to_string(),
                handle: "one".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_reorder_writes_contiguous_order() {
        let (registry, _events, _dir) = setup().await;
        let a = registry.save(ProviderRecord::new("A", "a", mock::KIND)).await.unwrap();
        let b = registry.save(ProviderRecord::new("B", "b", mock::KIND)).await.unwrap();
        let c = registry.save(ProviderRecord::new("C", "c", mock::KIND)).await.unwrap();

        registry.reorder(&[c.id(), a.id(), b.id()]).await.unwrap();

        let handles: Vec<(String, i64)> = registry
            .all()
            .await
            .unwrap()
            .iter()
            .map(|p| (p.handle().to_string(), p.sort_order()))
            .collect();
        assert_eq!(
            handles,
            vec![("c".to_string(), 1), ("a".to_string(), 2), ("b".to_string(), 3)]
        );

        assert!(registry.reorder(&[999]).await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_is_idempotent() {
        let (registry, _events, _dir) = setup().await;
        let mut record = ProviderRecord::new("Twitter", "tw", "twitter");
        record.settings.client_id = Some("client".to_string());
        record.settings.client_secret = Some("$TWITTER_SECRET".to_string());
        record.settings.enable_posting = true;
        registry.save(record).await.unwrap();

        let exported = registry.export().await.unwrap();
        let toml = exported.to_toml().unwrap();
        assert!(toml.contains("$TWITTER_SECRET"));

        let parsed = ProviderSnapshot::from_toml(&toml).unwrap();
        assert_eq!(parsed, exported);
        assert!(registry.apply(parsed).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_snapshot_on_fresh_environment() {
        let (registry, _events, _dir) = setup().await;
        let snapshot = ProviderSnapshot::from_toml(
            r#"
            [providers.3f1c-uid]
            name = "Company page"
            handle = "fb"
            type = "facebook-pages"
            sortOrder = 1

            [providers.3f1c-uid.settings]
            clientId = "123"
            clientSecret = "$FB_SECRET"
            enablePosting = true
            "#,
        )
        .unwrap();

        let changes = registry.apply(snapshot.clone()).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ConfigAction::Add);

        let provider = registry.by_uid("3f1c-uid").await.unwrap().unwrap();
        assert_eq!(provider.handle(), "fb");
        assert_eq!(provider.display_name(), "Facebook Pages");

        // Removing the key through an empty snapshot deletes the provider
        let changes = registry.apply(ProviderSnapshot::default()).await.unwrap();
        assert_eq!(changes[0].action, ConfigAction::Remove);
        assert!(registry.all().await.unwrap().is_empty());
    }
}
