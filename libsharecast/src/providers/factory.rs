//! Type-resolving construction of provider adapters

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::Result;
use crate::providers::missing::MissingProvider;
use crate::providers::{facebook, instagram, twitter, Provider, ProviderContext};
use crate::types::ProviderRecord;

/// Builds one adapter instance from its persisted configuration
pub type ProviderBuilder =
    Arc<dyn Fn(ProviderRecord, &ProviderContext) -> Result<Arc<dyn Provider>> + Send + Sync>;

/// Maps adapter type names to builders
///
/// Records whose type has no registered builder, or whose builder rejects
/// the settings, resolve to a [`MissingProvider`] so the rest of the
/// registry stays usable.
#[derive(Clone)]
pub struct ProviderFactory {
    context: ProviderContext,
    builders: HashMap<String, ProviderBuilder>,
}

impl ProviderFactory {
    /// Factory without any registered types
    pub fn new(context: ProviderContext) -> Self {
        Self {
            context,
            builders: HashMap::new(),
        }
    }

    /// Factory knowing the bundled platform adapters
    pub fn with_builtin(context: ProviderContext) -> Self {
        let mut factory = Self::new(context);
        factory.register(
            facebook::KIND,
            Arc::new(|record: ProviderRecord, context: &ProviderContext| {
                Ok(Arc::new(facebook::FacebookPagesProvider::new(record, context)?) as Arc<dyn Provider>)
            }),
        );
        factory.register(
            instagram::KIND,
            Arc::new(|record: ProviderRecord, context: &ProviderContext| {
                Ok(Arc::new(instagram::InstagramProvider::new(record, context)?) as Arc<dyn Provider>)
            }),
        );
        factory.register(
            twitter::KIND,
            Arc::new(|record: ProviderRecord, context: &ProviderContext| {
                Ok(Arc::new(twitter::TwitterProvider::new(record, context)?) as Arc<dyn Provider>)
            }),
        );
        factory
    }

    /// Register (or replace) the builder for `kind`
    pub fn register(&mut self, kind: impl Into<String>, builder: ProviderBuilder) {
        self.builders.insert(kind.into(), builder);
    }

    pub fn is_known(&self, kind: &str) -> bool {
        self.builders.contains_key(kind)
    }

    /// Registered type names, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.builders.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn context(&self) -> &ProviderContext {
        &self.context
    }

    /// Instantiate the adapter for `record`; never fails
    pub fn create(&self, record: ProviderRecord) -> Arc<dyn Provider> {
        let Some(builder) = self.builders.get(&record.kind) else {
            warn!(handle = %record.handle, kind = %record.kind, "Provider type is not available");
            let message = format!("Unknown provider type \"{}\"", record.kind);
            return Arc::new(MissingProvider::new(record, message));
        };

        match builder(record.clone(), &self.context) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(handle = %record.handle, error = %e, "Provider could not be built");
                Arc::new(MissingProvider::new(record, e.to_string()))
            }
        }
    }
}
