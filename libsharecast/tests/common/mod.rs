//! Shared setup for the libsharecast integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use libsharecast::providers::mock::{self, MockConfig};
use libsharecast::providers::{Provider, ProviderContext, ProviderFactory};
use libsharecast::types::{AccountSettings, DiscoveredAccount};
use libsharecast::{Account, Config, Entry, ProviderRecord, SharecastService, Token};
use tempfile::TempDir;
use url::Url;

pub const SITE_ID: i64 = 1;

/// Adapter type registered with every capability switched off
pub const BARE_KIND: &str = "mock-bare";

/// Service on a scratch database with the mock adapters registered
pub struct TestEnv {
    pub service: SharecastService,
    pub mock: MockConfig,
    pub bare: MockConfig,
    pub _temp_dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_mock(MockConfig::default()).await
    }

    pub async fn with_mock(mock: MockConfig) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let config = Config::for_database(db_path.to_str().unwrap());

        let context = ProviderContext {
            http: reqwest::Client::new(),
            redirect_uri: Url::parse("http://127.0.0.1:8080/accounts/callback").unwrap(),
        };
        let bare = MockConfig::bare();
        let mut factory = ProviderFactory::with_builtin(context);
        factory.register(mock::KIND, mock.builder());
        factory.register(BARE_KIND, bare.builder());

        let service = SharecastService::with_factory(config, factory).await.unwrap();

        Self {
            service,
            mock,
            bare,
            _temp_dir: temp_dir,
        }
    }

    /// Save a provider whose name and handle are both `handle`
    pub async fn provider(&self, handle: &str, kind: &str) -> Arc<dyn Provider> {
        self.service
            .registry()
            .save(ProviderRecord::new(handle, handle, kind))
            .await
            .unwrap()
    }

    /// Store `token` and one account for its identifier, skipping the OAuth round trip
    pub async fn connect_token(&self, token: &Token) -> Account {
        let discovered = DiscoveredAccount {
            identifier: token.identifier.clone(),
            name: format!("Account {}", token.identifier),
            handle: token.identifier.clone(),
            settings: AccountSettings::default(),
        };
        let mut accounts = self
            .service
            .accounts()
            .save_connection(token, &[discovered], None)
            .await
            .unwrap();
        accounts.remove(0)
    }

    pub async fn connect(&self, provider: &dyn Provider, identifier: &str) -> Account {
        self.connect_token(&token(provider, identifier)).await
    }

    pub async fn store_entry(&self, entry: &Entry) {
        self.service.database().upsert_entry(entry).await.unwrap();
    }
}

/// Never-expiring token carrying the `write` scope
pub fn token(provider: &dyn Provider, identifier: &str) -> Token {
    let mut token = Token::new(provider.id(), format!("access-{}", identifier));
    token.identifier = identifier.to_string();
    token.refresh_token = Some(format!("refresh-{}", identifier).into());
    token.scopes = vec!["write".to_string()];
    token
}

pub fn entry(id: i64, post_date: Option<DateTime<Utc>>) -> Entry {
    Entry {
        id,
        site_id: SITE_ID,
        canonical_id: None,
        url: None,
        title: Some(format!("Entry {}", id)),
        enabled: true,
        is_draft: false,
        is_revision: false,
        post_date,
        expiry_date: None,
    }
}

/// Entry that went live an hour ago
pub fn live_entry(id: i64) -> Entry {
    entry(id, Some(Utc::now() - Duration::hours(1)))
}

/// Entry scheduled to go live tomorrow
pub fn scheduled_entry(id: i64) -> Entry {
    entry(id, Some(Utc::now() + Duration::days(1)))
}

pub fn message(text: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("message".to_string(), text.to_string())])
}
