//! Common test utilities for the HTTP tests

#![allow(dead_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use libsharecast::providers::mock::{self, MockConfig};
use libsharecast::providers::{ProviderContext, ProviderFactory};
use libsharecast::types::{AccountSettings, DiscoveredAccount};
use libsharecast::{Account, Config, Entry, ProviderRecord, SharecastService, Token};
use serde_json::Value;
use share_web::{build_router, AppState};
use tempfile::TempDir;
use tokio::net::TcpListener;
use url::Url;

pub const SITE_ID: i64 = 1;

/// Adapter type without any optional capability
pub const BARE_KIND: &str = "mock-bare";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub service: SharecastService,
    pub mock: MockConfig,
    pub _temp_dir: TempDir,
    /// Keeps the session cookie and does not follow redirects
    pub client: reqwest::Client,
}

impl TestServer {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let config = Config::for_database(db_path.to_str().unwrap());

        let context = ProviderContext {
            http: reqwest::Client::new(),
            redirect_uri: Url::parse("http://127.0.0.1:8080/accounts/callback").unwrap(),
        };
        let mock = MockConfig::default();
        let mut factory = ProviderFactory::with_builtin(context);
        factory.register(mock::KIND, mock.builder());
        factory.register(BARE_KIND, MockConfig::bare().builder());
        let service = SharecastService::with_factory(config, factory).await.unwrap();

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(AppState::new(service.clone()));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: format!("http://{}", addr),
            service,
            mock,
            _temp_dir: temp_dir,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    pub async fn post_json(&self, path: &str, body: Value) -> reqwest::Response {
        self.client.post(self.url(path)).json(&body).send().await.unwrap()
    }

    /// Provider of `kind` with one connected account, skipping the OAuth round trip
    pub async fn connected_account(&self, handle: &str, kind: &str) -> Account {
        let provider = self
            .service
            .registry()
            .save(ProviderRecord::new(handle, handle, kind))
            .await
            .unwrap();

        let mut token = Token::new(provider.id(), format!("access-{}", handle));
        token.identifier = format!("{}-user", handle);
        token.scopes = vec!["write".to_string()];
        let discovered = DiscoveredAccount {
            identifier: token.identifier.clone(),
            name: format!("{} account", handle),
            handle: handle.to_string(),
            settings: AccountSettings::default(),
        };
        self.service
            .accounts()
            .save_connection(&token, &[discovered], None)
            .await
            .unwrap()
            .remove(0)
    }

    pub async fn store_entry(&self, entry: &Entry) {
        self.service.database().upsert_entry(entry).await.unwrap();
    }
}

pub fn entry(id: i64, post_date: DateTime<Utc>) -> Entry {
    Entry {
        id,
        site_id: SITE_ID,
        canonical_id: None,
        url: None,
        title: Some(format!("Entry {}", id)),
        enabled: true,
        is_draft: false,
        is_revision: false,
        post_date: Some(post_date),
        expiry_date: None,
    }
}

pub fn live_entry(id: i64) -> Entry {
    entry(id, Utc::now() - Duration::hours(1))
}

pub fn scheduled_entry(id: i64) -> Entry {
    entry(id, Utc::now() + Duration::days(1))
}

pub fn fields(message: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("message".to_string(), message.to_string())])
}

/// `Location` header of a redirect response
pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}
