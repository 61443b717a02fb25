//! Mock provider for testing
//!
//! A configurable adapter that simulates platform outcomes without network
//! access. Every capability can be switched on or off, and shared call
//! counters let tests assert how often the platform was actually reached.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::sleep;
use url::Url;

use crate::error::Result;
use crate::oauth::{self, CallbackParams};
use crate::providers::factory::ProviderBuilder;
use crate::providers::{
    refresh_error, Composing, Provider, ProviderContext, PublishTarget, PullPosts,
    TokenRefreshing,
};
use crate::session::Session;
use crate::types::{
    Account, AccountSettings, DiscoveredAccount, Post, PostPayload, ProviderRecord, Share,
    ShareContent, Token, ValidationErrors,
};
use crate::validation;

pub const KIND: &str = "mock";

/// Configuration for mock provider behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub composing: bool,
    pub pulling: bool,
    pub refreshing: bool,

    /// Scope the account token must carry for composing
    pub required_scope: Option<String>,

    /// Scopes reported on tokens created by the callback
    pub granted_scopes: Vec<String>,

    /// External id of the token owner
    pub identifier: String,

    /// Identities returned by account discovery
    pub accounts: Vec<DiscoveredAccount>,

    /// Platform post id returned on publish; random when unset
    pub post_id: Option<String>,

    /// Error payload returned instead of publishing
    pub publish_error: Option<Value>,

    pub refresh_succeeds: bool,

    /// Lifetime of refreshed tokens
    pub refreshed_lifetime: Duration,

    /// (identifier, text) pairs returned by the feed
    pub posts: Vec<(String, String)>,

    pub pull_fails: bool,

    /// Simulated network latency
    pub delay: std::time::Duration,

    pub publish_calls: Arc<AtomicUsize>,
    pub refresh_calls: Arc<AtomicUsize>,
    pub pull_calls: Arc<AtomicUsize>,

    /// Messages that reached the platform
    pub published: Arc<Mutex<Vec<String>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            composing: true,
            pulling: true,
            refreshing: true,
            required_scope: None,
            granted_scopes: vec!["write".to_string()],
            identifier: "mock-user".to_string(),
            accounts: vec![DiscoveredAccount {
                identifier: "mock-user".to_string(),
                name: "Mock User".to_string(),
                handle: "mockuser".to_string(),
                settings: AccountSettings::default(),
            }],
            post_id: None,
            publish_error: None,
            refresh_succeeds: true,
            refreshed_lifetime: Duration::days(60),
            posts: Vec::new(),
            pull_fails: false,
            delay: std::time::Duration::from_millis(0),
            publish_calls: Arc::new(AtomicUsize::new(0)),
            refresh_calls: Arc::new(AtomicUsize::new(0)),
            pull_calls: Arc::new(AtomicUsize::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockConfig {
    /// Publishing fails with the given platform error message
    pub fn failing_publish(message: &str) -> Self {
        Self {
            publish_error: Some(json!({ "error": { "message": message } })),
            ..Default::default()
        }
    }

    /// Adapter without any optional capability
    pub fn bare() -> Self {
        Self {
            composing: false,
            pulling: false,
            refreshing: false,
            ..Default::default()
        }
    }

    pub fn publish_count(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn pull_count(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    pub fn published_messages(&self) -> Vec<String> {
        self.published.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Factory builder producing providers that share this configuration
    pub fn builder(&self) -> ProviderBuilder {
        let config = self.clone();
        Arc::new(move |record: ProviderRecord, _context: &ProviderContext| {
            Ok(Arc::new(MockProvider::new(record, config.clone())) as Arc<dyn Provider>)
        })
    }
}

pub struct MockProvider {
    record: ProviderRecord,
    config: MockConfig,
}

impl MockProvider {
    pub fn new(record: ProviderRecord, config: MockConfig) -> Self {
        Self { record, config }
    }

    async fn simulate_latency(&self) {
        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn record(&self) -> &ProviderRecord {
        &self.record
    }

    fn display_name(&self) -> &'static str {
        "Mock"
    }

    fn scopes(&self) -> Vec<String> {
        self.config.granted_scopes.clone()
    }

    async fn handle_connect(&self, session: &mut Session) -> Result<Url> {
        let state = oauth::begin(session);
        let mut url = Url::parse("https://mock.invalid/authorize").map_err(|e| {
            crate::error::PlatformError::InvalidResponse(e.to_string())
        })?;
        url.query_pairs_mut()
            .append_pair("state", &state)
            .append_pair("scope", &self.scopes().join(" "));
        Ok(url)
    }

    async fn handle_callback(&self, params: &CallbackParams, session: &mut Session) -> Result<Token> {
        oauth::verify_state(session, params)?;
        let code = oauth::require_code(params)?;
        self.simulate_latency().await;

        let mut token = Token::new(self.id(), format!("mock-access-{}", code));
        token.refresh_token = Some(format!("mock-refresh-{}", code).into());
        token.scopes = self.config.granted_scopes.clone();
        token.expiry = Some(Utc::now() + Duration::hours(1));
        token.identifier = self.identifier(&token).await?;
        Ok(token)
    }

    async fn identifier(&self, _token: &Token) -> Result<String> {
        Ok(self.config.identifier.clone())
    }

    async fn discover_accounts(&self, _token: &Token) -> Result<Vec<DiscoveredAccount>> {
        Ok(self.config.accounts.clone())
    }

    fn as_composing(&self) -> Option<&dyn Composing> {
        self.config.composing.then_some(self as &dyn Composing)
    }

    fn as_pull_posts(&self) -> Option<&dyn PullPosts> {
        self.config.pulling.then_some(self as &dyn PullPosts)
    }

    fn as_token_refreshing(&self) -> Option<&dyn TokenRefreshing> {
        self.config.refreshing.then_some(self as &dyn TokenRefreshing)
    }
}

#[async_trait]
impl Composing for MockProvider {
    fn supports_composing(&self, _account: &Account, token: &Token) -> bool {
        match &self.config.required_scope {
            Some(scope) => token.has_scope(scope),
            None => true,
        }
    }

    fn new_share_content(&self) -> ShareContent {
        ShareContent::Message { message: None }
    }

    fn validate_share(&self, share: &Share) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        validation::require_message(share, &mut errors);
        errors
    }

    fn share_error_message(&self, share: &Share) -> String {
        share
            .response
            .as_ref()
            .and_then(|r| r.pointer("/error/message"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string()
    }

    async fn publish_share(&self, target: PublishTarget<'_>, mut share: Share) -> Share {
        self.config.publish_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(error) = &self.config.publish_error {
            let message = error
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("Mock publishing failed")
                .to_string();
            share.mark_failed(error.clone(), message);
            return share;
        }

        let message = share.content.message().unwrap_or_default().to_string();
        if let Ok(mut published) = self.config.published.lock() {
            published.push(message);
        }

        let id = self
            .config
            .post_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let post_url = format!("https://mock.invalid/{}/posts/{}", target.account.handle, id);
        share.mark_published(json!({ "id": id }), post_url, Utc::now());
        share
    }
}

#[async_trait]
impl PullPosts for MockProvider {
    async fn fetch_posts(&self, account: &Account, _token: &Token, limit: u32) -> Result<Vec<Post>> {
        self.config.pull_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if self.config.pull_fails {
            return Err(crate::error::PlatformError::Api {
                status: 500,
                body: json!({ "error": { "message": "Mock feed unavailable" } }),
            }
            .into());
        }

        Ok(self
            .config
            .posts
            .iter()
            .take(limit as usize)
            .map(|(identifier, text)| Post {
                id: None,
                account_id: account.id,
                identifier: identifier.clone(),
                posted_at: Some(Utc::now()),
                url: Some(format!("https://mock.invalid/{}/posts/{}", account.handle, identifier)),
                payload_type: KIND.to_string(),
                payload: PostPayload::text(text.clone()),
            })
            .collect())
    }
}

#[async_trait]
impl TokenRefreshing for MockProvider {
    async fn refresh_token(&self, token: &Token) -> Result<Token> {
        let attempt = self.config.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.simulate_latency().await;

        if !self.config.refresh_succeeds {
            return Err(refresh_error(token, "invalid_grant"));
        }

        let mut refreshed = token.clone();
        refreshed.access_token = format!("mock-refreshed-{}", attempt).into();
        refreshed.expiry = Some(Utc::now() + self.config.refreshed_lifetime);
        Ok(refreshed)
    }
}
