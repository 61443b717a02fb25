//! Core types for Sharecast

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ConfigError, Result};

/// OAuth2 credential set for one (provider, external identity) pair
#[derive(Debug, Clone)]
pub struct Token {
    /// `None` until the token has been persisted
    pub id: Option<i64>,
    pub provider_id: i64,
    pub identifier: String,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub scopes: Vec<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl Token {
    pub fn new(provider_id: i64, access_token: impl Into<String>) -> Self {
        Self {
            id: None,
            provider_id,
            identifier: String::new(),
            access_token: SecretString::from(access_token.into()),
            refresh_token: None,
            scopes: Vec::new(),
            expiry: None,
        }
    }

    /// A token without expiry never expires
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Strict comparison: a token expiring exactly at `now` is still valid
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiry, Some(expiry) if expiry < now)
    }

    /// True when the token stays valid for longer than `window` after `now`
    pub fn valid_beyond(&self, window: Duration, now: DateTime<Utc>) -> bool {
        matches!(self.expiry, Some(expiry) if expiry > now + window)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn secret(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn refresh_secret(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(|t| t.expose_secret())
    }
}

/// Platform-specific account settings
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSettings {
    /// Page access token, distinct from the user token that discovered the page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl fmt::Debug for AccountSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSettings")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A connected identity on a platform
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: i64,
    pub token_id: Option<i64>,
    pub connector_id: Option<i64>,
    pub identifier: String,
    pub name: String,
    pub handle: String,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub settings: AccountSettings,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

/// Account data reported by a provider during discovery
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredAccount {
    pub identifier: String,
    pub name: String,
    pub handle: String,
    pub settings: AccountSettings,
}

/// Content entry as seen by the share pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: i64,
    pub site_id: i64,
    /// Id of the canonical entry when this is a draft or revision
    #[serde(default)]
    pub canonical_id: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub is_revision: bool,
    #[serde(default)]
    pub post_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Entry {
    /// Live entries are enabled, canonical and inside their publish window
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && !self.is_draft
            && !self.is_revision
            && self.post_date.is_some_and(|d| d <= now)
            && self.expiry_date.map_or(true, |d| d > now)
    }

    pub fn canonical_id(&self) -> i64 {
        self.canonical_id.unwrap_or(self.id)
    }
}

/// Field-level validation messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn first(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(|m| m.first()).map(String::as_str)
    }

    pub fn field(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        for (field, messages) in other.0 {
            self.0.entry(field).or_default().extend(messages);
        }
    }
}

/// Compose fields, one variant per composing platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ShareContent {
    FacebookPage { message: Option<String> },
    Twitter { message: Option<String> },
    /// Plain message used by generic providers
    Message { message: Option<String> },
}

impl ShareContent {
    pub fn message(&self) -> Option<&str> {
        match self {
            ShareContent::FacebookPage { message }
            | ShareContent::Twitter { message }
            | ShareContent::Message { message } => message.as_deref(),
        }
    }

    pub fn set_message(&mut self, value: Option<String>) {
        match self {
            ShareContent::FacebookPage { message }
            | ShareContent::Twitter { message }
            | ShareContent::Message { message } => *message = value,
        }
    }

    /// Copy submitted form fields onto the content
    pub fn apply_fields(&mut self, fields: &BTreeMap<String, String>) {
        if let Some(message) = fields.get("message") {
            let trimmed = message.trim();
            self.set_message((!trimmed.is_empty()).then(|| trimmed.to_string()));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareState {
    Pending,
    Published,
    Failed,
}

/// A social post bound to one entry and one account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub id: Option<i64>,
    pub uid: String,
    pub entry_id: i64,
    pub site_id: i64,
    pub account_id: i64,
    pub publish_with_entry: bool,
    pub post_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
    /// `None` until the single publish attempt has been made
    pub success: Option<bool>,
    pub response: Option<serde_json::Value>,
    pub post_url: Option<String>,
    pub content: ShareContent,
    #[serde(skip)]
    pub errors: ValidationErrors,
}

impl Share {
    pub fn new(entry: &Entry, account: &Account, content: ShareContent) -> Self {
        Self {
            id: None,
            uid: uuid::Uuid::new_v4().to_string(),
            entry_id: entry.id,
            site_id: entry.site_id,
            account_id: account.id,
            publish_with_entry: true,
            post_at: None,
            posted_at: None,
            success: None,
            response: None,
            post_url: None,
            content,
            errors: ValidationErrors::new(),
        }
    }

    pub fn state(&self) -> ShareState {
        match self.success {
            None => ShareState::Pending,
            Some(true) => ShareState::Published,
            Some(false) => ShareState::Failed,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.success.is_none()
    }

    pub fn mark_published(
        &mut self,
        response: serde_json::Value,
        post_url: String,
        now: DateTime<Utc>,
    ) {
        self.success = Some(true);
        self.response = Some(response);
        self.posted_at = Some(now);
        self.post_url = Some(post_url);
    }

    /// Records a failed attempt; the message lands under the `success` field
    pub fn mark_failed(&mut self, response: serde_json::Value, message: impl Into<String>) {
        self.success = Some(false);
        self.response = Some(response);
        self.errors.add("success", message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    Text,
    Image,
    Video,
    Gallery,
}

/// Rendered content of an imported post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPayload {
    pub kind: PostKind,
    pub text: String,
    #[serde(default)]
    pub link_url: Option<String>,
    #[serde(default)]
    pub link_title: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_alt: Option<String>,
}

impl PostPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: PostKind::Text,
            text: text.into(),
            link_url: None,
            link_title: None,
            video_url: None,
            image_url: None,
            image_alt: None,
        }
    }
}

/// Read-only copy of a platform post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Option<i64>,
    pub account_id: i64,
    pub identifier: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    /// Provider type that produced the payload
    pub payload_type: String,
    pub payload: PostPayload,
}

/// Adapter-specific provider settings
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub enable_posting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorize_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("enable_posting", &self.enable_posting)
            .field("api_base_url", &self.api_base_url)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .finish()
    }
}

impl ProviderSettings {
    /// Client id with `$VAR` references expanded from the environment
    pub fn client_id(&self) -> Result<String> {
        expand_setting("clientId", self.client_id.as_deref())
    }

    pub fn client_secret(&self) -> Result<SecretString> {
        expand_setting("clientSecret", self.client_secret.as_deref()).map(SecretString::from)
    }
}

fn expand_setting(field: &str, value: Option<&str>) -> Result<String> {
    let raw = value.ok_or_else(|| ConfigError::MissingField(field.to_string()))?;
    let expanded = shellexpand::env(raw).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: e.to_string(),
    })?;
    Ok(expanded.into_owned())
}

/// Persisted provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRecord {
    #[serde(skip)]
    pub id: Option<i64>,
    /// Stable identity across environments; `None` before the first save
    #[serde(skip)]
    pub uid: Option<String>,
    pub name: String,
    pub handle: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub settings: ProviderSettings,
}

impl ProviderRecord {
    pub fn new(name: impl Into<String>, handle: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: None,
            uid: None,
            name: name.into(),
            handle: handle.into(),
            kind: kind.into(),
            enabled: true,
            sort_order: 0,
            settings: ProviderSettings::default(),
        }
    }

    pub fn is_new(&self) -> bool {
        self.uid.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn token_expiring(expiry: Option<DateTime<Utc>>) -> Token {
        let mut token = Token::new(1, "secret");
        token.expiry = expiry;
        token
    }

    #[test]
    fn test_token_without_expiry_never_expires() {
        let token = token_expiring(None);
        assert!(!token.is_expired());
        assert!(!token.is_expired_at(Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_token_expiry_boundary_is_strict() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        assert!(!token_expiring(Some(now + Duration::seconds(1))).is_expired_at(now));
        assert!(!token_expiring(Some(now)).is_expired_at(now));
        assert!(token_expiring(Some(now - Duration::seconds(1))).is_expired_at(now));
    }

    #[test]
    fn test_token_valid_beyond_window() {
        let now = Utc::now();
        let window = Duration::days(30);

        assert!(token_expiring(Some(now + Duration::days(31))).valid_beyond(window, now));
        assert!(!token_expiring(Some(now + Duration::days(10))).valid_beyond(window, now));
        assert!(!token_expiring(None).valid_beyond(window, now));
    }

    #[test]
    fn test_token_debug_redacts_secrets() {
        let mut token = Token::new(1, "super-secret-access");
        token.refresh_token = Some(SecretString::from("super-secret-refresh".to_string()));
        let debug = format!("{:?}", token);
        assert!(!debug.contains("super-secret-access"));
        assert!(!debug.contains("super-secret-refresh"));
    }

    #[test]
    fn test_entry_liveness() {
        let now = Utc::now();
        let mut entry = Entry {
            id: 1,
            site_id: 1,
            canonical_id: None,
            url: Some("https://example.com/blog/hello".to_string()),
            title: None,
            enabled: true,
            is_draft: false,
            is_revision: false,
            post_date: Some(now - Duration::hours(1)),
            expiry_date: None,
        };
        assert!(entry.is_live_at(now));

        entry.expiry_date = Some(now - Duration::minutes(1));
        assert!(!entry.is_live_at(now));

        entry.expiry_date = None;
        entry.is_draft = true;
        assert!(!entry.is_live_at(now));

        entry.is_draft = false;
        entry.post_date = Some(now + Duration::hours(1));
        assert!(!entry.is_live_at(now));

        entry.post_date = None;
        assert!(!entry.is_live_at(now));
    }

    #[test]
    fn test_share_content_serializes_tagged() {
        let content = ShareContent::Twitter {
            message: Some("Hello".to_string()),
        };
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json, serde_json::json!({"type": "twitter", "message": "Hello"}));

        let back: ShareContent = serde_json::from_value(json).unwrap();
        assert_eq!(back, content);
    }

    #[test]
    fn test_share_content_apply_fields_trims_blank_message() {
        let mut content = ShareContent::FacebookPage { message: None };
        let mut fields = BTreeMap::new();
        fields.insert("message".to_string(), "  Hello  ".to_string());
        content.apply_fields(&fields);
        assert_eq!(content.message(), Some("Hello"));

        fields.insert("message".to_string(), "   ".to_string());
        content.apply_fields(&fields);
        assert_eq!(content.message(), None);
    }

    #[test]
    fn test_share_state_transitions() {
        let entry = Entry {
            id: 10,
            site_id: 1,
            canonical_id: None,
            url: None,
            title: None,
            enabled: true,
            is_draft: false,
            is_revision: false,
            post_date: None,
            expiry_date: None,
        };
        let account = Account {
            id: 3,
            token_id: Some(1),
            connector_id: None,
            identifier: "abc".to_string(),
            name: "Page".to_string(),
            handle: "page".to_string(),
            settings: AccountSettings::default(),
            last_refreshed_at: None,
        };

        let mut share = Share::new(&entry, &account, ShareContent::Message { message: None });
        assert_eq!(share.state(), ShareState::Pending);
        assert_eq!(share.entry_id, 10);
        assert_eq!(share.account_id, 3);
        assert!(share.publish_with_entry);

        share.mark_failed(serde_json::json!({"title": "Forbidden"}), "Forbidden");
        assert_eq!(share.state(), ShareState::Failed);
        assert_eq!(share.errors.first("success"), Some("Forbidden"));
    }

    #[test]
    fn test_provider_settings_expand_env() {
        std::env::set_var("SHARECAST_TEST_CLIENT_SECRET", "from-env");
        let settings = ProviderSettings {
            client_id: Some("client".to_string()),
            client_secret: Some("$SHARECAST_TEST_CLIENT_SECRET".to_string()),
            ..Default::default()
        };
        assert_eq!(settings.client_id().unwrap(), "client");
        assert_eq!(settings.client_secret().unwrap().expose_secret(), "from-env");

        let empty = ProviderSettings::default();
        assert!(empty.client_id().is_err());
        assert!(!format!("{:?}", settings).contains("from-env"));
    }
}
