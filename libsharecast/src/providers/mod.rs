//! Provider adapters and their optional capabilities
//!
//! Every configured platform connection is a [`Provider`]. The base trait
//! covers the OAuth connect flow and account discovery; publishing, importing
//! posts and refreshing tokens are separate capability traits an adapter opts
//! into. Callers probe for a capability with [`Provider::as_composing`],
//! [`Provider::as_pull_posts`] or [`Provider::as_token_refreshing`] instead of
//! calling an operation and catching a failure.
//!
//! # Examples
//!
//! ```no_run
//! use libsharecast::providers::Provider;
//! use libsharecast::types::{Account, Token};
//!
//! fn can_share(provider: &dyn Provider, account: &Account, token: &Token) -> bool {
//!     provider
//!         .as_composing()
//!         .map(|c| c.supports_composing(account, token))
//!         .unwrap_or(false)
//! }
//! ```
//!
//! Adapters never refresh tokens themselves: the services hand them a token
//! that has already been passed through the token service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use url::Url;

use crate::error::{Capability, Result};
use crate::oauth::CallbackParams;
use crate::opengraph::LinkPreview;
use crate::session::Session;
use crate::types::{
    Account, DiscoveredAccount, Entry, Post, ProviderRecord, Share, ShareContent, Token,
    ValidationErrors,
};

pub mod facebook;
pub mod factory;
pub mod instagram;
pub mod missing;
pub mod twitter;

// Mock provider is available for all builds so integration tests in other crates can use it
pub mod mock;

pub use factory::ProviderFactory;

/// Shared collaborators handed to every adapter
#[derive(Clone)]
pub struct ProviderContext {
    pub http: Client,
    /// Absolute callback URL registered with the platforms
    pub redirect_uri: Url,
}

/// Everything an adapter needs to publish one share
#[derive(Clone, Copy)]
pub struct PublishTarget<'a> {
    pub entry: &'a Entry,
    pub account: &'a Account,
    pub token: &'a Token,
}

/// Base contract implemented by all adapters
#[async_trait]
pub trait Provider: Send + Sync {
    /// Persisted configuration this instance was built from
    fn record(&self) -> &ProviderRecord;

    /// Human-readable platform name, e.g. "Facebook Pages"
    fn display_name(&self) -> &'static str;

    fn id(&self) -> i64 {
        self.record().id.unwrap_or_default()
    }

    fn uid(&self) -> &str {
        self.record().uid.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        &self.record().name
    }

    fn handle(&self) -> &str {
        &self.record().handle
    }

    fn enabled(&self) -> bool {
        self.record().enabled
    }

    fn sort_order(&self) -> i64 {
        self.record().sort_order
    }

    fn kind(&self) -> &str {
        &self.record().kind
    }

    /// OAuth scopes requested on connect
    fn scopes(&self) -> Vec<String>;

    /// Build the platform authorization URL
    ///
    /// Generates a fresh anti-forgery state and stores it in `session`
    /// together with any flow-specific secrets (e.g. a PKCE verifier).
    async fn handle_connect(&self, session: &mut Session) -> Result<Url>;

    /// Complete the authorization-code flow
    ///
    /// Validates the returned state against the session, exchanges the code
    /// and returns a populated but unsaved [`Token`] whose `identifier` comes
    /// from [`Provider::identifier`].
    ///
    /// # Errors
    ///
    /// Returns `SharecastError::Callback` on state mismatch and
    /// `SharecastError::Platform` if the platform rejects the exchange.
    async fn handle_callback(&self, params: &CallbackParams, session: &mut Session) -> Result<Token>;

    /// Stable external id of the identity behind `token`
    async fn identifier(&self, token: &Token) -> Result<String>;

    /// Enumerate the identities `token` grants access to
    ///
    /// Simple platforms return the token owner; page-style platforms return
    /// every managed page. Persistence is up to the caller.
    async fn discover_accounts(&self, token: &Token) -> Result<Vec<DiscoveredAccount>>;

    /// Name shown in account pickers
    fn account_label(&self, account: &Account) -> String {
        account.name.clone()
    }

    fn as_composing(&self) -> Option<&dyn Composing> {
        None
    }

    fn as_pull_posts(&self) -> Option<&dyn PullPosts> {
        None
    }

    fn as_token_refreshing(&self) -> Option<&dyn TokenRefreshing> {
        None
    }

    /// Capabilities this adapter implements
    fn capabilities(&self) -> Vec<Capability> {
        let mut capabilities = Vec::new();
        if self.as_composing().is_some() {
            capabilities.push(Capability::Composing);
        }
        if self.as_pull_posts().is_some() {
            capabilities.push(Capability::PullPosts);
        }
        if self.as_token_refreshing().is_some() {
            capabilities.push(Capability::TokenRefreshing);
        }
        capabilities
    }
}

/// Publishing shares to the platform
#[async_trait]
pub trait Composing: Send + Sync {
    /// Whether `account` may be posted to, usually a scope check on its token
    fn supports_composing(&self, account: &Account, token: &Token) -> bool;

    /// Empty compose fields for a new share
    fn new_share_content(&self) -> ShareContent;

    /// Platform rules for the compose fields
    fn validate_share(&self, share: &Share) -> ValidationErrors;

    /// Compose form markup, with an optional preview of the linked entry
    fn composing_html(&self, share: &Share, preview: Option<&LinkPreview>) -> String {
        let mut html = message_field_html(share);
        if let Some(preview) = preview {
            html.push('\n');
            html.push_str(&preview.to_html());
        }
        html
    }

    /// Label/value pairs describing a share in listings
    fn share_attributes(&self, share: &Share) -> Vec<(String, String)> {
        vec![(
            "Message".to_string(),
            share.content.message().unwrap_or_default().to_string(),
        )]
    }

    /// Human-readable reason stored on a failed share
    fn share_error_message(&self, share: &Share) -> String;

    /// Post the share
    ///
    /// Never fails: platform and network errors turn into a share with
    /// `success = Some(false)`, the raw error payload in `response` and a
    /// validation message under `success`. Must be invoked at most once per
    /// share; the caller guards that.
    async fn publish_share(&self, target: PublishTarget<'_>, share: Share) -> Share;
}

/// Importing recent posts
#[async_trait]
pub trait PullPosts: Send + Sync {
    fn supports_pulling(&self, _account: &Account) -> bool {
        true
    }

    /// Recent public posts of `account`, newest first, unsaved
    async fn fetch_posts(&self, account: &Account, token: &Token, limit: u32) -> Result<Vec<Post>>;
}

/// Renewing expired access tokens
#[async_trait]
pub trait TokenRefreshing: Send + Sync {
    /// Exchange the stored credentials for a new access token
    ///
    /// # Errors
    ///
    /// Returns `SharecastError::TokenRefresh` if the platform rejects the
    /// refresh (e.g. the grant was revoked).
    async fn refresh_token(&self, token: &Token) -> Result<Token>;
}

/// Textarea for the `message` compose field, including its errors
pub fn message_field_html(share: &Share) -> String {
    let mut html = String::from(r#"<div class="field" id="message-field">"#);
    html.push_str(r#"<label for="message">Message</label>"#);
    html.push_str(&format!(
        r#"<textarea id="message" name="message" rows="4">{}</textarea>"#,
        html_escape::encode_text(share.content.message().unwrap_or_default())
    ));
    for error in share.errors.field("message") {
        html.push_str(&format!(
            r#"<p class="error">{}</p>"#,
            html_escape::encode_text(error)
        ));
    }
    html.push_str("</div>");
    html
}

/// Wrap a failed refresh into the crate error carrying the token identity
pub(crate) fn refresh_error(token: &Token, reason: impl std::fmt::Display) -> crate::error::SharecastError {
    crate::error::SharecastError::TokenRefresh {
        token_id: token.id,
        identifier: token.identifier.clone(),
        reason: reason.to_string(),
    }
}

/// Endpoint URL from a provider setting override, or the platform default
pub(crate) fn parse_setting(value: Option<&str>, default: &str) -> Result<Url> {
    let raw = value.unwrap_or(default);
    Url::parse(raw).map_err(|e| {
        crate::error::ConfigError::InvalidValue {
            field: "provider url".to_string(),
            reason: format!("{}: {}", raw, e),
        }
        .into()
    })
}

/// Timestamps as platforms send them: RFC 3339 or ISO 8601 with a `+0000` offset
pub(crate) fn parse_platform_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .map(|t| t.with_timezone(&Utc))
        .ok()
}
