//! Facebook Pages adapter (Graph API)
//!
//! One user token discovers every page it manages; each page becomes an
//! account carrying its own page access token. All Graph calls are signed
//! with an `appsecret_proof`.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, info};
use url::Url;

use crate::error::{PlatformError, Result};
use crate::http::{base_url, endpoint, read_json, str_at};
use crate::linkify::{self, TextEntity};
use crate::oauth::{self, CallbackParams, OAuthClient};
use crate::providers::{
    parse_platform_time, parse_setting, Composing, Provider, ProviderContext, PublishTarget,
    PullPosts,
};
use crate::session::Session;
use crate::types::{
    Account, AccountSettings, DiscoveredAccount, Post, PostKind, PostPayload, ProviderRecord,
    Share, ShareContent, Token, ValidationErrors,
};
use crate::validation;

pub const KIND: &str = "facebook-pages";

const API_BASE: &str = "https://graph.facebook.com/v13.0/";
const AUTHORIZE_URL: &str = "https://www.facebook.com/v13.0/dialog/oauth";
const TOKEN_URL: &str = "https://graph.facebook.com/v13.0/oauth/access_token";

const POSTING_SCOPE: &str = "pages_manage_posts";

/// Feed items of other types (cover changes, events, ...) are not imported
const ALLOWED_STATUS_TYPES: [&str; 4] = [
    "added_photos",
    "added_video",
    "mobile_status_update",
    "shared_story",
];

const FEED_FIELDS: &str = "id,created_time,message,message_tags,permalink_url,status_type,\
    full_picture,attachments{description,media,media_type,unshimmed_url,title,type},\
    story,story_tags,privacy";

type HmacSha256 = Hmac<Sha256>;

pub struct FacebookPagesProvider {
    record: ProviderRecord,
    http: Client,
    api: Url,
    authorize_url: Url,
    token_url: Url,
    redirect_uri: Url,
}

impl FacebookPagesProvider {
    pub fn new(record: ProviderRecord, context: &ProviderContext) -> Result<Self> {
        let settings = &record.settings;
        let api = base_url(settings.api_base_url.as_deref().unwrap_or(API_BASE))?;
        let authorize_url = parse_setting(settings.authorize_url.as_deref(), AUTHORIZE_URL)?;
        let token_url = parse_setting(settings.token_url.as_deref(), TOKEN_URL)?;

        Ok(Self {
            record,
            http: context.http.clone(),
            api,
            authorize_url,
            token_url,
            redirect_uri: context.redirect_uri.clone(),
        })
    }

    fn oauth(&self) -> Result<OAuthClient> {
        Ok(OAuthClient::new(
            self.http.clone(),
            self.record.settings.client_id()?,
            self.record.settings.client_secret()?,
            self.redirect_uri.clone(),
            self.authorize_url.clone(),
            self.token_url.clone(),
        ))
    }

    /// HMAC-SHA256 of the access token keyed with the app secret, hex encoded
    fn app_secret_proof(&self, access_token: &str) -> Result<String> {
        let secret = self.record.settings.client_secret()?;
        let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|e| PlatformError::Authentication(e.to_string()))?;
        mac.update(access_token.as_bytes());
        Ok(mac
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect())
    }

    async fn graph_get(&self, path: &str, access_token: &str, query: &[(&str, &str)]) -> Result<Value> {
        let proof = self.app_secret_proof(access_token)?;
        let url = endpoint(&self.api, path)?;
        debug!(%url, "Graph API request");

        let response = self
            .http
            .get(url)
            .query(&[("appsecret_proof", proof.as_str()), ("access_token", access_token)])
            .query(query)
            .send()
            .await
            .map_err(PlatformError::from)?;
        Ok(read_json(response).await?)
    }

    async fn post_to_feed(&self, account: &Account, page_token: &str, message: &str, link: Option<&str>) -> std::result::Result<Value, PlatformError> {
        let proof = self
            .app_secret_proof(page_token)
            .map_err(|e| PlatformError::Authentication(e.to_string()))?;
        let url = endpoint(&self.api, &format!("{}/feed", account.identifier))?;

        let response = self
            .http
            .post(url)
            .query(&[("appsecret_proof", proof.as_str()), ("access_token", page_token)])
            .json(&json!({ "message": message, "link": link }))
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl Provider for FacebookPagesProvider {
    fn record(&self) -> &ProviderRecord {
        &self.record
    }

    fn display_name(&self) -> &'static str {
        "Facebook Pages"
    }

    fn scopes(&self) -> Vec<String> {
        let mut scopes = vec![
            "public_profile".to_string(),
            "pages_show_list".to_string(),
            "pages_read_engagement".to_string(),
        ];
        if self.record.settings.enable_posting {
            scopes.push(POSTING_SCOPE.to_string());
        }
        scopes
    }

    async fn handle_connect(&self, session: &mut Session) -> Result<Url> {
        let oauth = self.oauth()?;
        let state = oauth::begin(session);
        Ok(oauth.authorization_url(&state, &self.scopes(), &[]))
    }

    async fn handle_callback(&self, params: &CallbackParams, session: &mut Session) -> Result<Token> {
        oauth::verify_state(session, params)?;
        let code = oauth::require_code(params)?;

        let response = self.oauth()?.exchange_code(code, &[]).await?;
        let mut token = response.into_token(self.id(), &self.scopes(), Utc::now());
        token.identifier = self.identifier(&token).await?;
        Ok(token)
    }

    async fn identifier(&self, token: &Token) -> Result<String> {
        let me = self.graph_get("me", token.secret(), &[("fields", "id")]).await?;
        Ok(str_at(&me, "/id")?.to_string())
    }

    async fn discover_accounts(&self, token: &Token) -> Result<Vec<DiscoveredAccount>> {
        let pages = self.graph_get("me/accounts", token.secret(), &[]).await?;
        let mut accounts = Vec::new();

        for page in pages["data"].as_array().into_iter().flatten() {
            let page_id = str_at(page, "/id")?;
            let page_token = str_at(page, "/access_token")?;
            let details = self
                .graph_get(page_id, page_token, &[("fields", "name,link,picture,username")])
                .await?;

            accounts.push(DiscoveredAccount {
                identifier: page_id.to_string(),
                name: str_at(&details, "/name")?.to_string(),
                handle: details["username"].as_str().unwrap_or("-").to_string(),
                settings: AccountSettings {
                    access_token: Some(page_token.to_string()),
                },
            });
        }

        info!(provider = %self.handle(), pages = accounts.len(), "Discovered Facebook pages");
        Ok(accounts)
    }

    fn as_composing(&self) -> Option<&dyn Composing> {
        Some(self)
    }

    fn as_pull_posts(&self) -> Option<&dyn PullPosts> {
        Some(self)
    }
}

#[async_trait]
impl Composing for FacebookPagesProvider {
    fn supports_composing(&self, _account: &Account, token: &Token) -> bool {
        self.record.settings.enable_posting && token.has_scope(POSTING_SCOPE)
    }

    fn new_share_content(&self) -> ShareContent {
        ShareContent::FacebookPage { message: None }
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
        let Some(page_token) = target.account.settings.access_token.as_deref() else {
            share.mark_failed(
                json!({ "error": { "message": "Page access token missing" } }),
                "Page access token missing",
            );
            return share;
        };

        let message = share.content.message().unwrap_or_default().to_string();
        match self
            .post_to_feed(target.account, page_token, &message, target.entry.url.as_deref())
            .await
        {
            Ok(node) => match node["id"].as_str().map(str::to_string) {
                Some(id) => {
                    let post_url = format!("https://facebook.com/{}", id);
                    share.mark_published(node, post_url, Utc::now());
                }
                None => share.mark_failed(node, "Unexpected response from Facebook"),
            },
            Err(e) => {
                let body = e.body();
                let message = body
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| e.to_string());
                share.mark_failed(body, message);
            }
        }
        share
    }
}

#[async_trait]
impl PullPosts for FacebookPagesProvider {
    async fn fetch_posts(&self, account: &Account, token: &Token, limit: u32) -> Result<Vec<Post>> {
        let page_token = account
            .settings
            .access_token
            .as_deref()
            .unwrap_or_else(|| token.secret());
        let limit = limit.to_string();

        let feed = self
            .graph_get(
                &format!("{}/posts", account.identifier),
                page_token,
                &[("limit", limit.as_str()), ("fields", FEED_FIELDS)],
            )
            .await?;

        Ok(feed["data"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|item| map_feed_post(account, item))
            .collect())
    }
}

/// Map one feed item, skipping non-public posts and unsupported types
fn map_feed_post(account: &Account, item: &Value) -> Option<Post> {
    let status_type = item["status_type"].as_str()?;
    if !ALLOWED_STATUS_TYPES.contains(&status_type) {
        return None;
    }
    if item.pointer("/privacy/value").and_then(Value::as_str) != Some("EVERYONE") {
        return None;
    }

    let mut text = render_tagged(
        item["message"].as_str().unwrap_or_default(),
        &item["message_tags"],
    );
    if text.is_empty() {
        if let Some(story) = item["story"].as_str() {
            text = render_tagged(story, &item["story_tags"]);
        }
    }

    let mut payload = PostPayload::text(text);
    if let Some(media) = item.pointer("/attachments/data/0") {
        let media_type = media["media_type"].as_str().unwrap_or_default();
        let target = media["unshimmed_url"].as_str();

        if media_type == "link" {
            if let Some(url) = target {
                payload.link_url = Some(url.to_string());
                payload.link_title = media["title"].as_str().map(str::to_string);
            }
        }
        if media_type == "video" {
            if let Some(url) = target {
                payload.kind = PostKind::Video;
                payload.video_url = Some(url.to_string());
            }
        }

        payload.image_url = media.pointer("/media/image/src").and_then(Value::as_str).map(str::to_string);
        payload.image_alt = media.pointer("/media/image/alt").and_then(Value::as_str).map(str::to_string);
        if payload.image_url.is_some() {
            match media_type {
                "photo" => payload.kind = PostKind::Image,
                "album" => payload.kind = PostKind::Gallery,
                _ => {}
            }
        }
    }

    Some(Post {
        id: None,
        account_id: account.id,
        identifier: item["id"].as_str()?.to_string(),
        posted_at: item["created_time"].as_str().and_then(parse_platform_time),
        url: item["permalink_url"].as_str().map(str::to_string),
        payload_type: KIND.to_string(),
        payload,
    })
}

/// Profile tags become links, bare URLs are highlighted
fn render_tagged(text: &str, tags: &Value) -> String {
    let mut entities: Vec<TextEntity> = tags
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|tag| {
            let offset = tag["offset"].as_u64()? as usize;
            let length = tag["length"].as_u64()? as usize;
            let id = tag["id"].as_str()?;
            let name = tag["name"].as_str()?;
            TextEntity::from_utf16(
                text,
                offset,
                length,
                linkify::link(&format!("https://facebook.com/{}", id), name),
            )
        })
        .collect();
    entities.extend(linkify::url_entities(text));
    linkify::render(text, entities)
}
