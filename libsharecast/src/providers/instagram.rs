//! Instagram Basic Display adapter
//!
//! Short-lived tokens from the code exchange are swapped for long-lived ones
//! (60 days), which are renewed with the token itself instead of a separate
//! refresh token.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::{PlatformError, Result};
use crate::http::{base_url, endpoint, read_json, str_at};
use crate::linkify;
use crate::oauth::{self, CallbackParams, OAuthClient};
use crate::providers::{
    parse_platform_time, parse_setting, refresh_error, Provider, ProviderContext, PullPosts,
    TokenRefreshing,
};
use crate::session::Session;
use crate::types::{
    Account, AccountSettings, DiscoveredAccount, Post, PostKind, PostPayload, ProviderRecord,
    Token,
};

pub const KIND: &str = "instagram";

const API_BASE: &str = "https://graph.instagram.com/";
const AUTHORIZE_URL: &str = "https://api.instagram.com/oauth/authorize";
const TOKEN_URL: &str = "https://api.instagram.com/oauth/access_token";

const LONG_LIVED_DAYS: i64 = 60;

const MEDIA_FIELDS: &str = "caption,id,media_type,media_url,permalink,thumbnail_url,timestamp";

#[derive(Debug, Deserialize)]
struct LongLivedToken {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub struct InstagramProvider {
    record: ProviderRecord,
    http: Client,
    api: Url,
    authorize_url: Url,
    token_url: Url,
    redirect_uri: Url,
}

impl InstagramProvider {
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

    async fn api_get(&self, path: &str, query: &[(&str, &str)]) -> std::result::Result<Value, PlatformError> {
        let url = endpoint(&self.api, path)?;
        debug!(%url, "Instagram API request");
        let response = self.http.get(url).query(query).send().await?;
        read_json(response).await
    }

    async fn long_lived_token(&self, short_lived: &str) -> Result<LongLivedToken> {
        let secret = self.record.settings.client_secret()?;
        let body = self
            .api_get(
                "access_token",
                &[
                    ("grant_type", "ig_exchange_token"),
                    ("client_secret", secret.expose_secret()),
                    ("access_token", short_lived),
                ],
            )
            .await?;
        decode_token(body).map_err(Into::into)
    }
}

fn decode_token(body: Value) -> std::result::Result<LongLivedToken, PlatformError> {
    serde_json::from_value(body)
        .map_err(|e| PlatformError::InvalidResponse(format!("token response: {}", e)))
}

#[async_trait]
impl Provider for InstagramProvider {
    fn record(&self) -> &ProviderRecord {
        &self.record
    }

    fn display_name(&self) -> &'static str {
        "Instagram"
    }

    fn scopes(&self) -> Vec<String> {
        vec!["user_profile".to_string(), "user_media".to_string()]
    }

    async fn handle_connect(&self, session: &mut Session) -> Result<Url> {
        let oauth = self.oauth()?;
        let state = oauth::begin(session);
        Ok(oauth.authorization_url(&state, &self.scopes(), &[]))
    }

    async fn handle_callback(&self, params: &CallbackParams, session: &mut Session) -> Result<Token> {
        oauth::verify_state(session, params)?;
        let code = oauth::require_code(params)?;

        let now = Utc::now();
        let short_lived = self.oauth()?.exchange_code(code, &[]).await?;
        let long_lived = self.long_lived_token(&short_lived.access_token).await?;

        let mut token = short_lived.into_token(self.id(), &self.scopes(), now);
        token.access_token = long_lived.access_token.into();
        token.expiry = Some(now + Duration::days(LONG_LIVED_DAYS));
        token.identifier = self.identifier(&token).await?;
        Ok(token)
    }

    async fn identifier(&self, token: &Token) -> Result<String> {
        let me = self
            .api_get("me", &[("fields", "id"), ("access_token", token.secret())])
            .await?;
        Ok(str_at(&me, "/id")?.to_string())
    }

    async fn discover_accounts(&self, token: &Token) -> Result<Vec<DiscoveredAccount>> {
        let me = self
            .api_get("me", &[("fields", "id,username"), ("access_token", token.secret())])
            .await?;
        let username = str_at(&me, "/username")?;
        Ok(vec![DiscoveredAccount {
            identifier: str_at(&me, "/id")?.to_string(),
            name: username.to_string(),
            handle: username.to_string(),
            settings: AccountSettings::default(),
        }])
    }

    fn account_label(&self, account: &Account) -> String {
        format!("@{}", account.handle)
    }

    fn as_pull_posts(&self) -> Option<&dyn PullPosts> {
        Some(self)
    }

    fn as_token_refreshing(&self) -> Option<&dyn TokenRefreshing> {
        Some(self)
    }
}

#[async_trait]
impl PullPosts for InstagramProvider {
    async fn fetch_posts(&self, account: &Account, token: &Token, limit: u32) -> Result<Vec<Post>> {
        let limit = limit.to_string();
        let feed = self
            .api_get(
                "me/media",
                &[
                    ("fields", MEDIA_FIELDS),
                    ("limit", limit.as_str()),
                    ("access_token", token.secret()),
                ],
            )
            .await?;

        Ok(feed["data"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|media| map_media(account, media))
            .collect())
    }
}

#[async_trait]
impl TokenRefreshing for InstagramProvider {
    async fn refresh_token(&self, token: &Token) -> Result<Token> {
        let body = self
            .api_get(
                "refresh_access_token",
                &[("grant_type", "ig_refresh_token"), ("access_token", token.secret())],
            )
            .await
            .and_then(decode_token);

        let refreshed = match body {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(identifier = %token.identifier, error = %e, "Instagram rejected token refresh");
                let reason = e
                    .body()
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| e.to_string());
                return Err(refresh_error(token, reason));
            }
        };

        let now = Utc::now();
        let mut token = token.clone();
        token.access_token = refreshed.access_token.into();
        token.expiry = refreshed
            .expires_in
            .map(|secs| now + Duration::seconds(secs))
            .or(Some(now + Duration::days(LONG_LIVED_DAYS)));
        Ok(token)
    }
}

fn map_media(account: &Account, media: &Value) -> Option<Post> {
    let media_type = media["media_type"].as_str().unwrap_or("IMAGE");
    let media_url = media["media_url"].as_str().map(str::to_string);

    let mut payload = PostPayload::text(linkify::highlight_urls(
        media["caption"].as_str().unwrap_or_default(),
    ));
    payload.kind = match media_type {
        "CAROUSEL_ALBUM" => PostKind::Gallery,
        "VIDEO" => PostKind::Video,
        _ => PostKind::Image,
    };
    if media_type == "VIDEO" {
        payload.video_url = media_url.clone();
    }
    payload.image_url = media["thumbnail_url"].as_str().map(str::to_string).or(media_url);

    Some(Post {
        id: None,
        account_id: account.id,
        identifier: media["id"].as_str()?.to_string(),
        posted_at: media["timestamp"].as_str().and_then(parse_platform_time),
        url: media["permalink"].as_str().map(str::to_string),
        payload_type: KIND.to_string(),
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn account() -> Account {
        Account {
            id: 4,
            token_id: Some(2),
            connector_id: None,
            identifier: "17841".to_string(),
            name: "studio".to_string(),
            handle: "studio".to_string(),
            settings: AccountSettings::default(),
            last_refreshed_at: None,
        }
    }

    #[test]
    fn test_carousel_maps_to_gallery() {
        let media = json!({
            "id": "1", "media_type": "CAROUSEL_ALBUM",
            "media_url": "https://cdn.example/1.jpg",
            "caption": "New work https://studio.example",
            "permalink": "https://www.instagram.com/p/abc/",
            "timestamp": "2022-04-02T12:00:00+0000"
        });
        let post = map_media(&account(), &media).unwrap();
        assert_eq!(post.payload.kind, PostKind::Gallery);
        assert_eq!(post.payload.image_url.as_deref(), Some("https://cdn.example/1.jpg"));
        assert!(post.payload.text.contains(r#"<a href="https://studio.example">"#));
        assert!(post.posted_at.is_some());
    }

    #[test]
    fn test_video_prefers_thumbnail_for_image() {
        let media = json!({
            "id": "2", "media_type": "VIDEO",
            "media_url": "https://cdn.example/2.mp4",
            "thumbnail_url": "https://cdn.example/2.jpg"
        });
        let post = map_media(&account(), &media).unwrap();
        assert_eq!(post.payload.kind, PostKind::Video);
        assert_eq!(post.payload.video_url.as_deref(), Some("https://cdn.example/2.mp4"));
        assert_eq!(post.payload.image_url.as_deref(), Some("https://cdn.example/2.jpg"));
        assert_eq!(post.payload.text, "");
    }
}
