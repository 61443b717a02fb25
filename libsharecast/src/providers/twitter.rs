//! Twitter adapter (API v2, OAuth2 with PKCE)

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::error::{PlatformError, Result};
use crate::http::{base_url, endpoint, read_json, str_at};
use crate::linkify::{self, TextEntity};
use crate::oauth::{self, CallbackParams, ClientAuth, OAuthClient};
use crate::providers::{
    parse_platform_time, parse_setting, refresh_error, Composing, Provider, ProviderContext,
    PublishTarget, PullPosts, TokenRefreshing,
};
use crate::session::Session;
use crate::types::{
    Account, AccountSettings, DiscoveredAccount, Post, PostPayload, ProviderRecord, Share,
    ShareContent, Token, ValidationErrors,
};
use crate::validation;

pub const KIND: &str = "twitter";

const API_BASE: &str = "https://api.twitter.com/2/";
const AUTHORIZE_URL: &str = "https://twitter.com/i/oauth2/authorize";
const TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";

const POSTING_SCOPE: &str = "tweet.write";

pub struct TwitterProvider {
    record: ProviderRecord,
    http: Client,
    api: Url,
    authorize_url: Url,
    token_url: Url,
    redirect_uri: Url,
}

impl TwitterProvider {
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
        )
        .with_scope_separator(" ")
        .with_client_auth(ClientAuth::BasicAuth))
    }

    async fn api_get(&self, path: &str, token: &Token, query: &[(&str, &str)]) -> Result<Value> {
        let url = endpoint(&self.api, path)?;
        debug!(%url, "Twitter API request");

        let response = self
            .http
            .get(url)
            .bearer_auth(token.secret())
            .query(query)
            .send()
            .await
            .map_err(PlatformError::from)?;
        Ok(read_json(response).await?)
    }

    async fn me(&self, token: &Token) -> Result<Value> {
        self.api_get("users/me", token, &[]).await
    }

    async fn post_tweet(&self, token: &Token, text: &str) -> std::result::Result<Value, PlatformError> {
        let url = endpoint(&self.api, "tweets")?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token.secret())
            .json(&json!({ "text": text }))
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl Provider for TwitterProvider {
    fn record(&self) -> &ProviderRecord {
        &self.record
    }

    fn display_name(&self) -> &'static str {
        "Twitter"
    }

    fn scopes(&self) -> Vec<String> {
        let mut scopes = vec![
            "offline.access".to_string(),
            "tweet.read".to_string(),
            "users.read".to_string(),
        ];
        if self.record.settings.enable_posting {
            scopes.push(POSTING_SCOPE.to_string());
        }
        scopes
    }

    async fn handle_connect(&self, session: &mut Session) -> Result<Url> {
        let oauth = self.oauth()?;
        let state = oauth::begin(session);
        let challenge = oauth::begin_pkce(session);
        Ok(oauth.authorization_url(
            &state,
            &self.scopes(),
            &[("code_challenge", challenge.as_str()), ("code_challenge_method", "S256")],
        ))
    }

    async fn handle_callback(&self, params: &CallbackParams, session: &mut Session) -> Result<Token> {
        oauth::verify_state(session, params)?;
        let code = oauth::require_code(params)?;
        let verifier = oauth::take_pkce_verifier(session)?;

        let response = self
            .oauth()?
            .exchange_code(code, &[("code_verifier", verifier.as_str())])
            .await?;
        let mut token = response.into_token(self.id(), &self.scopes(), Utc::now());
        token.identifier = self.identifier(&token).await?;
        Ok(token)
    }

    async fn identifier(&self, token: &Token) -> Result<String> {
        let me = self.me(token).await?;
        Ok(str_at(&me, "/data/id")?.to_string())
    }

    async fn discover_accounts(&self, token: &Token) -> Result<Vec<DiscoveredAccount>> {
        let me = self.me(token).await?;
        Ok(vec![DiscoveredAccount {
            identifier: str_at(&me, "/data/id")?.to_string(),
            name: str_at(&me, "/data/name")?.to_string(),
            handle: str_at(&me, "/data/username")?.to_string(),
            settings: AccountSettings::default(),
        }])
    }

    fn account_label(&self, account: &Account) -> String {
        format!("@{}", account.handle)
    }

    fn as_composing(&self) -> Option<&dyn Composing> {
        Some(self)
    }

    fn as_pull_posts(&self) -> Option<&dyn PullPosts> {
        Some(self)
    }

    fn as_token_refreshing(&self) -> Option<&dyn TokenRefreshing> {
        Some(self)
    }
}

#[async_trait]
impl Composing for TwitterProvider {
    fn supports_composing(&self, _account: &Account, token: &Token) -> bool {
        self.record.settings.enable_posting && token.has_scope(POSTING_SCOPE)
    }

    fn new_share_content(&self) -> ShareContent {
        ShareContent::Twitter { message: None }
    }

    fn validate_share(&self, share: &Share) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        validation::require_message(share, &mut errors);
        validation::tweet_length(share, &mut errors);
        errors
    }

    fn share_error_message(&self, share: &Share) -> String {
        share
            .response
            .as_ref()
            .and_then(|r| r.get("title"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string()
    }

    async fn publish_share(&self, target: PublishTarget<'_>, mut share: Share) -> Share {
        let message = share.content.message().unwrap_or_default();
        let text = match target.entry.url.as_deref() {
            Some(url) => format!("{} {}", message, url),
            None => message.to_string(),
        };

        match self.post_tweet(target.token, &text).await {
            Ok(body) => match body.pointer("/data/id").and_then(Value::as_str).map(str::to_string) {
                Some(id) => {
                    let post_url = format!("https://twitter.com/{}/status/{}", target.account.handle, id);
                    share.mark_published(body, post_url, Utc::now());
                }
                None => share.mark_failed(body, "Unexpected response from Twitter"),
            },
            Err(e) => {
                let body = e.body();
                let message = body
                    .get("title")
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
impl PullPosts for TwitterProvider {
    async fn fetch_posts(&self, account: &Account, token: &Token, limit: u32) -> Result<Vec<Post>> {
        // The timeline endpoint rejects max_results outside 5..=100
        let max_results = limit.clamp(5, 100).to_string();
        let timeline = self
            .api_get(
                &format!("users/{}/tweets", account.identifier),
                token,
                &[
                    ("exclude", "replies,retweets"),
                    ("max_results", max_results.as_str()),
                    ("tweet.fields", "id,text,created_at,entities,attachments"),
                ],
            )
            .await?;

        Ok(timeline["data"]
            .as_array()
            .into_iter()
            .flatten()
            .take(limit as usize)
            .filter_map(|tweet| map_tweet(account, tweet))
            .collect())
    }
}

#[async_trait]
impl TokenRefreshing for TwitterProvider {
    async fn refresh_token(&self, token: &Token) -> Result<Token> {
        let Some(refresh) = token.refresh_secret() else {
            return Err(refresh_error(token, "no refresh token stored"));
        };

        let response = match self.oauth()?.refresh(refresh, &[]).await {
            Ok(response) => response,
            Err(e) => {
                warn!(identifier = %token.identifier, error = %e, "Twitter rejected token refresh");
                let body = e.body();
                let reason = body
                    .get("error_description")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| e.to_string());
                return Err(refresh_error(token, reason));
            }
        };

        let mut refreshed = token.clone();
        let expiry = response.expiry(Utc::now());
        refreshed.access_token = response.access_token.into();
        if let Some(rotated) = response.refresh_token {
            refreshed.refresh_token = Some(rotated.into());
        }
        refreshed.expiry = expiry;
        Ok(refreshed)
    }
}

fn map_tweet(account: &Account, tweet: &Value) -> Option<Post> {
    let id = tweet["id"].as_str()?;
    let text = tweet["text"].as_str().unwrap_or_default();

    Some(Post {
        id: None,
        account_id: account.id,
        identifier: id.to_string(),
        posted_at: tweet["created_at"].as_str().and_then(parse_platform_time),
        url: Some(format!("https://twitter.com/{}/status/{}", account.handle, id)),
        payload_type: KIND.to_string(),
        payload: PostPayload::text(autolink(text, &tweet["entities"])),
    })
}

/// Link urls, mentions, hashtags and cashtags reported by the API
fn autolink(text: &str, entities: &Value) -> String {
    let mut spans = Vec::new();

    for (group, items) in entities.as_object().into_iter().flatten() {
        for item in items.as_array().into_iter().flatten() {
            let (Some(start), Some(end)) = (item["start"].as_u64(), item["end"].as_u64()) else {
                continue;
            };
            let html = match group.as_str() {
                "urls" => {
                    let href = item["expanded_url"].as_str().or_else(|| item["url"].as_str());
                    let label = item["display_url"].as_str().or(href);
                    match (href, label) {
                        (Some(href), Some(label)) => linkify::link(href, label),
                        _ => continue,
                    }
                }
                "mentions" => {
                    let Some(username) = item["username"].as_str() else { continue };
                    linkify::link(&format!("https://twitter.com/{}", username), &format!("@{}", username))
                }
                "hashtags" => {
                    let Some(tag) = item["tag"].as_str() else { continue };
                    linkify::link(&format!("https://twitter.com/hashtag/{}", tag), &format!("#{}", tag))
                }
                "cashtags" => {
                    let Some(tag) = item["tag"].as_str() else { continue };
                    linkify::link(&format!("https://twitter.com/search?q=%24{}", tag), &format!("${}", tag))
                }
                _ => continue,
            };
            if let Some(span) = TextEntity::from_chars(text, start as usize, end as usize, html) {
                spans.push(span);
            }
        }
    }

    linkify::render(text, spans)
}
