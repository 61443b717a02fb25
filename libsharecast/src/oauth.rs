//! OAuth2 authorization-code flow shared by the provider adapters

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{CallbackError, PlatformError, Result};
use crate::http::read_json;
use crate::session::{Session, PKCE_VERIFIER_KEY, STATE_KEY};
use crate::types::Token;

/// Query parameters the platform appends to the redirect URI
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// How client credentials are presented to the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    RequestBody,
    BasicAuth,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub fn expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in.map(|secs| now + Duration::seconds(secs))
    }

    /// Build an unsaved token; granted scopes win over the requested ones
    pub fn into_token(self, provider_id: i64, requested: &[String], now: DateTime<Utc>) -> Token {
        let expiry = self.expiry(now);
        let scopes = match self.scope.as_deref() {
            Some(granted) if !granted.trim().is_empty() => granted
                .split(|c: char| c == ' ' || c == ',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => requested.to_vec(),
        };

        Token {
            id: None,
            provider_id,
            identifier: String::new(),
            access_token: SecretString::from(self.access_token),
            refresh_token: self.refresh_token.map(SecretString::from),
            scopes,
            expiry,
        }
    }
}

pub struct OAuthClient {
    http: Client,
    client_id: String,
    client_secret: SecretString,
    redirect_uri: Url,
    authorize_url: Url,
    token_url: Url,
    scope_separator: &'static str,
    client_auth: ClientAuth,
}

impl OAuthClient {
    pub fn new(
        http: Client,
        client_id: String,
        client_secret: SecretString,
        redirect_uri: Url,
        authorize_url: Url,
        token_url: Url,
    ) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            redirect_uri,
            authorize_url,
            token_url,
            scope_separator: ",",
            client_auth: ClientAuth::RequestBody,
        }
    }

    pub fn with_scope_separator(mut self, separator: &'static str) -> Self {
        self.scope_separator = separator;
        self
    }

    pub fn with_client_auth(mut self, auth: ClientAuth) -> Self {
        self.client_auth = auth;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &SecretString {
        &self.client_secret
    }

    pub fn authorization_url(&self, state: &str, scopes: &[String], extra: &[(&str, &str)]) -> Url {
        let mut url = self.authorize_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", self.redirect_uri.as_str())
                .append_pair("state", state)
                .append_pair("scope", &scopes.join(self.scope_separator));
            for (key, value) in extra {
                query.append_pair(key, value);
            }
        }
        url
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        extra: &[(&str, &str)],
    ) -> std::result::Result<TokenResponse, PlatformError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        form.extend_from_slice(extra);
        self.token_request(&form).await
    }

    pub async fn refresh(
        &self,
        refresh_token: &str,
        extra: &[(&str, &str)],
    ) -> std::result::Result<TokenResponse, PlatformError> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        form.extend_from_slice(extra);
        self.token_request(&form).await
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> std::result::Result<TokenResponse, PlatformError> {
        let mut request = self.http.post(self.token_url.clone());
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("client_id", self.client_id.as_str()));
        match self.client_auth {
            ClientAuth::RequestBody => {
                form.push(("client_secret", self.client_secret.expose_secret()));
            }
            ClientAuth::BasicAuth => {
                request = request.basic_auth(&self.client_id, Some(self.client_secret.expose_secret()));
            }
        }

        tracing::debug!(url = %self.token_url, "Requesting OAuth2 token");
        let body = read_json(request.form(&form).send().await?).await?;
        serde_json::from_value(body)
            .map_err(|e| PlatformError::InvalidResponse(format!("token response: {}", e)))
    }
}

/// 16 random bytes, hex encoded
pub fn generate_state() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Store a fresh anti-forgery state in the session and return it
pub fn begin(session: &mut Session) -> String {
    let state = generate_state();
    session.set(STATE_KEY, state.clone());
    state
}

/// Consume the stored state and require an exact match
pub fn verify_state(session: &mut Session, params: &CallbackParams) -> std::result::Result<(), CallbackError> {
    let saved = session.remove(STATE_KEY);

    if let Some(error) = &params.error {
        let detail = params.error_description.as_deref().unwrap_or(error);
        return Err(CallbackError::new(format!("Authorization denied: {}", detail)));
    }

    match (params.state.as_deref(), saved.as_deref()) {
        (Some(returned), Some(saved)) if returned == saved => Ok(()),
        _ => Err(CallbackError::new("OAuth2 state mismatch")),
    }
}

pub fn require_code(params: &CallbackParams) -> std::result::Result<&str, CallbackError> {
    params
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| CallbackError::new("Authorization code missing"))
}

/// PKCE (S256) verifier stored in the session; returns the challenge
pub fn begin_pkce(session: &mut Session) -> String {
    let verifier = format!("{}{}", generate_state(), generate_state());
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    session.set(PKCE_VERIFIER_KEY, verifier);
    challenge
}

pub fn take_pkce_verifier(session: &mut Session) -> Result<String> {
    session
        .remove(PKCE_VERIFIER_KEY)
        .ok_or_else(|| CallbackError::new("PKCE code verifier missing from session").into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OAuthClient {
        OAuthClient::new(
            Client::new(),
            "client-123".to_string(),
            SecretString::from("shh".to_string()),
            Url::parse("https://cms.example.com/accounts/callback").unwrap(),
            Url::parse("https://auth.example.com/authorize").unwrap(),
            Url::parse("https://auth.example.com/token").unwrap(),
        )
    }

    #[test]
    fn test_generate_state_is_32_hex_chars() {
        let state = generate_state();
        assert_eq!(state.len(), 32);
        assert!(state.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(state, generate_state());
    }

    #[test]
    fn test_authorization_url_carries_state_and_scopes() {
        let scopes = vec!["tweet.read".to_string(), "users.read".to_string()];
        let url = client()
            .with_scope_separator(" ")
            .authorization_url("abc", &scopes, &[("code_challenge_method", "S256")]);

        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["state"], "abc");
        assert_eq!(pairs["scope"], "tweet.read users.read");
        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(pairs["redirect_uri"], "https://cms.example.com/accounts/callback");
        assert_eq!(pairs["code_challenge_method"], "S256");
    }

    #[test]
    fn test_verify_state_requires_exact_match_and_consumes_it() {
        let mut session = Session::new();
        let state = begin(&mut session);

        let wrong = CallbackParams {
            state: Some(format!("{}x", state)),
            code: Some("code".to_string()),
            ..Default::default()
        };
        let err = verify_state(&mut session, &wrong).unwrap_err();
        assert_eq!(err.message, "OAuth2 state mismatch");

        // The state was consumed by the failed attempt
        let right = CallbackParams {
            state: Some(state),
            code: Some("code".to_string()),
            ..Default::default()
        };
        assert!(verify_state(&mut session, &right).is_err());
    }

    #[test]
    fn test_verify_state_accepts_match() {
        let mut session = Session::new();
        let state = begin(&mut session);
        let params = CallbackParams {
            state: Some(state),
            code: Some("code".to_string()),
            ..Default::default()
        };
        assert!(verify_state(&mut session, &params).is_ok());
        assert_eq!(require_code(&params).unwrap(), "code");
    }

    #[test]
    fn test_platform_denial_is_reported() {
        let mut session = Session::new();
        begin(&mut session);
        let params = CallbackParams {
            error: Some("access_denied".to_string()),
            error_description: Some("The user denied access".to_string()),
            ..Default::default()
        };
        let err = verify_state(&mut session, &params).unwrap_err();
        assert!(err.message.contains("The user denied access"));
    }

    #[test]
    fn test_token_response_prefers_granted_scopes() {
        let now = Utc::now();
        let requested = vec!["a".to_string(), "b".to_string()];

        let response = TokenResponse {
            access_token: "tok".to_string(),
            refresh_token: Some("ref".to_string()),
            expires_in: Some(7200),
            scope: Some("a tweet.write".to_string()),
        };
        let token = response.into_token(5, &requested, now);
        assert_eq!(token.scopes, vec!["a", "tweet.write"]);
        assert_eq!(token.expiry, Some(now + Duration::seconds(7200)));
        assert_eq!(token.refresh_secret(), Some("ref"));

        let response = TokenResponse {
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_in: None,
            scope: None,
        };
        let token = response.into_token(5, &requested, now);
        assert_eq!(token.scopes, requested);
        assert!(token.expiry.is_none());
    }

    #[test]
    fn test_pkce_challenge_matches_verifier() {
        let mut session = Session::new();
        let challenge = begin_pkce(&mut session);
        let verifier = take_pkce_verifier(&mut session).unwrap();
        assert_eq!(challenge, URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())));
        assert!(take_pkce_verifier(&mut session).is_err());
    }
}
