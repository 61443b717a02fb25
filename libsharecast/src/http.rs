//! Outbound HTTP plumbing shared by the provider adapters

use reqwest::{Client, Response};
use serde_json::Value;
use url::Url;

use crate::config::HttpConfig;
use crate::error::{PlatformError, Result};

/// Build the shared client; every platform call is bounded by the configured timeout
pub fn build_client(config: &HttpConfig) -> Result<Client> {
    let client = Client::builder()
        .timeout(config.timeout())
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(PlatformError::from)?;
    Ok(client)
}

/// Decode a response body, turning non-success statuses into `PlatformError::Api`
pub async fn read_json(response: Response) -> std::result::Result<Value, PlatformError> {
    let status = response.status();
    let text = response.text().await?;
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

    if status.is_success() {
        Ok(body)
    } else if status.as_u16() == 429 {
        Err(PlatformError::RateLimit(body.to_string()))
    } else {
        Err(PlatformError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

/// Resolve `path` against an API base URL
pub fn endpoint(base: &Url, path: &str) -> std::result::Result<Url, PlatformError> {
    base.join(path.trim_start_matches('/'))
        .map_err(|e| PlatformError::InvalidResponse(format!("invalid endpoint {}: {}", path, e)))
}

/// Parse a configured base URL, making sure relative joins keep its path
pub fn base_url(raw: &str) -> Result<Url> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&normalized).map_err(|e| {
        crate::error::ConfigError::InvalidValue {
            field: "apiBaseUrl".to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

/// String at a JSON pointer, or an `InvalidResponse` naming the pointer
pub fn str_at<'a>(value: &'a Value, pointer: &str) -> std::result::Result<&'a str, PlatformError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| PlatformError::InvalidResponse(format!("missing {} in response", pointer)))
}
