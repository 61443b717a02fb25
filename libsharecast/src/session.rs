//! Per-user session state carried across the OAuth redirect

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const STATE_KEY: &str = "oauth.state";
pub const PROVIDER_KEY: &str = "oauth.provider";
pub const RETURN_URL_KEY: &str = "oauth.returnUrl";
pub const PKCE_VERIFIER_KEY: &str = "oauth.codeVerifier";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Notice,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    values: HashMap<String, String>,
    flashes: Vec<Flash>,
    /// Authenticated CMS user, recorded as the connector of new accounts
    pub user_id: Option<i64>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn flash(&mut self, kind: FlashKind, message: impl Into<String>) {
        self.flashes.push(Flash {
            kind,
            message: message.into(),
        });
    }

    /// Flash messages are shown once
    pub fn take_flashes(&mut self) -> Vec<Flash> {
        std::mem::take(&mut self.flashes)
    }
}
