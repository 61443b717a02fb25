//! Token service
//!
//! Resolves the token behind an account and drives refreshes. Refreshing is
//! the only operation that mutates a stored token; concurrent refreshes of
//! the same token inside one process are serialized, across processes the
//! last writer wins.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::registry::ProviderRegistry;
use crate::error::{Capability, Result, SharecastError};
use crate::providers::Provider;
use crate::types::{Account, Token};
use crate::Database;

/// Outcome of a refresh sweep over all used tokens
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    pub refreshed: Vec<i64>,
    /// Tokens still valid beyond the refresh window
    pub skipped: Vec<i64>,
    /// Tokens whose provider cannot refresh
    pub unsupported: Vec<i64>,
    pub failures: Vec<String>,
}

impl RefreshReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct TokenService {
    db: Arc<Database>,
    registry: ProviderRegistry,
    locks: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl TokenService {
    pub fn new(db: Arc<Database>, registry: ProviderRegistry) -> Self {
        Self {
            db,
            registry,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Token referenced by `account`
    ///
    /// # Errors
    ///
    /// Returns `SharecastError::InvalidTokenId` if the account has no token
    /// reference or the referenced token does not exist.
    pub async fn token_by_account(&self, account: &Account) -> Result<Token> {
        let token_id = account.token_id.ok_or(SharecastError::InvalidTokenId(None))?;
        self.db
            .get_token(token_id)
            .await?
            .ok_or(SharecastError::InvalidTokenId(Some(token_id)))
    }

    pub async fn provider_for_token(&self, token: &Token) -> Result<Arc<dyn Provider>> {
        self.registry
            .by_id(token.provider_id)
            .await?
            .ok_or_else(|| SharecastError::NotFound(format!("provider {}", token.provider_id)))
    }

    /// Provider and token behind an account, in one lookup
    pub async fn provider_and_token(&self, account: &Account) -> Result<(Arc<dyn Provider>, Token)> {
        let token = self.token_by_account(account).await?;
        let provider = self.provider_for_token(&token).await?;
        Ok((provider, token))
    }

    /// Tokens referenced by at least one account
    pub async fn used_tokens(&self) -> Result<Vec<Token>> {
        self.db.used_tokens().await
    }

    /// Refresh `token` through its provider and persist the result
    ///
    /// # Errors
    ///
    /// Returns `SharecastError::MissingCapability` without touching the token
    /// if the provider cannot refresh, and `SharecastError::TokenRefresh` if
    /// the platform rejects the refresh.
    pub async fn refresh(&self, token: &Token) -> Result<Token> {
        let token_id = token.id.ok_or(SharecastError::InvalidTokenId(None))?;
        let provider = self.provider_for_token(token).await?;
        let refresher = provider
            .as_token_refreshing()
            .ok_or_else(|| SharecastError::MissingCapability {
                provider: provider.name().to_string(),
                capability: Capability::TokenRefreshing,
            })?;

        let lock = self.lock_for(token_id);
        let _guard = lock.lock().await;

        // Another task may have refreshed while we waited for the lock
        let current = self
            .db
            .get_token(token_id)
            .await?
            .ok_or(SharecastError::InvalidTokenId(Some(token_id)))?;
        if current.secret() != token.secret() && !current.is_expired() {
            debug!(token_id, "Token was refreshed concurrently");
            return Ok(current);
        }

        let mut refreshed = refresher.refresh_token(&current).await?;
        refreshed.id = Some(token_id);
        self.db.update_token(&refreshed).await?;

        info!(
            token_id,
            identifier = %refreshed.identifier,
            expiry = ?refreshed.expiry,
            "Access token refreshed"
        );
        Ok(refreshed)
    }

    /// Refresh an expired token before use, keeping the old one on failure
    pub async fn ensure_fresh(&self, provider: &dyn Provider, token: Token) -> Token {
        if !token.is_expired() || provider.as_token_refreshing().is_none() {
            return token;
        }

        match self.refresh(&token).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(token_id = ?token.id, error = %e, "Refreshing expired token failed");
                token
            }
        }
    }

    /// Refresh every used token expiring within `window` of `now`
    ///
    /// Per-token failures are collected in the report; only database errors
    /// abort the sweep.
    pub async fn refresh_sweep(&self, window: Duration, now: DateTime<Utc>) -> Result<RefreshReport> {
        let mut report = RefreshReport::default();

        for token in self.used_tokens().await? {
            let token_id = token.id.unwrap_or_default();
            if token.valid_beyond(window, now) {
                debug!(token_id, "Token valid beyond refresh window, skipping");
                report.skipped.push(token_id);
                continue;
            }

            match self.refresh(&token).await {
                Ok(_) => report.refreshed.push(token_id),
                Err(SharecastError::MissingCapability { provider, .. }) => {
                    warn!(token_id, provider = %provider, "Provider cannot refresh tokens");
                    report.unsupported.push(token_id);
                }
                Err(e @ SharecastError::Database(_)) => return Err(e),
                Err(e) => {
                    warn!(token_id, error = %e, "Token refresh failed");
                    report
                        .failures
                        .push(format!("Refreshing of token ID {} failed: {}", token_id, e));
                }
            }
        }

        Ok(report)
    }

    fn lock_for(&self, token_id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(token_id).or_default().clone()
    }
}
