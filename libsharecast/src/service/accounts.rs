//! Account connection and management
//!
//! Drives the OAuth connect flow across the redirect: [`AccountService::connect`]
//! remembers the provider and return URL in the session and hands back the
//! platform authorization URL; [`AccountService::callback`] completes the
//! exchange, discovers the identities behind the token and stores token and
//! accounts in one transaction.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use super::registry::ProviderRegistry;
use super::tokens::TokenService;
use crate::db::{upsert_account, upsert_token};
use crate::error::{CallbackError, DbError, Result, SharecastError};
use crate::oauth::CallbackParams;
use crate::session::{Session, PROVIDER_KEY, RETURN_URL_KEY};
use crate::types::{Account, DiscoveredAccount, Token};
use crate::Database;

/// Result of a completed connect flow
#[derive(Debug, Clone)]
pub struct Connected {
    pub provider_handle: String,
    pub accounts: Vec<Account>,
    pub return_url: String,
}

#[derive(Clone)]
pub struct AccountService {
    db: Arc<Database>,
    registry: ProviderRegistry,
    tokens: TokenService,
    default_return_url: String,
}

impl AccountService {
    pub fn new(
        db: Arc<Database>,
        registry: ProviderRegistry,
        tokens: TokenService,
        default_return_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            registry,
            tokens,
            default_return_url: default_return_url.into(),
        }
    }

    /// Start connecting the provider with `handle`
    ///
    /// # Errors
    ///
    /// Returns `SharecastError::NotFound` for an unknown handle and
    /// `SharecastError::InvalidInput` for a disabled provider.
    pub async fn connect(
        &self,
        handle: &str,
        session: &mut Session,
        return_url: Option<&str>,
    ) -> Result<Url> {
        let provider = self
            .registry
            .by_handle(handle)
            .await?
            .ok_or_else(|| SharecastError::NotFound(format!("Provider \"{}\"", handle)))?;

        if !provider.enabled() {
            return Err(SharecastError::InvalidInput(format!(
                "Provider \"{}\" is disabled",
                handle
            )));
        }

        session.set(PROVIDER_KEY, handle);
        session.set(
            RETURN_URL_KEY,
            return_url
                .filter(|u| !u.is_empty())
                .unwrap_or(self.default_return_url.as_str()),
        );

        provider.handle_connect(session).await
    }

    /// Where the connect flow returns to
    pub fn return_url(&self, session: &Session) -> String {
        session
            .get(RETURN_URL_KEY)
            .unwrap_or(self.default_return_url.as_str())
            .to_string()
    }

    /// Finish the connect flow started by [`AccountService::connect`]
    ///
    /// Any failure is reported as `SharecastError::Callback`; nothing is
    /// persisted unless token and all accounts could be stored.
    pub async fn callback(&self, params: &CallbackParams, session: &mut Session) -> Result<Connected> {
        let return_url = self.return_url(session);
        let handle = session
            .remove(PROVIDER_KEY)
            .ok_or_else(|| CallbackError::without_redirect("No connect flow in progress"))?;

        if let Some(error) = &params.error {
            let description = params.error_description.as_deref().unwrap_or(error);
            return Err(CallbackError::new(format!("Connecting was denied: {}", description)).into());
        }

        let provider = self
            .registry
            .by_handle(&handle)
            .await
            .map_err(callback_error)?
            .ok_or_else(|| {
                CallbackError::without_redirect(format!("Provider \"{}\" not found", handle))
            })?;

        let token = provider
            .handle_callback(params, session)
            .await
            .map_err(callback_error)?;
        let discovered = provider
            .discover_accounts(&token)
            .await
            .map_err(callback_error)?;

        let accounts = self
            .save_connection(&token, &discovered, session.user_id)
            .await
            .map_err(callback_error)?;

        session.remove(RETURN_URL_KEY);
        info!(
            provider = %handle,
            identifier = %token.identifier,
            accounts = accounts.len(),
            "Accounts connected"
        );

        Ok(Connected {
            provider_handle: handle,
            accounts,
            return_url,
        })
    }

    /// Persist a token and the accounts discovered with it
    ///
    /// Token and accounts are upserted by their natural keys, so connecting
    /// the same identity again updates rows instead of duplicating them.
    pub async fn save_connection(
        &self,
        token: &Token,
        discovered: &[DiscoveredAccount],
        connector_id: Option<i64>,
    ) -> Result<Vec<Account>> {
        let now = Utc::now();
        let mut tx = self.db.pool().begin().await.map_err(DbError::SqlxError)?;

        let token_id = upsert_token(&mut *tx, token).await?;
        let mut accounts = Vec::with_capacity(discovered.len());
        for account in discovered {
            accounts.push(upsert_account(&mut *tx, token_id, connector_id, account, now).await?);
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(accounts)
    }

    pub async fn list(&self) -> Result<Vec<Account>> {
        self.db.list_accounts().await
    }

    pub async fn get(&self, account_id: i64) -> Result<Option<Account>> {
        self.db.get_account(account_id).await
    }

    /// Delete an account together with its shares and posts
    pub async fn delete(&self, account_id: i64) -> Result<bool> {
        let deleted = self.db.delete_account(account_id).await?;
        if deleted {
            info!(account_id, "Account deleted");
        }
        Ok(deleted)
    }

    /// Name shown for `account`, falling back to the stored name
    pub async fn display_name(&self, account: &Account) -> String {
        match self.tokens.provider_and_token(account).await {
            Ok((provider, _)) => provider.account_label(account),
            Err(e) => {
                warn!(account_id = account.id, error = %e, "Cannot resolve provider of account");
                account.name.clone()
            }
        }
    }
}

fn callback_error(error: SharecastError) -> SharecastError {
    match error {
        SharecastError::Callback(_) => error,
        other => CallbackError::new(other.to_string()).into(),
    }
}
