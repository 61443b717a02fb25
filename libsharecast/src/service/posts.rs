//! Importing recent platform posts

use std::sync::Arc;
use tracing::{info, warn};

use super::events::{Event, EventBus};
use super::tokens::TokenService;
use crate::error::{Capability, Result, SharecastError};
use crate::types::{Account, Post};
use crate::Database;

/// Outcome of pulling posts for every account
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullReport {
    /// Accounts whose provider supports pulling
    pub accounts: usize,
    pub imported: usize,
    pub failures: Vec<String>,
}

impl PullReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct PostsService {
    db: Arc<Database>,
    tokens: TokenService,
    events: EventBus,
}

impl PostsService {
    pub fn new(db: Arc<Database>, tokens: TokenService, events: EventBus) -> Self {
        Self { db, tokens, events }
    }

    /// Pull up to `limit` posts for every account that supports it
    ///
    /// A failing account is recorded in the report and does not stop the
    /// batch; only database errors abort it.
    pub async fn pull_all(&self, limit: u32) -> Result<PullReport> {
        let mut report = PullReport::default();

        for account in self.db.list_accounts().await? {
            let (provider, _) = match self.tokens.provider_and_token(&account).await {
                Ok(resolved) => resolved,
                Err(e @ SharecastError::Database(_)) => return Err(e),
                Err(e) => {
                    warn!(account_id = account.id, error = %e, "Skipping account");
                    report.failures.push(failure(&account, &e));
                    continue;
                }
            };
            let supported = provider
                .as_pull_posts()
                .is_some_and(|puller| puller.supports_pulling(&account));
            if !supported {
                continue;
            }

            report.accounts += 1;
            match self.pull_account(&account, limit).await {
                Ok(posts) => report.imported += posts.len(),
                Err(e @ SharecastError::Database(_)) => return Err(e),
                Err(e) => {
                    warn!(account_id = account.id, error = %e, "Pulling posts failed");
                    report.failures.push(failure(&account, &e));
                }
            }
        }

        info!(
            accounts = report.accounts,
            imported = report.imported,
            failures = report.failures.len(),
            "Posts pulled"
        );
        Ok(report)
    }

    /// Pull and store recent posts of one account
    ///
    /// # Errors
    ///
    /// Returns `SharecastError::MissingCapability` if the account's provider
    /// cannot pull posts.
    pub async fn pull_account(&self, account: &Account, limit: u32) -> Result<Vec<Post>> {
        let (provider, token) = self.tokens.provider_and_token(account).await?;
        let puller = provider
            .as_pull_posts()
            .ok_or_else(|| SharecastError::MissingCapability {
                provider: provider.name().to_string(),
                capability: Capability::PullPosts,
            })?;
        let token = self.tokens.ensure_fresh(provider.as_ref(), token).await;

        let mut posts = puller.fetch_posts(account, &token, limit).await?;
        for post in &mut posts {
            post.account_id = account.id;
            post.id = Some(self.db.upsert_post(post).await?);
        }

        self.events.emit(Event::PostsPulled {
            account_id: account.id,
            count: posts.len(),
        });
        Ok(posts)
    }

    pub async fn posts_for_account(&self, account_id: i64, limit: i64) -> Result<Vec<Post>> {
        self.db.posts_for_account(account_id, limit).await
    }
}

fn failure(account: &Account, error: &SharecastError) -> String {
    format!("Pulling posts of account {} (ID {}) failed: {}", account.name, account.id, error)
}
