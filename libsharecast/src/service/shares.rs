//! Share service
//!
//! Composition and publication of shares. A share starts pending, and a
//! single publish attempt moves it to published or failed; neither outcome
//! is retried by the system. Publishing goes through [`ShareService::publish_by_id`],
//! which claims the share row before calling the platform so that duplicate
//! jobs or concurrent workers produce at most one post.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::events::{Event, EventBus};
use super::tokens::TokenService;
use crate::db::QueuedShare;
use crate::error::{Capability, Result, SharecastError};
use crate::jobs::{Job, JobQueue};
use crate::opengraph;
use crate::providers::{Composing, Provider, PublishTarget};
use crate::types::{Account, Entry, Share, ShareState, Token, ValidationErrors};
use crate::Database;

/// Saves of a publish outcome before giving up and keeping the claim
const OUTCOME_SAVE_ATTEMPTS: u32 = 3;

/// Compose request as submitted by the editor
#[derive(Debug, Clone, Default)]
pub struct ComposeRequest {
    pub entry_id: i64,
    pub site_id: i64,
    pub account_id: i64,
    pub fields: BTreeMap<String, String>,
}

/// What happened to a composed share
#[derive(Debug, Clone)]
pub struct ComposeOutcome {
    /// False when validation or the immediate publish attempt failed
    pub success: bool,
    pub share: Share,
}

/// A share as shown in the entry's share list
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareListing {
    pub share: Share,
    pub state: ShareState,
    pub account_name: String,
    pub attributes: Vec<(String, String)>,
    /// Reason of a failed publish
    pub error: Option<String>,
}

/// Result of one publish job execution
#[derive(Debug, Clone)]
pub enum PublishOutcome {
    Published(Share),
    Failed(Share),
    /// Share no longer exists
    Missing,
    /// Share already has an outcome
    AlreadyDone,
    /// Another worker holds the claim
    Claimed,
}

impl PublishOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PublishOutcome::Published(_) => "published",
            PublishOutcome::Failed(_) => "failed",
            PublishOutcome::Missing => "missing",
            PublishOutcome::AlreadyDone => "already done",
            PublishOutcome::Claimed => "claimed elsewhere",
        }
    }
}

#[derive(Clone)]
pub struct ShareService {
    db: Arc<Database>,
    tokens: TokenService,
    queue: Arc<dyn JobQueue>,
    events: EventBus,
    http: Client,
    lease: Duration,
}

impl ShareService {
    pub fn new(
        db: Arc<Database>,
        tokens: TokenService,
        queue: Arc<dyn JobQueue>,
        events: EventBus,
        http: Client,
        lease: Duration,
    ) -> Self {
        Self {
            db,
            tokens,
            queue,
            events,
            http,
            lease,
        }
    }

    pub async fn share_by_id(&self, share_id: i64) -> Result<Option<Share>> {
        self.db.get_share(share_id).await
    }

    /// Shares of `entry` and of its canonical entry, newest first
    pub async fn shares_by_entry(&self, entry: &Entry) -> Result<Vec<Share>> {
        self.db.shares_for_entry(entry).await
    }

    pub async fn count_shares_by_entry(&self, entry: &Entry) -> Result<i64> {
        self.db.count_shares_for_entry(entry).await
    }

    /// [`ShareService::shares_by_entry`] with display details from each provider
    pub async fn list_shares(&self, entry: &Entry) -> Result<Vec<ShareListing>> {
        let shares = self.db.shares_for_entry(entry).await?;
        let mut listings = Vec::with_capacity(shares.len());

        for share in shares {
            let (provider, account, _) = self.composer_for(share.account_id).await?;
            let composer = provider.as_composing();
            let attributes = composer
                .map(|c| c.share_attributes(&share))
                .unwrap_or_default();
            let error = match (share.state(), composer) {
                (ShareState::Failed, Some(c)) => Some(c.share_error_message(&share)),
                (ShareState::Failed, None) => Some("Unknown error".to_string()),
                _ => None,
            };

            listings.push(ShareListing {
                state: share.state(),
                account_name: provider.account_label(&account),
                attributes,
                error,
                share,
            });
        }
        Ok(listings)
    }

    /// Unsaved share of the account's content type, if the account can be posted to
    pub async fn create_share(&self, entry: &Entry, account: &Account) -> Result<Option<Share>> {
        let (provider, token) = self.tokens.provider_and_token(account).await?;
        let Some(composer) = provider.as_composing() else {
            return Ok(None);
        };
        if !composer.supports_composing(account, &token) {
            debug!(account_id = account.id, "Account does not support composing");
            return Ok(None);
        }

        Ok(Some(Share::new(entry, account, composer.new_share_content())))
    }

    /// Persist a share, running the provider's validation unless skipped
    ///
    /// Returns `false` and leaves the errors on the share when validation
    /// fails; nothing is written in that case.
    pub async fn save_share(&self, share: &mut Share, validate: bool) -> Result<bool> {
        if validate {
            let errors = self.validate(share).await?;
            if !errors.is_empty() {
                share.errors = errors;
                return Ok(false);
            }
        }

        match share.id {
            Some(_) => self.db.update_share(share).await?,
            None => share.id = Some(self.db.insert_share(share).await?),
        }
        Ok(true)
    }

    /// Run the composing provider's rules against `share`
    pub async fn validate(&self, share: &Share) -> Result<ValidationErrors> {
        let (provider, _, _) = self.composer_for(share.account_id).await?;
        let composer = require_composing(provider.as_ref())?;
        Ok(composer.validate_share(share))
    }

    /// Delete a pending share
    ///
    /// # Errors
    ///
    /// Returns `SharecastError::NotFound` for an unknown id and
    /// `SharecastError::InvalidInput` for a share that already has an outcome.
    pub async fn delete_share(&self, share_id: i64) -> Result<()> {
        let share = self
            .db
            .get_share(share_id)
            .await?
            .ok_or_else(|| SharecastError::NotFound(format!("share {}", share_id)))?;

        if !share.is_pending() {
            return Err(SharecastError::InvalidInput(
                "Only pending shares can be deleted".to_string(),
            ));
        }

        self.db.delete_pending_share(share_id).await?;
        info!(share_id, "Share deleted");
        Ok(())
    }

    /// Enqueue a publish job for every pending share of a live entry
    ///
    /// Covers entries that went live on schedule without a save request. With
    /// `dry_run` the matches are returned but nothing is enqueued.
    pub async fn publish_shares_from_pending_entries(
        &self,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<Vec<QueuedShare>> {
        let pending = self.db.pending_shares_of_live_entries(now).await?;
        if !dry_run {
            for share in &pending {
                self.enqueue(share).await?;
            }
        }

        info!(count = pending.len(), dry_run, "Pending entries swept");
        Ok(pending)
    }

    /// Entry save hook: mirror the entry and queue its shares once it is live
    pub async fn entry_saved(&self, entry: &Entry, now: DateTime<Utc>) -> Result<Vec<QueuedShare>> {
        self.db.upsert_entry(entry).await?;
        if !entry.is_live_at(now) {
            return Ok(Vec::new());
        }

        let pending = self.db.pending_shares_for_entry(entry.id, entry.site_id).await?;
        for share in &pending {
            self.enqueue(share).await?;
        }
        Ok(pending)
    }

    /// Re-point shares composed against a draft to the canonical entry
    pub async fn move_draft_shares(&self, draft_id: i64, canonical_id: i64) -> Result<u64> {
        let moved = self.db.move_draft_shares(draft_id, canonical_id).await?;
        if moved > 0 {
            info!(draft_id, canonical_id, moved, "Draft shares moved to canonical entry");
        }
        Ok(moved)
    }

    /// Compose form for `account`, pre-filled from `fields`
    ///
    /// Returns `None` when the account cannot be posted to.
    pub async fn composing_fields(
        &self,
        entry: &Entry,
        account: &Account,
        fields: &BTreeMap<String, String>,
    ) -> Result<Option<String>> {
        let Some(mut share) = self.create_share(entry, account).await? else {
            return Ok(None);
        };
        share.content.apply_fields(fields);
        self.composing_html(&share, entry).await.map(Some)
    }

    /// Compose markup of an existing share, including its errors
    pub async fn composing_html(&self, share: &Share, entry: &Entry) -> Result<String> {
        let (provider, _, _) = self.composer_for(share.account_id).await?;
        let composer = require_composing(provider.as_ref())?;

        let preview = match entry.url.as_deref() {
            Some(url) => opengraph::fetch(&self.http, url).await,
            None => None,
        };
        Ok(composer.composing_html(share, preview.as_ref()))
    }

    /// Compose a share: publish right away for a live entry, else keep it pending
    ///
    /// The share is stored before the immediate publish, so a platform
    /// failure leaves a FAILED share behind. Failed shares are terminal; the
    /// editor composes a new one to try again.
    pub async fn compose(&self, request: ComposeRequest, now: DateTime<Utc>) -> Result<ComposeOutcome> {
        let entry = self
            .db
            .get_entry(request.entry_id, request.site_id)
            .await?
            .ok_or_else(|| {
                SharecastError::NotFound(format!("entry {} in site {}", request.entry_id, request.site_id))
            })?;
        let account = self
            .db
            .get_account(request.account_id)
            .await?
            .ok_or_else(|| SharecastError::NotFound(format!("account {}", request.account_id)))?;

        let mut share = self
            .create_share(&entry, &account)
            .await?
            .ok_or_else(|| SharecastError::MissingCapability {
                provider: account.name.clone(),
                capability: Capability::Composing,
            })?;
        share.content.apply_fields(&request.fields);

        if !self.save_share(&mut share, true).await? {
            return Ok(ComposeOutcome {
                success: false,
                share,
            });
        }

        if !entry.is_live_at(now) {
            info!(share_id = ?share.id, entry_id = entry.id, "Share saved for later publishing");
            return Ok(ComposeOutcome {
                success: true,
                share,
            });
        }

        let share_id = share.id.unwrap_or_default();
        match self.publish_by_id(share_id, now).await? {
            PublishOutcome::Published(share) => Ok(ComposeOutcome {
                success: true,
                share,
            }),
            PublishOutcome::Failed(share) => Ok(ComposeOutcome {
                success: false,
                share,
            }),
            other => {
                debug!(share_id, outcome = other.label(), "Immediate publish skipped");
                let share = self.db.get_share(share_id).await?.unwrap_or(share);
                Ok(ComposeOutcome {
                    success: true,
                    share,
                })
            }
        }
    }

    /// Publish a stored share at most once
    ///
    /// Missing shares, shares with an outcome and shares claimed by another
    /// worker are skipped. The claim is released if publishing aborts before
    /// the platform was called. Once the platform has answered the claim is
    /// kept until the outcome is stored, so a retry never posts twice.
    pub async fn publish_by_id(&self, share_id: i64, now: DateTime<Utc>) -> Result<PublishOutcome> {
        let Some(share) = self.db.get_share(share_id).await? else {
            return Ok(PublishOutcome::Missing);
        };
        if !share.is_pending() {
            return Ok(PublishOutcome::AlreadyDone);
        }
        if !self.db.claim_share(share_id, now, now - self.lease).await? {
            return Ok(PublishOutcome::Claimed);
        }

        let (provider, entry, account, token) = match self.publish_context(&share).await {
            Ok(context) => context,
            Err(e) => {
                self.release_claim(share_id).await;
                return Err(e);
            }
        };
        let composer = match require_composing(provider.as_ref()) {
            Ok(composer) => composer,
            Err(e) => {
                self.release_claim(share_id).await;
                return Err(e);
            }
        };
        let token = self.tokens.ensure_fresh(provider.as_ref(), token).await;

        let target = PublishTarget {
            entry: &entry,
            account: &account,
            token: &token,
        };
        let mut share = composer.publish_share(target, share).await;
        if let Err(e) = self.record_outcome(&mut share).await {
            warn!(share_id, error = %e, success = ?share.success, "Share outcome not stored, claim kept");
            return Err(e);
        }

        if share.success == Some(true) {
            info!(share_id, post_url = ?share.post_url, "Share published");
            self.events.emit(Event::SharePublished {
                share_id,
                post_url: share.post_url.clone(),
            });
            Ok(PublishOutcome::Published(share))
        } else {
            let error = share
                .errors
                .first("success")
                .map(str::to_string)
                .unwrap_or_else(|| composer.share_error_message(&share));
            warn!(share_id, error = %error, "Publishing share failed");
            self.events.emit(Event::ShareFailed { share_id, error });
            Ok(PublishOutcome::Failed(share))
        }
    }

    async fn publish_context(&self, share: &Share) -> Result<(Arc<dyn Provider>, Entry, Account, Token)> {
        let entry = self
            .db
            .get_entry(share.entry_id, share.site_id)
            .await?
            .ok_or_else(|| SharecastError::NotFound(format!("entry {}", share.entry_id)))?;
        let (provider, account, token) = self.composer_for(share.account_id).await?;
        Ok((provider, entry, account, token))
    }

    /// Store a publish outcome, retrying transient database failures
    async fn record_outcome(&self, share: &mut Share) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.save_share(share, false).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < OUTCOME_SAVE_ATTEMPTS => {
                    debug!(share_id = ?share.id, attempt, error = %e, "Retrying share outcome save");
                    tokio::time::sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn release_claim(&self, share_id: i64) {
        if let Err(e) = self.db.release_share_claim(share_id).await {
            warn!(share_id, error = %e, "Releasing share claim failed");
        }
    }

    async fn enqueue(&self, share: &QueuedShare) -> Result<i64> {
        let job = Job::publish_share(share.share_id, share.account_name.clone());
        let job_id = self.queue.enqueue(&job).await?;
        self.events.emit(Event::ShareQueued {
            share_id: share.share_id,
            job_id,
            description: job.description(),
        });
        Ok(job_id)
    }

    async fn composer_for(
        &self,
        account_id: i64,
    ) -> Result<(Arc<dyn Provider>, Account, Token)> {
        let account = self
            .db
            .get_account(account_id)
            .await?
            .ok_or_else(|| SharecastError::NotFound(format!("account {}", account_id)))?;
        let (provider, token) = self.tokens.provider_and_token(&account).await?;
        Ok((provider, account, token))
    }
}

fn require_composing(provider: &dyn Provider) -> Result<&dyn Composing> {
    provider
        .as_composing()
        .ok_or_else(|| SharecastError::MissingCapability {
            provider: provider.name().to_string(),
            capability: Capability::Composing,
        })
}
