//! Database operations for Sharecast
//!
//! Every timestamp is stored as unix seconds and every JSON column is decoded
//! into its typed struct here, so the rest of the crate never sees raw rows.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DbError, Result};
use crate::types::{
    Account, AccountSettings, DiscoveredAccount, Entry, Post, PostPayload, ProviderRecord,
    ProviderSettings, Share, ShareContent, Token,
};

/// Share id plus the display name used for the job description
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedShare {
    pub share_id: i64,
    pub entry_id: i64,
    pub account_name: String,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (and create if needed) the database and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        // Forward slashes keep the URL valid on Windows too
        let db_url = format!("sqlite://{}", expanded_path.replace('\\', "/"));
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(DbError::SqlxError)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ----- providers ----------------------------------------------------

    /// Provider rows in display order
    pub async fn list_providers(&self) -> Result<Vec<ProviderRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, uid, name, handle, type, enabled, sort_order, settings
            FROM providers
            ORDER BY sort_order, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| {
                Ok(ProviderRecord {
                    id: Some(r.get("id")),
                    uid: Some(r.get("uid")),
                    name: r.get("name"),
                    handle: r.get("handle"),
                    kind: r.get("type"),
                    enabled: r.get("enabled"),
                    sort_order: r.get("sort_order"),
                    settings: decode_json::<ProviderSettings>(r.get("settings"), "settings")?,
                })
            })
            .collect()
    }

    // ----- tokens -------------------------------------------------------

    pub async fn get_token(&self, token_id: i64) -> Result<Option<Token>> {
        let row = sqlx::query(
            r#"
            SELECT id, provider_id, identifier, token, refresh_token, scopes, expiry_date
            FROM tokens WHERE id = ?
            "#,
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.as_ref().map(token_from_row))
    }

    /// Persist refreshed credentials in place
    pub async fn update_token(&self, token: &Token) -> Result<()> {
        let token_id = token
            .id
            .ok_or_else(|| crate::error::SharecastError::InvalidTokenId(None))?;

        sqlx::query(
            r#"
            UPDATE tokens
            SET token = ?, refresh_token = ?, scopes = ?, expiry_date = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(token.secret())
        .bind(token.refresh_secret())
        .bind(token.scopes.join(","))
        .bind(token.expiry.map(|d| d.timestamp()))
        .bind(Utc::now().timestamp())
        .bind(token_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Tokens referenced by at least one account
    pub async fn used_tokens(&self) -> Result<Vec<Token>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT t.id, t.provider_id, t.identifier, t.token, t.refresh_token,
                   t.scopes, t.expiry_date
            FROM tokens t
            INNER JOIN accounts a ON a.token_id = t.id
            ORDER BY t.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(token_from_row).collect())
    }

    // ----- accounts -----------------------------------------------------

    pub async fn get_account(&self, account_id: i64) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(account_from_row).transpose()
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY name COLLATE NOCASE, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(account_from_row).collect()
    }

    pub async fn accounts_for_token(&self, token_id: i64) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE token_id = ? ORDER BY id"
        ))
        .bind(token_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(account_from_row).collect()
    }

    /// Delete an account; shares and posts go with it
    pub async fn delete_account(&self, account_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    // ----- entries ------------------------------------------------------

    pub async fn upsert_entry(&self, entry: &Entry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entries (id, site_id, canonical_id, url, title, enabled, is_draft,
                                 is_revision, post_date, expiry_date, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id, site_id) DO UPDATE SET
                canonical_id = excluded.canonical_id,
                url = excluded.url,
                title = excluded.title,
                enabled = excluded.enabled,
                is_draft = excluded.is_draft,
                is_revision = excluded.is_revision,
                post_date = excluded.post_date,
                expiry_date = excluded.expiry_date,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entry.id)
        .bind(entry.site_id)
        .bind(entry.canonical_id)
        .bind(&entry.url)
        .bind(&entry.title)
        .bind(entry.enabled)
        .bind(entry.is_draft)
        .bind(entry.is_revision)
        .bind(entry.post_date.map(|d| d.timestamp()))
        .bind(entry.expiry_date.map(|d| d.timestamp()))
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_entry(&self, entry_id: i64, site_id: i64) -> Result<Option<Entry>> {
        let row = sqlx::query(
            r#"
            SELECT id, site_id, canonical_id, url, title, enabled, is_draft, is_revision,
                   post_date, expiry_date
            FROM entries WHERE id = ? AND site_id = ?
            "#,
        )
        .bind(entry_id)
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| Entry {
            id: r.get("id"),
            site_id: r.get("site_id"),
            canonical_id: r.get("canonical_id"),
            url: r.get("url"),
            title: r.get("title"),
            enabled: r.get("enabled"),
            is_draft: r.get("is_draft"),
            is_revision: r.get("is_revision"),
            post_date: from_unix(r.get("post_date")),
            expiry_date: from_unix(r.get("expiry_date")),
        }))
    }

    /// Removing an entry removes its shares
    pub async fn delete_entry(&self, entry_id: i64, site_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM entries WHERE id = ? AND site_id = ?")
            .bind(entry_id)
            .bind(site_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    // ----- shares -------------------------------------------------------

    pub async fn insert_share(&self, share: &Share) -> Result<i64> {
        let now = Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            INSERT INTO shares (uid, entry_id, site_id, account_id, publish_with_entry, post_at,
                                posted_at, success, settings, response, post_url,
                                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&share.uid)
        .bind(share.entry_id)
        .bind(share.site_id)
        .bind(share.account_id)
        .bind(share.publish_with_entry)
        .bind(share.post_at.map(|d| d.timestamp()))
        .bind(share.posted_at.map(|d| d.timestamp()))
        .bind(share.success)
        .bind(encode_json(&share.content, "settings")?)
        .bind(share.response.as_ref().map(|r| r.to_string()))
        .bind(&share.post_url)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.get("id"))
    }

    /// Write every share attribute; an outcome also clears the publish claim
    pub async fn update_share(&self, share: &Share) -> Result<()> {
        let share_id = share
            .id
            .ok_or_else(|| crate::error::SharecastError::NotFound("unsaved share".to_string()))?;

        sqlx::query(
            r#"
            UPDATE shares
            SET entry_id = ?, site_id = ?, account_id = ?, publish_with_entry = ?, post_at = ?,
                posted_at = ?, success = ?, settings = ?, response = ?, post_url = ?,
                claimed_at = CASE WHEN ? IS NULL THEN claimed_at ELSE NULL END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(share.entry_id)
        .bind(share.site_id)
        .bind(share.account_id)
        .bind(share.publish_with_entry)
        .bind(share.post_at.map(|d| d.timestamp()))
        .bind(share.posted_at.map(|d| d.timestamp()))
        .bind(share.success)
        .bind(encode_json(&share.content, "settings")?)
        .bind(share.response.as_ref().map(|r| r.to_string()))
        .bind(&share.post_url)
        .bind(share.success)
        .bind(Utc::now().timestamp())
        .bind(share_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_share(&self, share_id: i64) -> Result<Option<Share>> {
        let row = sqlx::query(&format!("SELECT {SHARE_COLUMNS} FROM shares WHERE id = ?"))
            .bind(share_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(share_from_row).transpose()
    }

    /// Shares of an entry, matched by its own id and its canonical id
    pub async fn shares_for_entry(&self, entry: &Entry) -> Result<Vec<Share>> {
        let rows = sqlx::query(&format!(
            "SELECT {SHARE_COLUMNS} FROM shares
             WHERE site_id = ? AND entry_id IN (?, ?)
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(entry.site_id)
        .bind(entry.id)
        .bind(entry.canonical_id())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(share_from_row).collect()
    }

    pub async fn count_shares_for_entry(&self, entry: &Entry) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM shares WHERE site_id = ? AND entry_id IN (?, ?)",
        )
        .bind(entry.site_id)
        .bind(entry.id)
        .bind(entry.canonical_id())
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.get("count"))
    }

    /// Only shares without an outcome can be deleted
    pub async fn delete_pending_share(&self, share_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM shares WHERE id = ? AND success IS NULL")
            .bind(share_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Pending auto-publish shares of one entry
    pub async fn pending_shares_for_entry(
        &self,
        entry_id: i64,
        site_id: i64,
    ) -> Result<Vec<QueuedShare>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id AS share_id, s.entry_id, a.name AS account_name
            FROM shares s
            INNER JOIN accounts a ON a.id = s.account_id
            WHERE s.entry_id = ? AND s.site_id = ?
              AND s.success IS NULL AND s.publish_with_entry = 1
            ORDER BY s.id
            "#,
        )
        .bind(entry_id)
        .bind(site_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(queued_share_from_row).collect())
    }

    /// Pending auto-publish shares whose entry is live at `now`
    pub async fn pending_shares_of_live_entries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueuedShare>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id AS share_id, s.entry_id, a.name AS account_name
            FROM shares s
            INNER JOIN entries e ON e.id = s.entry_id AND e.site_id = s.site_id
            INNER JOIN accounts a ON a.id = s.account_id
            WHERE s.success IS NULL
              AND s.publish_with_entry = 1
              AND e.enabled = 1
              AND e.is_draft = 0
              AND e.is_revision = 0
              AND e.post_date IS NOT NULL
              AND e.post_date <= ?
              AND (e.expiry_date IS NULL OR e.expiry_date > ?)
            ORDER BY s.id
            "#,
        )
        .bind(now.timestamp())
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(queued_share_from_row).collect())
    }

    /// Atomically claim a pending share for publishing
    ///
    /// Claims older than `stale_before` belong to a worker that died and may
    /// be taken over.
    pub async fn claim_share(
        &self,
        share_id: i64,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE shares SET claimed_at = ?
            WHERE id = ? AND success IS NULL
              AND (claimed_at IS NULL OR claimed_at < ?)
            "#,
        )
        .bind(now.timestamp())
        .bind(share_id)
        .bind(stale_before.timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn release_share_claim(&self, share_id: i64) -> Result<()> {
        sqlx::query("UPDATE shares SET claimed_at = NULL WHERE id = ? AND success IS NULL")
            .bind(share_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Re-point shares composed against a draft to its canonical entry
    pub async fn move_draft_shares(&self, draft_id: i64, canonical_id: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        // Shares reference (entry, site), so the canonical row must exist in every
        // site of the draft. A missing one is seeded from the draft's fields as a
        // plain entry; an existing one is left as is. The next save of the
        // canonical entry overwrites the seeded values.
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO entries (id, site_id, canonical_id, url, title, enabled,
                                           is_draft, is_revision, post_date, expiry_date,
                                           updated_at)
            SELECT ?, site_id, NULL, url, title, enabled, 0, 0, post_date, expiry_date, ?
            FROM entries WHERE id = ?
            "#,
        )
        .bind(canonical_id)
        .bind(Utc::now().timestamp())
        .bind(draft_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        let result = sqlx::query("UPDATE shares SET entry_id = ?, updated_at = ? WHERE entry_id = ?")
            .bind(canonical_id)
            .bind(Utc::now().timestamp())
            .bind(draft_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(result.rows_affected())
    }

    // ----- posts --------------------------------------------------------

    /// Insert or refresh an imported post, keyed by (account, identifier)
    pub async fn upsert_post(&self, post: &Post) -> Result<i64> {
        let now = Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            INSERT INTO posts (account_id, identifier, posted_at, url, payload_type, payload,
                               created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id, identifier) DO UPDATE SET
                posted_at = excluded.posted_at,
                url = excluded.url,
                payload_type = excluded.payload_type,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(post.account_id)
        .bind(&post.identifier)
        .bind(post.posted_at.map(|d| d.timestamp()))
        .bind(&post.url)
        .bind(&post.payload_type)
        .bind(encode_json(&post.payload, "payload")?)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.get("id"))
    }

    pub async fn posts_for_account(&self, account_id: i64, limit: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, identifier, posted_at, url, payload_type, payload
            FROM posts WHERE account_id = ?
            ORDER BY posted_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| {
                Ok(Post {
                    id: r.get("id"),
                    account_id: r.get("account_id"),
                    identifier: r.get("identifier"),
                    posted_at: from_unix(r.get("posted_at")),
                    url: r.get("url"),
                    payload_type: r.get("payload_type"),
                    payload: decode_json::<PostPayload>(r.get("payload"), "payload")?,
                })
            })
            .collect()
    }
}

// ----- connection-level helpers used inside transactions ---------------

/// Insert or update a token by (provider, identifier), returning its id
pub async fn upsert_token(conn: &mut SqliteConnection, token: &Token) -> Result<i64> {
    let now = Utc::now().timestamp();
    let row = sqlx::query(
        r#"
        INSERT INTO tokens (provider_id, identifier, token, refresh_token, scopes, expiry_date,
                            created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(provider_id, identifier) DO UPDATE SET
            token = excluded.token,
            refresh_token = excluded.refresh_token,
            scopes = excluded.scopes,
            expiry_date = excluded.expiry_date,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(token.provider_id)
    .bind(&token.identifier)
    .bind(token.secret())
    .bind(token.refresh_secret())
    .bind(token.scopes.join(","))
    .bind(token.expiry.map(|d| d.timestamp()))
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(DbError::SqlxError)?;

    Ok(row.get("id"))
}

/// Insert or update an account by (token, identifier)
pub async fn upsert_account(
    conn: &mut SqliteConnection,
    token_id: i64,
    connector_id: Option<i64>,
    discovered: &DiscoveredAccount,
    now: DateTime<Utc>,
) -> Result<Account> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO accounts (token_id, connector_id, identifier, name, handle, settings,
                              last_refreshed_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(token_id, identifier) DO UPDATE SET
            connector_id = COALESCE(excluded.connector_id, accounts.connector_id),
            name = excluded.name,
            handle = excluded.handle,
            settings = excluded.settings,
            last_refreshed_at = excluded.last_refreshed_at,
            updated_at = excluded.updated_at
        RETURNING {ACCOUNT_COLUMNS}
        "#
    ))
    .bind(token_id)
    .bind(connector_id)
    .bind(&discovered.identifier)
    .bind(&discovered.name)
    .bind(&discovered.handle)
    .bind(encode_json(&discovered.settings, "settings")?)
    .bind(now.timestamp())
    .bind(now.timestamp())
    .bind(now.timestamp())
    .fetch_one(&mut *conn)
    .await
    .map_err(DbError::SqlxError)?;

    account_from_row(&row)
}

/// Write a provider row from its config record, keyed by uid
pub async fn upsert_provider(conn: &mut SqliteConnection, uid: &str, record: &ProviderRecord) -> Result<i64> {
    let now = Utc::now().timestamp();
    let row = sqlx::query(
        r#"
        INSERT INTO providers (uid, name, handle, type, enabled, sort_order, settings,
                               created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(uid) DO UPDATE SET
            name = excluded.name,
            handle = excluded.handle,
            type = excluded.type,
            enabled = excluded.enabled,
            sort_order = excluded.sort_order,
            settings = excluded.settings,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(uid)
    .bind(&record.name)
    .bind(&record.handle)
    .bind(&record.kind)
    .bind(record.enabled)
    .bind(record.sort_order)
    .bind(encode_json(&record.settings, "settings")?)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .map_err(DbError::SqlxError)?;

    Ok(row.get("id"))
}

/// Delete a provider; tokens, accounts, shares and posts cascade
pub async fn delete_provider(conn: &mut SqliteConnection, uid: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM providers WHERE uid = ?")
        .bind(uid)
        .execute(&mut *conn)
        .await
        .map_err(DbError::SqlxError)?;

    Ok(result.rows_affected() > 0)
}

// ----- row mapping ------------------------------------------------------

const ACCOUNT_COLUMNS: &str =
    "id, token_id, connector_id, identifier, name, handle, settings, last_refreshed_at";

const SHARE_COLUMNS: &str = "id, uid, entry_id, site_id, account_id, publish_with_entry, post_at, \
     posted_at, success, settings, response, post_url";

pub(crate) fn from_unix(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
}

pub(crate) fn encode_json<T: serde::Serialize>(value: &T, column: &'static str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|source| DbError::Json { column, source }.into())
}

pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(
    raw: String,
    column: &'static str,
) -> Result<T> {
    serde_json::from_str(&raw).map_err(|source| DbError::Json { column, source }.into())
}

fn token_from_row(r: &SqliteRow) -> Token {
    let scopes: String = r.get("scopes");
    let refresh: Option<String> = r.get("refresh_token");
    let access: String = r.get("token");

    Token {
        id: Some(r.get("id")),
        provider_id: r.get("provider_id"),
        identifier: r.get("identifier"),
        access_token: SecretString::from(access),
        refresh_token: refresh.map(SecretString::from),
        scopes: scopes
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        expiry: from_unix(r.get("expiry_date")),
    }
}

fn account_from_row(r: &SqliteRow) -> Result<Account> {
    Ok(Account {
        id: r.get("id"),
        token_id: r.get("token_id"),
        connector_id: r.get("connector_id"),
        identifier: r.get("identifier"),
        name: r.get("name"),
        handle: r.get("handle"),
        settings: decode_json::<AccountSettings>(r.get("settings"), "settings")?,
        last_refreshed_at: from_unix(r.get("last_refreshed_at")),
    })
}

fn share_from_row(r: &SqliteRow) -> Result<Share> {
    let response: Option<String> = r.get("response");
    let response = match response {
        Some(raw) => Some(decode_json::<serde_json::Value>(raw, "response")?),
        None => None,
    };

    Ok(Share {
        id: Some(r.get("id")),
        uid: r.get("uid"),
        entry_id: r.get("entry_id"),
        site_id: r.get("site_id"),
        account_id: r.get("account_id"),
        publish_with_entry: r.get("publish_with_entry"),
        post_at: from_unix(r.get("post_at")),
        posted_at: from_unix(r.get("posted_at")),
        success: r.get("success"),
        response,
        post_url: r.get("post_url"),
        content: decode_json::<ShareContent>(r.get("settings"), "settings")?,
        errors: Default::default(),
    })
}

fn queued_share_from_row(r: &SqliteRow) -> QueuedShare {
    QueuedShare {
        share_id: r.get("share_id"),
        entry_id: r.get("entry_id"),
        account_name: r.get("account_name"),
    }
}
