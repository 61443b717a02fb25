//! Integration tests for the connect flow, token refresh and post import

mod common;

use chrono::{Duration, Utc};
use libsharecast::error::{Capability, SharecastError};
use libsharecast::oauth::CallbackParams;
use libsharecast::providers::mock::{self, MockConfig};
use libsharecast::service::shares::ComposeRequest;
use libsharecast::session::{Session, PROVIDER_KEY, RETURN_URL_KEY, STATE_KEY};
use libsharecast::types::{AccountSettings, DiscoveredAccount};
use libsharecast::ProviderRecord;

use common::{live_entry, message, TestEnv, BARE_KIND};

/// Run connect and callback with the state the provider stored
async fn connect_flow(env: &TestEnv, handle: &str, session: &mut Session) -> libsharecast::Result<usize> {
    env.service
        .accounts()
        .connect(handle, session, Some("/admin/social"))
        .await?;
    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: session.get(STATE_KEY).map(str::to_string),
        ..Default::default()
    };
    let connected = env.service.accounts().callback(&params, session).await?;
    Ok(connected.accounts.len())
}

#[tokio::test]
async fn test_connect_flow_stores_token_and_accounts() {
    let env = TestEnv::new().await;
    env.provider("mock", mock::KIND).await;
    let mut session = Session::new();

    let url = env
        .service
        .accounts()
        .connect("mock", &mut session, Some("/admin/social"))
        .await
        .unwrap();
    let state = session.get(STATE_KEY).unwrap().to_string();
    assert!(url.query_pairs().any(|(k, v)| k == "state" && v == state));
    assert_eq!(session.get(PROVIDER_KEY), Some("mock"));

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state),
        ..Default::default()
    };
    let connected = env.service.accounts().callback(&params, &mut session).await.unwrap();

    assert_eq!(connected.provider_handle, "mock");
    assert_eq!(connected.return_url, "/admin/social");
    assert_eq!(connected.accounts.len(), 1);
    assert_eq!(connected.accounts[0].identifier, "mock-user");
    assert!(session.get(PROVIDER_KEY).is_none());
    assert!(session.get(RETURN_URL_KEY).is_none());

    let account = &connected.accounts[0];
    let token = env.service.tokens().token_by_account(account).await.unwrap();
    assert_eq!(token.secret(), "mock-access-abc");
    assert_eq!(token.refresh_secret(), Some("mock-refresh-abc"));
    assert!(token.has_scope("write"));
    assert!(token.expiry.is_some());
}

#[tokio::test]
async fn test_reconnecting_updates_instead_of_duplicating() {
    let env = TestEnv::new().await;
    let provider = env.provider("mock", mock::KIND).await;

    let mut session = Session::new();
    assert_eq!(connect_flow(&env, "mock", &mut session).await.unwrap(), 1);
    assert_eq!(connect_flow(&env, "mock", &mut session).await.unwrap(), 1);

    let accounts = env.service.accounts().list().await.unwrap();
    assert_eq!(accounts.len(), 1);
    let original = accounts[0].clone();

    // Same platform identity, renamed on the platform
    let token = env.service.tokens().token_by_account(&original).await.unwrap();
    let renamed = DiscoveredAccount {
        identifier: "mock-user".to_string(),
        name: "Renamed".to_string(),
        handle: "renamed".to_string(),
        settings: AccountSettings::default(),
    };
    let saved = env
        .service
        .accounts()
        .save_connection(&token, &[renamed], None)
        .await
        .unwrap();

    assert_eq!(saved[0].id, original.id);
    assert_eq!(saved[0].token_id, original.token_id);
    let accounts = env.service.accounts().list().await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].name, "Renamed");
    assert_eq!(accounts[0].handle, "renamed");
    assert_eq!(env.service.tokens().used_tokens().await.unwrap().len(), 1);
    assert_eq!(token.provider_id, provider.id());

    let by_token = env
        .service
        .database()
        .accounts_for_token(token.id.unwrap())
        .await
        .unwrap();
    assert_eq!(by_token.len(), 1);
    assert_eq!(by_token[0].id, original.id);
}

#[tokio::test]
async fn test_callback_rejects_state_mismatch() {
    let env = TestEnv::new().await;
    env.provider("mock", mock::KIND).await;
    let mut session = Session::new();

    env.service
        .accounts()
        .connect("mock", &mut session, None)
        .await
        .unwrap();
    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some("forged".to_string()),
        ..Default::default()
    };

    match env.service.accounts().callback(&params, &mut session).await {
        Err(SharecastError::Callback(e)) => {
            assert!(e.redirect);
            assert!(e.message.contains("state"));
        }
        other => panic!("expected callback error, got {:?}", other.map(|c| c.accounts.len())),
    }
    assert!(env.service.accounts().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_callback_reports_denial_and_missing_flow() {
    let env = TestEnv::new().await;
    env.provider("mock", mock::KIND).await;

    let mut session = Session::new();
    let params = CallbackParams {
        code: Some("abc".to_string()),
        ..Default::default()
    };
    match env.service.accounts().callback(&params, &mut session).await {
        Err(SharecastError::Callback(e)) => assert!(!e.redirect),
        other => panic!("expected callback error, got {:?}", other.map(|c| c.accounts.len())),
    }

    env.service
        .accounts()
        .connect("mock", &mut session, None)
        .await
        .unwrap();
    let denied = CallbackParams {
        error: Some("access_denied".to_string()),
        error_description: Some("The user denied access".to_string()),
        ..Default::default()
    };
    match env.service.accounts().callback(&denied, &mut session).await {
        Err(SharecastError::Callback(e)) => {
            assert!(e.redirect);
            assert_eq!(e.message, "Connecting was denied: The user denied access");
        }
        other => panic!("expected callback error, got {:?}", other.map(|c| c.accounts.len())),
    }
}

#[tokio::test]
async fn test_connect_unknown_or_disabled_provider() {
    let env = TestEnv::new().await;
    let mut session = Session::new();

    let unknown = env.service.accounts().connect("nope", &mut session, None).await;
    assert!(matches!(unknown, Err(SharecastError::NotFound(_))));

    let mut record = ProviderRecord::new("Off", "off", mock::KIND);
    record.enabled = false;
    env.service.registry().save(record).await.unwrap();

    let disabled = env.service.accounts().connect("off", &mut session, None).await;
    assert!(matches!(disabled, Err(SharecastError::InvalidInput(_))));
    assert!(session.get(PROVIDER_KEY).is_none());
}

#[tokio::test]
async fn test_deleting_provider_cascades_to_accounts() {
    let env = TestEnv::new().await;
    let provider = env.provider("mock", mock::KIND).await;
    env.connect(provider.as_ref(), "page-1").await;
    env.connect(provider.as_ref(), "page-2").await;
    assert_eq!(env.service.accounts().list().await.unwrap().len(), 2);

    assert!(env.service.registry().delete(provider.id()).await.unwrap());

    assert!(env.service.accounts().list().await.unwrap().is_empty());
    assert!(env.service.tokens().used_tokens().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_refresh_without_capability_leaves_token_untouched() {
    let env = TestEnv::new().await;
    let provider = env.provider("bare", BARE_KIND).await;
    let mut token = common::token(provider.as_ref(), "someone");
    token.expiry = Some(Utc::now() - Duration::hours(1));
    let account = env.connect_token(&token).await;

    let stored = env.service.tokens().token_by_account(&account).await.unwrap();
    let result = env.service.tokens().refresh(&stored).await;
    assert!(matches!(
        result,
        Err(SharecastError::MissingCapability {
            capability: Capability::TokenRefreshing,
            ..
        })
    ));

    let after = env.service.tokens().token_by_account(&account).await.unwrap();
    assert_eq!(after.secret(), stored.secret());
    assert_eq!(after.expiry, stored.expiry);
    assert_eq!(env.bare.refresh_count(), 0);
}

#[tokio::test]
async fn test_refresh_sweep_skips_tokens_valid_beyond_window() {
    let env = TestEnv::new().await;
    let provider = env.provider("mock", mock::KIND).await;
    let now = Utc::now();

    let mut long_lived = common::token(provider.as_ref(), "long");
    long_lived.expiry = Some(now + Duration::days(31));
    let long_account = env.connect_token(&long_lived).await;

    let mut short_lived = common::token(provider.as_ref(), "short");
    short_lived.expiry = Some(now + Duration::days(10));
    let short_account = env.connect_token(&short_lived).await;

    let window = Duration::days(env.service.config().tokens.refresh_window_days);
    let report = env.service.tokens().refresh_sweep(window, now).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.skipped, vec![long_account.token_id.unwrap()]);
    assert_eq!(report.refreshed, vec![short_account.token_id.unwrap()]);
    assert_eq!(env.mock.refresh_count(), 1);

    let long_after = env.service.tokens().token_by_account(&long_account).await.unwrap();
    assert_eq!(long_after.secret(), "access-long");

    let short_after = env.service.tokens().token_by_account(&short_account).await.unwrap();
    assert_eq!(short_after.secret(), "mock-refreshed-1");
    assert!(short_after.expiry.unwrap() > now + Duration::days(59));
    assert_eq!(short_after.refresh_secret(), Some("refresh-short"));
}

#[tokio::test]
async fn test_refresh_sweep_reports_failures_and_unsupported() {
    let env = TestEnv::with_mock(MockConfig {
        refresh_succeeds: false,
        ..Default::default()
    })
    .await;
    let mock_provider = env.provider("mock", mock::KIND).await;
    let bare_provider = env.provider("bare", BARE_KIND).await;
    let now = Utc::now();

    let mut revoked = common::token(mock_provider.as_ref(), "revoked");
    revoked.expiry = Some(now + Duration::days(1));
    let revoked_account = env.connect_token(&revoked).await;

    let mut plain = common::token(bare_provider.as_ref(), "plain");
    plain.expiry = Some(now + Duration::days(1));
    let plain_account = env.connect_token(&plain).await;

    let report = env
        .service
        .tokens()
        .refresh_sweep(Duration::days(30), now)
        .await
        .unwrap();

    assert!(!report.is_success());
    assert!(report.refreshed.is_empty());
    assert_eq!(report.unsupported, vec![plain_account.token_id.unwrap()]);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].starts_with(&format!(
        "Refreshing of token ID {} failed:",
        revoked_account.token_id.unwrap()
    )));

    let after = env.service.tokens().token_by_account(&revoked_account).await.unwrap();
    assert_eq!(after.secret(), "access-revoked");
}

#[tokio::test]
async fn test_expired_token_is_refreshed_before_publishing() {
    let env = TestEnv::new().await;
    let provider = env.provider("mock", mock::KIND).await;
    let mut token = common::token(provider.as_ref(), "page-1");
    token.expiry = Some(Utc::now() - Duration::hours(1));
    let account = env.connect_token(&token).await;
    let entry = live_entry(10);
    env.store_entry(&entry).await;

    let outcome = env
        .service
        .shares()
        .compose(
            ComposeRequest {
                entry_id: entry.id,
                site_id: entry.site_id,
                account_id: account.id,
                fields: message("Fresh"),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(env.mock.refresh_count(), 1);
    let stored = env.service.tokens().token_by_account(&account).await.unwrap();
    assert_eq!(stored.secret(), "mock-refreshed-1");
    assert!(!stored.is_expired());
}

#[tokio::test]
async fn test_failed_refresh_on_use_keeps_publishing() {
    let env = TestEnv::with_mock(MockConfig {
        refresh_succeeds: false,
        ..Default::default()
    })
    .await;
    let provider = env.provider("mock", mock::KIND).await;
    let mut token = common::token(provider.as_ref(), "page-1");
    token.expiry = Some(Utc::now() - Duration::hours(1));
    let account = env.connect_token(&token).await;
    let entry = live_entry(10);
    env.store_entry(&entry).await;

    let outcome = env
        .service
        .shares()
        .compose(
            ComposeRequest {
                entry_id: entry.id,
                site_id: entry.site_id,
                account_id: account.id,
                fields: message("Anyway"),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    // The mock platform accepts the stale token; only the refresh was best effort
    assert!(outcome.success);
    assert_eq!(env.mock.refresh_count(), 1);
    assert_eq!(env.mock.publish_count(), 1);
}

#[tokio::test]
async fn test_pull_posts_imports_and_deduplicates() {
    let env = TestEnv::with_mock(MockConfig {
        posts: vec![
            ("p1".to_string(), "First".to_string()),
            ("p2".to_string(), "Second".to_string()),
            ("p3".to_string(), "Third".to_string()),
        ],
        ..Default::default()
    })
    .await;
    let provider = env.provider("mock", mock::KIND).await;
    let bare = env.provider("bare", BARE_KIND).await;
    let account = env.connect(provider.as_ref(), "page-1").await;
    env.connect(bare.as_ref(), "someone").await;

    let report = env.service.posts().pull_all(2).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.accounts, 1);
    assert_eq!(report.imported, 2);

    env.service.posts().pull_all(2).await.unwrap();
    let posts = env.service.posts().posts_for_account(account.id, 10).await.unwrap();
    assert_eq!(posts.len(), 2);
    assert!(posts.iter().all(|p| p.account_id == account.id));
    assert!(posts.iter().any(|p| p.identifier == "p1" && p.payload.text == "First"));
    assert_eq!(env.mock.pull_count(), 2);
}

#[tokio::test]
async fn test_pull_failure_does_not_abort_batch() {
    let env = TestEnv::with_mock(MockConfig {
        pull_fails: true,
        ..Default::default()
    })
    .await;
    let provider = env.provider("mock", mock::KIND).await;
    let first = env.connect(provider.as_ref(), "page-1").await;
    env.connect(provider.as_ref(), "page-2").await;

    let report = env.service.posts().pull_all(10).await.unwrap();

    assert!(!report.is_success());
    assert_eq!(report.accounts, 2);
    assert_eq!(report.imported, 0);
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures[0].starts_with(&format!(
        "Pulling posts of account {} (ID {}) failed:",
        first.name, first.id
    )));
    assert_eq!(env.mock.pull_count(), 2);
}

#[tokio::test]
async fn test_pull_account_requires_capability() {
    let env = TestEnv::new().await;
    let bare = env.provider("bare", BARE_KIND).await;
    let account = env.connect(bare.as_ref(), "someone").await;

    let result = env.service.posts().pull_account(&account, 10).await;
    assert!(matches!(
        result,
        Err(SharecastError::MissingCapability {
            capability: Capability::PullPosts,
            ..
        })
    ));
}
