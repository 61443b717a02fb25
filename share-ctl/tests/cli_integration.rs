//! Integration tests for the share-ctl commands

use assert_cmd::Command;
use chrono::{Duration, Utc};
use libsharecast::providers::facebook;
use libsharecast::service::shares::ComposeRequest;
use libsharecast::types::{AccountSettings, DiscoveredAccount};
use libsharecast::{Config, Entry, ProviderRecord, SharecastService, Token};
use predicates::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use tempfile::TempDir;

/// Helper to escape path for TOML on Windows
fn escape_path_for_toml(path: &str) -> String {
    path.replace('\\', "\\\\")
}

/// Config file pointing at a database inside the temp dir
fn setup_test_env() -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("data").join("sharecast.db");

    let config_content = format!(
        r#"
[database]
path = "{}"

[logging]
level = "warn"
"#,
        escape_path_for_toml(&db_path.to_string_lossy())
    );
    fs::write(&config_path, config_content).unwrap();

    (
        temp_dir,
        config_path.to_string_lossy().to_string(),
        db_path.to_string_lossy().to_string(),
    )
}

fn share_ctl(config_path: &str) -> Command {
    let mut cmd = Command::cargo_bin("share-ctl").unwrap();
    cmd.arg("--config").arg(config_path);
    cmd
}

fn entry(id: i64, post_date: chrono::DateTime<Utc>) -> Entry {
    Entry {
        id,
        site_id: 1,
        canonical_id: None,
        url: None,
        title: None,
        enabled: true,
        is_draft: false,
        is_revision: false,
        post_date: Some(post_date),
        expiry_date: None,
    }
}

/// A Facebook page with one pending share on entry 10, which is live now
async fn seed_pending_share(db_path: &str, token_expiry: chrono::DateTime<Utc>) {
    let service = SharecastService::from_config(Config::for_database(db_path))
        .await
        .unwrap();

    let mut record = ProviderRecord::new("Facebook", "facebook", facebook::KIND);
    record.settings.enable_posting = true;
    let provider = service.registry().save(record).await.unwrap();

    let mut token = Token::new(provider.id(), "user-token");
    token.identifier = "user-1".to_string();
    token.scopes = vec!["pages_manage_posts".to_string()];
    token.expiry = Some(token_expiry);
    let page = DiscoveredAccount {
        identifier: "1001".to_string(),
        name: "Acme Page".to_string(),
        handle: "acme".to_string(),
        settings: AccountSettings {
            access_token: Some("page-token".to_string()),
        },
    };
    let accounts = service
        .accounts()
        .save_connection(&token, &[page], None)
        .await
        .unwrap();

    // Compose while the entry is still scheduled, then let it go live
    let scheduled = entry(10, Utc::now() + Duration::days(1));
    service.database().upsert_entry(&scheduled).await.unwrap();
    let outcome = service
        .shares()
        .compose(
            ComposeRequest {
                entry_id: 10,
                site_id: 1,
                account_id: accounts[0].id,
                fields: BTreeMap::from([("message".to_string(), "Hello".to_string())]),
            },
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(outcome.success);

    let live = entry(10, Utc::now() - Duration::hours(1));
    service.database().upsert_entry(&live).await.unwrap();
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("share-ctl")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("posts"))
        .stdout(predicate::str::contains("tokens"))
        .stdout(predicate::str::contains("providers"));
}

#[test]
fn test_batch_commands_on_empty_database() {
    let (_temp_dir, config_path, _db_path) = setup_test_env();

    share_ctl(&config_path)
        .args(["posts", "pull", "--limit", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Successfully pulled 0 post(s) from 0 account(s)",
        ));

    share_ctl(&config_path)
        .args(["shares", "publish"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Queued 0 share(s)"));

    share_ctl(&config_path)
        .args(["tokens", "refresh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Successfully refreshed 0 token(s)"));
}

#[tokio::test]
async fn test_shares_publish_lists_and_queues_pending_shares() {
    let (_temp_dir, config_path, db_path) = setup_test_env();
    seed_pending_share(&db_path, Utc::now() + Duration::days(50)).await;

    share_ctl(&config_path)
        .args(["shares", "publish", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("- Share to Acme Page for entry #10"))
        .stdout(predicate::str::contains("Dry run: 1 share(s) would be queued"));

    share_ctl(&config_path)
        .args(["shares", "publish"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Queued 1 share(s)"));
}

#[tokio::test]
async fn test_tokens_refresh_reports_skipped_tokens() {
    let (_temp_dir, config_path, db_path) = setup_test_env();
    seed_pending_share(&db_path, Utc::now() + Duration::days(10)).await;

    // Facebook page tokens cannot be refreshed
    share_ctl(&config_path)
        .args(["tokens", "refresh"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Token ID 1 skipped, provider cannot refresh tokens",
        ))
        .stdout(predicate::str::contains("Successfully refreshed 0 token(s)"));

    share_ctl(&config_path)
        .args(["tokens", "refresh", "--window-days", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Token ID 1 skipped, still 5 days valid"));
}

#[test]
fn test_provider_lifecycle() {
    let (_temp_dir, config_path, _db_path) = setup_test_env();

    share_ctl(&config_path)
        .args([
            "providers",
            "save",
            "--name",
            "Facebook",
            "--handle",
            "facebook",
            "--type",
            "facebook-pages",
            "--client-id",
            "$FACEBOOK_CLIENT_ID",
            "--enable-posting",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved provider facebook"));

    share_ctl(&config_path)
        .args([
            "providers", "save", "--name", "Twitter", "--handle", "twitter", "--type", "twitter",
        ])
        .assert()
        .success();

    share_ctl(&config_path)
        .args(["providers", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 | facebook | Facebook | facebook-pages | enabled"))
        .stdout(predicate::str::contains("2 | twitter | Twitter | twitter | enabled"));

    share_ctl(&config_path)
        .args(["providers", "reorder", "2", "1"])
        .assert()
        .success();

    let output = share_ctl(&config_path)
        .args(["providers", "list", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let listed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(listed[0]["handle"], "twitter");
    assert_eq!(listed[0]["sortOrder"], 1);
    assert_eq!(listed[1]["handle"], "facebook");

    share_ctl(&config_path)
        .args(["providers", "export"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"type = "facebook-pages""#))
        .stdout(predicate::str::contains(r#"clientId = "$FACEBOOK_CLIENT_ID""#));

    share_ctl(&config_path)
        .args(["providers", "delete", "1"])
        .assert()
        .success();

    share_ctl(&config_path)
        .args(["providers", "delete", "1"])
        .assert()
        .failure()
        .code(4);
}

#[test]
fn test_export_apply_roundtrip_between_environments() {
    let (_source_dir, source_config, _) = setup_test_env();
    let (target_dir, target_config, _) = setup_test_env();

    share_ctl(&source_config)
        .args([
            "providers", "save", "--name", "Instagram", "--handle", "insta", "--type", "instagram",
        ])
        .assert()
        .success();

    let exported = share_ctl(&source_config)
        .args(["providers", "export"])
        .output()
        .unwrap();
    let snapshot_path = target_dir.path().join("providers.toml");
    fs::write(&snapshot_path, &exported.stdout).unwrap();

    share_ctl(&target_config)
        .args(["providers", "apply"])
        .arg(&snapshot_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied 1 change(s)"));

    // Replaying the same snapshot changes nothing
    share_ctl(&target_config)
        .args(["providers", "apply"])
        .arg(&snapshot_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied 0 change(s)"));

    share_ctl(&target_config)
        .args(["providers", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("insta | Instagram | instagram"));
}

#[test]
fn test_invalid_input_exit_codes() {
    let (_temp_dir, config_path, _db_path) = setup_test_env();

    share_ctl(&config_path)
        .args([
            "providers", "save", "--name", "Nope", "--handle", "nope", "--type", "myspace",
        ])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Unknown provider type"));

    share_ctl(&config_path)
        .args(["providers", "list", "--format", "xml"])
        .assert()
        .failure()
        .code(3);

    share_ctl(&config_path)
        .args(["tokens", "refresh", "--window-days", "-1"])
        .assert()
        .failure();
}
