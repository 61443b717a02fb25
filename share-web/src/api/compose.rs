//! Compose endpoints used by the entry editor

use std::collections::BTreeMap;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use libsharecast::error::Capability;
use libsharecast::service::shares::ComposeRequest;
use libsharecast::SharecastError;
use serde::Deserialize;
use serde_json::{json, Value};

use super::EntryRef;
use crate::error::ApiResult;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/post-share", post(post_share))
        .route("/fields", post(fields))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeBody {
    #[serde(flatten)]
    pub entry: EntryRef,
    pub account_id: i64,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// POST /compose/post-share
///
/// Publishes right away for a live entry, else stores the share as pending.
/// On success the response carries a blank compose form for the next share;
/// on failure the submitted form with its errors.
async fn post_share(
    State(state): State<AppState>,
    Json(body): Json<ComposeBody>,
) -> ApiResult<Json<Value>> {
    let shares = state.service.shares();
    let entry = body.entry.load(&state).await?;

    let outcome = shares
        .compose(
            ComposeRequest {
                entry_id: body.entry.entry_id,
                site_id: body.entry.site_id,
                account_id: body.account_id,
                fields: body.fields,
            },
            Utc::now(),
        )
        .await?;

    if outcome.success {
        let account = state
            .service
            .accounts()
            .get(body.account_id)
            .await?
            .ok_or_else(|| SharecastError::NotFound(format!("account {}", body.account_id)))?;
        let html = shares
            .composing_fields(&entry, &account, &BTreeMap::new())
            .await?;
        return Ok(Json(json!({
            "success": true,
            "share": outcome.share,
            "html": html,
        })));
    }

    let error = outcome
        .share
        .errors
        .first("success")
        .or_else(|| outcome.share.errors.first("message"))
        .map(str::to_string);
    let html = shares.composing_html(&outcome.share, &entry).await?;
    Ok(Json(json!({
        "success": false,
        "error": error,
        "errors": outcome.share.errors,
        "html": html,
    })))
}

/// POST /compose/fields
async fn fields(State(state): State<AppState>, Json(body): Json<ComposeBody>) -> ApiResult<Json<Value>> {
    let entry = body.entry.load(&state).await?;
    let account = state
        .service
        .accounts()
        .get(body.account_id)
        .await?
        .ok_or_else(|| SharecastError::NotFound(format!("account {}", body.account_id)))?;

    let html = state
        .service
        .shares()
        .composing_fields(&entry, &account, &body.fields)
        .await?
        .ok_or_else(|| SharecastError::MissingCapability {
            provider: account.name.clone(),
            capability: Capability::Composing,
        })?;

    Ok(Json(json!({ "html": html })))
}
