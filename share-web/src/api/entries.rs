//! Hooks the CMS calls when entries change

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use libsharecast::Entry;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::ApiResult;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/saved", post(entry_saved))
        .route("/merge-draft", post(merge_draft))
}

/// POST /entries/saved
///
/// Mirrors the entry and queues its pending shares if it is live now.
async fn entry_saved(State(state): State<AppState>, Json(entry): Json<Entry>) -> ApiResult<Json<Value>> {
    let now = Utc::now();
    let queued = state.service.shares().entry_saved(&entry, now).await?;

    let queued: Vec<Value> = queued
        .iter()
        .map(|q| json!({ "shareId": q.share_id, "accountName": q.account_name }))
        .collect();
    Ok(Json(json!({ "live": entry.is_live_at(now), "queued": queued })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeDraftBody {
    pub draft_id: i64,
    pub canonical_id: i64,
}

/// POST /entries/merge-draft
async fn merge_draft(
    State(state): State<AppState>,
    Json(body): Json<MergeDraftBody>,
) -> ApiResult<Json<Value>> {
    let moved = state
        .service
        .shares()
        .move_draft_shares(body.draft_id, body.canonical_id)
        .await?;
    info!(draft_id = body.draft_id, canonical_id = body.canonical_id, moved, "Draft shares merged");
    Ok(Json(json!({ "moved": moved })))
}
