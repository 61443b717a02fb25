//! Share counter shown next to an entry

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use libsharecast::SharecastError;
use serde::Deserialize;
use serde_json::{json, Value};

use super::EntryRef;
use crate::error::ApiResult;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/list-shares", post(list_shares))
        .route("/share-counter", post(share_counter))
        .route("/delete-share", post(delete_share))
}

/// POST /entry-share-counter/list-shares
async fn list_shares(State(state): State<AppState>, Json(body): Json<EntryRef>) -> ApiResult<Json<Value>> {
    let entry = body.load(&state).await?;
    let shares = state.service.shares().list_shares(&entry).await?;
    Ok(Json(json!({ "shares": shares })))
}

/// POST /entry-share-counter/share-counter
async fn share_counter(State(state): State<AppState>, Json(body): Json<EntryRef>) -> ApiResult<Json<Value>> {
    let entry = body.load(&state).await?;
    let count = state.service.shares().count_shares_by_entry(&entry).await?;
    Ok(Json(json!({ "count": count })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteShareBody {
    #[serde(flatten)]
    pub entry: EntryRef,
    pub share_id: i64,
}

/// POST /entry-share-counter/delete-share
///
/// Only pending shares of the addressed entry can be deleted.
async fn delete_share(
    State(state): State<AppState>,
    Json(body): Json<DeleteShareBody>,
) -> ApiResult<Json<Value>> {
    let shares = state.service.shares();
    let entry = body.entry.load(&state).await?;

    let belongs = shares
        .shares_by_entry(&entry)
        .await?
        .iter()
        .any(|s| s.id == Some(body.share_id));
    if !belongs {
        return Err(SharecastError::NotFound(format!(
            "share {} of entry {}",
            body.share_id, entry.id
        ))
        .into());
    }

    shares.delete_share(body.share_id).await?;
    let count = shares.count_shares_by_entry(&entry).await?;
    Ok(Json(json!({ "success": true, "count": count })))
}
