//! Account connection endpoints

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use axum_extra::extract::CookieJar;
use libsharecast::oauth::CallbackParams;
use libsharecast::session::FlashKind;
use libsharecast::{SharecastError, SharecastService};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use url::Url;

use crate::error::ApiResult;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_accounts))
        .route("/connect", post(connect))
        .route("/callback", get(callback_get).post(callback_post))
        .route("/delete", post(delete_account))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    pub provider: String,
    #[serde(default)]
    pub return_url: Option<String>,
}

/// POST /accounts/connect
async fn connect(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<ConnectQuery>,
) -> ApiResult<Response> {
    let return_url = query
        .return_url
        .as_deref()
        .filter(|u| is_local_url(&state.service, u));
    if query.return_url.is_some() && return_url.is_none() {
        warn!(return_url = ?query.return_url, "Ignoring foreign return URL");
    }

    let (jar, id, mut session) = state.sessions.open(jar).await;
    let result = state
        .service
        .accounts()
        .connect(query.provider.trim(), &mut session, return_url)
        .await;
    state.sessions.save(id, session).await;

    let auth_url = result?;
    Ok((jar, Redirect::to(auth_url.as_str())).into_response())
}

/// GET /accounts/callback
async fn callback_get(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> ApiResult<Response> {
    finish_connect(state, jar, params).await
}

/// POST /accounts/callback (form_post response mode)
async fn callback_post(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(params): Form<CallbackParams>,
) -> ApiResult<Response> {
    finish_connect(state, jar, params).await
}

async fn finish_connect(state: AppState, jar: CookieJar, params: CallbackParams) -> ApiResult<Response> {
    let (jar, id, mut session) = state.sessions.open(jar).await;
    let accounts = state.service.accounts();
    let return_url = accounts.return_url(&session);

    let response = match accounts.callback(&params, &mut session).await {
        Ok(connected) => {
            session.flash(
                FlashKind::Notice,
                format!(
                    "Connected {} account(s) of {}",
                    connected.accounts.len(),
                    connected.provider_handle
                ),
            );
            Ok((jar, Redirect::to(&connected.return_url)).into_response())
        }
        Err(SharecastError::Callback(e)) if e.redirect => {
            warn!(error = %e, "Connecting accounts failed");
            session.flash(FlashKind::Error, e.message);
            Ok((jar, Redirect::to(&return_url)).into_response())
        }
        Err(e) => Err(e.into()),
    };

    state.sessions.save(id, session).await;
    response
}

/// GET /accounts
///
/// Connected accounts plus the flash messages left by the connect flow.
async fn list_accounts(State(state): State<AppState>, jar: CookieJar) -> ApiResult<Response> {
    let (jar, id, mut session) = state.sessions.open(jar).await;
    let flashes = session.take_flashes();
    state.sessions.save(id, session).await;

    let service = &state.service;
    let mut accounts = Vec::new();
    for account in service.accounts().list().await? {
        accounts.push(json!({
            "id": account.id,
            "identifier": account.identifier,
            "name": account.name,
            "handle": account.handle,
            "displayName": service.accounts().display_name(&account).await,
            "lastRefreshedAt": account.last_refreshed_at,
        }));
    }

    Ok((jar, Json(json!({ "accounts": accounts, "flashes": flashes }))).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAccountRequest {
    pub account_id: i64,
}

/// POST /accounts/delete
async fn delete_account(
    State(state): State<AppState>,
    Json(request): Json<DeleteAccountRequest>,
) -> ApiResult<Json<Value>> {
    if !state.service.accounts().delete(request.account_id).await? {
        return Err(SharecastError::NotFound(format!("account {}", request.account_id)).into());
    }
    Ok(Json(json!({ "success": true })))
}

/// Relative paths and URLs on our own origin
fn is_local_url(service: &SharecastService, candidate: &str) -> bool {
    if candidate.starts_with('/') && !candidate.starts_with("//") {
        return true;
    }
    match (Url::parse(candidate), Url::parse(&service.config().server.base_url)) {
        (Ok(url), Ok(base)) => url.origin() == base.origin(),
        _ => false,
    }
}
