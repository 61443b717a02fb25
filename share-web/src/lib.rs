//! share-web - HTTP surface of Sharecast
//!
//! Exposes the account connect flow, the compose endpoints, the per-entry
//! share counter and the entry hooks the CMS calls on save and draft merge.
//!
//! # Routes
//!
//! - `POST /accounts/connect?provider=<handle>` - redirect to the platform
//! - `GET|POST /accounts/callback` - finish connecting, redirect to the return URL
//! - `GET /accounts`, `POST /accounts/delete`
//! - `POST /compose/post-share`, `POST /compose/fields`
//! - `POST /entry-share-counter/{list-shares,share-counter,delete-share}`
//! - `POST /entries/saved`, `POST /entries/merge-draft`

pub mod api;
pub mod error;
pub mod sessions;

use axum::Router;
use libsharecast::SharecastService;
use tower_http::trace::TraceLayer;

use crate::sessions::SessionStore;

/// Shared state of all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: SharecastService,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(service: SharecastService) -> Self {
        let secure = service.config().server.base_url.starts_with("https://");
        Self {
            service,
            sessions: SessionStore::new(secure),
        }
    }
}

/// Build the router with all routes
///
/// Shared by the binary and the integration tests.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/accounts", api::accounts::router())
        .nest("/compose", api::compose::router())
        .nest("/entry-share-counter", api::counter::router())
        .nest("/entries", api::entries::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
