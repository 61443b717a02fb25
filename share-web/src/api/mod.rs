//! Route handlers

pub mod accounts;
pub mod compose;
pub mod counter;
pub mod entries;

use libsharecast::{Entry, SharecastError};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::AppState;

/// Entry addressed by a request body
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRef {
    pub entry_id: i64,
    pub site_id: i64,
}

impl EntryRef {
    pub async fn load(&self, state: &AppState) -> ApiResult<Entry> {
        state
            .service
            .database()
            .get_entry(self.entry_id, self.site_id)
            .await?
            .ok_or_else(|| {
                SharecastError::NotFound(format!("entry {} in site {}", self.entry_id, self.site_id))
                    .into()
            })
    }
}
