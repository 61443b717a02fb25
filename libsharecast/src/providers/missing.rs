//! Placeholder for providers whose configured type is not available

use async_trait::async_trait;
use url::Url;

use crate::error::{CallbackError, Result, SharecastError};
use crate::oauth::CallbackParams;
use crate::providers::Provider;
use crate::session::Session;
use crate::types::{DiscoveredAccount, ProviderRecord, Token};

pub struct MissingProvider {
    record: ProviderRecord,
    error_message: String,
}

impl MissingProvider {
    pub fn new(record: ProviderRecord, error_message: impl Into<String>) -> Self {
        Self {
            record,
            error_message: error_message.into(),
        }
    }

    /// Adapter type the stored configuration asks for
    pub fn expected_type(&self) -> &str {
        &self.record.kind
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    fn unavailable(&self, operation: &str) -> SharecastError {
        SharecastError::NotFound(format!(
            "Provider {} is missing ({}): {} not possible",
            self.record.handle, self.error_message, operation
        ))
    }
}

#[async_trait]
impl Provider for MissingProvider {
    fn record(&self) -> &ProviderRecord {
        &self.record
    }

    fn display_name(&self) -> &'static str {
        "Missing provider"
    }

    fn scopes(&self) -> Vec<String> {
        Vec::new()
    }

    async fn handle_connect(&self, _session: &mut Session) -> Result<Url> {
        Err(self.unavailable("Connect"))
    }

    async fn handle_callback(&self, _params: &CallbackParams, _session: &mut Session) -> Result<Token> {
        Err(CallbackError::without_redirect(format!(
            "Provider {} is missing: Callback not possible",
            self.record.handle
        ))
        .into())
    }

    async fn identifier(&self, _token: &Token) -> Result<String> {
        Err(self.unavailable("Identifying the token owner"))
    }

    async fn discover_accounts(&self, _token: &Token) -> Result<Vec<DiscoveredAccount>> {
        Err(self.unavailable("Account discovery"))
    }
}
