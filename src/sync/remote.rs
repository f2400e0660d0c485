use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::RemoteError;

/// Spreadsheet + worksheet tab + A1 range addressed by a pull or push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SheetTarget {
    pub spreadsheet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spreadsheet_name: Option<String>,
    pub tab: String,
    pub range: String,
}

impl SheetTarget {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        tab: impl Into<String>,
        range: impl Into<String>,
    ) -> Self {
        Self {
            spreadsheet_id: spreadsheet_id.into(),
            spreadsheet_name: None,
            tab: tab.into(),
            range: range.into(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.spreadsheet_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SheetTab {
    pub id: i64,
    pub name: String,
}

impl SheetTab {
    pub fn default_tab() -> Self {
        Self {
            id: 0,
            name: "Sheet1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub account: Option<ConnectedAccount>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiateOutcome {
    Redirect(String),
    NoIntegration,
    NoRedirectUrl,
}

/// Reads and overwrites spreadsheet values.
#[async_trait]
pub trait SheetsBackend: Send + Sync {
    /// Values of `target.range` in `target.tab`; the first row is the header.
    /// An empty sheet is an empty vector, not an error.
    async fn read_values(&self, target: &SheetTarget) -> Result<Vec<Vec<String>>, RemoteError>;

    /// Clears `target.range` then writes `grid` from A1. Returns rows written.
    async fn write_grid(&self, target: &SheetTarget, grid: &[Vec<String>])
    -> Result<usize, RemoteError>;

    async fn list_tabs(&self, spreadsheet_id: &str) -> Result<Vec<SheetTab>, RemoteError>;
}

/// Integration broker mediating per-user OAuth.
#[async_trait]
pub trait ConnectionBroker: Send + Sync {
    async fn check(&self, user_id: &str, app: &str) -> Result<ConnectionStatus, RemoteError>;

    /// Starts the OAuth flow for `user_id`.
    async fn initiate(
        &self,
        user_id: &str,
        app: &str,
        redirect_uri: &str,
    ) -> Result<InitiateOutcome, RemoteError>;

    /// Sheets access acting as `account`.
    fn sheets_for(&self, account: &ConnectedAccount) -> Arc<dyn SheetsBackend>;
}
