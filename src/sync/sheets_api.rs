//! Direct Google Sheets REST access with a bearer token.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::extract;
use super::remote::{SheetTab, SheetTarget, SheetsBackend};
use crate::address;
use crate::config::SheetOpsConfig;
use crate::errors::RemoteError;

/// Supplies the bearer token for each request. Minting service-account
/// tokens is left to the host.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, RemoteError>;
}

/// A token obtained out of band (OAuth access token or pre-minted
/// service token).
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, RemoteError> {
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
struct SpreadsheetInfo {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetEntry {
    properties: Option<SheetProperties>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: Option<i64>,
    title: Option<String>,
}

pub struct SheetsApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl SheetsApiClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// Service-mode client, or `None` when no service token is configured.
    pub fn from_config(config: &SheetOpsConfig) -> Option<Self> {
        let token = config.service_token.clone()?;
        Some(Self::new(
            config.http_client(),
            config.sheets_api_base.clone(),
            Arc::new(StaticToken(token)),
        ))
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url, RemoteError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|err| RemoteError::Network(format!("invalid sheets api url: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Network("sheets api url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, RemoteError> {
        let token = self.tokens.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            tracing::warn!(
                status = status.as_u16(),
                body = %extract::body_preview(&text),
                "sheets api request failed"
            );
            return Err(RemoteError::Http {
                status: status.as_u16(),
                detail: extract::body_preview(&text),
            });
        }
        Ok(text)
    }

    fn decode<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, RemoteError> {
        serde_json::from_str(text).map_err(|err| {
            tracing::warn!(
                error = %err,
                body = %extract::body_preview(text),
                "sheets api returned invalid json"
            );
            RemoteError::malformed(err.to_string())
        })
    }
}

#[async_trait]
impl SheetsBackend for SheetsApiClient {
    async fn read_values(&self, target: &SheetTarget) -> Result<Vec<Vec<String>>, RemoteError> {
        let range = address::qualified_range(&target.tab, &target.range);
        let url = self.url(&[
            "spreadsheets",
            target.spreadsheet_id.as_str(),
            "values",
            range.as_str(),
        ])?;
        let text = self.send(self.http.get(url)).await?;
        let parsed: ValueRange = Self::decode(&text)?;
        Ok(parsed
            .values
            .iter()
            .map(|row| row.iter().map(extract::cell_text).collect())
            .collect())
    }

    async fn write_grid(
        &self,
        target: &SheetTarget,
        grid: &[Vec<String>],
    ) -> Result<usize, RemoteError> {
        let clear_range = address::qualified_range(&target.tab, &target.range);
        let clear = self.url(&[
            "spreadsheets",
            target.spreadsheet_id.as_str(),
            "values",
            format!("{clear_range}:clear").as_str(),
        ])?;
        self.send(self.http.post(clear).json(&json!({}))).await?;

        let width = grid.first().map(Vec::len).unwrap_or(1).max(1);
        let range = address::qualified_range(&target.tab, &address::grid_range(width, grid.len()));
        let mut update = self.url(&[
            "spreadsheets",
            target.spreadsheet_id.as_str(),
            "values",
            range.as_str(),
        ])?;
        update
            .query_pairs_mut()
            .append_pair("valueInputOption", "RAW");
        self.send(self.http.put(update).json(&json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": grid,
        })))
        .await?;
        Ok(grid.len())
    }

    async fn list_tabs(&self, spreadsheet_id: &str) -> Result<Vec<SheetTab>, RemoteError> {
        let mut url = self.url(&["spreadsheets", spreadsheet_id])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties");
        let text = self.send(self.http.get(url)).await?;
        let info: SpreadsheetInfo = Self::decode(&text)?;
        Ok(info
            .sheets
            .into_iter()
            .filter_map(|sheet| sheet.properties)
            .map(|props| SheetTab {
                id: props.sheet_id.unwrap_or(0),
                name: props.title.unwrap_or_else(|| "Sheet1".to_string()),
            })
            .collect())
    }
}
