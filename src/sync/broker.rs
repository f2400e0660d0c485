//! reqwest client for the integration broker.
//!
//! Spreadsheet access goes through the broker's action endpoint
//! (`/api/v2/actions/{ACTION}/execute`) acting as a connected account;
//! connection management uses the v1 account and integration listings.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::extract;
use super::remote::{
    ConnectedAccount, ConnectionBroker, ConnectionStatus, InitiateOutcome, SheetTab, SheetTarget,
    SheetsBackend,
};
use crate::address;
use crate::config::SheetOpsConfig;
use crate::errors::RemoteError;

const ACTION_BATCH_GET: &str = "GOOGLESHEETS_BATCH_GET";
const ACTION_CLEAR_VALUES: &str = "GOOGLESHEETS_CLEAR_VALUES";
const ACTION_BATCH_UPDATE: &str = "GOOGLESHEETS_BATCH_UPDATE";
const ACTION_SPREADSHEET_INFO: &str = "GOOGLESHEETS_GET_SPREADSHEET_INFO";

#[derive(Clone)]
pub struct BrokerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl BrokerClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn from_config(config: &SheetOpsConfig) -> Self {
        Self::new(
            config.http_client(),
            config.broker_base_url.clone(),
            config.broker_api_key.clone(),
        )
    }

    fn api_key(&self) -> Result<&str, RemoteError> {
        self.api_key
            .as_deref()
            .ok_or(RemoteError::NotConfigured("Broker API key"))
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, RemoteError> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .header("x-api-key", self.api_key()?)
            .send()
            .await?;
        read_json(path, response).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, RemoteError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("x-api-key", self.api_key()?)
            .json(body)
            .send()
            .await?;
        read_json(path, response).await
    }

    async fn execute(
        &self,
        action: &str,
        account_id: &str,
        input: Value,
    ) -> Result<Value, RemoteError> {
        let path = format!("/api/v2/actions/{action}/execute");
        let body = json!({ "connectedAccountId": account_id, "input": input });
        let result = self.post_json(&path, &body).await?;
        if let Some(reason) = extract::action_failure(&result) {
            tracing::warn!(action, reason = %reason, "broker action reported failure");
            return Err(RemoteError::malformed(format!("{action} failed: {reason}")));
        }
        Ok(result)
    }
}

async fn read_json(path: &str, response: reqwest::Response) -> Result<Value, RemoteError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        tracing::warn!(
            path,
            status = status.as_u16(),
            body = %extract::body_preview(&text),
            "broker request failed"
        );
        return Err(RemoteError::Http {
            status: status.as_u16(),
            detail: extract::body_preview(&text),
        });
    }
    serde_json::from_str(&text).map_err(|err| {
        tracing::warn!(
            path,
            error = %err,
            body = %extract::body_preview(&text),
            "broker returned invalid json"
        );
        RemoteError::malformed(err.to_string())
    })
}

#[async_trait]
impl ConnectionBroker for BrokerClient {
    async fn check(&self, user_id: &str, app: &str) -> Result<ConnectionStatus, RemoteError> {
        let listing = self
            .get_json("/api/v1/connectedAccounts", &[("entityId", user_id)])
            .await?;
        let account = extract::extract_active_account(&listing);
        tracing::debug!(user_id, app, connected = account.is_some(), "broker connection check");
        Ok(ConnectionStatus {
            connected: account.is_some(),
            account,
        })
    }

    async fn initiate(
        &self,
        user_id: &str,
        app: &str,
        redirect_uri: &str,
    ) -> Result<InitiateOutcome, RemoteError> {
        let integrations = self
            .get_json("/api/v1/integrations", &[("appName", app)])
            .await?;
        let Some(integration_id) = extract::extract_integration_id(&integrations) else {
            return Ok(InitiateOutcome::NoIntegration);
        };

        let body = json!({
            "integrationId": integration_id,
            "entityId": user_id,
            "redirectUri": redirect_uri,
            "data": {},
        });
        let created = self.post_json("/api/v1/connectedAccounts", &body).await?;
        Ok(match extract::extract_redirect_url(&created) {
            Some(url) => InitiateOutcome::Redirect(url),
            None => InitiateOutcome::NoRedirectUrl,
        })
    }

    fn sheets_for(&self, account: &ConnectedAccount) -> Arc<dyn SheetsBackend> {
        Arc::new(BrokerSheets {
            client: self.clone(),
            account_id: account.id.clone(),
        })
    }
}

/// Broker-backed spreadsheet access for one connected account.
pub struct BrokerSheets {
    client: BrokerClient,
    account_id: String,
}

#[async_trait]
impl SheetsBackend for BrokerSheets {
    async fn read_values(&self, target: &SheetTarget) -> Result<Vec<Vec<String>>, RemoteError> {
        let range = address::qualified_range(&target.tab, &target.range);
        let result = self
            .client
            .execute(
                ACTION_BATCH_GET,
                &self.account_id,
                json!({ "spreadsheet_id": target.spreadsheet_id, "ranges": [range] }),
            )
            .await?;
        Ok(extract::extract_values(&result))
    }

    async fn write_grid(
        &self,
        target: &SheetTarget,
        grid: &[Vec<String>],
    ) -> Result<usize, RemoteError> {
        self.client
            .execute(
                ACTION_CLEAR_VALUES,
                &self.account_id,
                json!({
                    "spreadsheet_id": target.spreadsheet_id,
                    "range": address::qualified_range(&target.tab, &target.range),
                }),
            )
            .await?;

        let width = grid.first().map(Vec::len).unwrap_or(1).max(1);
        let range = address::qualified_range(&target.tab, &address::grid_range(width, grid.len()));
        self.client
            .execute(
                ACTION_BATCH_UPDATE,
                &self.account_id,
                json!({
                    "spreadsheet_id": target.spreadsheet_id,
                    "sheet_name": target.tab,
                    "range": range,
                    "values": grid,
                    "value_input_option": "RAW",
                }),
            )
            .await?;
        Ok(grid.len())
    }

    async fn list_tabs(&self, spreadsheet_id: &str) -> Result<Vec<SheetTab>, RemoteError> {
        let result = self
            .client
            .execute(
                ACTION_SPREADSHEET_INFO,
                &self.account_id,
                json!({ "spreadsheet_id": spreadsheet_id }),
            )
            .await?;
        Ok(extract::extract_tabs(&result))
    }
}
