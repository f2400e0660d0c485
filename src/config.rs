use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::remote::SheetTarget;

const DEFAULT_USER_ID: &str = "anonymous";
const DEFAULT_BROKER_URL: &str = "https://backend.composio.dev";
const DEFAULT_BROKER_APP: &str = "googlesheets";
const DEFAULT_SHEETS_API: &str = "https://sheets.googleapis.com/v4";
const DEFAULT_RUN_ID_HEADER: &str = "X-Toolhouse-Run-ID";
const DEFAULT_TAB: &str = "Sheet1";
const DEFAULT_RANGE: &str = "A1:Z1000";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Which credential path reads and writes the spreadsheet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// A service credential talks to the Sheets API directly.
    Service,
    /// The integration broker acts for the user's connected account.
    #[default]
    Broker,
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMode::Service => write!(f, "service"),
            AuthMode::Broker => write!(f, "broker"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SheetOpsConfig {
    pub user_id: String,
    pub auth_mode: AuthMode,
    pub broker_base_url: String,
    pub broker_api_key: Option<String>,
    pub broker_app: String,
    pub sheets_api_base: String,
    /// Bearer token used in service mode.
    pub service_token: Option<String>,
    pub agent_url: Option<String>,
    pub agent_api_key: Option<String>,
    pub run_id_header: String,
    pub default_tab: String,
    pub default_range: String,
    pub request_timeout_ms: Option<u64>,
    pub log_level: String,
}

impl Default for SheetOpsConfig {
    fn default() -> Self {
        Self {
            user_id: DEFAULT_USER_ID.to_string(),
            auth_mode: AuthMode::default(),
            broker_base_url: DEFAULT_BROKER_URL.to_string(),
            broker_api_key: None,
            broker_app: DEFAULT_BROKER_APP.to_string(),
            sheets_api_base: DEFAULT_SHEETS_API.to_string(),
            service_token: None,
            agent_url: None,
            agent_api_key: None,
            run_id_header: DEFAULT_RUN_ID_HEADER.to_string(),
            default_tab: DEFAULT_TAB.to_string(),
            default_range: DEFAULT_RANGE.to_string(),
            request_timeout_ms: Some(DEFAULT_REQUEST_TIMEOUT_MS),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl SheetOpsConfig {
    pub fn from_args(args: ConfigArgs) -> Result<Self> {
        let ConfigArgs {
            config,
            user_id: cli_user_id,
            auth_mode: cli_auth_mode,
            broker_url: cli_broker_url,
            broker_api_key: cli_broker_api_key,
            broker_app: cli_broker_app,
            sheets_api: cli_sheets_api,
            service_token: cli_service_token,
            agent_url: cli_agent_url,
            agent_api_key: cli_agent_api_key,
            run_id_header: cli_run_id_header,
            default_tab: cli_default_tab,
            default_range: cli_default_range,
            request_timeout_ms: cli_request_timeout_ms,
            log_level: cli_log_level,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            user_id: file_user_id,
            auth_mode: file_auth_mode,
            broker_base_url: file_broker_url,
            broker_api_key: file_broker_api_key,
            broker_app: file_broker_app,
            sheets_api_base: file_sheets_api,
            service_token: file_service_token,
            agent_url: file_agent_url,
            agent_api_key: file_agent_api_key,
            run_id_header: file_run_id_header,
            default_tab: file_default_tab,
            default_range: file_default_range,
            request_timeout_ms: file_request_timeout_ms,
            log_level: file_log_level,
        } = file_config;

        let defaults = Self::default();

        let user_id = non_blank(cli_user_id.or(file_user_id)).unwrap_or(defaults.user_id);
        let auth_mode = cli_auth_mode.or(file_auth_mode).unwrap_or_default();

        let broker_base_url = cli_broker_url
            .or(file_broker_url)
            .unwrap_or(defaults.broker_base_url);
        let broker_base_url = broker_base_url.trim().trim_end_matches('/').to_string();
        anyhow::ensure!(!broker_base_url.is_empty(), "broker url must not be empty");

        let sheets_api_base = cli_sheets_api
            .or(file_sheets_api)
            .unwrap_or(defaults.sheets_api_base);
        let sheets_api_base = sheets_api_base.trim().trim_end_matches('/').to_string();
        anyhow::ensure!(
            !sheets_api_base.is_empty(),
            "sheets api base url must not be empty"
        );

        let agent_url = non_blank(cli_agent_url.or(file_agent_url))
            .map(|url| url.trim_end_matches('/').to_string());

        let broker_app =
            non_blank(cli_broker_app.or(file_broker_app)).unwrap_or(defaults.broker_app);
        let run_id_header =
            non_blank(cli_run_id_header.or(file_run_id_header)).unwrap_or(defaults.run_id_header);

        let default_tab = cli_default_tab
            .or(file_default_tab)
            .unwrap_or(defaults.default_tab);
        anyhow::ensure!(!default_tab.trim().is_empty(), "default tab must not be empty");

        let default_range =
            non_blank(cli_default_range.or(file_default_range)).unwrap_or(defaults.default_range);

        let request_timeout_ms = cli_request_timeout_ms
            .or(file_request_timeout_ms)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        let request_timeout_ms = if request_timeout_ms == 0 {
            None
        } else {
            Some(request_timeout_ms)
        };

        let log_level = non_blank(cli_log_level.or(file_log_level)).unwrap_or(defaults.log_level);

        Ok(Self {
            user_id,
            auth_mode,
            broker_base_url,
            broker_api_key: non_blank(cli_broker_api_key.or(file_broker_api_key)),
            broker_app,
            sheets_api_base,
            service_token: non_blank(cli_service_token.or(file_service_token)),
            agent_url,
            agent_api_key: non_blank(cli_agent_api_key.or(file_agent_api_key)),
            run_id_header,
            default_tab,
            default_range,
            request_timeout_ms,
            log_level,
        })
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Target on the configured default tab and range.
    pub fn target(&self, spreadsheet_id: impl Into<String>) -> SheetTarget {
        SheetTarget::new(spreadsheet_id, &self.default_tab, &self.default_range)
    }

    pub(crate) fn http_client(&self) -> reqwest::Client {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.request_timeout() {
            builder = builder.timeout(timeout);
        }
        builder.build().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "falling back to default http client");
            reqwest::Client::new()
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Settings a host binary can `#[command(flatten)]` into its own parser.
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "SHEETOPS_USER_ID",
        value_name = "ID",
        help = "User identifier sent to the broker and the agent"
    )]
    pub user_id: Option<String>,

    #[arg(
        long,
        env = "SHEETOPS_AUTH_MODE",
        value_enum,
        help = "Credential path for spreadsheet access"
    )]
    pub auth_mode: Option<AuthMode>,

    #[arg(
        long,
        env = "SHEETOPS_BROKER_URL",
        value_name = "URL",
        help = "Integration broker base URL"
    )]
    pub broker_url: Option<String>,

    #[arg(
        long,
        env = "SHEETOPS_BROKER_API_KEY",
        value_name = "KEY",
        hide_env_values = true,
        help = "Integration broker API key"
    )]
    pub broker_api_key: Option<String>,

    #[arg(
        long,
        env = "SHEETOPS_BROKER_APP",
        value_name = "APP",
        help = "Broker app name for Google Sheets"
    )]
    pub broker_app: Option<String>,

    #[arg(
        long,
        env = "SHEETOPS_SHEETS_API",
        value_name = "URL",
        help = "Google Sheets REST API base URL"
    )]
    pub sheets_api: Option<String>,

    #[arg(
        long,
        env = "SHEETOPS_SERVICE_TOKEN",
        value_name = "TOKEN",
        hide_env_values = true,
        help = "Bearer token for service mode"
    )]
    pub service_token: Option<String>,

    #[arg(
        long,
        env = "SHEETOPS_AGENT_URL",
        value_name = "URL",
        help = "Hosted agent endpoint"
    )]
    pub agent_url: Option<String>,

    #[arg(
        long,
        env = "SHEETOPS_AGENT_API_KEY",
        value_name = "KEY",
        hide_env_values = true,
        help = "Hosted agent API key"
    )]
    pub agent_api_key: Option<String>,

    #[arg(
        long,
        env = "SHEETOPS_RUN_ID_HEADER",
        value_name = "HEADER",
        help = "Response header carrying the agent run id"
    )]
    pub run_id_header: Option<String>,

    #[arg(
        long,
        env = "SHEETOPS_DEFAULT_TAB",
        value_name = "TAB",
        help = "Worksheet tab used when none is selected"
    )]
    pub default_tab: Option<String>,

    #[arg(
        long,
        env = "SHEETOPS_DEFAULT_RANGE",
        value_name = "RANGE",
        help = "A1 range read on pull and cleared on push"
    )]
    pub default_range: Option<String>,

    #[arg(
        long,
        env = "SHEETOPS_REQUEST_TIMEOUT_MS",
        value_name = "MS",
        help = "Timeout for remote requests in milliseconds (0 disables)"
    )]
    pub request_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = "SHEETOPS_LOG_LEVEL",
        value_name = "LEVEL",
        help = "Log level used when SHEETOPS_LOG is unset"
    )]
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    user_id: Option<String>,
    auth_mode: Option<AuthMode>,
    broker_base_url: Option<String>,
    broker_api_key: Option<String>,
    broker_app: Option<String>,
    sheets_api_base: Option<String>,
    service_token: Option<String>,
    agent_url: Option<String>,
    agent_api_key: Option<String>,
    run_id_header: Option<String>,
    default_tab: Option<String>,
    default_range: Option<String>,
    request_timeout_ms: Option<u64>,
    log_level: Option<String>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
