use strum::{Display, IntoStaticStr};
use thiserror::Error;

/// Failure at a collaborator boundary: the broker, the Sheets API or the
/// agent endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("request failed with status {status}: {detail}")]
    Http { status: u16, detail: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {detail}")]
    Malformed { detail: String },
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl RemoteError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        RemoteError::Malformed {
            detail: detail.into(),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return RemoteError::malformed(err.to_string());
        }
        match err.status() {
            Some(status) => RemoteError::Http {
                status: status.as_u16(),
                detail: err.to_string(),
            },
            None => RemoteError::Network(err.to_string()),
        }
    }
}

/// Controller actions that can be in flight at most once each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SyncAction {
    Pull,
    Push,
    CheckConnection,
    Connect,
    ListTabs,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("{0} already in progress")]
    Busy(SyncAction),
    #[error("no spreadsheet selected")]
    NoTarget,
    #[error("no connected account found")]
    NoConnectedAccount,
    #[error("sheet is empty")]
    EmptySheet,
    #[error("no pending changes")]
    NoPendingChanges,
    #[error("broker has no google sheets integration")]
    NoIntegration,
    #[error("broker returned no redirect url")]
    NoRedirectUrl,
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl SyncError {
    /// Text shown to the user when the command fails.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Busy(action) => {
                format!("Please wait, {} is still running.", action_label(*action))
            }
            SyncError::NoTarget => "Select a sheet first.".to_string(),
            SyncError::NoConnectedAccount => {
                "No connected Google Sheets account found. Please connect your account.".to_string()
            }
            SyncError::EmptySheet => "Sheet is empty.".to_string(),
            SyncError::NoPendingChanges => "No changes to push.".to_string(),
            SyncError::NoIntegration => {
                "Google Sheets integration not found. Set it up in the broker dashboard first."
                    .to_string()
            }
            SyncError::NoRedirectUrl => {
                "No redirect URL returned. Check the broker integration setup.".to_string()
            }
            SyncError::Remote(RemoteError::Http { status, detail }) => {
                format!("Google Sheets request failed ({status}): {detail}")
            }
            SyncError::Remote(RemoteError::Network(detail)) => {
                format!("Could not reach Google Sheets: {detail}")
            }
            SyncError::Remote(RemoteError::Malformed { .. }) => {
                "Received an unexpected response from Google Sheets.".to_string()
            }
            SyncError::Remote(RemoteError::NotConfigured(what)) => {
                format!("{what} is not configured.")
            }
        }
    }
}

fn action_label(action: SyncAction) -> &'static str {
    match action {
        SyncAction::Pull => "a pull",
        SyncAction::Push => "a push",
        SyncAction::CheckConnection => "the connection check",
        SyncAction::Connect => "the connection request",
        SyncAction::ListTabs => "loading tabs",
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("agent transport failed: {0}")]
    Transport(#[from] RemoteError),
    #[error("message is empty")]
    EmptyMessage,
}

impl AgentError {
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Transport(err) => format!("Agent request failed: {err}"),
            AgentError::EmptyMessage => "Type a message first.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semantic_errors_have_distinct_messages() {
        let empty = SyncError::EmptySheet.user_message();
        let no_account = SyncError::NoConnectedAccount.user_message();
        assert_eq!(empty, "Sheet is empty.");
        assert_ne!(empty, no_account);
        assert!(SyncError::Busy(SyncAction::Push).user_message().contains("push"));
    }
}
