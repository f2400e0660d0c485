//! The reconciliation controller.
//!
//! `SheetSession` owns the base state and the pending operation queue and is
//! the only writer of either. Everything else goes through its commands:
//! pull (replace base), propose (append), push (commit) and discard (clear).
//! Every command publishes a fresh `SessionSnapshot` on a watch channel.
//!
//! The lock is never held across an await. A command captures what it needs,
//! releases the lock, talks to the remote, and re-locks to commit. Only the
//! same action is refused while in flight; a propose during a pull is allowed
//! and is dropped when the pull replaces the base.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use super::grid;
use super::remote::{
    ConnectionBroker, ConnectionStatus, InitiateOutcome, SheetTab, SheetTarget, SheetsBackend,
};
use crate::apply::apply_ops;
use crate::config::{AuthMode, SheetOpsConfig};
use crate::diff::{SheetDiff, diff_states};
use crate::errors::{RemoteError, SyncAction, SyncError};
use crate::model::{SheetState, ValidationIssue};
use crate::ops::EditOperation;
use crate::validate::validate_rows;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Last state known to match the remote. Its `pending_ops` is empty.
    pub base: SheetState,
    pub pending_ops: Vec<EditOperation>,
    pub target: Option<SheetTarget>,
    pub tabs: Vec<SheetTab>,
    pub auth_mode: AuthMode,
    pub connection: ConnectionStatus,
    pub in_flight: BTreeSet<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    pub fn preview(&self) -> SheetState {
        let mut preview = apply_ops(&self.base, &self.pending_ops);
        preview.pending_ops = self.pending_ops.clone();
        preview
    }

    pub fn is_busy(&self, action: SyncAction) -> bool {
        self.in_flight.contains(action.to_string().as_str())
    }
}

struct Inner {
    base: SheetState,
    pending: Vec<EditOperation>,
    /// Bumped whenever the base is replaced or the queue is dropped, so a
    /// push that straddles either does not commit stale work.
    queue_epoch: u64,
    target: Option<SheetTarget>,
    tabs: Vec<SheetTab>,
    auth_mode: AuthMode,
    connection: ConnectionStatus,
    in_flight: BTreeSet<SyncAction>,
    last_synced_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl Inner {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            base: self.base.clone(),
            pending_ops: self.pending.clone(),
            target: self.target.clone(),
            tabs: self.tabs.clone(),
            auth_mode: self.auth_mode,
            connection: self.connection.clone(),
            in_flight: self.in_flight.iter().map(ToString::to_string).collect(),
            last_synced_at: self.last_synced_at,
            last_error: self.last_error.clone(),
        }
    }
}

pub struct SheetSession {
    user_id: String,
    broker_app: String,
    default_tab: String,
    default_range: String,
    broker: Option<Arc<dyn ConnectionBroker>>,
    service: Option<Arc<dyn SheetsBackend>>,
    inner: Mutex<Inner>,
    events: watch::Sender<SessionSnapshot>,
}

/// Clears the in-flight mark for one action when dropped.
struct InFlight<'a> {
    session: &'a SheetSession,
    action: SyncAction,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let action = self.action;
        self.session.update(|inner| {
            inner.in_flight.remove(&action);
        });
    }
}

impl SheetSession {
    pub fn new(config: &SheetOpsConfig) -> Self {
        let inner = Inner {
            base: SheetState::default(),
            pending: Vec::new(),
            queue_epoch: 0,
            target: None,
            tabs: Vec::new(),
            auth_mode: config.auth_mode,
            connection: ConnectionStatus::default(),
            in_flight: BTreeSet::new(),
            last_synced_at: None,
            last_error: None,
        };
        let (events, _) = watch::channel(inner.snapshot());
        Self {
            user_id: config.user_id.clone(),
            broker_app: config.broker_app.clone(),
            default_tab: config.default_tab.clone(),
            default_range: config.default_range.clone(),
            broker: None,
            service: None,
            inner: Mutex::new(inner),
            events,
        }
    }

    /// Session wired to the reqwest broker client and, when a service token
    /// is configured, the direct Sheets API client.
    pub fn from_config(config: &SheetOpsConfig) -> Self {
        let broker = super::broker::BrokerClient::from_config(config);
        let session = Self::new(config).with_broker(Arc::new(broker));
        match super::sheets_api::SheetsApiClient::from_config(config) {
            Some(client) => session.with_service_backend(Arc::new(client)),
            None => session,
        }
    }

    pub fn with_broker(mut self, broker: Arc<dyn ConnectionBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_service_backend(mut self, backend: Arc<dyn SheetsBackend>) -> Self {
        self.service = Some(backend);
        self
    }

    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let (result, snapshot) = {
            let mut inner = self.inner.lock();
            let result = f(&mut inner);
            (result, inner.snapshot())
        };
        self.events.send_replace(snapshot);
        result
    }

    fn begin(&self, action: SyncAction) -> Result<InFlight<'_>, SyncError> {
        let started = self.update(|inner| {
            let fresh = inner.in_flight.insert(action);
            if fresh {
                inner.last_error = None;
            }
            fresh
        });
        if !started {
            tracing::debug!(action = %action, "action already in flight");
            return Err(SyncError::Busy(action));
        }
        Ok(InFlight {
            session: self,
            action,
        })
    }

    fn fail<T>(&self, action: SyncAction, err: SyncError) -> Result<T, SyncError> {
        tracing::warn!(action = %action, error = %err, "sync action failed");
        let message = err.user_message();
        self.update(|inner| inner.last_error = Some(message));
        Err(err)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.events.subscribe()
    }

    pub fn base(&self) -> SheetState {
        self.inner.lock().base.clone()
    }

    pub fn pending_ops(&self) -> Vec<EditOperation> {
        self.inner.lock().pending.clone()
    }

    /// Base with pending operations applied; recomputed on every call.
    pub fn preview(&self) -> SheetState {
        let (base, pending) = {
            let inner = self.inner.lock();
            (inner.base.clone(), inner.pending.clone())
        };
        let mut preview = apply_ops(&base, &pending);
        preview.pending_ops = pending;
        preview
    }

    pub fn diff(&self) -> SheetDiff {
        diff_states(&self.base(), &self.preview())
    }

    /// Advisory issues for the preview state.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let preview = self.preview();
        validate_rows(&preview.columns, &preview.rows)
    }

    pub fn validate_base(&self) -> Vec<ValidationIssue> {
        let base = self.base();
        validate_rows(&base.columns, &base.rows)
    }

    pub fn target(&self) -> Option<SheetTarget> {
        self.inner.lock().target.clone()
    }

    /// Selects a spreadsheet on the configured default tab and range.
    pub fn select_spreadsheet(&self, spreadsheet_id: impl Into<String>) {
        let target = SheetTarget::new(spreadsheet_id, &self.default_tab, &self.default_range);
        self.select_target(target);
    }

    pub fn select_target(&self, target: SheetTarget) {
        tracing::info!(spreadsheet = %target.spreadsheet_id, tab = %target.tab, "target selected");
        self.update(|inner| {
            inner.target = Some(target);
            inner.tabs.clear();
        });
    }

    /// Switches the worksheet tab of the current target. Returns false when
    /// no spreadsheet is selected.
    pub fn select_tab(&self, tab: impl Into<String>) -> bool {
        let tab = tab.into();
        self.update(|inner| match inner.target.as_mut() {
            Some(target) => {
                target.tab = tab;
                true
            }
            None => false,
        })
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.inner.lock().auth_mode
    }

    pub fn set_auth_mode(&self, mode: AuthMode) {
        tracing::info!(mode = %mode, "auth mode changed");
        self.update(|inner| inner.auth_mode = mode);
    }

    /// Replaces the base wholesale with local data (no remote involved) and
    /// clears pending operations.
    pub fn load(&self, state: SheetState) {
        self.update(|inner| {
            inner.base = state.without_pending();
            inner.pending.clear();
            inner.queue_epoch += 1;
        });
    }

    /// Appends operations to the pending queue in order. User tools and the
    /// agent share this path; only the `author` tag differs.
    pub fn propose(&self, ops: impl IntoIterator<Item = EditOperation>) -> usize {
        let ops: Vec<_> = ops.into_iter().collect();
        let added = ops.len();
        if added == 0 {
            return 0;
        }
        let total = self.update(|inner| {
            inner.pending.extend(ops);
            inner.pending.len()
        });
        tracing::debug!(added, pending = total, "operations proposed");
        added
    }

    /// Drops every pending operation; the base is untouched.
    pub fn discard(&self) -> usize {
        let dropped = self.update(|inner| {
            inner.queue_epoch += 1;
            std::mem::take(&mut inner.pending).len()
        });
        tracing::info!(dropped, "pending operations discarded");
        dropped
    }

    pub async fn check_connection(&self) -> Result<ConnectionStatus, SyncError> {
        let _guard = self.begin(SyncAction::CheckConnection)?;
        match self.refresh_connection().await {
            Ok(status) => Ok(status),
            Err(err) => self.fail(SyncAction::CheckConnection, err),
        }
    }

    async fn refresh_connection(&self) -> Result<ConnectionStatus, SyncError> {
        let broker = self.broker()?;
        let status = broker.check(&self.user_id, &self.broker_app).await?;
        tracing::info!(connected = status.connected, "connection checked");
        self.update(|inner| inner.connection = status.clone());
        Ok(status)
    }

    /// Starts the broker OAuth flow and returns the URL to send the user to.
    pub async fn connect(&self, redirect_uri: &str) -> Result<String, SyncError> {
        let _guard = self.begin(SyncAction::Connect)?;
        let outcome = match self.broker() {
            Ok(broker) => broker
                .initiate(&self.user_id, &self.broker_app, redirect_uri)
                .await
                .map_err(SyncError::from),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(InitiateOutcome::Redirect(url)) => Ok(url),
            Ok(InitiateOutcome::NoIntegration) => {
                self.fail(SyncAction::Connect, SyncError::NoIntegration)
            }
            Ok(InitiateOutcome::NoRedirectUrl) => {
                self.fail(SyncAction::Connect, SyncError::NoRedirectUrl)
            }
            Err(err) => self.fail(SyncAction::Connect, err),
        }
    }

    /// Worksheet tabs of the selected spreadsheet. Remote failures and empty
    /// listings fall back to a single `Sheet1` tab.
    pub async fn list_tabs(&self) -> Result<Vec<SheetTab>, SyncError> {
        let _guard = self.begin(SyncAction::ListTabs)?;
        let Some(target) = self.target() else {
            return self.fail(SyncAction::ListTabs, SyncError::NoTarget);
        };
        let listed = match self.backend().await {
            Ok(backend) => backend
                .list_tabs(&target.spreadsheet_id)
                .await
                .map_err(SyncError::from),
            Err(err) => Err(err),
        };
        let tabs = match listed {
            Ok(tabs) if !tabs.is_empty() => tabs,
            Ok(_) => vec![SheetTab::default_tab()],
            Err(err) => {
                tracing::warn!(error = %err, "listing tabs failed, using default tab");
                vec![SheetTab::default_tab()]
            }
        };
        self.update(|inner| inner.tabs = tabs.clone());
        Ok(tabs)
    }

    /// Replaces the base with the remote contents and clears pending
    /// operations. Returns the number of data rows.
    pub async fn pull(&self) -> Result<usize, SyncError> {
        let _guard = self.begin(SyncAction::Pull)?;
        match self.pull_inner().await {
            Ok(rows) => Ok(rows),
            Err(err) => self.fail(SyncAction::Pull, err),
        }
    }

    async fn pull_inner(&self) -> Result<usize, SyncError> {
        let target = self.target().ok_or(SyncError::NoTarget)?;
        let backend = self.backend().await?;
        let values = backend.read_values(&target).await?;
        let state = grid::state_from_values(&values).ok_or(SyncError::EmptySheet)?;
        let rows = state.rows.len();
        let dropped = self.update(|inner| {
            let dropped = inner.pending.len();
            inner.base = state;
            inner.pending.clear();
            inner.queue_epoch += 1;
            inner.last_synced_at = Some(Utc::now());
            dropped
        });
        tracing::info!(
            spreadsheet = %target.spreadsheet_id,
            tab = %target.tab,
            rows,
            dropped_pending = dropped,
            "pulled sheet"
        );
        Ok(rows)
    }

    /// Overwrites the remote with the preview and promotes it to the base.
    /// Returns the number of rows written, header included.
    pub async fn push(&self) -> Result<usize, SyncError> {
        let _guard = self.begin(SyncAction::Push)?;
        match self.push_inner().await {
            Ok(written) => Ok(written),
            Err(err) => self.fail(SyncAction::Push, err),
        }
    }

    async fn push_inner(&self) -> Result<usize, SyncError> {
        let target = self.target().ok_or(SyncError::NoTarget)?;
        let (effective, pushed, epoch) = {
            let inner = self.inner.lock();
            if inner.pending.is_empty() {
                return Err(SyncError::NoPendingChanges);
            }
            (
                apply_ops(&inner.base, &inner.pending),
                inner.pending.len(),
                inner.queue_epoch,
            )
        };
        let backend = self.backend().await?;
        let values = grid::values_from_state(&effective);
        let written = backend.write_grid(&target, &values).await?;

        let committed = self.update(|inner| {
            inner.last_synced_at = Some(Utc::now());
            if inner.queue_epoch != epoch {
                return false;
            }
            inner.base = effective.without_pending();
            inner.pending.drain(..pushed);
            true
        });
        if !committed {
            tracing::warn!(
                spreadsheet = %target.spreadsheet_id,
                "base replaced during push, keeping the newer base and queue"
            );
        }
        tracing::info!(
            spreadsheet = %target.spreadsheet_id,
            tab = %target.tab,
            ops = pushed,
            rows = written,
            "pushed sheet"
        );
        Ok(written)
    }

    fn broker(&self) -> Result<Arc<dyn ConnectionBroker>, SyncError> {
        self.broker
            .clone()
            .ok_or(SyncError::Remote(RemoteError::NotConfigured("Integration broker")))
    }

    /// Spreadsheet access for the current auth mode. Broker mode looks up
    /// the connected account when none is known yet.
    async fn backend(&self) -> Result<Arc<dyn SheetsBackend>, SyncError> {
        let (mode, account) = {
            let inner = self.inner.lock();
            (inner.auth_mode, inner.connection.account.clone())
        };
        match mode {
            AuthMode::Service => self
                .service
                .clone()
                .ok_or(SyncError::Remote(RemoteError::NotConfigured("Service credential"))),
            AuthMode::Broker => {
                let broker = self.broker()?;
                let account = match account {
                    Some(account) => account,
                    None => self
                        .refresh_connection()
                        .await?
                        .account
                        .ok_or(SyncError::NoConnectedAccount)?,
                };
                Ok(broker.sheets_for(&account))
            }
        }
    }
}
