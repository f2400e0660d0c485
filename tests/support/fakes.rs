#![allow(dead_code)]
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::sync::Notify;

use sheetops::agent::{AgentRequest, AgentResponse, AgentTransport};
use sheetops::errors::{AgentError, RemoteError};
use sheetops::sync::{
    ConnectedAccount, ConnectionBroker, ConnectionStatus, InitiateOutcome, SheetTab, SheetTarget,
    SheetsBackend,
};

/// In-memory spreadsheet. Writes replace the stored values.
pub struct FakeSheets {
    pub values: Mutex<Vec<Vec<String>>>,
    pub writes: Mutex<Vec<(SheetTarget, Vec<Vec<String>>)>>,
    pub reads: AtomicUsize,
    pub tabs: Mutex<Result<Vec<SheetTab>, RemoteError>>,
    pub fail_next: Mutex<Option<RemoteError>>,
    /// When set, writes wait for a notification before completing.
    pub write_gate: Option<Arc<Notify>>,
}

impl FakeSheets {
    pub fn with_values(values: Vec<Vec<String>>) -> Self {
        Self {
            values: Mutex::new(values),
            writes: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            tabs: Mutex::new(Ok(Vec::new())),
            fail_next: Mutex::new(None),
            write_gate: None,
        }
    }

    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.write_gate = Some(gate.clone());
        (self, gate)
    }

    pub fn fail_next(&self, err: RemoteError) {
        *self.fail_next.lock() = Some(err);
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    fn take_failure(&self) -> Result<(), RemoteError> {
        match self.fail_next.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SheetsBackend for FakeSheets {
    async fn read_values(&self, _target: &SheetTarget) -> Result<Vec<Vec<String>>, RemoteError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        Ok(self.values.lock().clone())
    }

    async fn write_grid(
        &self,
        target: &SheetTarget,
        grid: &[Vec<String>],
    ) -> Result<usize, RemoteError> {
        if let Some(gate) = &self.write_gate {
            gate.notified().await;
        }
        self.take_failure()?;
        *self.values.lock() = grid.to_vec();
        self.writes.lock().push((target.clone(), grid.to_vec()));
        Ok(grid.len())
    }

    async fn list_tabs(&self, _spreadsheet_id: &str) -> Result<Vec<SheetTab>, RemoteError> {
        self.tabs.lock().clone()
    }
}

pub struct FakeBroker {
    pub status: Mutex<Result<ConnectionStatus, RemoteError>>,
    pub outcome: Mutex<Result<InitiateOutcome, RemoteError>>,
    pub sheets: Arc<FakeSheets>,
    pub checks: AtomicUsize,
    pub initiated: Mutex<Vec<String>>,
}

impl FakeBroker {
    pub fn connected(sheets: Arc<FakeSheets>) -> Self {
        Self::with_status(
            ConnectionStatus {
                connected: true,
                account: Some(ConnectedAccount {
                    id: "acct-1".to_string(),
                    app: Some("googlesheets".to_string()),
                }),
            },
            sheets,
        )
    }

    pub fn disconnected(sheets: Arc<FakeSheets>) -> Self {
        Self::with_status(ConnectionStatus::default(), sheets)
    }

    fn with_status(status: ConnectionStatus, sheets: Arc<FakeSheets>) -> Self {
        Self {
            status: Mutex::new(Ok(status)),
            outcome: Mutex::new(Ok(InitiateOutcome::Redirect(
                "https://auth.example/consent".to_string(),
            ))),
            sheets,
            checks: AtomicUsize::new(0),
            initiated: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ConnectionBroker for FakeBroker {
    async fn check(&self, _user_id: &str, _app: &str) -> Result<ConnectionStatus, RemoteError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.status.lock().clone()
    }

    async fn initiate(
        &self,
        user_id: &str,
        _app: &str,
        redirect_uri: &str,
    ) -> Result<InitiateOutcome, RemoteError> {
        self.initiated
            .lock()
            .push(format!("{user_id} -> {redirect_uri}"));
        self.outcome.lock().clone()
    }

    fn sheets_for(&self, _account: &ConnectedAccount) -> Arc<dyn SheetsBackend> {
        self.sheets.clone()
    }
}

/// One scripted agent reply.
pub enum Scripted {
    Reply {
        run_id: Option<String>,
        chunks: Vec<Result<Vec<u8>, RemoteError>>,
        /// Keep the stream open after the last chunk.
        hang: bool,
    },
    Fail(RemoteError),
}

impl Scripted {
    pub fn text(chunks: &[&str]) -> Self {
        Scripted::Reply {
            run_id: None,
            chunks: chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect(),
            hang: false,
        }
    }

    pub fn with_run_id(self, id: &str) -> Self {
        match self {
            Scripted::Reply { chunks, hang, .. } => Scripted::Reply {
                run_id: Some(id.to_string()),
                chunks,
                hang,
            },
            other => other,
        }
    }

    pub fn hanging(self) -> Self {
        match self {
            Scripted::Reply { run_id, chunks, .. } => Scripted::Reply {
                run_id,
                chunks,
                hang: true,
            },
            other => other,
        }
    }
}

/// Agent transport replaying scripted replies in order.
#[derive(Default)]
pub struct ScriptedAgent {
    pub script: Mutex<VecDeque<Scripted>>,
    pub requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AgentTransport for ScriptedAgent {
    async fn send(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
        self.requests.lock().push(request);
        let next = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Scripted::text(&[]));
        match next {
            Scripted::Fail(err) => Err(err.into()),
            Scripted::Reply {
                run_id,
                chunks,
                hang,
            } => {
                let body = stream::iter(chunks);
                let body = if hang {
                    body.chain(stream::pending()).boxed()
                } else {
                    body.boxed()
                };
                Ok(AgentResponse { run_id, body })
            }
        }
    }
}
