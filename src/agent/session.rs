//! Conversation state with the hosted agent.
//!
//! One request streams at a time: starting a new one cancels the previous
//! stream before the new request is issued. The transcript, run id and
//! status live behind a lock that is never held across an await; every
//! change is broadcast as an `AgentEvent`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use strum::{Display, IntoStaticStr};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::parser::parse_agent_response;
use super::protocol::{SheetContext, is_connection_confirmed};
use super::stream::{StreamOutcome, fold_stream};
use super::transport::{AgentRequest, AgentTransport, HttpAgentTransport};
use crate::config::SheetOpsConfig;
use crate::errors::AgentError;
use crate::ops::EditOperation;
use crate::sync::SheetSession;

const EVENT_CAPACITY: usize = 256;
/// How long a connect handshake may stream before it counts as refused.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const GENERIC_FAILURE: &str = "Sorry, something went wrong. Please try again.";
const CONNECT_FAILURE: &str = "Failed to connect to the agent. Please try again.";
const DISCONNECTED: &str =
    "Disconnected from sheet. Select another sheet and connect to continue editing.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub streaming: bool,
}

impl ChatMessage {
    fn new(role: MessageRole, content: impl Into<String>, streaming: bool) -> Self {
        let prefix: &'static str = role.into();
        Self {
            id: format!("{prefix}-{}", Uuid::new_v4()),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            streaming,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Thinking,
    Streaming,
    AuthRequired,
}

/// Agent-side sheet connection: `idle -> connecting -> confirmed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectedSheet {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    MessageAdded { message: ChatMessage },
    MessageUpdated { id: String, content: String },
    MessageFinished { id: String },
    MessageRemoved { id: String },
    StatusChanged { status: AgentStatus },
    ConnectionChanged { state: ConnectionState },
    RunIdChanged { run_id: Option<String> },
    OperationsParsed { operations: Vec<EditOperation> },
}

/// How one agent turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Reply {
        text: String,
        operations: Vec<EditOperation>,
    },
    AuthRequired,
    Cancelled,
}

#[derive(Default)]
struct Inner {
    messages: Vec<ChatMessage>,
    run_id: Option<String>,
    status: AgentStatus,
    connection: ConnectionState,
    connected_sheet: Option<ConnectedSheet>,
    cancel: Option<(u64, CancellationToken)>,
    generation: u64,
}

enum Exchange {
    Completed(String),
    AuthRequired,
    Cancelled,
    TimedOut,
}

pub struct AgentSession {
    transport: Arc<dyn AgentTransport>,
    user_id: String,
    inner: Mutex<Inner>,
    events: broadcast::Sender<AgentEvent>,
}

impl AgentSession {
    pub fn new(transport: Arc<dyn AgentTransport>, user_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport,
            user_id: user_id.into(),
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    pub fn from_config(config: &SheetOpsConfig) -> Result<Self, AgentError> {
        let transport = HttpAgentTransport::from_config(config)?;
        Ok(Self::new(Arc::new(transport), config.user_id.clone()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: AgentEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().messages.clone()
    }

    pub fn run_id(&self) -> Option<String> {
        self.inner.lock().run_id.clone()
    }

    pub fn status(&self) -> AgentStatus {
        self.inner.lock().status
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().connection
    }

    pub fn connected_sheet(&self) -> Option<ConnectedSheet> {
        self.inner.lock().connected_sheet.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.lock().cancel.is_some()
    }

    fn set_status(&self, status: AgentStatus) {
        self.inner.lock().status = status;
        self.emit(AgentEvent::StatusChanged { status });
    }

    fn set_connection(&self, state: ConnectionState) {
        self.inner.lock().connection = state;
        self.emit(AgentEvent::ConnectionChanged { state });
    }

    fn push_message(&self, message: ChatMessage) -> String {
        let id = message.id.clone();
        self.inner.lock().messages.push(message.clone());
        self.emit(AgentEvent::MessageAdded { message });
        id
    }

    fn update_message(&self, id: &str, f: impl FnOnce(&mut ChatMessage)) -> Option<ChatMessage> {
        let mut inner = self.inner.lock();
        let message = inner.messages.iter_mut().find(|m| m.id == id)?;
        f(message);
        Some(message.clone())
    }

    fn set_content(&self, id: &str, content: &str) {
        if self
            .update_message(id, |m| m.content = content.to_string())
            .is_some()
        {
            self.emit(AgentEvent::MessageUpdated {
                id: id.to_string(),
                content: content.to_string(),
            });
        }
    }

    fn finish_message(&self, id: &str) {
        if self.update_message(id, |m| m.streaming = false).is_some() {
            self.emit(AgentEvent::MessageFinished { id: id.to_string() });
        }
    }

    fn remove_message(&self, id: &str) {
        let removed = {
            let mut inner = self.inner.lock();
            let before = inner.messages.len();
            inner.messages.retain(|m| m.id != id);
            inner.messages.len() != before
        };
        if removed {
            self.emit(AgentEvent::MessageRemoved { id: id.to_string() });
        }
    }

    /// Aborts the in-flight request, if any.
    pub fn cancel(&self) {
        if let Some((generation, token)) = self.inner.lock().cancel.take() {
            tracing::debug!(generation, "cancelling agent request");
            token.cancel();
        }
    }

    /// Cancels any previous request and registers a token for a new one.
    fn start_request(&self) -> (u64, CancellationToken) {
        let token = CancellationToken::new();
        let (generation, previous) = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            let current = inner.generation;
            let previous = inner.cancel.replace((current, token.clone()));
            (current, previous)
        };
        if let Some((old, previous)) = previous {
            tracing::debug!(generation = old, "superseding in-flight agent request");
            previous.cancel();
        }
        (generation, token)
    }

    fn end_request(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if matches!(inner.cancel, Some((current, _)) if current == generation) {
            inner.cancel = None;
        }
    }

    /// Sends `message` and streams the reply into a new assistant message.
    /// With a `limit`, the request is cancelled once it runs that long.
    async fn exchange(
        &self,
        message: String,
        display: String,
        limit: Option<Duration>,
    ) -> Result<Exchange, AgentError> {
        let (generation, token) = self.start_request();
        let work = self.exchange_inner(message, display, &token);
        tokio::pin!(work);
        let result = match limit {
            None => work.await,
            Some(limit) => tokio::select! {
                result = &mut work => result,
                _ = tokio::time::sleep(limit) => {
                    tracing::warn!(limit_ms = limit.as_millis() as u64, "agent request timed out");
                    token.cancel();
                    match work.await {
                        Ok(Exchange::Cancelled) => Ok(Exchange::TimedOut),
                        other => other,
                    }
                }
            },
        };
        self.end_request(generation);
        if matches!(result, Ok(Exchange::Cancelled | Exchange::TimedOut)) && !self.is_busy() {
            self.set_status(AgentStatus::Idle);
        }
        result
    }

    async fn exchange_inner(
        &self,
        message: String,
        display: String,
        token: &CancellationToken,
    ) -> Result<Exchange, AgentError> {
        self.push_message(ChatMessage::new(MessageRole::User, display, false));
        let reply_id = self.push_message(ChatMessage::new(MessageRole::Assistant, "", true));
        self.set_status(AgentStatus::Thinking);

        let request = AgentRequest {
            message,
            run_id: self.run_id(),
            user_id: self.user_id.clone(),
        };
        let continuing = request.run_id.is_some();
        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => {
                self.finish_message(&reply_id);
                return Ok(Exchange::Cancelled);
            }
            sent = self.transport.send(request) => sent,
        };
        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, continuing, "agent request failed");
                self.set_content(&reply_id, GENERIC_FAILURE);
                self.finish_message(&reply_id);
                self.set_status(AgentStatus::Idle);
                return Err(err);
            }
        };

        if let Some(run_id) = response.run_id {
            self.inner.lock().run_id = Some(run_id.clone());
            self.emit(AgentEvent::RunIdChanged {
                run_id: Some(run_id),
            });
        }

        self.set_status(AgentStatus::Streaming);
        let folded =
            fold_stream(response.body, token, |text| self.set_content(&reply_id, text)).await;
        match folded {
            Ok(StreamOutcome::Completed(text)) => {
                self.finish_message(&reply_id);
                self.set_status(AgentStatus::Idle);
                tracing::info!(chars = text.len(), "agent reply complete");
                Ok(Exchange::Completed(text))
            }
            Ok(StreamOutcome::AuthRequired) => {
                self.remove_message(&reply_id);
                self.set_status(AgentStatus::AuthRequired);
                tracing::info!("agent requires authorization");
                Ok(Exchange::AuthRequired)
            }
            Ok(StreamOutcome::Cancelled(_)) => {
                self.finish_message(&reply_id);
                Ok(Exchange::Cancelled)
            }
            Err(err) => {
                tracing::warn!(error = %err, "agent stream failed");
                self.set_content(&reply_id, GENERIC_FAILURE);
                self.finish_message(&reply_id);
                self.set_status(AgentStatus::Idle);
                Err(err.into())
            }
        }
    }

    /// Sends a user message. Operations are parsed against `columns` and
    /// `rows` (normally the current preview) and returned; they are not
    /// proposed anywhere.
    pub async fn send_message(
        &self,
        text: &str,
        columns: &[crate::model::Column],
        rows: &[crate::model::Row],
    ) -> Result<TurnOutcome, AgentError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AgentError::EmptyMessage);
        }
        match self.exchange(text.to_string(), text.to_string(), None).await? {
            Exchange::Completed(reply) => {
                let operations = parse_agent_response(&reply, columns, rows);
                if !operations.is_empty() {
                    tracing::info!(count = operations.len(), "agent proposed operations");
                    self.emit(AgentEvent::OperationsParsed {
                        operations: operations.clone(),
                    });
                }
                Ok(TurnOutcome::Reply {
                    text: reply,
                    operations,
                })
            }
            Exchange::AuthRequired => Ok(TurnOutcome::AuthRequired),
            Exchange::Cancelled | Exchange::TimedOut => Ok(TurnOutcome::Cancelled),
        }
    }

    /// Sends a user message against the sheet's preview and proposes
    /// whatever operations the reply contains.
    pub async fn run(&self, text: &str, sheet: &SheetSession) -> Result<TurnOutcome, AgentError> {
        let preview = sheet.preview();
        let outcome = self.send_message(text, &preview.columns, &preview.rows).await?;
        if let TurnOutcome::Reply { operations, .. } = &outcome {
            sheet.propose(operations.iter().cloned());
        }
        Ok(outcome)
    }

    /// Attaches a sheet to the conversation by sending its CONTEXT message.
    /// Anything but an explicit confirmation resets the attachment.
    pub async fn connect_sheet(
        &self,
        context: &SheetContext,
    ) -> Result<ConnectionState, AgentError> {
        self.inner.lock().connected_sheet = Some(ConnectedSheet {
            id: context.spreadsheet_id.clone(),
            name: context.spreadsheet_name.clone(),
        });
        self.set_connection(ConnectionState::Connecting);

        let exchange = self
            .exchange(context.to_message(), context.to_display(), Some(CONNECT_TIMEOUT))
            .await;
        let confirmed = match exchange {
            Ok(Exchange::Completed(reply)) => is_connection_confirmed(&reply),
            Ok(Exchange::Cancelled) => {
                self.inner.lock().connected_sheet = None;
                self.set_connection(ConnectionState::Idle);
                return Ok(ConnectionState::Idle);
            }
            Ok(Exchange::AuthRequired | Exchange::TimedOut) => false,
            Err(err) => {
                self.inner.lock().connected_sheet = None;
                self.set_connection(ConnectionState::Failed);
                self.push_message(ChatMessage::new(
                    MessageRole::Assistant,
                    format!("Connection failed: {err}"),
                    false,
                ));
                return Err(err);
            }
        };

        if confirmed {
            tracing::info!(
                spreadsheet = %context.spreadsheet_id,
                "agent confirmed sheet connection"
            );
            self.set_connection(ConnectionState::Confirmed);
            return Ok(ConnectionState::Confirmed);
        }

        tracing::warn!(
            spreadsheet = %context.spreadsheet_id,
            "agent did not confirm sheet connection"
        );
        self.inner.lock().connected_sheet = None;
        self.set_connection(ConnectionState::Failed);
        self.push_message(ChatMessage::new(MessageRole::Assistant, CONNECT_FAILURE, false));
        Ok(ConnectionState::Failed)
    }

    /// Detaches the sheet and starts a fresh conversation.
    pub fn disconnect_sheet(&self) {
        self.cancel();
        let notice = ChatMessage::new(MessageRole::Assistant, DISCONNECTED, false);
        {
            let mut inner = self.inner.lock();
            inner.connected_sheet = None;
            inner.run_id = None;
            inner.messages = vec![notice.clone()];
        }
        self.emit(AgentEvent::RunIdChanged { run_id: None });
        self.emit(AgentEvent::MessageAdded { message: notice });
        self.set_connection(ConnectionState::Idle);
    }

    /// Clears the transcript, the run id and any auth-required state.
    pub fn clear(&self) {
        self.cancel();
        {
            let mut inner = self.inner.lock();
            inner.messages.clear();
            inner.run_id = None;
        }
        self.emit(AgentEvent::RunIdChanged { run_id: None });
        self.set_status(AgentStatus::Idle);
    }

    pub fn clear_auth_required(&self) {
        let cleared = {
            let mut inner = self.inner.lock();
            let was = inner.status == AgentStatus::AuthRequired;
            if was {
                inner.status = AgentStatus::Idle;
            }
            was
        };
        if cleared {
            self.emit(AgentEvent::StatusChanged {
                status: AgentStatus::Idle,
            });
        }
    }
}
