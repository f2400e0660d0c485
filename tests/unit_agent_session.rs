use std::sync::Arc;

use anyhow::Result;
use assert_matches::assert_matches;
use sheetops::agent::{
    AgentEvent, AgentSession, AgentStatus, ConnectionState, MessageRole, SheetContext, TurnOutcome,
};
use sheetops::errors::{AgentError, RemoteError};
use sheetops::ops::EditOperation;
use sheetops::sync::{SheetSession, SheetTarget};

mod support;

use support::{Scripted, ScriptedAgent};

const CONFIRMED: &str = "Connected.\n```json\n{\"status\":\"CONNECTED\",\"confirmed\":true}\n```";

fn agent(script: impl IntoIterator<Item = Scripted>) -> (AgentSession, Arc<ScriptedAgent>) {
    let transport = Arc::new(ScriptedAgent::new(script));
    (AgentSession::new(transport.clone(), "tester"), transport)
}

fn context() -> SheetContext {
    let target = SheetTarget::new("1AbCdEfGhIjK", "Sheet1", "A1:Z1000");
    SheetContext::new(&target, "acct-1", &support::builders::contacts())
}

#[tokio::test(flavor = "current_thread")]
async fn streamed_reply_becomes_one_assistant_message() -> Result<()> {
    let (session, transport) =
        agent([Scripted::text(&["Hel", "lo ", "there"]).with_run_id("run-9")]);
    let mut events = session.subscribe();
    let sheet = support::builders::contacts();

    let outcome = session.send_message("  hi  ", &sheet.columns, &sheet.rows).await?;

    assert_matches!(outcome, TurnOutcome::Reply { text, operations } => {
        assert_eq!(text, "Hello there");
        assert!(operations.is_empty());
    });
    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[0].content, "hi");
    assert!(messages[0].id.starts_with("user-"));
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, "Hello there");
    assert!(!messages[1].streaming);
    assert_eq!(session.run_id().as_deref(), Some("run-9"));
    assert_eq!(session.status(), AgentStatus::Idle);
    assert_eq!(transport.requests()[0].run_id, None);
    assert_eq!(transport.requests()[0].user_id, "tester");

    let mut updates = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let AgentEvent::MessageUpdated { content, .. } = event {
            updates.push(content);
        }
    }
    assert_eq!(updates, ["Hel", "Hello ", "Hello there"]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn follow_up_turns_reuse_the_run_id() -> Result<()> {
    let (session, transport) = agent([
        Scripted::text(&["one"]).with_run_id("run-1"),
        Scripted::text(&["two"]),
    ]);

    session.send_message("first", &[], &[]).await?;
    session.send_message("second", &[], &[]).await?;

    let requests = transport.requests();
    assert_eq!(requests[1].run_id.as_deref(), Some("run-1"));
    assert_eq!(session.run_id().as_deref(), Some("run-1"));

    session.clear();
    assert!(session.messages().is_empty());
    assert_eq!(session.run_id(), None);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn empty_messages_are_rejected() {
    let (session, transport) = agent([]);
    let err = session.send_message("   ", &[], &[]).await.unwrap_err();
    assert_eq!(err, AgentError::EmptyMessage);
    assert!(transport.requests().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn auth_required_removes_the_placeholder() -> Result<()> {
    let (session, _) = agent([Scripted::text(&["AUTH_", "REQUIRED"])]);

    let outcome = session.send_message("edit it", &[], &[]).await?;

    assert_eq!(outcome, TurnOutcome::AuthRequired);
    assert_eq!(session.status(), AgentStatus::AuthRequired);
    let messages = session.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, MessageRole::User);

    session.clear_auth_required();
    assert_eq!(session.status(), AgentStatus::Idle);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn transport_errors_leave_an_apology() {
    let (session, _) = agent([Scripted::Fail(RemoteError::Http {
        status: 502,
        detail: "bad gateway".into(),
    })]);

    let err = session.send_message("hi", &[], &[]).await.unwrap_err();

    assert_matches!(err, AgentError::Transport(RemoteError::Http { status: 502, .. }));
    let messages = session.messages();
    assert_eq!(
        messages[1].content,
        "Sorry, something went wrong. Please try again."
    );
    assert_eq!(session.status(), AgentStatus::Idle);
    assert!(!session.is_busy());
}

#[tokio::test(flavor = "current_thread")]
async fn cancel_stops_a_hanging_stream() -> Result<()> {
    let (session, _) = agent([Scripted::text(&["partial"]).hanging()]);

    let (outcome, _) = tokio::join!(session.send_message("hi", &[], &[]), async {
        tokio::task::yield_now().await;
        session.cancel();
    });

    assert_eq!(outcome?, TurnOutcome::Cancelled);
    let messages = session.messages();
    assert_eq!(messages[1].content, "partial");
    assert!(!messages[1].streaming);
    assert!(!session.is_busy());
    assert_eq!(session.status(), AgentStatus::Idle);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn new_message_supersedes_the_in_flight_one() -> Result<()> {
    let (session, _) = agent([
        Scripted::text(&["partial"]).hanging(),
        Scripted::text(&["done"]),
    ]);

    let (first, second) = tokio::join!(session.send_message("first", &[], &[]), async {
        tokio::task::yield_now().await;
        session.send_message("second", &[], &[]).await
    });

    assert_eq!(first?, TurnOutcome::Cancelled);
    assert_matches!(second?, TurnOutcome::Reply { text, .. } if text == "done");
    let messages = session.messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[1].content, "partial");
    assert!(!messages[1].streaming);
    assert_eq!(messages[2].content, "second");
    assert_eq!(messages[3].content, "done");
    assert!(!messages[3].streaming);
    assert!(!session.is_busy());
    assert_eq!(session.status(), AgentStatus::Idle);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn run_proposes_parsed_operations_on_the_sheet() -> Result<()> {
    let reply = "Updated.\n```json\n{\"operations\":[{\"type\":\"cell_update\",\"row\":3,\"column\":\"B\",\"value\":\"linus@example.com\"}]}\n```";
    let (session, _) = agent([Scripted::text(&[reply])]);
    let sheet = SheetSession::new(&support::test_config());
    sheet.load(support::builders::contacts());

    let outcome = session.run("fix the bad email", &sheet).await?;

    assert_matches!(outcome, TurnOutcome::Reply { operations, .. } if operations.len() == 1);
    assert_matches!(
        &sheet.pending_ops()[..],
        [EditOperation::CellUpdate { row_id, column_id, .. }] => {
            assert_eq!(row_id, "r3");
            assert_eq!(column_id, "email");
        }
    );
    assert!(sheet.validate().iter().all(|issue| issue.column_id != "email"));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn connect_sheet_confirms_on_handshake() -> Result<()> {
    let (session, transport) = agent([Scripted::text(&[CONFIRMED])]);

    let state = session.connect_sheet(&context()).await?;

    assert_eq!(state, ConnectionState::Confirmed);
    assert_eq!(session.connection_state(), ConnectionState::Confirmed);
    let sheet = session.connected_sheet().expect("connected sheet");
    assert_eq!(sheet.name, "Sheet 1AbCdEfG...");

    let sent: serde_json::Value = serde_json::from_str(&transport.requests()[0].message)?;
    assert_eq!(sent["type"], "CONTEXT");
    assert_eq!(sent["columns"][1]["letter"], "B");
    assert_eq!(sent["currentData"][0]["rowIndex"], 1);
    assert_eq!(sent["rowCount"], 3);
    assert!(sent["operationsSchema"].is_object());
    // The transcript shows the indented form.
    assert!(session.messages()[0].content.contains('\n'));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn connect_sheet_without_confirmation_fails_softly() -> Result<()> {
    let (session, _) = agent([Scripted::text(&["I can't see that sheet."])]);

    let state = session.connect_sheet(&context()).await?;

    assert_eq!(state, ConnectionState::Failed);
    assert!(session.connected_sheet().is_none());
    let last = session.messages().pop().expect("message");
    assert_eq!(last.content, "Failed to connect to the agent. Please try again.");
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn connect_sheet_transport_failure() {
    let (session, _) = agent([Scripted::Fail(RemoteError::Network("refused".into()))]);

    let err = session.connect_sheet(&context()).await.unwrap_err();

    assert_matches!(err, AgentError::Transport(RemoteError::Network(_)));
    assert_eq!(session.connection_state(), ConnectionState::Failed);
    let last = session.messages().pop().expect("message");
    assert!(last.content.starts_with("Connection failed: "));
}

#[tokio::test(flavor = "current_thread")]
async fn disconnect_resets_the_conversation() -> Result<()> {
    let (session, _) = agent([Scripted::text(&[CONFIRMED]).with_run_id("run-3")]);
    session.connect_sheet(&context()).await?;

    session.disconnect_sheet();

    assert_eq!(session.connection_state(), ConnectionState::Idle);
    assert!(session.connected_sheet().is_none());
    assert_eq!(session.run_id(), None);
    let messages = session.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].content,
        "Disconnected from sheet. Select another sheet and connect to continue editing."
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn connect_sheet_times_out_on_a_silent_agent() -> Result<()> {
    let (session, _) = agent([Scripted::text(&["Checking"]).hanging()]);

    let state = session.connect_sheet(&context()).await?;

    assert_eq!(state, ConnectionState::Failed);
    assert!(!session.is_busy());
    assert_eq!(session.status(), AgentStatus::Idle);
    let messages = session.messages();
    assert_eq!(messages[1].content, "Checking");
    assert!(!messages[1].streaming);
    assert_eq!(
        messages.last().map(|m| m.content.as_str()),
        Some("Failed to connect to the agent. Please try again.")
    );
    Ok(())
}
