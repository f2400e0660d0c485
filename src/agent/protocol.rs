//! Wire shapes exchanged with the hosted agent.
//!
//! Machine-readable payloads travel as a single fenced ```` ```json ````
//! block inside otherwise free-form text: the `operations` payload of an
//! edit reply, the confirmation object of a connect handshake, and (in the
//! other direction) the CONTEXT message describing the sheet.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address;
use crate::model::SheetState;
use crate::sync::remote::SheetTarget;
use crate::validate::infer_column_type;

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```json\s*([\s\S]*?)```").expect("fence regex"));

/// Rows of sample data included in the CONTEXT message.
pub const CONTEXT_SAMPLE_ROWS: usize = 10;

const CONTEXT_NOTE: &str =
    "Row indices are 1-based. Use rowIndex value when specifying row in operations.";

/// Body of the first fenced JSON block, if any.
pub fn fenced_json(text: &str) -> Option<&str> {
    FENCED_JSON
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// 1-based data row reference. Agents send either a number or a numeric
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RowRef {
    Number(u64),
    Text(String),
}

impl RowRef {
    pub fn index(&self) -> Option<u64> {
        match self {
            RowRef::Number(n) => Some(*n),
            RowRef::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Row id the reference points at: row 1 is `r1`, the first data row.
    pub fn row_id(&self) -> String {
        format!("r{self}")
    }
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.index()) {
            (_, Some(n)) => write!(f, "{n}"),
            (RowRef::Text(s), None) => write!(f, "{}", s.trim()),
            (RowRef::Number(n), None) => write!(f, "{n}"),
        }
    }
}

/// One entry of the `operations` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentOp {
    /// Set one cell. `column` is a sheet letter (`A`, `B`, ...).
    CellUpdate {
        row: RowRef,
        column: String,
        value: Value,
    },
    /// Append a row; `values` are in column order.
    RowInsert {
        #[serde(default)]
        values: Vec<Value>,
    },
    RowDelete { row: RowRef },
    /// Either a full rewrite via `sorted_data` or a column sort.
    Sort {
        #[serde(default)]
        column: Option<String>,
        #[serde(default)]
        direction: Option<String>,
        #[serde(default)]
        sorted_data: Option<Vec<Vec<Value>>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentOperationsPayload {
    pub operations: Vec<AgentOp>,
}

/// JSON schema of the `operations` payload, shared with the agent.
pub fn operations_schema() -> Value {
    schemars::schema_for!(AgentOperationsPayload).to_value()
}

#[derive(Debug, Deserialize)]
struct ConnectionConfirmation {
    status: Option<String>,
    confirmed: Option<bool>,
}

/// True when the reply carries `{"status": "CONNECTED", "confirmed": true}`
/// in its fenced JSON block. Any other shape is a refusal.
pub fn is_connection_confirmed(text: &str) -> bool {
    let Some(block) = fenced_json(text) else {
        return false;
    };
    match serde_json::from_str::<ConnectionConfirmation>(block) {
        Ok(reply) => reply.status.as_deref() == Some("CONNECTED") && reply.confirmed == Some(true),
        Err(err) => {
            tracing::debug!(error = %err, "connection reply is not a confirmation object");
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextColumn {
    pub letter: String,
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRow {
    pub row_index: usize,
    pub row_id: String,
    pub values: Vec<String>,
}

/// The CONTEXT message sent when a sheet is attached to the conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetContext {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub spreadsheet_id: String,
    pub spreadsheet_name: String,
    pub tab_name: String,
    pub connected_account_id: String,
    pub columns: Vec<ContextColumn>,
    pub data_types: BTreeMap<String, String>,
    pub current_data: Vec<ContextRow>,
    pub row_count: usize,
    pub note: &'static str,
    pub operations_schema: Value,
}

impl SheetContext {
    pub fn new(target: &SheetTarget, account_id: &str, state: &SheetState) -> Self {
        let spreadsheet_name = target.spreadsheet_name.clone().unwrap_or_else(|| {
            let short: String = target.spreadsheet_id.chars().take(8).collect();
            format!("Sheet {short}...")
        });
        let columns = state
            .columns
            .iter()
            .enumerate()
            .map(|(idx, col)| ContextColumn {
                letter: address::column_letters(idx),
                name: col.label.clone(),
                id: col.id.clone(),
            })
            .collect();
        let data_types = state
            .columns
            .iter()
            .map(|col| {
                (
                    col.label.clone(),
                    infer_column_type(&state.rows, &col.id).to_string(),
                )
            })
            .collect();
        let current_data = state
            .rows
            .iter()
            .take(CONTEXT_SAMPLE_ROWS)
            .enumerate()
            .map(|(idx, row)| ContextRow {
                row_index: idx + 1,
                row_id: row.id.clone(),
                values: state
                    .columns
                    .iter()
                    .map(|col| row.cell(&col.id).to_string())
                    .collect(),
            })
            .collect();

        Self {
            kind: "CONTEXT",
            spreadsheet_id: target.spreadsheet_id.clone(),
            spreadsheet_name,
            tab_name: target.tab.clone(),
            connected_account_id: account_id.to_string(),
            columns,
            data_types,
            current_data,
            row_count: state.rows.len(),
            note: CONTEXT_NOTE,
            operations_schema: operations_schema(),
        }
    }

    /// Compact JSON sent to the agent.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Indented JSON shown in the transcript.
    pub fn to_display(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
