//! Turns agent replies into edit operations.
//!
//! Strategies, first success wins:
//! 1. fenced JSON with an `operations` array,
//! 2. fenced JSON that is a bare array (legacy replies),
//! 3. a "delete row N" scan of the raw text.
//!
//! Parsing never fails: unusable input yields fewer (or zero) operations.

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::protocol::{AgentOp, fenced_json};
use crate::address::column_index;
use crate::model::{Column, Row};
use crate::ops::{Author, EditOperation, OpIdBatch, SortDirection};
use crate::sync::extract::cell_text;

static DELETE_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)delete\s+row\s+(\d+)").expect("delete row regex"));

pub fn parse_agent_response(text: &str, columns: &[Column], rows: &[Row]) -> Vec<EditOperation> {
    parse_agent_response_with(text, columns, rows, &mut OpIdBatch::new())
}

/// Same as [`parse_agent_response`] with a caller-supplied id source.
pub fn parse_agent_response_with(
    text: &str,
    columns: &[Column],
    rows: &[Row],
    ids: &mut OpIdBatch,
) -> Vec<EditOperation> {
    if let Some(block) = fenced_json(text) {
        match serde_json::from_str::<Value>(block) {
            Ok(Value::Object(mut payload)) => {
                if let Some(Value::Array(entries)) = payload.remove("operations") {
                    return from_operations(entries, columns, ids);
                }
                tracing::debug!("json block has no operations array");
            }
            Ok(Value::Array(entries)) => return from_legacy(entries, columns, ids),
            Ok(_) => tracing::debug!("json block is neither an object nor an array"),
            Err(err) => tracing::debug!(error = %err, "json block failed to parse"),
        }
    }
    from_delete_phrases(text, rows, ids)
}

/// Column id at a zero-based position, or `col_<index>` past the end.
fn column_at(columns: &[Column], index: usize) -> String {
    columns
        .get(index)
        .map(|col| col.id.clone())
        .unwrap_or_else(|| format!("col_{index}"))
}

fn column_for_letter(columns: &[Column], letter: &str) -> Option<String> {
    column_index(letter).map(|idx| column_at(columns, idx))
}

fn from_operations(
    entries: Vec<Value>,
    columns: &[Column],
    ids: &mut OpIdBatch,
) -> Vec<EditOperation> {
    let mut ops = Vec::new();
    for (idx, entry) in entries.into_iter().enumerate() {
        let op = match serde_json::from_value::<AgentOp>(entry) {
            Ok(op) => op,
            Err(err) => {
                tracing::debug!(index = idx, error = %err, "skipping unusable operation");
                continue;
            }
        };
        match op {
            AgentOp::CellUpdate { row, column, value } => {
                let Some(column_id) = column_for_letter(columns, &column) else {
                    tracing::debug!(index = idx, column = %column, "bad column letter");
                    continue;
                };
                ops.push(EditOperation::cell_update(
                    ids.next(""),
                    Author::Agent,
                    row.row_id(),
                    column_id,
                    cell_text(&value),
                ));
            }
            AgentOp::RowInsert { values } => {
                let row_id = ids.synthetic_row_id("new", idx);
                for (col_idx, value) in values.iter().enumerate() {
                    ops.push(
                        EditOperation::cell_update(
                            ids.next(&format!("insert-{idx}-{col_idx}")),
                            Author::Agent,
                            row_id.clone(),
                            column_at(columns, col_idx),
                            cell_text(value),
                        )
                        .materializing(),
                    );
                }
            }
            AgentOp::RowDelete { row } => {
                ops.push(EditOperation::row_delete(
                    ids.next("del"),
                    Author::Agent,
                    row.row_id(),
                ));
            }
            AgentOp::Sort {
                sorted_data: Some(grid),
                ..
            } => {
                for (row_idx, values) in grid.iter().enumerate() {
                    for (col_idx, col) in columns.iter().enumerate() {
                        let value = values.get(col_idx).map(cell_text).unwrap_or_default();
                        ops.push(EditOperation::cell_update(
                            ids.next(&format!("sort-{row_idx}-{col_idx}")),
                            Author::Agent,
                            format!("r{}", row_idx + 1),
                            col.id.clone(),
                            value,
                        ));
                    }
                }
            }
            AgentOp::Sort {
                column, direction, ..
            } => {
                let letter = column.as_deref().unwrap_or("A");
                let Some(column_id) = column_for_letter(columns, letter) else {
                    tracing::debug!(index = idx, column = %letter, "bad sort column");
                    continue;
                };
                let direction = direction
                    .as_deref()
                    .and_then(|d| SortDirection::from_str(d.trim()).ok())
                    .unwrap_or_default();
                ops.push(EditOperation::sort(
                    ids.next("sort"),
                    Author::Agent,
                    column_id,
                    direction,
                ));
            }
        }
    }
    ops
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyEntry {
    #[serde(rename = "type")]
    kind: Option<String>,
    row_id: Option<String>,
    column_id: Option<String>,
    column_label: Option<String>,
    old_value: Option<Value>,
    new_value: Option<Value>,
    direction: Option<String>,
    values: Option<Vec<Value>>,
}

fn from_legacy(
    entries: Vec<Value>,
    columns: &[Column],
    ids: &mut OpIdBatch,
) -> Vec<EditOperation> {
    let mut ops = Vec::new();
    for (idx, entry) in entries.into_iter().enumerate() {
        let Ok(entry) = serde_json::from_value::<LegacyEntry>(entry) else {
            tracing::debug!(index = idx, "skipping unusable legacy entry");
            continue;
        };
        let kind = entry.kind.as_deref().unwrap_or("cell_update");
        let id = ids.next("");
        let op = match (kind, entry.row_id, entry.column_id) {
            ("row_insert", _, _) => {
                let row_id = ids.synthetic_row_id("inserted", idx);
                for (col_idx, value) in entry.values.unwrap_or_default().iter().enumerate() {
                    ops.push(
                        EditOperation::cell_update(
                            ids.next(&format!("insert-{idx}-{col_idx}")),
                            Author::Agent,
                            row_id.clone(),
                            column_at(columns, col_idx),
                            cell_text(value),
                        )
                        .materializing(),
                    );
                }
                continue;
            }
            ("cell_update", Some(row_id), Some(column_id)) => EditOperation::CellUpdate {
                id,
                author: Author::Agent,
                row_id,
                column_id,
                old_value: entry.old_value.as_ref().map(cell_text),
                new_value: entry.new_value.as_ref().map(cell_text),
                materialize: false,
            },
            ("row_delete", Some(row_id), _) => EditOperation::row_delete(id, Author::Agent, row_id),
            ("column_add", _, Some(column_id)) => EditOperation::ColumnAdd {
                id,
                author: Author::Agent,
                column_id,
                column_label: entry.column_label,
            },
            ("column_delete", _, Some(column_id)) => EditOperation::ColumnDelete {
                id,
                author: Author::Agent,
                column_id,
            },
            ("sort", _, Some(column_id)) => {
                let direction = entry
                    .direction
                    .as_deref()
                    .and_then(|d| SortDirection::from_str(d.trim()).ok())
                    .unwrap_or_default();
                EditOperation::sort(id, Author::Agent, column_id, direction)
            }
            (other, _, _) => {
                tracing::debug!(index = idx, kind = other, "dropping legacy entry");
                continue;
            }
        };
        ops.push(op);
    }
    ops
}

fn from_delete_phrases(text: &str, rows: &[Row], ids: &mut OpIdBatch) -> Vec<EditOperation> {
    DELETE_ROW
        .captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<usize>().ok())
        .filter_map(|n| rows.get(n.checked_sub(1)?))
        .map(|row| EditOperation::row_delete(ids.next("del"), Author::Agent, row.id.clone()))
        .collect()
}
