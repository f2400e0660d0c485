//! Structural diff between the base state and the preview state.

use std::collections::{HashMap, HashSet};

use schemars::JsonSchema;
use serde::Serialize;

use crate::address;
use crate::model::{Column, Row, SheetState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CellChange {
    pub row_id: String,
    pub column_id: String,
    /// Sheet address in the preview, counting the header as row 1.
    pub address: String,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SheetDiff {
    pub added_columns: Vec<Column>,
    pub removed_columns: Vec<Column>,
    pub added_rows: Vec<Row>,
    pub removed_rows: Vec<Row>,
    pub changed_cells: Vec<CellChange>,
    /// Rows present on both sides appear in a different relative order.
    pub reordered: bool,
}

impl SheetDiff {
    pub fn is_empty(&self) -> bool {
        self.added_columns.is_empty()
            && self.removed_columns.is_empty()
            && self.added_rows.is_empty()
            && self.removed_rows.is_empty()
            && self.changed_cells.is_empty()
            && !self.reordered
    }
}

pub fn diff_states(before: &SheetState, after: &SheetState) -> SheetDiff {
    let before_cols: HashSet<&str> = before.columns.iter().map(|c| c.id.as_str()).collect();
    let after_cols: HashSet<&str> = after.columns.iter().map(|c| c.id.as_str()).collect();
    let before_rows: HashMap<&str, &Row> = before.rows.iter().map(|r| (r.id.as_str(), r)).collect();
    let after_rows: HashSet<&str> = after.rows.iter().map(|r| r.id.as_str()).collect();

    let mut diff = SheetDiff {
        added_columns: after
            .columns
            .iter()
            .filter(|c| !before_cols.contains(c.id.as_str()))
            .cloned()
            .collect(),
        removed_columns: before
            .columns
            .iter()
            .filter(|c| !after_cols.contains(c.id.as_str()))
            .cloned()
            .collect(),
        added_rows: after
            .rows
            .iter()
            .filter(|r| !before_rows.contains_key(r.id.as_str()))
            .cloned()
            .collect(),
        removed_rows: before
            .rows
            .iter()
            .filter(|r| !after_rows.contains(r.id.as_str()))
            .cloned()
            .collect(),
        ..SheetDiff::default()
    };

    for (row_pos, row) in after.rows.iter().enumerate() {
        let Some(old) = before_rows.get(row.id.as_str()) else {
            continue;
        };
        for (col_pos, col) in after.columns.iter().enumerate() {
            let (was, now) = (old.cell(&col.id), row.cell(&col.id));
            if was != now {
                diff.changed_cells.push(CellChange {
                    row_id: row.id.clone(),
                    column_id: col.id.clone(),
                    address: format!("{}{}", address::column_letters(col_pos), row_pos + 2),
                    before: was.to_string(),
                    after: now.to_string(),
                });
            }
        }
    }

    let common_before = before
        .rows
        .iter()
        .map(|r| r.id.as_str())
        .filter(|id| after_rows.contains(id));
    let common_after = after
        .rows
        .iter()
        .map(|r| r.id.as_str())
        .filter(|id| before_rows.contains_key(id));
    diff.reordered = !common_before.eq(common_after);

    diff
}
