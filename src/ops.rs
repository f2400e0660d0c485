use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::model::Row;

pub mod tools;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Author {
    User,
    Agent,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    CellUpdate,
    ColumnAdd,
    ColumnDelete,
    AddRow,
    RowDelete,
    Sort,
}

/// One atomic, append-only mutation proposed against a sheet.
///
/// Construction is order-independent; application is not. References to
/// rows or columns that do not exist at application time are tolerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditOperation {
    #[serde(rename_all = "camelCase")]
    CellUpdate {
        id: String,
        author: Author,
        row_id: String,
        column_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_value: Option<String>,
        /// Append a blank row when `row_id` is absent instead of ignoring the update.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        materialize: bool,
    },
    #[serde(rename_all = "camelCase")]
    ColumnAdd {
        id: String,
        author: Author,
        column_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column_label: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ColumnDelete {
        id: String,
        author: Author,
        column_id: String,
    },
    #[serde(rename_all = "camelCase")]
    AddRow { id: String, author: Author, row: Row },
    #[serde(rename_all = "camelCase")]
    RowDelete {
        id: String,
        author: Author,
        row_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Sort {
        id: String,
        author: Author,
        column_id: String,
        #[serde(default)]
        direction: SortDirection,
    },
}

impl EditOperation {
    pub fn cell_update(
        id: impl Into<String>,
        author: Author,
        row_id: impl Into<String>,
        column_id: impl Into<String>,
        new_value: impl Into<String>,
    ) -> Self {
        EditOperation::CellUpdate {
            id: id.into(),
            author,
            row_id: row_id.into(),
            column_id: column_id.into(),
            old_value: None,
            new_value: Some(new_value.into()),
            materialize: false,
        }
    }

    pub fn row_delete(id: impl Into<String>, author: Author, row_id: impl Into<String>) -> Self {
        EditOperation::RowDelete {
            id: id.into(),
            author,
            row_id: row_id.into(),
        }
    }

    pub fn sort(
        id: impl Into<String>,
        author: Author,
        column_id: impl Into<String>,
        direction: SortDirection,
    ) -> Self {
        EditOperation::Sort {
            id: id.into(),
            author,
            column_id: column_id.into(),
            direction,
        }
    }

    /// Sets `old_value` on a cell update; other variants are returned unchanged.
    pub fn with_old_value(mut self, value: impl Into<String>) -> Self {
        if let EditOperation::CellUpdate { old_value, .. } = &mut self {
            *old_value = Some(value.into());
        }
        self
    }

    /// Marks a cell update as allowed to create its target row.
    pub fn materializing(mut self) -> Self {
        if let EditOperation::CellUpdate { materialize, .. } = &mut self {
            *materialize = true;
        }
        self
    }

    pub fn id(&self) -> &str {
        match self {
            EditOperation::CellUpdate { id, .. }
            | EditOperation::ColumnAdd { id, .. }
            | EditOperation::ColumnDelete { id, .. }
            | EditOperation::AddRow { id, .. }
            | EditOperation::RowDelete { id, .. }
            | EditOperation::Sort { id, .. } => id,
        }
    }

    pub fn author(&self) -> Author {
        match self {
            EditOperation::CellUpdate { author, .. }
            | EditOperation::ColumnAdd { author, .. }
            | EditOperation::ColumnDelete { author, .. }
            | EditOperation::AddRow { author, .. }
            | EditOperation::RowDelete { author, .. }
            | EditOperation::Sort { author, .. } => *author,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            EditOperation::CellUpdate { .. } => OperationKind::CellUpdate,
            EditOperation::ColumnAdd { .. } => OperationKind::ColumnAdd,
            EditOperation::ColumnDelete { .. } => OperationKind::ColumnDelete,
            EditOperation::AddRow { .. } => OperationKind::AddRow,
            EditOperation::RowDelete { .. } => OperationKind::RowDelete,
            EditOperation::Sort { .. } => OperationKind::Sort,
        }
    }
}

/// Last stamp handed to a batch. Stamps only move forward.
static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// Time-prefixed id generator for one batch of operations.
///
/// Ids look like `op-<millis>-<label>-<n>`; `n` increases for every id
/// handed out, so ids never repeat within a batch. Batches made with
/// [`OpIdBatch::new`] get strictly increasing stamps, so two batches
/// created in the same millisecond still differ.
#[derive(Debug, Clone)]
pub struct OpIdBatch {
    stamp: i64,
    issued: usize,
}

impl OpIdBatch {
    pub fn new() -> Self {
        let now = Utc::now().timestamp_millis();
        let previous = LAST_STAMP
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        Self::with_stamp(now.max(previous + 1))
    }

    pub fn with_stamp(stamp: i64) -> Self {
        Self { stamp, issued: 0 }
    }

    pub fn stamp(&self) -> i64 {
        self.stamp
    }

    pub fn next(&mut self, label: &str) -> String {
        let n = self.issued;
        self.issued += 1;
        if label.is_empty() {
            format!("op-{}-{n}", self.stamp)
        } else {
            format!("op-{}-{label}-{n}", self.stamp)
        }
    }

    /// Row id for a row that only exists once an insert is applied.
    pub fn synthetic_row_id(&self, flavor: &str, index: usize) -> String {
        format!("r-{flavor}-{}-{index}", self.stamp)
    }
}

impl Default for OpIdBatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cell_update_wire_format_is_camel_case_and_tagged() {
        let op = EditOperation::cell_update("op-1", Author::User, "r1", "name", "X")
            .with_old_value("Alice");
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "cell_update",
                "id": "op-1",
                "author": "user",
                "rowId": "r1",
                "columnId": "name",
                "oldValue": "Alice",
                "newValue": "X"
            })
        );
    }

    #[test]
    fn sort_direction_defaults_to_asc() {
        let op: EditOperation = serde_json::from_value(json!({
            "type": "sort",
            "id": "op-2",
            "author": "agent",
            "columnId": "amount"
        }))
        .unwrap();
        assert_eq!(
            op,
            EditOperation::sort("op-2", Author::Agent, "amount", SortDirection::Asc)
        );
        assert_eq!(op.kind().to_string(), "sort");
    }

    #[test]
    fn id_batch_never_repeats() {
        let mut ids = OpIdBatch::with_stamp(42);
        let a = ids.next("del");
        let b = ids.next("del");
        assert_eq!(a, "op-42-del-0");
        assert_eq!(b, "op-42-del-1");
        assert_eq!(ids.synthetic_row_id("new", 3), "r-new-42-3");
    }

    #[test]
    fn fresh_batches_get_distinct_stamps() {
        let stamps: Vec<i64> = (0..50).map(|_| OpIdBatch::new().stamp()).collect();
        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
