//! Manual editing actions.
//!
//! Each action reads the current preview and returns the operations to
//! propose, authored by the user. Nothing here mutates state.

use std::collections::HashSet;

use crate::model::{Row, SheetState};
use crate::ops::{Author, EditOperation, OpIdBatch, SortDirection};
use crate::sync::grid::slugify;

/// Deletes every row whose value in `column_id` already appeared in an
/// earlier row. Blank values never count as duplicates.
pub fn remove_duplicates(preview: &SheetState, column_id: &str) -> Vec<EditOperation> {
    let mut ids = OpIdBatch::new();
    let mut seen = HashSet::new();
    let mut ops = Vec::new();
    for row in &preview.rows {
        let value = row.cell(column_id);
        if value.trim().is_empty() {
            continue;
        }
        if !seen.insert(value) {
            ops.push(EditOperation::row_delete(
                ids.next("dedupe"),
                Author::User,
                row.id.clone(),
            ));
        }
    }
    tracing::debug!(column = column_id, duplicates = ops.len(), "remove duplicates");
    ops
}

/// Lowercases every value in `column_id` that is not already lowercase.
pub fn normalize_emails(preview: &SheetState, column_id: &str) -> Vec<EditOperation> {
    let mut ids = OpIdBatch::new();
    preview
        .rows
        .iter()
        .filter_map(|row| {
            let value = row.cell(column_id);
            let lower = value.trim().to_lowercase();
            (lower != value).then(|| {
                EditOperation::cell_update(
                    ids.next("email"),
                    Author::User,
                    row.id.clone(),
                    column_id,
                    lower,
                )
                .with_old_value(value)
            })
        })
        .collect()
}

/// Adds a column labelled `label`. The id is the label's slug, or
/// `col_<millis>` when the slug is empty or taken.
pub fn add_column(preview: &SheetState, label: &str) -> EditOperation {
    let mut ids = OpIdBatch::new();
    let slug = slugify(label);
    let column_id = if slug.is_empty() || preview.column(&slug).is_some() {
        format!("col_{}", ids.stamp())
    } else {
        slug
    };
    let label = label.trim();
    EditOperation::ColumnAdd {
        id: ids.next("col"),
        author: Author::User,
        column_id,
        column_label: (!label.is_empty()).then(|| label.to_string()),
    }
}

pub fn delete_column(column_id: &str) -> EditOperation {
    EditOperation::ColumnDelete {
        id: OpIdBatch::new().next("col"),
        author: Author::User,
        column_id: column_id.to_string(),
    }
}

/// Appends an empty row. Without an explicit id the row becomes
/// `r<len+1>`, bumped past any id already in use.
pub fn add_row(preview: &SheetState, row_id: Option<&str>) -> EditOperation {
    let row_id = match row_id {
        Some(id) => id.to_string(),
        None => {
            let mut n = preview.rows.len() + 1;
            while preview.row(&format!("r{n}")).is_some() {
                n += 1;
            }
            format!("r{n}")
        }
    };
    EditOperation::AddRow {
        id: OpIdBatch::new().next("row"),
        author: Author::User,
        row: Row::blank(row_id, &preview.columns),
    }
}

pub fn delete_row(row_id: &str) -> EditOperation {
    EditOperation::row_delete(OpIdBatch::new().next("del"), Author::User, row_id)
}

pub fn sort(column_id: &str, direction: SortDirection) -> EditOperation {
    EditOperation::sort(OpIdBatch::new().next("sort"), Author::User, column_id, direction)
}

/// Keeps only rows whose trimmed value in `column_id` equals `keep`.
pub fn filter_keep(preview: &SheetState, column_id: &str, keep: &str) -> Vec<EditOperation> {
    let mut ids = OpIdBatch::new();
    let keep = keep.trim();
    preview
        .rows
        .iter()
        .filter(|row| row.cell(column_id).trim() != keep)
        .map(|row| EditOperation::row_delete(ids.next("filter"), Author::User, row.id.clone()))
        .collect()
}

/// A manual cell edit, or `None` when `value` equals what the preview
/// already shows.
pub fn commit_cell(
    preview: &SheetState,
    row_id: &str,
    column_id: &str,
    value: &str,
) -> Option<EditOperation> {
    let current = preview.cell(row_id, column_id).unwrap_or_default();
    if current == value {
        return None;
    }
    Some(
        EditOperation::cell_update(
            OpIdBatch::new().next("edit"),
            Author::User,
            row_id,
            column_id,
            value,
        )
        .with_old_value(current),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Column;

    #[test]
    fn add_column_falls_back_when_slug_is_taken() {
        let state = SheetState::new(vec![Column::new("email", "Email")], Vec::new());
        let EditOperation::ColumnAdd { column_id, .. } = add_column(&state, "E-mail") else {
            panic!("expected column_add");
        };
        assert_eq!(column_id, "e_mail");
        let EditOperation::ColumnAdd { column_id, .. } = add_column(&state, " Email ") else {
            panic!("expected column_add");
        };
        assert!(column_id.starts_with("col_"));
    }
}
