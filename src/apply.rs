//! Pure application of edit operations to a sheet state.
//!
//! `apply_ops` never fails. Operations that reference rows or columns which
//! do not exist (yet, or any more) degrade to no-ops, so previews built from
//! stale agent proposals are always computable.

use std::cmp::Ordering;

use crate::model::{Column, Row, SheetState};
use crate::ops::{EditOperation, SortDirection};

/// Returns `state` with `ops` applied in list order. `state` is left untouched;
/// its pending operations are carried over as-is.
pub fn apply_ops(state: &SheetState, ops: &[EditOperation]) -> SheetState {
    let mut next = state.clone();
    for op in ops {
        apply_one(&mut next, op);
    }
    next
}

fn apply_one(state: &mut SheetState, op: &EditOperation) {
    match op {
        EditOperation::CellUpdate {
            row_id,
            column_id,
            new_value,
            materialize,
            ..
        } => {
            let position = match state.row_position(row_id) {
                Some(position) => position,
                None if *materialize => {
                    state.rows.push(Row::blank(row_id.clone(), &state.columns));
                    state.rows.len() - 1
                }
                None => {
                    tracing::trace!(row_id = %row_id, "cell update targets missing row");
                    return;
                }
            };
            state.rows[position]
                .cells
                .insert(column_id.clone(), new_value.clone().unwrap_or_default());
        }
        EditOperation::ColumnAdd {
            column_id,
            column_label,
            ..
        } => {
            if state.column(column_id).is_some() {
                return;
            }
            let label = column_label.clone().unwrap_or_else(|| column_id.clone());
            state.columns.push(Column::new(column_id.clone(), label));
            for row in &mut state.rows {
                // Cells recorded before the column existed keep their value.
                row.cells.entry(column_id.clone()).or_default();
            }
        }
        EditOperation::ColumnDelete { column_id, .. } => {
            state.columns.retain(|col| &col.id != column_id);
            for row in &mut state.rows {
                row.cells.shift_remove(column_id);
            }
        }
        EditOperation::AddRow { row, .. } => {
            state.rows.push(row.clone());
        }
        EditOperation::RowDelete { row_id, .. } => {
            state.rows.retain(|row| &row.id != row_id);
        }
        EditOperation::Sort {
            column_id,
            direction,
            ..
        } => {
            if state.column(column_id).is_none() {
                tracing::trace!(column_id = %column_id, "sort targets missing column");
                return;
            }
            sort_rows(&mut state.rows, column_id, *direction);
        }
    }
}

/// Stable natural-order sort. `Desc` is the exact reverse of `Asc`, so rows
/// with equal keys come out in reverse original order.
pub fn sort_rows(rows: &mut [Row], column_id: &str, direction: SortDirection) {
    rows.sort_by(|a, b| natural_cmp(a.cell(column_id), b.cell(column_id)));
    if direction == SortDirection::Desc {
        rows.reverse();
    }
}

/// Collation-style comparison where digit runs compare by numeric value
/// ("2" < "10") and letters compare case-insensitively, lowercase first on
/// otherwise equal strings.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let primary = compare_chunks(a, b);
    if primary != Ordering::Equal {
        return primary;
    }
    for (ca, cb) in a.chars().zip(b.chars()) {
        if ca != cb {
            return match (ca.is_lowercase(), cb.is_lowercase()) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                _ => ca.cmp(&cb),
            };
        }
    }
    a.len().cmp(&b.len())
}

#[derive(Debug, PartialEq, Eq)]
enum Chunk<'a> {
    Digits(&'a str),
    Char(char),
}

fn chunks(s: &str) -> impl Iterator<Item = Chunk<'_>> {
    let mut rest = s;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        if first.is_ascii_digit() {
            let end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            let (digits, tail) = rest.split_at(end);
            rest = tail;
            Some(Chunk::Digits(digits))
        } else {
            rest = &rest[first.len_utf8()..];
            Some(Chunk::Char(first))
        }
    })
}

fn char_class(c: char) -> u8 {
    if c.is_alphabetic() { 2 } else { 0 }
}

fn compare_chunks(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a);
    let mut right = chunks(b);
    loop {
        let ord = match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(Chunk::Digits(x)), Some(Chunk::Digits(y))) => compare_digit_runs(x, y),
            (Some(Chunk::Digits(_)), Some(Chunk::Char(c))) => 1.cmp(&char_class(c)),
            (Some(Chunk::Char(c)), Some(Chunk::Digits(_))) => char_class(c).cmp(&1),
            (Some(Chunk::Char(x)), Some(Chunk::Char(y))) => char_class(x)
                .cmp(&char_class(y))
                .then_with(|| x.to_lowercase().cmp(y.to_lowercase())),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
}

fn compare_digit_runs(x: &str, y: &str) -> Ordering {
    let x = x.trim_start_matches('0');
    let y = y.trim_start_matches('0');
    x.len().cmp(&y.len()).then_with(|| x.cmp(y))
}
