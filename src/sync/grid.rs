//! Conversion between the remote 2D value grid and `SheetState`.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Column, Row, SheetState};

static NON_ALNUM_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("slug regex"));

/// Lowercases, collapses every run of non `[a-z0-9]` characters into one
/// underscore and strips leading or trailing underscores.
pub fn slugify(value: &str) -> String {
    let lowered = value.trim().to_lowercase();
    NON_ALNUM_RUN
        .replace_all(&lowered, "_")
        .trim_matches('_')
        .to_string()
}

/// Builds columns from a header row. Empty labels and slugs that collide
/// with an earlier column fall back to `col_<n>` (1-based position).
pub fn columns_from_header(header: &[String]) -> Vec<Column> {
    let mut seen = HashSet::new();
    header
        .iter()
        .enumerate()
        .map(|(idx, label)| {
            let slug = slugify(label);
            let mut id = if slug.is_empty() || seen.contains(&slug) {
                format!("col_{}", idx + 1)
            } else {
                slug
            };
            let mut suffix = 2;
            while seen.contains(&id) {
                id = format!("col_{}_{suffix}", idx + 1);
                suffix += 1;
            }
            seen.insert(id.clone());

            let label = if label.trim().is_empty() {
                format!("Column {}", idx + 1)
            } else {
                label.clone()
            };
            Column::new(id, label)
        })
        .collect()
}

/// First row is the header; the rest become rows `r1`, `r2`, ... Short
/// rows read missing trailing cells as "". Returns `None` for an empty grid.
pub fn state_from_values(values: &[Vec<String>]) -> Option<SheetState> {
    let (header, data) = values.split_first()?;
    let columns = columns_from_header(header);
    let rows = data
        .iter()
        .enumerate()
        .map(|(row_idx, values)| Row {
            id: format!("r{}", row_idx + 1),
            cells: columns
                .iter()
                .enumerate()
                .map(|(col_idx, col)| {
                    (
                        col.id.clone(),
                        values.get(col_idx).cloned().unwrap_or_default(),
                    )
                })
                .collect(),
        })
        .collect();
    Some(SheetState::new(columns, rows))
}

/// Header row of labels followed by every row's cells in column order.
pub fn values_from_state(state: &SheetState) -> Vec<Vec<String>> {
    let mut grid = Vec::with_capacity(state.rows.len() + 1);
    grid.push(state.columns.iter().map(|col| col.label.clone()).collect());
    for row in &state.rows {
        grid.push(
            state
                .columns
                .iter()
                .map(|col| row.cell(&col.id).to_string())
                .collect(),
        );
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn slugify_collapses_runs() {
        assert_eq!(slugify("  Email Address "), "email_address");
        assert_eq!(slugify("Amount ($)"), "amount");
        assert_eq!(slugify("--Q1/Q2--"), "q1_q2");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn header_fallbacks_are_positional() {
        let cols = columns_from_header(&strings(&["Name", "", "name", "col_2"]));
        let ids: Vec<_> = cols.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["name", "col_2", "col_3", "col_4"]);
        assert_eq!(cols[1].label, "Column 2");
    }
}
