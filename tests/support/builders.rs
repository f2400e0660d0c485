#![allow(dead_code)]
use sheetops::model::{Column, Row, SheetState};

/// Sheet with slug-style column ids and rows `r1..rN`.
pub fn sheet(columns: &[(&str, &str)], rows: &[&[&str]]) -> SheetState {
    let columns: Vec<Column> = columns
        .iter()
        .map(|(id, label)| Column::new(*id, *label))
        .collect();
    let rows = rows
        .iter()
        .enumerate()
        .map(|(idx, values)| {
            let mut row = Row::new(format!("r{}", idx + 1));
            for (col, value) in columns.iter().zip(values.iter()) {
                row = row.with_cell(col.id.clone(), *value);
            }
            row
        })
        .collect();
    SheetState::new(columns, rows)
}

/// Owned grid of values, header first.
pub fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect())
        .collect()
}

pub fn contacts() -> SheetState {
    sheet(
        &[("name", "Name"), ("email", "Email"), ("amount", "Amount")],
        &[
            &["Ada", "ada@example.com", "10"],
            &["Grace", "GRACE@example.com", "7"],
            &["Linus", "not-an-email", "x"],
        ],
    )
}
