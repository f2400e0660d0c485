use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Column, ColumnType, Row, ValidationIssue};

/// Rows sampled per column when inferring its type.
pub const MAX_INFER_ROWS: usize = 20;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"));

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y",
];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

pub fn is_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

pub fn is_number(value: &str) -> bool {
    value.parse::<f64>().map(f64::is_finite).unwrap_or(false)
}

pub fn is_date(value: &str) -> bool {
    if DateTime::parse_from_rfc3339(value).is_ok() {
        return true;
    }
    DATE_FORMATS
        .iter()
        .any(|fmt| NaiveDate::parse_from_str(value, fmt).is_ok())
        || DATETIME_FORMATS
            .iter()
            .any(|fmt| NaiveDateTime::parse_from_str(value, fmt).is_ok())
}

/// First matching bucket in priority order email > number > date > string.
pub fn classify(value: &str) -> ColumnType {
    if is_email(value) {
        ColumnType::Email
    } else if is_number(value) {
        ColumnType::Number
    } else if is_date(value) {
        ColumnType::Date
    } else {
        ColumnType::String
    }
}

fn conforms(kind: ColumnType, value: &str) -> bool {
    match kind {
        ColumnType::Email => is_email(value),
        ColumnType::Number => is_number(value),
        ColumnType::Date => is_date(value),
        ColumnType::String => true,
    }
}

fn mismatch_message(kind: ColumnType) -> Option<&'static str> {
    match kind {
        ColumnType::Email => Some("Invalid email format"),
        ColumnType::Number => Some("Expected a number"),
        ColumnType::Date => Some("Expected a date"),
        ColumnType::String => None,
    }
}

pub fn infer_column_type(rows: &[Row], column_id: &str) -> ColumnType {
    const PRIORITY: [ColumnType; 4] = [
        ColumnType::Email,
        ColumnType::Number,
        ColumnType::Date,
        ColumnType::String,
    ];
    let mut counts = [0usize; 4];

    for row in rows.iter().take(MAX_INFER_ROWS) {
        let value = row.cell(column_id).trim();
        if value.is_empty() {
            continue;
        }
        let bucket = classify(value);
        if let Some(slot) = PRIORITY.iter().position(|kind| *kind == bucket) {
            counts[slot] += 1;
        }
    }

    if counts.iter().all(|count| *count == 0) {
        return ColumnType::String;
    }

    // Strict maximum wins; the first (highest priority) bucket takes ties.
    let mut best = 0;
    for slot in 1..PRIORITY.len() {
        if counts[slot] > counts[best] {
            best = slot;
        }
    }
    PRIORITY[best]
}

/// Flags every non-blank cell that does not match its column's inferred type.
pub fn validate_rows(columns: &[Column], rows: &[Row]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for column in columns {
        let inferred = infer_column_type(rows, &column.id);
        let Some(message) = mismatch_message(inferred) else {
            continue;
        };
        for row in rows {
            let value = row.cell(&column.id).trim();
            if value.is_empty() || conforms(inferred, value) {
                continue;
            }
            issues.push(ValidationIssue {
                id: format!("val-{}-{}", row.id, column.id),
                row_id: row.id.clone(),
                column_id: column.id.clone(),
                message: message.to_string(),
            });
        }
    }
    tracing::debug!(issues = issues.len(), "validation pass complete");
    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_priority() {
        assert_eq!(classify("a@b.com"), ColumnType::Email);
        assert_eq!(classify("1e3"), ColumnType::Number);
        assert_eq!(classify("2024-02-29"), ColumnType::Date);
        assert_eq!(classify("March 3, 2024"), ColumnType::Date);
        assert_eq!(classify("inf"), ColumnType::String);
        assert_eq!(classify("hello"), ColumnType::String);
    }
}
