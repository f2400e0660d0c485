//! Shape adapters for broker responses.
//!
//! The broker wraps action results inconsistently, so every response type
//! gets a priority-ordered list of JSON pointers. The first pointer that
//! resolves to a structurally valid value wins; nothing downstream ever
//! looks at the raw shape.

use serde_json::Value;

use super::remote::{ConnectedAccount, SheetTab};

/// Pointers to the cell grid of a `GOOGLESHEETS_BATCH_GET` result.
pub const VALUE_RULES: &[&str] = &[
    "/data/values",
    "/data/valueRanges/0/values",
    "/data/response_data/valueRanges/0/values",
];

/// Pointers to the sheet list of a `GOOGLESHEETS_GET_SPREADSHEET_INFO` result.
pub const TAB_RULES: &[&str] = &["/data/sheets", "/data/response_data/sheets"];

const BODY_PREVIEW_CHARS: usize = 300;

fn first_match<'a, T>(
    body: &'a Value,
    rules: &[&str],
    mut convert: impl FnMut(&'a Value) -> Option<T>,
) -> Option<T> {
    rules
        .iter()
        .filter_map(|pointer| body.pointer(pointer))
        .find_map(|candidate| convert(candidate))
}

/// Renders a cell the way the sheet displays it: strings verbatim, `null`
/// as blank, anything else as its JSON text.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_grid(value: &Value) -> Option<Vec<Vec<String>>> {
    value
        .as_array()?
        .iter()
        .map(|row| row.as_array().map(|cells| cells.iter().map(cell_text).collect()))
        .collect()
}

/// Cell grid of a batch-get response. A response that matches no rule is
/// an empty grid, which is a valid (empty) sheet.
pub fn extract_values(body: &Value) -> Vec<Vec<String>> {
    first_match(body, VALUE_RULES, as_grid).unwrap_or_default()
}

fn as_tabs(value: &Value) -> Option<Vec<SheetTab>> {
    let sheets = value.as_array()?;
    if sheets.is_empty() {
        return None;
    }
    Some(
        sheets
            .iter()
            .map(|sheet| SheetTab {
                id: sheet
                    .pointer("/properties/sheetId")
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
                name: sheet
                    .pointer("/properties/title")
                    .and_then(Value::as_str)
                    .unwrap_or("Sheet1")
                    .to_string(),
            })
            .collect(),
    )
}

pub fn extract_tabs(body: &Value) -> Vec<SheetTab> {
    first_match(body, TAB_RULES, as_tabs).unwrap_or_default()
}

fn is_sheets_app(item: &Value) -> bool {
    ["appName", "appUniqueId"].iter().any(|key| {
        item.get(*key)
            .and_then(Value::as_str)
            .map(|name| {
                let name = name.to_lowercase();
                name.contains("sheet") || name.contains("google")
            })
            .unwrap_or(false)
    })
}

/// First ACTIVE Google Sheets account in a connected-accounts listing.
pub fn extract_active_account(body: &Value) -> Option<ConnectedAccount> {
    body.get("items")?
        .as_array()?
        .iter()
        .filter(|item| is_sheets_app(item))
        .filter(|item| item.get("status").and_then(Value::as_str) == Some("ACTIVE"))
        .find_map(|item| {
            let id = item.get("id").and_then(Value::as_str)?;
            Some(ConnectedAccount {
                id: id.to_string(),
                app: item
                    .get("appName")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        })
}

pub fn extract_integration_id(body: &Value) -> Option<String> {
    body.pointer("/items/0/id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub fn extract_redirect_url(body: &Value) -> Option<String> {
    ["/redirectUrl", "/redirect_url", "/data/redirectUrl"]
        .iter()
        .filter_map(|pointer| body.pointer(pointer))
        .find_map(Value::as_str)
        .filter(|url| !url.trim().is_empty())
        .map(str::to_string)
}

/// Action responses may report failure inside a 200 body.
pub fn action_failure(body: &Value) -> Option<String> {
    let failed = ["successful", "successfull"]
        .iter()
        .filter_map(|key| body.get(*key))
        .find_map(Value::as_bool)
        == Some(false);
    if !failed {
        return None;
    }
    Some(
        body.get("error")
            .map(cell_text)
            .filter(|msg| !msg.is_empty())
            .unwrap_or_else(|| "action reported failure".to_string()),
    )
}

/// Truncated body for log lines and error details.
pub fn body_preview(text: &str) -> String {
    let mut preview: String = text.chars().take(BODY_PREVIEW_CHARS).collect();
    if preview.len() < text.len() {
        preview.push_str("...");
    }
    preview
}
