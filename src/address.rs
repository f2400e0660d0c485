//! A1-style helpers. Columns are zero-based indexes here; the letters
//! are the spreadsheet's own `A`, `B`, ..., `Z`, `AA`, ...

/// Decodes column letters into a zero-based index (`A` -> 0, `AA` -> 26).
pub fn column_index(letters: &str) -> Option<usize> {
    let letters = letters.trim();
    if letters.is_empty() {
        return None;
    }
    let mut col = 0usize;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        col = col
            .checked_mul(26)?
            .checked_add(c.to_ascii_uppercase() as usize - 'A' as usize + 1)?;
    }
    Some(col - 1)
}

/// Encodes a zero-based index as column letters (0 -> `A`, 26 -> `AA`).
pub fn column_letters(index: usize) -> String {
    let mut n = index + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// `Tab!range`, quoting the tab name when it contains anything but
/// letters, digits or underscores.
pub fn qualified_range(tab: &str, range: &str) -> String {
    if tab.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        format!("{tab}!{range}")
    } else {
        format!("'{}'!{range}", tab.replace('\'', "''"))
    }
}

/// Range covering a grid of `width` columns and `height` rows anchored at A1.
pub fn grid_range(width: usize, height: usize) -> String {
    let last_col = column_letters(width.saturating_sub(1));
    format!("A1:{last_col}{}", height.max(1))
}
