mod prom_regex;

pub use prom_regex::*;

/// Strips a leading `^` and a trailing unescaped `$` from expr.
pub fn remove_start_end_anchors(expr: &str) -> &str {
    let mut cursor = expr;
    if let Some(t) = cursor.strip_prefix('^') {
        cursor = t;
    }
    if !cursor.ends_with("\\$") {
        if let Some(t) = cursor.strip_suffix('$') {
            cursor = t;
        }
    }
    cursor
}
