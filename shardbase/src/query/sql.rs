//! SQL text rendering helpers

use once_cell::sync::Lazy;
use regex::Regex;

use crate::data::Value;

static PLAIN_IDENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap()
});

static AS_ALIAS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*(.+?)\s+as\s+(\S+)\s*$").unwrap());

/// Quote an identifier, treating `.` as a qualifier separator.
///
/// `orders_1` → `"orders_1"`, `o.user_id` → `"o"."user_id"`, `*` stays bare.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| {
            if part == "*" {
                part.to_string()
            } else {
                format!("\"{}\"", part.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Render a projection item.
///
/// Plain (optionally qualified) identifiers are quoted, `expr AS alias` is
/// split and its parts rendered separately, anything else passes through.
pub fn render_column(expr: &str) -> String {
    if let Some(caps) = AS_ALIAS.captures(expr) {
        return format!("{} AS {}", render_column(&caps[1]), quote_ident(&caps[2]));
    }
    let trimmed = expr.trim();
    if PLAIN_IDENT.is_match(trimmed) {
        quote_ident(trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Split `expr AS alias` into its parts
pub fn split_alias(expr: &str) -> (&str, Option<&str>) {
    match AS_ALIAS.captures(expr) {
        Some(caps) => match (caps.get(1), caps.get(2)) {
            (Some(e), Some(a)) => (e.as_str(), Some(a.as_str())),
            _ => (expr.trim(), None),
        },
        None => (expr.trim(), None),
    }
}

/// Inline literal, used where placeholders are not allowed (DDL defaults)
pub fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Binary(b) => format!("X'{}'", value_hex(b)),
        Value::String(_) | Value::Timestamp(_) | Value::Date(_) => {
            format!("'{}'", value.to_string_value().replace('\'', "''"))
        }
        other => other.to_string_value(),
    }
}

fn value_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
