//! Derived-key encoding helpers.
//!
//! Index keys are strings; compound keys join their components with `!`.
//! Ordering is byte order of the resulting string, so numeric components
//! order lexicographically ("10" < "9") unless the caller pre-encodes them
//! (zero-padding). That constraint is documented on
//! [`ScanBounds`](crate::ScanBounds) rather than silently corrected.

use serde_json::Value;

/// Separator joining the components of a compound key.
pub const COMPOUND_SEPARATOR: char = '!';

/// Upper sentinel for prefix ranges: `[v, v + MAX_CHAR)` covers every key
/// starting with `v`.
pub const MAX_CHAR: char = '\u{ffff}';

/// Encode a scalar JSON value as an index key component.
///
/// Objects, arrays, and null do not produce keys.
pub(crate) fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Encode a query-supplied value as a full index key.
///
/// Arrays join their scalar elements with [`COMPOUND_SEPARATOR`] for
/// compound-index lookups; scalars encode as themselves.
pub(crate) fn value_key(value: &Value) -> Option<String> {
    match value {
        Value::Array(parts) => {
            let mut joined = Vec::with_capacity(parts.len());
            for part in parts {
                joined.push(scalar_key(part)?);
            }
            Some(join(&joined))
        }
        other => scalar_key(other),
    }
}

pub(crate) fn join(parts: &[String]) -> String {
    parts.join(&COMPOUND_SEPARATOR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_encode() {
        assert_eq!(scalar_key(&json!("blue")), Some("blue".into()));
        assert_eq!(scalar_key(&json!(5)), Some("5".into()));
        assert_eq!(scalar_key(&json!(true)), Some("true".into()));
        assert_eq!(scalar_key(&json!(null)), None);
        assert_eq!(scalar_key(&json!({"a": 1})), None);
    }

    #[test]
    fn arrays_join_for_compound_lookups() {
        assert_eq!(
            value_key(&json!(["Frazee", "Paul"])),
            Some("Frazee!Paul".into())
        );
        assert_eq!(value_key(&json!(["Frazee", {"x": 1}])), None);
        assert_eq!(value_key(&json!("plain")), Some("plain".into()));
    }
}
