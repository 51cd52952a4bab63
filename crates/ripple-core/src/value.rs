//! Attribute values and the helpers that give them JavaScript-like semantics.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A record's attribute bag.
pub type Attributes = Map<String, Value>;

/// Turn a JSON value into an attribute bag.
///
/// Objects are taken as-is; `null` becomes an empty bag. Anything else
/// yields `None`.
#[must_use]
pub fn to_attributes(value: Value) -> Option<Attributes> {
    match value {
        Value::Object(map) => Some(map),
        Value::Null => Some(Attributes::new()),
        _ => None,
    }
}

/// Build an attribute bag from a JSON object literal, dropping anything else.
///
/// ```
/// use ripple_core::value::attrs;
/// use serde_json::json;
///
/// let bag = attrs(json!({"title": "Inbox"}));
/// assert_eq!(bag["title"], "Inbox");
/// assert!(attrs(json!(3)).is_empty());
/// ```
#[must_use]
pub fn attrs(value: Value) -> Attributes {
    to_attributes(value).unwrap_or_default()
}

/// Canonical index key for an identifier.
///
/// Strings are used verbatim and other values by their JSON text, so `1`
/// and `"1"` share a key. `null` is not an identifier.
#[must_use]
pub fn id_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Order two values the way a sort key comparison would.
///
/// Numbers, strings and booleans compare within their own kind. Values of
/// different kinds, and kinds without a natural order, compare equal so a
/// stable sort leaves them where they were.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Text form of a value for display: strings unquoted, `null` empty.
#[must_use]
pub fn display_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Escape the characters that are unsafe to interpolate into HTML.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_key_collapses_numbers_and_strings() {
        assert_eq!(id_key(&json!(1)), Some("1".to_string()));
        assert_eq!(id_key(&json!("1")), Some("1".to_string()));
        assert_eq!(id_key(&Value::Null), None);
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&json!(1), &json!(2.5)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&json!("a"), &json!(1)), Ordering::Equal);
        assert_eq!(compare_values(&Value::Null, &json!(1)), Ordering::Equal);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<a href=\"x\">Tom & 'Jerry'</a>"),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#x27;Jerry&#x27;&lt;&#x2F;a&gt;"
        );
    }

    #[test]
    fn test_to_attributes() {
        assert!(to_attributes(json!({"a": 1})).is_some());
        assert_eq!(to_attributes(Value::Null), Some(Attributes::new()));
        assert!(to_attributes(json!([1, 2])).is_none());
        assert!(to_attributes(json!("text")).is_none());
    }
}
