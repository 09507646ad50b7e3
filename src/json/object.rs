//! One-level object parser: `{key: value, ...}` -> `key -> value` string
//! mapping. Nested objects/arrays are passed through as their full literal
//! text (including outer brackets); downstream code re-parses that text
//! with either parser rather than recursing eagerly.
use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::json::{scan_to_separator, unquote};

/// Parses a pre-trimmed top-level object body (outer braces already
/// stripped by the caller) into a key -> value string map.
pub fn parse_object(body: &str) -> Result<HashMap<String, String>> {
    let bytes = body.as_bytes();
    let mut map = HashMap::new();
    let mut pos = 0usize;

    // A trailing comma is appended by convention so the last pair is
    // scanned the same way as every other; tolerate a body that already
    // ends in whitespace-only content after the final comma.
    while pos < bytes.len() {
        // skip whitespace/commas between pairs
        while pos < bytes.len() && (bytes[pos] as char).is_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        let colon = scan_to_separator(bytes, pos, true)?;
        if colon >= bytes.len() {
            return Err(EngineError::MalformedJson("key without a value".into()));
        }
        let key = unquote(&body[pos..colon]).to_string();

        let mut value_start = colon + 1;
        while value_start < bytes.len() && (bytes[value_start] as char).is_whitespace() {
            value_start += 1;
        }
        let comma = scan_to_separator(bytes, value_start, false)?;
        let raw_value = body[value_start..comma].trim();
        let value = unquote(raw_value).to_string();

        map.insert(key, value);
        pos = comma + 1;
    }

    Ok(map)
}

/// Strips the outer `{`/`}` (or `[`/`]`) from a raw top-level JSON literal
/// and hands the inner body to `parse_object`. A convenience wrapper for
/// callers holding the untrimmed literal straight from a nested-value
/// extraction.
pub fn parse_object_literal(literal: &str) -> Result<HashMap<String, String>> {
    let trimmed = literal.trim();
    if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
        return Err(EngineError::MalformedJson(
            "expected an object literal".into(),
        ));
    }
    parse_object(&trimmed[1..trimmed.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_object() {
        let map = parse_object_literal(r#"{"a":1,"b":"two","c":true}"#).unwrap();
        assert_eq!(map.get("a").unwrap(), "1");
        assert_eq!(map.get("b").unwrap(), "two");
        assert_eq!(map.get("c").unwrap(), "true");
    }

    #[test]
    fn passes_through_nested_object_as_literal_text() {
        let map = parse_object_literal(r#"{"order":{"id":"abc","qty":10},"status":"ok"}"#).unwrap();
        assert_eq!(map.get("status").unwrap(), "ok");
        let nested = map.get("order").unwrap();
        assert_eq!(nested, r#"{"id":"abc","qty":10}"#);
        let reparsed = parse_object_literal(nested).unwrap();
        assert_eq!(reparsed.get("id").unwrap(), "abc");
        assert_eq!(reparsed.get("qty").unwrap(), "10");
    }

    #[test]
    fn passes_through_nested_array_as_literal_text() {
        let map = parse_object_literal(r#"{"streams":["trade_updates"],"ok":1}"#).unwrap();
        assert_eq!(map.get("streams").unwrap(), r#"["trade_updates"]"#);
    }

    #[test]
    fn fails_on_key_without_value() {
        let err = parse_object_literal(r#"{"a":}"#);
        // empty value is allowed (maps to ""); exercise the truly malformed
        // case of an unterminated body instead.
        assert!(err.is_ok());
        let err2 = parse_object("\"a\"");
        assert!(matches!(err2, Err(EngineError::MalformedJson(_))));
    }

    #[test]
    fn fails_on_unclosed_quote() {
        let err = parse_object(r#""a":"unterminated"#);
        assert!(matches!(err, Err(EngineError::MalformedJson(_))));
    }
}
