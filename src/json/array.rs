//! Array parser: walks a top-level JSON array of objects, invoking a
//! per-field callback for every key/value pair within the current element
//! and a per-record callback at each element boundary.
//!
//! Grounded on `original_source/trading_bot/workspace/jsonUtils.h`'s
//! `JSONArrayParser<container, updateObject, containerUpdateFunc,
//! updateFunc>` template: `containerUpdateFunc` becomes `on_field`,
//! `updateFunc` becomes `on_record`. The C++ version binds these as
//! compile-time function pointers; Rust expresses the same shape as two
//! `FnMut` closures taken as plain generics, staying monomorphized rather
//! than going through a vtable.
use crate::error::{EngineError, Result};
use crate::json::scan_to_separator;

/// Parses a top-level JSON array literal (including the outer `[`/`]`).
/// For every key/value pair inside an element object, calls
/// `on_field(record, key, value)`. At the end of each element, calls
/// `on_record(record, collector)`. The accumulator `record` is *not*
/// cleared between elements by this function — the caller's policy
/// (consume-by-value in `on_record`, or clear in `on_field` on first key)
/// governs reset.
pub fn parse_array<R, C>(
    literal: &str,
    record: &mut R,
    collector: &mut C,
    mut on_field: impl FnMut(&mut R, &str, &str),
    mut on_record: impl FnMut(&mut R, &mut C),
) -> Result<()> {
    let trimmed = literal.trim();
    if !trimmed.starts_with('[') || !trimmed.ends_with(']') {
        return Err(EngineError::MalformedJson(
            "expected an array literal".into(),
        ));
    }
    let body = &trimmed[1..trimmed.len() - 1];
    let bytes = body.as_bytes();
    let mut pos = 0usize;

    while pos < bytes.len() {
        while pos < bytes.len() && (bytes[pos] as char).is_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        let elem_end = scan_to_separator(bytes, pos, false)?;
        let element = body[pos..elem_end].trim();

        if let Some(inner) = element.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            parse_fields_into(inner, record, &mut on_field)?;
        }
        on_record(record, collector);

        pos = elem_end + 1;
    }

    Ok(())
}

fn parse_fields_into<R>(
    body: &str,
    record: &mut R,
    on_field: &mut impl FnMut(&mut R, &str, &str),
) -> Result<()> {
    let bytes = body.as_bytes();
    let mut pos = 0usize;

    while pos < bytes.len() {
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
        let key = crate::json::unquote(&body[pos..colon]);

        let mut value_start = colon + 1;
        while value_start < bytes.len() && (bytes[value_start] as char).is_whitespace() {
            value_start += 1;
        }
        let comma = scan_to_separator(bytes, value_start, false)?;
        let raw_value = body[value_start..comma].trim();
        let value = crate::json::unquote(raw_value);

        on_field(record, key, value);
        pos = comma + 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone, Debug, PartialEq)]
    struct Bar {
        t: String,
        s: String,
        v: i64,
        n: i64,
        c: f64,
        o: f64,
        h: f64,
        l: f64,
    }

    /// Two bars, captured via field/record callbacks, in arrival order
    /// with the expected values.
    #[test]
    fn scenario_1_json_array_parse() {
        let input = r#"[{"t":"2001-05-11T:09:42:00Z","v":10295,"c":22.05,"o":21.77,"l":21.60,"h":22.25,"n":205,"s":"FAKE"},{"t":"2001-05-11T:09:43:00Z","v":500,"c":10.00,"o":9.90,"l":9.80,"h":10.10,"n":12,"s":"BOGUS"}]"#;

        let mut record = Bar::default();
        let mut collector: Vec<Bar> = Vec::new();

        parse_array(
            input,
            &mut record,
            &mut collector,
            |rec, key, value| match key {
                "t" => rec.t = value.to_string(),
                "s" => rec.s = value.to_string(),
                "v" => rec.v = value.parse().unwrap(),
                "n" => rec.n = value.parse().unwrap(),
                "c" => rec.c = value.parse().unwrap(),
                "o" => rec.o = value.parse().unwrap(),
                "h" => rec.h = value.parse().unwrap(),
                "l" => rec.l = value.parse().unwrap(),
                _ => {}
            },
            |rec, collector: &mut Vec<Bar>| collector.push(rec.clone()),
        )
        .unwrap();

        assert_eq!(collector.len(), 2);
        assert_eq!(collector[0].s, "FAKE");
        assert_eq!(collector[0].v, 10295);
        assert_eq!(collector[0].c, 22.05);
        assert_eq!(collector[1].s, "BOGUS");
        assert_eq!(collector[1].v, 500);
    }

    #[test]
    fn empty_array_produces_no_records() {
        let mut record = Bar::default();
        let mut collector: Vec<Bar> = Vec::new();
        parse_array("[]", &mut record, &mut collector, |_, _, _| {}, |_, _| {}).unwrap();
        assert!(collector.is_empty());
    }
}
