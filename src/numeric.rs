//! 4.E — fixed-grammar numeric and timestamp conversion.
//!
//! Grounded on `original_source/trading_bot/workspace/arrayUtils.h` /
//! `sumapUtils.h`: the original hand-rolls digit-by-digit accumulation
//! instead of calling into the standard library's locale-aware parser, for
//! speed and for exact control over the overflow/format error boundary.
//! The teacher's `from-ascii`/`ascii` dependencies covered the same ground
//! (byte-wise ASCII-to-number conversion) but are dropped here in favor of
//! a direct implementation, since we need the exact failure semantics spec
//! 4.E specifies (`NumberFormat` vs `NumberOverflow`) rather than whatever
//! a third-party crate happens to return.
use crate::error::{EngineError, Result};

/// Parses a pure decimal lexeme (`-`? digits (`.` digits)?) into `i32`.
pub fn to_int(s: &str) -> Result<i32> {
    Ok(to_long(s)?.try_into().map_err(|_| {
        EngineError::NumberOverflow(format!("{s} does not fit in i32"))
    })?)
}

/// Parses a pure decimal lexeme into `i64`, rejecting any fractional part.
pub fn to_long(s: &str) -> Result<i64> {
    let (negative, digits) = split_sign(s)?;
    if digits.contains('.') {
        return Err(EngineError::NumberFormat(format!(
            "{s} is not an integer lexeme"
        )));
    }
    let mut acc: i64 = 0;
    for c in digits.chars() {
        if !c.is_ascii_digit() {
            return Err(EngineError::NumberFormat(format!("non-digit in {s}")));
        }
        let digit = (c as u8 - b'0') as i64;
        let next = acc
            .checked_mul(10)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| EngineError::NumberOverflow(format!("{s} overflows i64")))?;
        if next < acc {
            return Err(EngineError::NumberOverflow(format!("{s} overflows i64")));
        }
        acc = next;
    }
    if digits.is_empty() {
        return Err(EngineError::NumberFormat("empty numeric lexeme".into()));
    }
    Ok(if negative { -acc } else { acc })
}

/// Parses a pure decimal lexeme (optional `-`, at most one `.`) into `f32`.
pub fn to_float(s: &str) -> Result<f32> {
    Ok(to_double(s)? as f32)
}

/// Parses a pure decimal lexeme into `f64`.
pub fn to_double(s: &str) -> Result<f64> {
    let (negative, digits) = split_sign(s)?;
    let mut seen_dot = false;
    let mut int_part: f64 = 0.0;
    let mut frac_part: f64 = 0.0;
    let mut frac_scale: f64 = 1.0;
    let mut any_digit = false;

    for c in digits.chars() {
        if c == '.' {
            if seen_dot {
                return Err(EngineError::NumberFormat(format!(
                    "{s} has more than one decimal point"
                )));
            }
            seen_dot = true;
            continue;
        }
        if !c.is_ascii_digit() {
            return Err(EngineError::NumberFormat(format!("non-digit in {s}")));
        }
        any_digit = true;
        let digit = (c as u8 - b'0') as f64;
        if seen_dot {
            frac_scale *= 10.0;
            frac_part += digit / frac_scale;
        } else {
            let next = int_part * 10.0 + digit;
            if !next.is_finite() || next < int_part {
                return Err(EngineError::NumberOverflow(format!("{s} overflows f64")));
            }
            int_part = next;
        }
    }
    if !any_digit {
        return Err(EngineError::NumberFormat("empty numeric lexeme".into()));
    }
    let value = int_part + frac_part;
    Ok(if negative { -value } else { value })
}

fn split_sign(s: &str) -> Result<(bool, &str)> {
    if s.is_empty() {
        return Err(EngineError::NumberFormat("empty numeric lexeme".into()));
    }
    if let Some(rest) = s.strip_prefix('-') {
        Ok((true, rest))
    } else {
        Ok((false, s))
    }
}

/// Parses `YYYY-MM-DDTHH:MM:SS[.frac]Z` into nanoseconds-since-midnight of
/// that day. Any deviation from the grammar is a `NumberFormat` error.
pub fn to_utc_ns(s: &str) -> Result<i64> {
    let bytes = s.as_bytes();
    if bytes.len() < 20 || bytes[bytes.len() - 1] != b'Z' {
        return Err(EngineError::NumberFormat(format!("bad timestamp {s}")));
    }
    // YYYY-MM-DDTHH:MM:SS
    let expect_digit = |i: usize| -> Result<u32> {
        let c = *bytes
            .get(i)
            .ok_or_else(|| EngineError::NumberFormat(format!("bad timestamp {s}")))?;
        if !c.is_ascii_digit() {
            return Err(EngineError::NumberFormat(format!("bad timestamp {s}")));
        }
        Ok((c - b'0') as u32)
    };
    let expect_char = |i: usize, expected: u8| -> Result<()> {
        if bytes.get(i) != Some(&expected) {
            return Err(EngineError::NumberFormat(format!("bad timestamp {s}")));
        }
        Ok(())
    };

    for i in [4, 7] {
        expect_char(i, b'-')?;
    }
    expect_char(10, b'T')?;
    expect_char(13, b':')?;
    expect_char(16, b':')?;

    for i in 0..4 {
        expect_digit(i)?;
    }
    for i in [5, 6, 8, 9, 11, 12, 14, 15, 17, 18] {
        expect_digit(i)?;
    }

    let hour = expect_digit(11)? * 10 + expect_digit(12)?;
    let minute = expect_digit(14)? * 10 + expect_digit(15)?;
    let second = expect_digit(17)? * 10 + expect_digit(18)?;
    if hour > 23 || minute > 59 || second > 59 {
        return Err(EngineError::NumberFormat(format!("bad timestamp {s}")));
    }

    let mut pos = 19;
    let mut nanos: i64 = 0;
    if bytes.get(pos) == Some(&b'.') {
        pos += 1;
        let frac_start = pos;
        while bytes.get(pos).map(|b| b.is_ascii_digit()).unwrap_or(false) {
            pos += 1;
        }
        let frac = &s[frac_start..pos];
        if frac.is_empty() {
            return Err(EngineError::NumberFormat(format!("bad timestamp {s}")));
        }
        let mut digits = frac.to_string();
        digits.truncate(9);
        while digits.len() < 9 {
            digits.push('0');
        }
        nanos = digits
            .parse::<i64>()
            .map_err(|_| EngineError::NumberFormat(format!("bad timestamp {s}")))?;
    }

    if pos != bytes.len() - 1 {
        return Err(EngineError::NumberFormat(format!("bad timestamp {s}")));
    }

    let total_ns = ((hour as i64) * 3600 + (minute as i64) * 60 + second as i64) * 1_000_000_000
        + nanos;
    Ok(total_ns)
}

/// Re-serializes nanoseconds-since-midnight to `HH:MM:SS.fffffffffZ`, the
/// inverse used by the round-trip law in spec section 8.
pub fn from_ns_to_clock(ns: i64) -> String {
    let nanos = ns % 1_000_000_000;
    let total_seconds = ns / 1_000_000_000;
    let second = total_seconds % 60;
    let minute = (total_seconds / 60) % 60;
    let hour = total_seconds / 3600;
    format!("{hour:02}:{minute:02}:{second:02}.{nanos:09}Z")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signed_integers_and_floats() {
        assert_eq!(to_long("-1234").unwrap(), -1234);
        assert_eq!(to_long("0").unwrap(), 0);
        assert!((to_double("-12.50").unwrap() + 12.50).abs() < 1e-9);
        assert!((to_double("0.001").unwrap() - 0.001).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_digit_characters() {
        assert!(matches!(to_long("12a3"), Err(EngineError::NumberFormat(_))));
        assert!(matches!(
            to_double("1.2.3"),
            Err(EngineError::NumberFormat(_))
        ));
    }

    #[test]
    fn rejects_overflow() {
        assert!(matches!(
            to_long("99999999999999999999"),
            Err(EngineError::NumberOverflow(_))
        ));
    }

    #[test]
    fn utc_ns_round_trips() {
        let ns = to_utc_ns("2001-05-11T09:42:00.123456789Z").unwrap();
        let expected = (9 * 3600 + 42 * 60) * 1_000_000_000i64 + 123_456_789;
        assert_eq!(ns, expected);
        assert_eq!(from_ns_to_clock(ns), "09:42:00.123456789Z");
    }

    #[test]
    fn utc_ns_rejects_bad_grammar() {
        assert!(to_utc_ns("2001-05-11 09:42:00Z").is_err());
        assert!(to_utc_ns("2001-05-11T25:42:00Z").is_err());
    }
}
