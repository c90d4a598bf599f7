//! Loose text parsers used by the default transform group.
//!
//! These accept the messy forms that show up in exported spreadsheets and
//! legacy extracts: accounting negatives such as `(89)`, scientific notation
//! destined for fixed-point decimals, dates written as bare `MMDDYYYY` digits
//! with the leading zero dropped, and booleans spelled as numbers.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::{
    data::{parse_naive_date, parse_naive_datetime},
    error::TransformError,
    schema::DecimalSpec,
};

const MAX_DECIMAL_SCALE: u32 = 28;
const MAX_EXPONENT: i64 = 96;

/// Splits `(123)` into `("123", true)`; anything else is returned unchanged.
fn strip_accounting_negative(text: &str) -> (&str, bool) {
    let trimmed = text.trim();
    match trimmed
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(inner) => (inner.trim(), true),
        None => (trimmed, false),
    }
}

pub fn parse_int_loose(text: &str) -> Result<i64, TransformError> {
    let (body, negate) = strip_accounting_negative(text);
    if negate && body.starts_with(['-', '+']) {
        return Err(TransformError::format(text, "integer"));
    }
    let parsed = i64::from_str(body).map_err(|err| match err.kind() {
        std::num::IntErrorKind::PosOverflow | std::num::IntErrorKind::NegOverflow => {
            TransformError::overflow(text, "integer")
        }
        _ => TransformError::format(text, "integer"),
    })?;
    if negate {
        parsed
            .checked_neg()
            .ok_or_else(|| TransformError::overflow(text, "integer"))
    } else {
        Ok(parsed)
    }
}

pub fn parse_float_loose(text: &str) -> Result<f64, TransformError> {
    let (body, negate) = strip_accounting_negative(text);
    let parsed = f64::from_str(body).map_err(|_| TransformError::format(text, "float"))?;
    Ok(if negate { -parsed } else { parsed })
}

/// Parses plain, accounting-negative, and `mantissa E exponent` decimals.
///
/// Results too small to represent at the maximum decimal scale become zero
/// rather than failing.
pub fn parse_decimal_loose(text: &str) -> Result<Decimal, TransformError> {
    let (body, negate) = strip_accounting_negative(text);
    let value = match body.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => {
            let mantissa = Decimal::from_str(mantissa.trim())
                .map_err(|_| TransformError::format(text, "decimal"))?;
            let exponent = i64::from_str(exponent.trim())
                .map_err(|_| TransformError::format(text, "decimal"))?;
            scale_by_power_of_ten(mantissa, exponent)
                .ok_or_else(|| TransformError::overflow(text, "decimal"))?
        }
        None => {
            Decimal::from_str(body).map_err(|_| TransformError::format(text, "decimal"))?
        }
    };
    Ok(if negate { -value } else { value })
}

/// `value * 10^exponent`, or `None` on overflow.
pub fn scale_by_power_of_ten(value: Decimal, exponent: i64) -> Option<Decimal> {
    if value.is_zero() {
        return Some(Decimal::ZERO);
    }
    if exponent >= 0 {
        if exponent > MAX_EXPONENT {
            return None;
        }
        let mut result = value;
        for _ in 0..exponent {
            result = result.checked_mul(Decimal::TEN)?;
        }
        return Some(result.normalize());
    }

    let mantissa = value.mantissa();
    let scale = u64::from(value.scale()) + exponent.unsigned_abs();
    if scale <= u64::from(MAX_DECIMAL_SCALE) {
        return Decimal::try_from_i128_with_scale(mantissa, scale as u32)
            .ok()
            .map(|d| d.normalize());
    }
    let excess = scale - u64::from(MAX_DECIMAL_SCALE);
    if excess > 38 {
        return Some(Decimal::ZERO);
    }
    let divisor = 10i128.pow(excess as u32);
    let half = divisor / 2;
    let reduced = if mantissa >= 0 {
        (mantissa + half) / divisor
    } else {
        (mantissa - half) / divisor
    };
    Decimal::try_from_i128_with_scale(reduced, MAX_DECIMAL_SCALE)
        .ok()
        .map(|d| d.normalize())
}

/// Rounds to the decimal's scale and rejects values with too many integral digits.
pub fn fit_decimal(
    value: Decimal,
    spec: &DecimalSpec,
    raw: &str,
) -> Result<Decimal, TransformError> {
    let rounded =
        value.round_dp_with_strategy(spec.scale, RoundingStrategy::MidpointAwayFromZero);
    let digits = spec.integral_digits();
    if digits < MAX_DECIMAL_SCALE {
        let limit = Decimal::from_i128_with_scale(10i128.pow(digits), 0);
        if rounded.abs() >= limit {
            return Err(TransformError::overflow(raw, spec.signature()));
        }
    }
    Ok(rounded)
}

/// Empty means `false`; `true`/`false` in any case; otherwise an integer where
/// nonzero means `true`.
pub fn parse_bool_loose(text: &str) -> Result<bool, TransformError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(false);
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return Ok(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Ok(false);
    }
    match i64::from_str(trimmed) {
        Ok(number) => Ok(number != 0),
        Err(_) => Err(TransformError::format(text, "boolean")),
    }
}

/// Parses month, day, and a four digit year written without separators.
///
/// Month and day may each be one or two digits, so `8012035` and `08012035`
/// are both August 1, 2035. When a seven digit value could be read either
/// way, a one digit month is tried first.
pub fn parse_mmddyyyy(text: &str) -> Result<NaiveDate, TransformError> {
    let digits = text.trim();
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TransformError::format(text, "date (MMDDYYYY)"));
    }
    let splits: &[(usize, usize)] = match digits.len() {
        8 => &[(2, 2)],
        7 => &[(1, 2), (2, 1)],
        6 => &[(1, 1)],
        _ => &[],
    };
    splits
        .iter()
        .find_map(|&(month_len, day_len)| {
            let month = digits[..month_len].parse::<u32>().ok()?;
            let day = digits[month_len..month_len + day_len].parse::<u32>().ok()?;
            let year = digits[month_len + day_len..].parse::<i32>().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        })
        .ok_or_else(|| TransformError::format(text, "date (MMDDYYYY)"))
}

pub fn parse_date_loose(text: &str) -> Result<NaiveDate, TransformError> {
    let trimmed = text.trim();
    if (6..=8).contains(&trimmed.len()) && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return parse_mmddyyyy(trimmed);
    }
    parse_naive_date(trimmed)
        .or_else(|_| parse_naive_datetime(trimmed).map(|dt| dt.date()))
        .map_err(|_| TransformError::format(text, "date"))
}
