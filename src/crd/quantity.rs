//! Conversion of Kubernetes resource quantities into byte counts

use crate::error::{Error, Result};

/// Largest decimal exponent accepted before the value certainly overflows `u64`
const MAX_EXPONENT: u32 = 30;

/// Longest accepted run of significant digits
const MAX_DIGITS: usize = 30;

/// Parse a quantity such as `1Gi`, `500M`, `1.5Gi` or `1e9` into bytes.
///
/// Fractional results are rounded up to the next whole byte.
pub fn parse_quantity(value: &str) -> Result<u64> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::quantity("empty quantity"));
    }

    let unsigned = value.strip_prefix('+').unwrap_or(value);
    if unsigned.starts_with('-') {
        return Err(Error::quantity(format!("'{}' is negative", value)));
    }

    let split = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(split);

    let (mantissa, scale) = parse_decimal(number)
        .ok_or_else(|| Error::quantity(format!("'{}' has no valid numeric part", value)))?;
    let (numerator, denominator) = multiplier(suffix)
        .ok_or_else(|| Error::quantity(format!("'{}' has unknown suffix '{}'", value, suffix)))?;

    let denominator = denominator
        .checked_mul(10u128.pow(scale))
        .ok_or_else(|| Error::quantity(format!("'{}' is too precise", value)))?;
    let product = mantissa
        .checked_mul(numerator)
        .ok_or_else(|| Error::quantity(format!("'{}' is too large", value)))?;

    let bytes = product.div_ceil(denominator);
    u64::try_from(bytes).map_err(|_| Error::quantity(format!("'{}' is too large", value)))
}

/// Split `"12.50"` into the integer `1250` and the number of fractional digits
fn parse_decimal(number: &str) -> Option<(u128, u32)> {
    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (number, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if whole.len() + fraction.len() > MAX_DIGITS || fraction.contains('.') {
        return None;
    }

    let digits = format!("{}{}", whole, fraction);
    let mantissa = digits.parse::<u128>().ok()?;
    Some((mantissa, fraction.len() as u32))
}

/// Multiplier for a suffix as a `(numerator, denominator)` pair
fn multiplier(suffix: &str) -> Option<(u128, u128)> {
    let binary = |power: u32| Some((1u128 << (10 * power), 1));
    let decimal = |power: u32| Some((10u128.pow(3 * power), 1));

    match suffix {
        "" => Some((1, 1)),
        "Ki" => binary(1),
        "Mi" => binary(2),
        "Gi" => binary(3),
        "Ti" => binary(4),
        "Pi" => binary(5),
        "Ei" => binary(6),
        "m" => Some((1, 1000)),
        "k" => decimal(1),
        "M" => decimal(2),
        "G" => decimal(3),
        "T" => decimal(4),
        "P" => decimal(5),
        "E" => decimal(6),
        _ => exponent(suffix),
    }
}

/// Decimal exponent suffix such as `e9`, `E3` or `e-2`
fn exponent(suffix: &str) -> Option<(u128, u128)> {
    let rest = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))?;
    let (negative, digits) = match rest.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, rest.strip_prefix('+').unwrap_or(rest)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let power = digits.parse::<u32>().ok()?;
    if power > MAX_EXPONENT {
        return None;
    }

    let factor = 10u128.pow(power);
    if negative {
        Some((1, factor))
    } else {
        Some((factor, 1))
    }
}
