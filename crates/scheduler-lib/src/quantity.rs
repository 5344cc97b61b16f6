//! Kubernetes resource quantity parsing
//!
//! Converts quantity strings as they appear in node capacity and container
//! resource specs (`250m`, `2`, `1.5`, `512Mi`, `1G`, `1e3`) into the integer
//! units the scheduler accounts in: milli-cores for CPU and bytes for memory.
//!
//! Arithmetic is done on the decimal digits directly so that values such as
//! `0.009` convert to exactly 9 milli-cores.

use thiserror::Error;

/// Error raised when a quantity string cannot be interpreted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty resource quantity")]
    Empty,

    #[error("malformed resource quantity '{0}'")]
    Malformed(String),

    #[error("unsupported unit suffix '{suffix}' in quantity '{quantity}'")]
    UnknownSuffix { quantity: String, suffix: String },

    #[error("negative resource quantity '{0}'")]
    Negative(String),
}

/// A parsed quantity: `mantissa * 10^exp10 * binary`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Quantity {
    mantissa: u128,
    exp10: i32,
    binary: u128,
}

/// Longest digit run accepted; keeps the mantissa well inside u128.
const MAX_DIGITS: usize = 30;

fn parse(raw: &str) -> Result<Quantity, QuantityError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(QuantityError::Empty);
    }
    if s.starts_with('-') {
        return Err(QuantityError::Negative(raw.to_string()));
    }
    let s = s.strip_prefix('+').unwrap_or(s);

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);

    let malformed = || QuantityError::Malformed(raw.to_string());

    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(malformed());
    }
    if frac_part.contains('.') {
        return Err(malformed());
    }

    let digits = format!("{int_part}{frac_part}");
    let digits = digits.trim_start_matches('0');
    if digits.len() > MAX_DIGITS {
        return Err(malformed());
    }
    let mantissa: u128 = if digits.is_empty() {
        0
    } else {
        digits.parse().map_err(|_| malformed())?
    };

    let mut quantity = Quantity {
        mantissa,
        exp10: -(frac_part.len() as i32),
        binary: 1,
    };

    match suffix {
        "" => {}
        "n" => quantity.exp10 -= 9,
        "u" => quantity.exp10 -= 6,
        "m" => quantity.exp10 -= 3,
        "k" => quantity.exp10 += 3,
        "M" => quantity.exp10 += 6,
        "G" => quantity.exp10 += 9,
        "T" => quantity.exp10 += 12,
        "P" => quantity.exp10 += 15,
        "E" => quantity.exp10 += 18,
        "Ki" => quantity.binary = 1 << 10,
        "Mi" => quantity.binary = 1 << 20,
        "Gi" => quantity.binary = 1 << 30,
        "Ti" => quantity.binary = 1 << 40,
        "Pi" => quantity.binary = 1 << 50,
        "Ei" => quantity.binary = 1 << 60,
        other => {
            // decimal exponent form: 1e3, 12E6
            let exponent = other
                .strip_prefix('e')
                .or_else(|| other.strip_prefix('E'))
                .and_then(|e| e.parse::<i32>().ok())
                .filter(|e| e.abs() <= 38)
                .ok_or_else(|| QuantityError::UnknownSuffix {
                    quantity: raw.to_string(),
                    suffix: other.to_string(),
                })?;
            quantity.exp10 += exponent;
        }
    }

    Ok(quantity)
}

impl Quantity {
    /// Value scaled by `10^shift`, rounded up to the next integer
    fn scaled_ceil(self, shift: i32, raw: &str) -> Result<u64, QuantityError> {
        let overflow = || QuantityError::Malformed(raw.to_string());
        let base = self.mantissa.checked_mul(self.binary).ok_or_else(overflow)?;
        let exp = self.exp10 + shift;

        let value = if exp >= 0 {
            let factor = 10u128.checked_pow(exp as u32).ok_or_else(overflow)?;
            base.checked_mul(factor).ok_or_else(overflow)?
        } else {
            match 10u128.checked_pow(exp.unsigned_abs()) {
                Some(divisor) => base.div_ceil(divisor),
                // divisor exceeds any representable mantissa
                None => u128::from(base > 0),
            }
        };

        u64::try_from(value).map_err(|_| overflow())
    }
}

/// Parse a CPU quantity into milli-cores, rounding up like the API server does
pub fn cpu_to_millis(raw: &str) -> Result<u64, QuantityError> {
    parse(raw)?.scaled_ceil(3, raw)
}

/// Parse a memory quantity into bytes, rounding up fractional bytes
pub fn memory_to_bytes(raw: &str) -> Result<u64, QuantityError> {
    parse(raw)?.scaled_ceil(0, raw)
}
