//! Exact resource quantities
//!
//! Quantities use the notation of the cluster API (`"250m"`, `"8"`,
//! `"16Gi"`, `"1e3"`). Values are held as an integer count of milli-units,
//! so adding allocatable values from many nodes never drifts the way
//! floating point would.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced while parsing or combining quantities
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid quantity '{0}'")]
    Invalid(String),

    #[error("unknown quantity suffix '{suffix}' in '{input}'")]
    UnknownSuffix { input: String, suffix: String },

    #[error("quantity '{0}' is out of range")]
    Overflow(String),
}

/// How a quantity is rendered back to text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuantityFormat {
    /// Powers of ten: `k`, `M`, `G`, ...
    #[default]
    DecimalSI,
    /// Powers of two: `Ki`, `Mi`, `Gi`, ...
    BinarySI,
}

/// An exact, non-floating resource amount
///
/// Equality and hashing only look at the value, so `1Gi` equals
/// `1073741824`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quantity {
    millis: i128,
    format: QuantityFormat,
}

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 10),
    ("Mi", 20),
    ("Gi", 30),
    ("Ti", 40),
    ("Pi", 50),
    ("Ei", 60),
];

const DECIMAL_SUFFIXES: [(&str, i32); 7] = [
    ("m", -3),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

impl Quantity {
    /// Zero in decimal format
    pub const ZERO: Quantity = Quantity {
        millis: 0,
        format: QuantityFormat::DecimalSI,
    };

    /// Whole units in the given format
    pub fn from_units(units: i64, format: QuantityFormat) -> Self {
        Self {
            millis: units as i128 * 1000,
            format,
        }
    }

    /// Milli-units in decimal format
    pub fn from_millis(millis: i64) -> Self {
        Self {
            millis: millis as i128,
            format: QuantityFormat::DecimalSI,
        }
    }

    /// Parse a quantity string
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        input.parse()
    }

    /// Exact value in milli-units
    pub fn milli_value(&self) -> i128 {
        self.millis
    }

    /// Value in whole units, rounded up
    pub fn value(&self) -> i128 {
        let units = self.millis.div_euclid(1000);
        if self.millis.rem_euclid(1000) == 0 {
            units
        } else {
            units + 1
        }
    }

    pub fn format(&self) -> QuantityFormat {
        self.format
    }

    pub fn is_zero(&self) -> bool {
        self.millis == 0
    }

    pub fn is_negative(&self) -> bool {
        self.millis < 0
    }

    /// Add without overflowing
    ///
    /// The result keeps the format of `self` unless `self` is zero, in which
    /// case it takes the format of `other`.
    pub fn checked_add(&self, other: &Quantity) -> Option<Quantity> {
        let millis = self.millis.checked_add(other.millis)?;
        let format = if self.millis == 0 {
            other.format
        } else {
            self.format
        };
        Some(Quantity { millis, format })
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, other: Quantity) -> Quantity {
        self.checked_add(&other)
            .unwrap_or(Quantity {
                millis: i128::MAX,
                format: self.format,
            })
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, other: Quantity) {
        *self = *self + other;
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.millis == other.millis
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.millis.cmp(&other.millis)
    }
}

impl Hash for Quantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.millis.hash(state);
    }
}

fn pow10(exp: u32, input: &str) -> Result<i128, QuantityError> {
    10i128
        .checked_pow(exp)
        .ok_or_else(|| QuantityError::Overflow(input.to_string()))
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let s = input.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (negative, rest) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(number_len);

        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if (int_part.is_empty() && frac_part.is_empty()) || frac_part.contains('.') {
            return Err(QuantityError::Invalid(input.to_string()));
        }

        let overflow = || QuantityError::Overflow(input.to_string());
        let digits = format!("{}{}", int_part, frac_part);
        let mantissa: i128 = digits.parse().map_err(|_| overflow())?;

        // Scale is expressed as `mantissa * 2^shift * 10^exp10` milli-units
        let mut shift = 0u32;
        let mut exp10 = i32::try_from(frac_part.len())
            .ok()
            .and_then(|places| 3i32.checked_sub(places))
            .ok_or_else(overflow)?;
        let mut format = QuantityFormat::DecimalSI;

        if !suffix.is_empty() {
            if let Some((_, bits)) = BINARY_SUFFIXES.iter().find(|(name, _)| *name == suffix) {
                shift = *bits;
                format = QuantityFormat::BinarySI;
            } else if let Some((_, e)) = DECIMAL_SUFFIXES.iter().find(|(name, _)| *name == suffix)
            {
                exp10 = exp10.checked_add(*e).ok_or_else(overflow)?;
            } else if let Some(exp) = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))
                .and_then(|e| e.parse::<i32>().ok())
            {
                exp10 = exp10.checked_add(exp).ok_or_else(overflow)?;
            } else {
                return Err(QuantityError::UnknownSuffix {
                    input: input.to_string(),
                    suffix: suffix.to_string(),
                });
            }
        }

        let mut millis = mantissa
            .checked_mul(1i128.checked_shl(shift).ok_or_else(overflow)?)
            .ok_or_else(overflow)?;

        if exp10 >= 0 {
            millis = millis
                .checked_mul(pow10(exp10 as u32, input)?)
                .ok_or_else(overflow)?;
        } else {
            // Anything finer than a milli-unit rounds up
            let divisor = pow10(exp10.unsigned_abs(), input)?;
            let whole = millis / divisor;
            millis = if millis % divisor == 0 { whole } else { whole + 1 };
        }

        if negative {
            millis = -millis;
        }

        Ok(Quantity { millis, format })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis == 0 {
            return write!(f, "0");
        }
        let sign = if self.millis < 0 { "-" } else { "" };
        let abs = self.millis.unsigned_abs();

        if abs % 1000 != 0 {
            return write!(f, "{}{}m", sign, abs);
        }
        let units = abs / 1000;

        match self.format {
            QuantityFormat::BinarySI => {
                for (name, bits) in BINARY_SUFFIXES.iter().rev() {
                    let unit = 1u128 << bits;
                    if units % unit == 0 {
                        return write!(f, "{}{}{}", sign, units / unit, name);
                    }
                }
            }
            QuantityFormat::DecimalSI => {
                for (name, exp) in DECIMAL_SUFFIXES.iter().rev() {
                    if *exp <= 0 {
                        continue;
                    }
                    let unit = 10u128.pow(*exp as u32);
                    if units % unit == 0 {
                        return write!(f, "{}{}{}", sign, units / unit, name);
                    }
                }
            }
        }
        write!(f, "{}{}", sign, units)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct QuantityVisitor;

impl<'de> Visitor<'de> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a quantity string such as \"500m\" or \"16Gi\"")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
        Ok(Quantity::from_units(v, QuantityFormat::DecimalSI))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
        i64::try_from(v)
            .map(|v| Quantity::from_units(v, QuantityFormat::DecimalSI))
            .map_err(|_| E::custom(format!("quantity {} is out of range", v)))
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}
