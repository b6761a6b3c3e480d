//! Kubernetes resource quantities (`250m`, `1.5`, `128Mi`, `2G`, `1e3`)

use crate::error::{AnyAppError, Result};
use std::iter::Sum;
use std::ops::Add;

/// A quantity stored in thousandths of its base unit, rounded up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quantity {
    milli: i128,
}

const BINARY_SUFFIXES: &[(&str, i128)] = &[
    ("Ei", 1 << 60),
    ("Pi", 1 << 50),
    ("Ti", 1 << 40),
    ("Gi", 1 << 30),
    ("Mi", 1 << 20),
    ("Ki", 1 << 10),
];

/// Multiplier as a (numerator, denominator) pair
fn decimal_suffix(suffix: &str) -> Option<(i128, i128)> {
    let pair = match suffix {
        "" => (1, 1),
        "n" => (1, 1_000_000_000),
        "u" => (1, 1_000_000),
        "m" => (1, 1_000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        _ => return None,
    };
    Some(pair)
}

fn invalid(input: &str) -> AnyAppError {
    AnyAppError::InvalidInput(format!("invalid quantity: {}", input))
}

impl Quantity {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_milli(milli: i128) -> Self {
        Self { milli }
    }

    pub fn milli(&self) -> i128 {
        self.milli
    }

    pub fn is_zero(&self) -> bool {
        self.milli == 0
    }

    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        let number_end = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(number_end);
        if number.is_empty() {
            return Err(invalid(input));
        }

        let (negative, number) = match number.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, number.strip_prefix('+').unwrap_or(number)),
        };
        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid(input));
        }
        let digits = format!("{}{}", whole, frac);
        let mantissa: i128 = digits.parse().map_err(|_| invalid(input))?;
        let mut den: i128 = 10i128.pow(frac.len() as u32);
        let mut num: i128 = 1000;

        if let Some((_, factor)) = BINARY_SUFFIXES.iter().find(|(name, _)| *name == suffix) {
            num *= factor;
        } else if let Some((n, d)) = decimal_suffix(suffix) {
            num *= n;
            den *= d;
        } else {
            let exp = suffix.strip_prefix(['e', 'E']).ok_or_else(|| invalid(input))?;
            let exp: i32 = exp.parse().map_err(|_| invalid(input))?;
            if exp >= 0 {
                num *= 10i128.pow(exp as u32);
            } else {
                den *= 10i128.pow(exp.unsigned_abs());
            }
        }

        let scaled = mantissa * num;
        let mut milli = scaled / den;
        if scaled % den != 0 {
            milli += 1;
        }
        Ok(Self {
            milli: if negative { -milli } else { milli },
        })
    }

    /// CPU form: whole cores (`2`) or millicores (`250m`)
    pub fn to_cpu_string(&self) -> String {
        if self.milli % 1000 == 0 {
            format!("{}", self.milli / 1000)
        } else {
            format!("{}m", self.milli)
        }
    }

    /// Byte form using the largest exact binary suffix (`128Mi`, `1536`)
    pub fn to_bytes_string(&self) -> String {
        let bytes = self.milli / 1000;
        if bytes != 0 {
            for (name, factor) in BINARY_SUFFIXES {
                if bytes % factor == 0 {
                    return format!("{}{}", bytes / factor, name);
                }
            }
        }
        format!("{}", bytes)
    }

    /// Multiply by a replica count
    pub fn times(&self, count: i64) -> Self {
        Self {
            milli: self.milli * count as i128,
        }
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Self) -> Self::Output {
        Quantity {
            milli: self.milli + rhs.milli,
        }
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Quantity::zero(), Add::add)
    }
}
