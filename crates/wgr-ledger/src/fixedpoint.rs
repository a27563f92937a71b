//! Fixed-point money type.
//!
//! # Motivation
//!
//! All money amounts in this system use a 1e-6 (micros) fixed-point
//! representation stored as `i64`. Raw `i64` for money is error-prone: it
//! allows accidental arithmetic with unrelated integers (versions, ids,
//! basis-point rates) without any compile-time signal.
//!
//! `Micros` wraps the raw `i64` so the type system prevents:
//! - Implicit construction from raw `i64` (no `From<i64>` impl).
//! - Mixing `Micros` with unrelated `i64` values in arithmetic.
//!
//! # Scale
//!
//! 1 USD = 1_000_000 Micros. All monetary values (balances, wagers,
//! cashback, tolerances) use this scale. Rates (house edge, cashback
//! percentage) are plain `i64` basis points and are never implicitly
//! convertible.
//!
//! # Arithmetic
//!
//! - `Add`, `Sub`, `Neg`, `AddAssign`, `SubAssign` for `Micros op Micros`;
//!   these follow standard integer overflow semantics.
//! - `saturating_add` / `saturating_sub` clamp at the `i64` range.
//! - `checked_bps(rate_bps)` applies a basis-point rate through `i128`
//!   intermediate math, truncating toward zero. `None` only when the result
//!   does not fit `i64`.
//! - `parse_decimal` / `to_decimal_string` convert between the provider
//!   protocol's decimal-string amounts and micros, exactly, up to six
//!   fractional digits.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Micros per whole currency unit.
pub const MICROS_SCALE: i64 = 1_000_000;

/// Basis points per 100% — rate math denominator.
pub const BPS_SCALE: i64 = 10_000;

/// A fixed-point monetary amount at 1e-6 scale (micros).
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Micros(i64);

impl Micros {
    /// Zero monetary amount.
    pub const ZERO: Micros = Micros(0);

    /// Construct from a raw `i64` known to be at 1e-6 scale.
    #[inline]
    pub const fn new(raw: i64) -> Self {
        Micros(raw)
    }

    /// Construct from a whole currency amount (dollars, not micros).
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Micros(units * MICROS_SCALE)
    }

    /// Extract the underlying raw `i64`.
    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Absolute value, saturating at `i64::MAX`.
    #[inline]
    pub const fn abs(self) -> Micros {
        Micros(self.0.saturating_abs())
    }

    #[inline]
    pub const fn saturating_add(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub const fn saturating_sub(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_sub(rhs.0))
    }

    /// Apply a basis-point rate: `self * rate_bps / 10_000`, truncating
    /// toward zero. `i128` intermediate, so no overflow for any realistic
    /// balance; `None` only when the final value exceeds the `i64` range.
    pub fn checked_bps(self, rate_bps: i64) -> Option<Micros> {
        let wide = (self.0 as i128) * (rate_bps as i128) / (BPS_SCALE as i128);
        i64::try_from(wide).ok().map(Micros)
    }

    /// Smaller of two amounts.
    #[inline]
    pub fn min(self, rhs: Micros) -> Micros {
        Micros(self.0.min(rhs.0))
    }

    /// Larger of two amounts.
    #[inline]
    pub fn max(self, rhs: Micros) -> Micros {
        Micros(self.0.max(rhs.0))
    }

    /// Parse a decimal string ("25", "25.5", "0.0025") into micros.
    ///
    /// At most six fractional digits are accepted — the provider protocol
    /// never carries more precision than we can represent, and silently
    /// rounding money is worse than rejecting it.
    pub fn parse_decimal(s: &str) -> Result<Micros, ParseMoneyError> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if digits.is_empty() {
            return Err(ParseMoneyError::Empty);
        }

        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(ParseMoneyError::Empty);
        }
        if frac_part.len() > 6 {
            return Err(ParseMoneyError::TooPrecise {
                fractional_digits: frac_part.len(),
            });
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ParseMoneyError::Malformed);
        }

        let whole: i64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| ParseMoneyError::OutOfRange)?
        };
        let mut frac: i64 = if frac_part.is_empty() {
            0
        } else {
            frac_part.parse().map_err(|_| ParseMoneyError::OutOfRange)?
        };
        for _ in frac_part.len()..6 {
            frac *= 10;
        }

        let raw = whole
            .checked_mul(MICROS_SCALE)
            .and_then(|w| w.checked_add(frac))
            .ok_or(ParseMoneyError::OutOfRange)?;
        Ok(Micros(if negative { -raw } else { raw }))
    }

    /// Render as a decimal string with trailing fractional zeros trimmed
    /// (minimum two places, so "25.00" rather than "25").
    pub fn to_decimal_string(self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / MICROS_SCALE as u64;
        let frac = abs % MICROS_SCALE as u64;
        let mut frac_str = format!("{frac:06}");
        while frac_str.len() > 2 && frac_str.ends_with('0') {
            frac_str.pop();
        }
        format!("{sign}{whole}.{frac_str}")
    }
}

impl fmt::Display for Micros {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

impl Add for Micros {
    type Output = Micros;
    fn add(self, rhs: Micros) -> Micros {
        Micros(self.0 + rhs.0)
    }
}

impl Sub for Micros {
    type Output = Micros;
    fn sub(self, rhs: Micros) -> Micros {
        Micros(self.0 - rhs.0)
    }
}

impl Neg for Micros {
    type Output = Micros;
    fn neg(self) -> Micros {
        Micros(-self.0)
    }
}

impl AddAssign for Micros {
    fn add_assign(&mut self, rhs: Micros) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Micros {
    fn sub_assign(&mut self, rhs: Micros) {
        self.0 -= rhs.0;
    }
}

/// Failures parsing a wire decimal amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseMoneyError {
    Empty,
    Malformed,
    /// More fractional digits than micros can represent.
    TooPrecise { fractional_digits: usize },
    OutOfRange,
}

impl fmt::Display for ParseMoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "amount is empty"),
            Self::Malformed => write!(f, "amount is not a decimal number"),
            Self::TooPrecise { fractional_digits } => write!(
                f,
                "amount has {fractional_digits} fractional digits; at most 6 supported"
            ),
            Self::OutOfRange => write!(f, "amount does not fit the representable range"),
        }
    }
}

impl std::error::Error for ParseMoneyError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format_round_trip() {
        assert_eq!(Micros::parse_decimal("25").unwrap(), Micros::new(25_000_000));
        assert_eq!(
            Micros::parse_decimal("25.00").unwrap(),
            Micros::new(25_000_000)
        );
        assert_eq!(Micros::parse_decimal("0.0025").unwrap(), Micros::new(2_500));
        assert_eq!(
            Micros::parse_decimal("-1.5").unwrap(),
            Micros::new(-1_500_000)
        );
        assert_eq!(Micros::new(25_000_000).to_decimal_string(), "25.00");
        assert_eq!(Micros::new(2_500).to_decimal_string(), "0.0025");
        assert_eq!(Micros::new(-1_500_000).to_decimal_string(), "-1.50");
    }

    #[test]
    fn parse_rejects_junk() {
        assert!(Micros::parse_decimal("").is_err());
        assert!(Micros::parse_decimal("abc").is_err());
        assert!(Micros::parse_decimal("1.2.3").is_err());
        assert!(Micros::parse_decimal("0.1234567").is_err());
    }

    #[test]
    fn bps_math_is_exact_for_cashback_chain() {
        // $25 wager, 2% house edge -> GGR $0.50; 0.5% cashback -> $0.0025.
        let wager = Micros::from_units(25);
        let ggr = wager.checked_bps(200).unwrap();
        assert_eq!(ggr, Micros::new(500_000));
        let earned = ggr.checked_bps(50).unwrap();
        assert_eq!(earned, Micros::new(2_500));
    }

    #[test]
    fn bps_truncates_toward_zero() {
        assert_eq!(Micros::new(1).checked_bps(50).unwrap(), Micros::ZERO);
        assert_eq!(Micros::new(-1).checked_bps(50).unwrap(), Micros::ZERO);
    }
}
