//! Fixed-point money and price types.
//!
//! # Motivation
//!
//! No binary floats touch money anywhere in this workspace. `Cents` wraps
//! an `i64` at 1e-2 scale so the type system prevents accidentally mixing
//! money with unrelated integers (quantities, event ids, raw prices at a
//! different scale).
//!
//! `Price` wraps an `i64` at 1e-6 scale (micros) for instrument prices,
//! which routinely carry more precision than cents (tick sizes smaller
//! than a cent are common in futures). Crossing from a `Price` difference
//! into `Cents` always goes through [`quantize_half_up`], the single
//! rounding boundary in the system.

use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Cents
// ---------------------------------------------------------------------------

/// A fixed-point monetary amount at 1e-2 scale (cents).
///
/// 1 USD = `Cents(100)`. There is intentionally no `From<i64>` — callers
/// must be deliberate about when a raw integer represents money.
///
/// Serializes as a decimal string (e.g. `"-1000.00"`) for anything crossing
/// a config or persistence boundary — never as a bare integer, which would
/// silently change meaning if the scale ever moved.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cents(i64);

#[cfg(feature = "serde")]
impl Serialize for Cents {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for Cents {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Cents::parse(&s).map_err(serde::de::Error::custom)
    }
}

impl Cents {
    pub const ZERO: Cents = Cents(0);
    pub const MAX: Cents = Cents(i64::MAX);
    pub const MIN: Cents = Cents(i64::MIN);

    /// Construct from a raw `i64` already known to be at 1e-2 scale.
    #[inline]
    pub const fn new(raw: i64) -> Self {
        Cents(raw)
    }

    /// Extract the underlying raw `i64`.
    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn saturating_add(self, rhs: Cents) -> Cents {
        Cents(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Cents) -> Cents {
        Cents(self.0.saturating_sub(rhs.0))
    }

    #[inline]
    pub fn abs(self) -> Cents {
        Cents(self.0.saturating_abs())
    }

    #[inline]
    pub fn is_non_negative(self) -> bool {
        self.0 >= 0
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Money equality: `|a-b| < 0.01`, i.e. the two amounts round to the
    /// same cent. Since both sides are already integral cents this is exact
    /// equality, but the helper documents the intent at call sites that
    /// compare derived quantities.
    #[inline]
    pub fn approx_eq(self, other: Cents) -> bool {
        (self.0 - other.0).abs() < 1
    }

    /// Parse a decimal string (e.g. `"-1000.00"`) into `Cents`. Used at the
    /// config/persistence boundary, where amounts are kept as decimal
    /// strings rather than floats to avoid drift.
    pub fn parse(s: &str) -> Result<Cents, ParseMoneyError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseMoneyError::Empty);
        }
        let (neg, s) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let mut parts = s.splitn(2, '.');
        let whole = parts.next().unwrap_or("0");
        let frac = parts.next().unwrap_or("0");
        if frac.len() > 2 {
            return Err(ParseMoneyError::TooPrecise);
        }
        let whole: i64 = whole
            .parse()
            .map_err(|_| ParseMoneyError::Invalid(s.to_string()))?;
        let frac_padded = format!("{:0<2}", frac);
        let frac: i64 = frac_padded
            .parse()
            .map_err(|_| ParseMoneyError::Invalid(s.to_string()))?;
        let mut raw = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac))
            .ok_or(ParseMoneyError::Overflow)?;
        if neg {
            raw = -raw;
        }
        Ok(Cents(raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseMoneyError {
    Empty,
    TooPrecise,
    Invalid(String),
    Overflow,
}

impl std::fmt::Display for ParseMoneyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty money string"),
            Self::TooPrecise => write!(f, "money string has more than 2 fractional digits"),
            Self::Invalid(s) => write!(f, "invalid money string: {s:?}"),
            Self::Overflow => write!(f, "money string overflows i64 cents"),
        }
    }
}

impl std::error::Error for ParseMoneyError {}

impl Add for Cents {
    type Output = Cents;
    #[inline]
    fn add(self, rhs: Cents) -> Cents {
        Cents(self.0 + rhs.0)
    }
}

impl Sub for Cents {
    type Output = Cents;
    #[inline]
    fn sub(self, rhs: Cents) -> Cents {
        Cents(self.0 - rhs.0)
    }
}

impl Neg for Cents {
    type Output = Cents;
    #[inline]
    fn neg(self) -> Cents {
        Cents(-self.0)
    }
}

impl AddAssign for Cents {
    #[inline]
    fn add_assign(&mut self, rhs: Cents) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Cents {
    #[inline]
    fn sub_assign(&mut self, rhs: Cents) {
        self.0 -= rhs.0;
    }
}

impl std::fmt::Display for Cents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dollars = self.0 / 100;
        let frac = (self.0 % 100).abs();
        if self.0 < 0 && dollars == 0 {
            write!(f, "-{dollars}.{frac:02}")
        } else {
            write!(f, "{dollars}.{frac:02}")
        }
    }
}

// ---------------------------------------------------------------------------
// Price
// ---------------------------------------------------------------------------

/// A fixed-point instrument price at 1e-6 scale (micros).
///
/// Kept distinct from [`Cents`] because instrument prices (and the
/// differences between them) carry more precision than the cent-scale
/// money values they are eventually combined into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Price(i64);

#[cfg(feature = "serde")]
impl Serialize for Price {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Price::parse(&s).map_err(serde::de::Error::custom)
    }
}

pub const PRICE_SCALE: i64 = 1_000_000;

impl Price {
    pub const ZERO: Price = Price(0);

    #[inline]
    pub const fn new(raw_micros: i64) -> Self {
        Price(raw_micros)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    pub fn parse(s: &str) -> Result<Price, ParseMoneyError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseMoneyError::Empty);
        }
        let (neg, s) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let mut parts = s.splitn(2, '.');
        let whole = parts.next().unwrap_or("0");
        let frac = parts.next().unwrap_or("0");
        if frac.len() > 6 {
            return Err(ParseMoneyError::TooPrecise);
        }
        let whole: i64 = whole
            .parse()
            .map_err(|_| ParseMoneyError::Invalid(s.to_string()))?;
        let frac_padded = format!("{:0<6}", frac);
        let frac: i64 = frac_padded
            .parse()
            .map_err(|_| ParseMoneyError::Invalid(s.to_string()))?;
        let mut raw = whole
            .checked_mul(PRICE_SCALE)
            .and_then(|w| w.checked_add(frac))
            .ok_or(ParseMoneyError::Overflow)?;
        if neg {
            raw = -raw;
        }
        Ok(Price(raw))
    }
}

impl Sub for Price {
    type Output = Price;
    #[inline]
    fn sub(self, rhs: Price) -> Price {
        Price(self.0 - rhs.0)
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let whole = self.0 / PRICE_SCALE;
        let frac = (self.0 % PRICE_SCALE).abs();
        if self.0 < 0 && whole == 0 {
            write!(f, "-{whole}.{frac:06}")
        } else {
            write!(f, "{whole}.{frac:06}")
        }
    }
}

// ---------------------------------------------------------------------------
// Rounding boundary
// ---------------------------------------------------------------------------

/// Quantize a price-difference × quantity × tick-value product into
/// `Cents`, rounding half-up (half away from zero) at the single rounding
/// boundary every unrealized P&L calculation in this workspace passes
/// through.
///
/// `diff` is a [`Price`] delta (1e-6 scale), `quantity` is a plain
/// contract count, and `tick_value_cents` is dollars-per-point-per-contract
/// expressed in cents. The product carries scale `1e-6 * 1 * 1e-2`; dividing
/// by `PRICE_SCALE` (1e6) brings it down to cents.
pub fn unrealized_pnl_cents(diff: Price, quantity: i64, tick_value_cents: Cents) -> Cents {
    let raw: i128 = (diff.raw() as i128)
        * (quantity as i128)
        * (tick_value_cents.raw() as i128);
    Cents(round_half_up_div(raw, PRICE_SCALE as i128))
}

/// Round `numerator / denominator` half-up (half away from zero) to the
/// nearest integer. `denominator` must be strictly positive.
fn round_half_up_div(numerator: i128, denominator: i128) -> i64 {
    debug_assert!(denominator > 0);
    let half = denominator / 2;
    let result = if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        -((-numerator + half) / denominator)
    };
    result as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_add_sub_roundtrip() {
        let a = Cents::new(12_345);
        let b = Cents::new(678);
        assert_eq!((a + b) - b, a);
    }

    #[test]
    fn cents_display_negative_under_a_dollar() {
        assert_eq!(format!("{}", Cents::new(-5)), "-0.05");
    }

    #[test]
    fn cents_parse_basic() {
        assert_eq!(Cents::parse("-1000.00").unwrap(), Cents::new(-100_000));
        assert_eq!(Cents::parse("5").unwrap(), Cents::new(500));
        assert_eq!(Cents::parse("5.5").unwrap(), Cents::new(550));
    }

    #[test]
    fn cents_parse_rejects_too_precise() {
        assert_eq!(Cents::parse("1.234"), Err(ParseMoneyError::TooPrecise));
    }

    #[test]
    fn price_parse_and_display() {
        let p = Price::parse("4990.00").unwrap();
        assert_eq!(p.raw(), 4_990_000_000);
        assert_eq!(format!("{p}"), "4990.000000");
    }

    #[test]
    fn unrealized_pnl_matches_scenario_b() {
        // (4990 - 5000) * 2 contracts * $5/point tick value = -$100.00
        let entry = Price::parse("5000.00").unwrap();
        let current = Price::parse("4990.00").unwrap();
        let diff = current - entry;
        let pnl = unrealized_pnl_cents(diff, 2, Cents::new(500));
        assert_eq!(pnl, Cents::new(-10_000));
    }

    #[test]
    fn unrealized_pnl_matches_scenario_a_es() {
        // ES tick value $50/point; 3 contracts long at 4500, unchanged price => 0 pnl.
        let entry = Price::parse("4500.00").unwrap();
        let diff = entry - entry;
        let pnl = unrealized_pnl_cents(diff, 3, Cents::new(5_000));
        assert_eq!(pnl, Cents::ZERO);
    }

    #[test]
    fn round_half_up_rounds_away_from_zero_on_exact_half() {
        // 3 / 2 = 1.5 -> rounds to 2 (half-up / half-away-from-zero)
        assert_eq!(round_half_up_div(3, 2), 2);
        assert_eq!(round_half_up_div(-3, 2), -2);
    }

    #[test]
    fn saturating_add_clamps() {
        assert_eq!(Cents::MAX.saturating_add(Cents::new(1)), Cents::MAX);
        assert_eq!(Cents::MIN.saturating_sub(Cents::new(1)), Cents::MIN);
    }

    #[test]
    fn cents_serde_roundtrips_through_decimal_string() {
        let c = Cents::new(-100_000);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"-1000.00\"");
        let back: Cents = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn no_float_adversarial_prices_stay_exact() {
        // 0.1 + 0.2-class adversarial input: parsed straight to integer cents,
        // never through a binary float, so no representation drift is possible.
        let a = Cents::parse("0.10").unwrap();
        let b = Cents::parse("0.20").unwrap();
        assert_eq!(a + b, Cents::parse("0.30").unwrap());
    }
}
