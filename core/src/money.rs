//! Currency-tagged money in minor units.
//!
//! Amounts are stored in minor units (paise, cents) to avoid floating-point
//! arithmetic. Every amount carries its currency; arithmetic across
//! currencies is a programming error and is rejected rather than coerced.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported settlement currencies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    /// Indian rupee (minor unit: paise).
    Inr,
    /// United States dollar (minor unit: cents).
    Usd,
    /// Euro (minor unit: cents).
    Eur,
}

impl Currency {
    /// ISO 4217 code for this currency.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Inr => "INR",
            Self::Usd => "USD",
            Self::Eur => "EUR",
        }
    }

    /// Parse an ISO 4217 code (case-insensitive).
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "INR" => Some(Self::Inr),
            "USD" => Some(Self::Usd),
            "EUR" => Some(Self::Eur),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// An amount of money in minor units, tagged with its currency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    minor: u64,
    currency: Currency,
}

impl Money {
    /// Creates a `Money` value from minor units (paise, cents).
    #[must_use]
    pub const fn from_minor(minor: u64, currency: Currency) -> Self {
        Self { minor, currency }
    }

    /// Creates a `Money` value from major units, with overflow checking.
    #[must_use]
    pub const fn checked_from_major(major: u64, currency: Currency) -> Option<Self> {
        match major.checked_mul(100) {
            Some(minor) => Some(Self { minor, currency }),
            None => None,
        }
    }

    /// Returns the amount in minor units.
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.minor
    }

    /// Returns the currency tag.
    #[must_use]
    pub const fn currency(&self) -> Currency {
        self.currency
    }

    /// Checks if the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.minor == 0
    }

    /// Adds two amounts of the same currency with overflow checking.
    ///
    /// Returns `None` on currency mismatch or overflow.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        if self.currency != other.currency {
            return None;
        }
        self.minor.checked_add(other.minor).map(|minor| Self {
            minor,
            currency: self.currency,
        })
    }

    /// Multiplies the amount by a quantity with overflow checking.
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.minor.checked_mul(quantity as u64) {
            Some(minor) => Some(Self {
                minor,
                currency: self.currency,
            }),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{:02}",
            self.currency.code(),
            self.minor / 100,
            self.minor % 100
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn major_units_convert_to_minor() {
        let amount = Money::checked_from_major(500, Currency::Inr).unwrap();
        assert_eq!(amount.minor(), 50_000);
        assert_eq!(amount.currency(), Currency::Inr);
    }

    #[test]
    fn display_includes_currency_code() {
        let amount = Money::from_minor(50_050, Currency::Inr);
        assert_eq!(amount.to_string(), "INR 500.50");
    }

    #[test]
    fn cross_currency_addition_is_rejected() {
        let inr = Money::from_minor(100, Currency::Inr);
        let usd = Money::from_minor(100, Currency::Usd);
        assert!(inr.checked_add(usd).is_none());
    }

    #[test]
    fn multiply_scales_by_seat_count() {
        let per_seat = Money::from_minor(25_000, Currency::Inr);
        let total = per_seat.checked_multiply(2).unwrap();
        assert_eq!(total.minor(), 50_000);
    }

    #[test]
    fn currency_parse_is_case_insensitive() {
        assert_eq!(Currency::parse("inr"), Some(Currency::Inr));
        assert_eq!(Currency::parse("USD"), Some(Currency::Usd));
        assert_eq!(Currency::parse("XYZ"), None);
    }
}
