use crate::error::{GatewayError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Number of decimal places every monetary value is rounded to.
pub const PRECISION: u32 = 8;

/// Rounds a value to [`PRECISION`] places, half away from zero.
pub fn round_value(value: Decimal) -> Decimal {
    value
        .round_dp_with_strategy(PRECISION, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

/// A non-negative monetary amount at the system's fixed precision.
///
/// Construction always rounds, so two amounts that print the same compare
/// equal regardless of the scale they were parsed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(GatewayError::ValidationError(format!(
                "Amount must not be negative: {value}"
            )));
        }
        Ok(Self(round_value(value)))
    }

    /// Parses a decimal string such as `"0.02000000"`.
    pub fn parse(raw: &str) -> Result<Self> {
        let value = raw.trim().parse::<Decimal>().map_err(|e| {
            GatewayError::ValidationError(format!("Invalid decimal value {raw:?}: {e}"))
        })?;
        Self::new(value)
    }

    /// Adds two amounts, failing instead of overflowing the decimal range.
    pub fn checked_add(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_add(rhs.0)
            .map(|sum| Self(round_value(sum)))
            .ok_or_else(|| {
                GatewayError::ValidationError(format!("Amount overflow adding {self} and {rhs}"))
            })
    }

    /// Sums amounts with [`Amount::checked_add`].
    pub fn checked_sum<I>(amounts: I) -> Result<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, |total, amount| total.checked_add(amount))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = GatewayError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = <Decimal as Deserialize>::deserialize(deserializer)?;
        Amount::new(value).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An upper-case currency code such as `XBT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn parse(raw: &str) -> Result<Self> {
        let code = raw.trim().to_ascii_uppercase();
        let valid_len = (2..=12).contains(&code.len());
        if !valid_len || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(GatewayError::ValidationError(format!(
                "Invalid currency code: {raw:?}"
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for CurrencyCode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        CurrencyCode::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
