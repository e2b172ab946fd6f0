//! Decoding of payer-submitted tokens ("coins").
//!
//! A token travels as base64-encoded JSON carrying at least the currency
//! code (`c`), a decimal value (`v`) and the issuing domain (`d`). The gateway
//! only ever decodes tokens; the original opaque payload is what gets
//! forwarded to the issuer.

use super::money::{Amount, CurrencyCode};
use crate::error::{GatewayError, Result};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The opaque token exactly as the payer submitted it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedToken(String);

impl EncodedToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EncodedToken {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl fmt::Display for EncodedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decoded token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub currency: CurrencyCode,
    pub value: Amount,
    pub issuing_domain: String,
}

#[derive(Deserialize)]
struct WireToken {
    c: String,
    v: serde_json::Value,
    d: String,
}

fn malformed(reason: impl Into<String>) -> GatewayError {
    GatewayError::MalformedToken(reason.into())
}

fn decode_base64(raw: &str) -> Result<Vec<u8>> {
    let raw = raw.trim();
    STANDARD
        .decode(raw)
        .or_else(|_| URL_SAFE.decode(raw))
        .or_else(|_| URL_SAFE_NO_PAD.decode(raw))
        .map_err(|e| malformed(format!("invalid base64: {e}")))
}

fn parse_value(raw: &serde_json::Value) -> Result<Amount> {
    let text = match raw {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => return Err(malformed(format!("value is not numeric: {other}"))),
    };
    let value = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| malformed(format!("value is not a number: {text:?}")))?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(malformed(format!("value is negative: {text}")));
    }
    Amount::new(value).map_err(|e| malformed(e.to_string()))
}

/// Decodes a single token.
pub fn decode(token: &EncodedToken) -> Result<Coin> {
    let bytes = decode_base64(token.as_str())?;
    let wire: WireToken =
        serde_json::from_slice(&bytes).map_err(|e| malformed(format!("invalid payload: {e}")))?;

    let currency = CurrencyCode::parse(&wire.c).map_err(|e| malformed(e.to_string()))?;
    let value = parse_value(&wire.v)?;
    let issuing_domain = wire.d.trim().to_ascii_lowercase();
    if issuing_domain.is_empty() {
        return Err(malformed("issuing domain is empty"));
    }

    Ok(Coin {
        currency,
        value,
        issuing_domain,
    })
}

/// Decodes every token, failing on the first malformed one.
pub fn decode_all(tokens: &[EncodedToken]) -> Result<Vec<Coin>> {
    tokens.iter().map(decode).collect()
}

/// Sum of the decoded values of `tokens`.
///
/// A total beyond the decimal range is reported as a malformed token.
pub fn aggregate_value(tokens: &[EncodedToken]) -> Result<Amount> {
    let coins = decode_all(tokens)?;
    Amount::checked_sum(coins.into_iter().map(|coin| coin.value))
        .map_err(|e| malformed(format!("token values do not add up: {e}")))
}
