use super::money::Amount;
use super::token::EncodedToken;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an issuer session is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuerIntent {
    Verify,
}

/// An open issuer session, valid between `begin` and its matching `end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuerSession {
    pub tid: String,
    pub domain: String,
    /// Fee schedule as returned by the issuer, kept opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyRequest {
    pub expiry: DateTime<Utc>,
    pub tokens: Vec<EncodedToken>,
    pub target_value: Amount,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyOutcome {
    pub verified_tokens: Vec<EncodedToken>,
    pub actual_value: Amount,
}
