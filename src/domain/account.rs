use super::money::CurrencyCode;
use super::transaction::AcceptableIssuers;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Merchant settings consulted when a transaction is created.
///
/// Owned by the account collaborator; the gateway only reads them.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AccountSettings {
    /// The merchant account identifier.
    pub account: String,
    /// Currency used when a request does not name one.
    pub default_currency: CurrencyCode,
    /// Lifetime of a transaction when a request does not set one.
    pub default_timeout_secs: u64,
    /// Issuers accepted unless a request narrows them.
    #[serde(default)]
    pub acceptable_issuers: AcceptableIssuers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl AccountSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_deserialization_defaults_to_any_issuer() {
        let json = r#"{"account":"m1","default_currency":"xbt","default_timeout_secs":900}"#;
        let settings: AccountSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.default_currency.as_str(), "XBT");
        assert_eq!(settings.acceptable_issuers, AcceptableIssuers::Any);
        assert_eq!(settings.default_timeout(), Duration::from_secs(900));
        assert!(settings.email.is_none());
    }
}
