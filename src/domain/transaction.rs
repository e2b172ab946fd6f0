use super::issuer::VerifyOutcome;
use super::money::{Amount, CurrencyCode};
use super::token::EncodedToken;
use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use url::Url;
use uuid::Uuid;

/// Globally unique transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TransactionId {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| GatewayError::ValidationError(format!("Invalid transaction id {s:?}: {e}")))
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Initial,
    Processing,
    Resolved,
    Expired,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initial => "initial",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Transaction variants. Only payments are resolved by this gateway; the
/// other kinds exist so stored records round-trip, and are rejected by
/// creation and resolution.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    #[default]
    Payment,
    Withdrawal,
    Redeem,
}

impl TransactionKind {
    pub fn ensure_supported(self) -> Result<()> {
        match self {
            Self::Payment => Ok(()),
            Self::Withdrawal => Err(GatewayError::UnsupportedKind("withdrawal".to_string())),
            Self::Redeem => Err(GatewayError::UnsupportedKind("redeem".to_string())),
        }
    }
}

/// Issuers whose tokens a transaction accepts. Serialized as `"*"` or as a
/// list of domains.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AcceptableIssuers {
    #[default]
    Any,
    Only(BTreeSet<String>),
}

impl AcceptableIssuers {
    pub const WILDCARD: &'static str = "*";

    /// Builds the set from a list where a lone `"*"` means any issuer.
    pub fn parse<I, S>(domains: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for domain in domains {
            let domain = domain.as_ref().trim().to_ascii_lowercase();
            if domain == Self::WILDCARD {
                return Ok(Self::Any);
            }
            if domain.is_empty() {
                return Err(GatewayError::ValidationError(
                    "Acceptable issuer domain must not be empty".to_string(),
                ));
            }
            set.insert(domain);
        }
        if set.is_empty() {
            return Err(GatewayError::ValidationError(
                "At least one acceptable issuer is required".to_string(),
            ));
        }
        Ok(Self::Only(set))
    }

    pub fn permits(&self, domain: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Only(domains) => domains.contains(&domain.to_ascii_lowercase()),
        }
    }
}

impl Serialize for AcceptableIssuers {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Any => serializer.serialize_str(Self::WILDCARD),
            Self::Only(domains) => domains.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for AcceptableIssuers {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }
        let domains = match Raw::deserialize(deserializer)? {
            Raw::One(domain) => vec![domain],
            Raw::Many(domains) => domains,
        };
        AcceptableIssuers::parse(domains).map_err(serde::de::Error::custom)
    }
}

/// What the payer submitted: the token set and optional wallet metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConfirmationDetails {
    pub tokens: Vec<EncodedToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_type: Option<String>,
}

/// The issuer's verification result, kept on a resolved transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyDetails {
    pub tid: String,
    pub domain: String,
    pub verified_tokens: Vec<EncodedToken>,
    pub actual_value: Amount,
}

impl VerifyDetails {
    pub fn from_outcome(tid: &str, domain: &str, outcome: VerifyOutcome) -> Self {
        Self {
            tid: tid.to_string(),
            domain: domain.to_string(),
            verified_tokens: outcome.verified_tokens,
            actual_value: outcome.actual_value,
        }
    }
}

/// The closed set of state transitions a stored transaction accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionUpdate {
    /// `initial -> processing`, attaching the submission.
    Reserve(ConfirmationDetails),
    /// `processing -> initial`, the compensation rollback.
    Release,
    /// `processing -> resolved`.
    Resolve {
        details: VerifyDetails,
        paid: DateTime<Utc>,
    },
    /// `initial -> expired`.
    Expire,
}

impl TransactionUpdate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Reserve(_) => "reserve",
            Self::Release => "release",
            Self::Resolve { .. } => "resolve",
            Self::Expire => "expire",
        }
    }
}

/// The unit of settlement.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    #[serde(default)]
    pub kind: TransactionKind,
    /// Merchant account that receives the payment.
    pub account: String,
    pub value: Amount,
    pub currency: CurrencyCode,
    pub status: TransactionStatus,
    pub acceptable_issuers: AcceptableIssuers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_url: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<Url>,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_details: Option<ConfirmationDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_details: Option<VerifyDetails>,
}

/// Fields supplied when a transaction is created. Defaults have already been
/// filled in from the merchant's settings.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub account: String,
    pub value: Amount,
    pub currency: CurrencyCode,
    pub acceptable_issuers: AcceptableIssuers,
    pub order_id: Option<String>,
    pub seller: Option<Url>,
    pub return_url: Option<Url>,
    pub callback_url: Option<Url>,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

pub fn validate_account(account: &str) -> Result<()> {
    if account.trim().is_empty() {
        return Err(GatewayError::ValidationError(
            "Account must not be empty".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_expiry(created: DateTime<Utc>, expires: DateTime<Utc>) -> Result<()> {
    if expires <= created {
        return Err(GatewayError::ValidationError(format!(
            "Expiry {expires} must be after creation time {created}"
        )));
    }
    Ok(())
}

pub fn validate_order_id(order_id: Option<&str>) -> Result<()> {
    if let Some(order_id) = order_id
        && order_id.trim().is_empty()
    {
        return Err(GatewayError::ValidationError(
            "Order id must not be blank".to_string(),
        ));
    }
    Ok(())
}

/// Adds `transaction_id` (and `order_id` when present) to a merchant URL,
/// replacing any values the merchant supplied for those keys.
pub fn bind_url(url: &Url, id: TransactionId, order_id: Option<&str>) -> Result<Url> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GatewayError::ValidationError(format!(
            "Unsupported URL scheme in {url}"
        )));
    }
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "transaction_id" && k != "order_id")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut bound = url.clone();
    {
        let mut query = bound.query_pairs_mut();
        query.clear();
        for (k, v) in &kept {
            query.append_pair(k, v);
        }
        query.append_pair("transaction_id", &id.to_string());
        if let Some(order_id) = order_id {
            query.append_pair("order_id", order_id);
        }
    }
    Ok(bound)
}

impl Transaction {
    pub fn new(fields: NewTransaction) -> Result<Self> {
        fields.kind.ensure_supported()?;
        validate_account(&fields.account)?;
        validate_expiry(fields.created, fields.expires)?;
        validate_order_id(fields.order_id.as_deref())?;
        if fields.value.is_zero() {
            return Err(GatewayError::ValidationError(
                "Transaction value must be positive".to_string(),
            ));
        }

        let id = TransactionId::new();
        let order_id = fields.order_id.as_deref();
        let bind = |url: Option<Url>| url.map(|u| bind_url(&u, id, order_id)).transpose();

        Ok(Self {
            id,
            kind: fields.kind,
            account: fields.account.trim().to_string(),
            value: fields.value,
            currency: fields.currency,
            status: TransactionStatus::Initial,
            acceptable_issuers: fields.acceptable_issuers,
            seller: bind(fields.seller)?,
            return_url: bind(fields.return_url)?,
            callback_url: bind(fields.callback_url)?,
            order_id: fields.order_id,
            created: fields.created,
            expires: fields.expires,
            paid: None,
            confirmation_details: None,
            verify_details: None,
        })
    }

    /// Fails with the state-conflict error matching the current status
    /// unless the transaction can still be paid at `now`.
    pub fn ensure_payable(&self, now: DateTime<Utc>) -> Result<()> {
        self.kind.ensure_supported()?;
        match self.status {
            TransactionStatus::Initial if now >= self.expires => {
                Err(GatewayError::Expired(self.id))
            }
            TransactionStatus::Initial => Ok(()),
            TransactionStatus::Processing => Err(GatewayError::AlreadyProcessing(self.id)),
            TransactionStatus::Resolved => Err(GatewayError::AlreadyResolved(self.id)),
            TransactionStatus::Expired => Err(GatewayError::Expired(self.id)),
        }
    }

    /// The status an update must start from.
    pub fn required_status(update: &TransactionUpdate) -> TransactionStatus {
        match update {
            TransactionUpdate::Reserve(_) | TransactionUpdate::Expire => {
                TransactionStatus::Initial
            }
            TransactionUpdate::Release | TransactionUpdate::Resolve { .. } => {
                TransactionStatus::Processing
            }
        }
    }

    /// Applies a state transition, rejecting any the state machine forbids.
    pub fn apply(&mut self, update: TransactionUpdate) -> Result<()> {
        let required = Self::required_status(&update);
        if self.status != required {
            return Err(GatewayError::ValidationError(format!(
                "Cannot {} transaction {} in status {}",
                update.name(),
                self.id,
                self.status
            )));
        }
        match update {
            TransactionUpdate::Reserve(details) => {
                self.status = TransactionStatus::Processing;
                self.confirmation_details = Some(details);
            }
            TransactionUpdate::Release => {
                self.status = TransactionStatus::Initial;
                self.confirmation_details = None;
            }
            TransactionUpdate::Resolve { details, paid } => {
                self.status = TransactionStatus::Resolved;
                self.verify_details = Some(details);
                self.paid = Some(paid);
            }
            TransactionUpdate::Expire => {
                self.status = TransactionStatus::Expired;
            }
        }
        Ok(())
    }

    /// Conditional form of [`Transaction::apply`] used by stores: a status
    /// other than `expected` is a no-op reported as `false`.
    pub fn apply_if(
        &mut self,
        expected: TransactionStatus,
        update: TransactionUpdate,
    ) -> Result<bool> {
        if self.status != expected {
            return Ok(false);
        }
        self.apply(update)?;
        Ok(true)
    }
}
