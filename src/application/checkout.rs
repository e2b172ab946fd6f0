use super::retry::{RetryPolicy, retry_transient};
use super::scheduler::ExpirationScheduler;
use crate::domain::money::{Amount, CurrencyCode};
use crate::domain::ports::{AccountDirectoryRef, PaymentStoreRef, TransactionStore};
use crate::domain::transaction::{AcceptableIssuers, NewTransaction, Transaction, TransactionKind};
use crate::error::{GatewayError, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// A merchant's request to open a transaction. Unset fields fall back to the
/// account's settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub account: String,
    pub value: Amount,
    #[serde(default)]
    pub kind: TransactionKind,
    #[serde(default)]
    pub currency: Option<CurrencyCode>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub acceptable_issuers: Option<AcceptableIssuers>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub seller: Option<Url>,
    #[serde(default)]
    pub return_url: Option<Url>,
    #[serde(default)]
    pub callback_url: Option<Url>,
}

/// Something that went wrong without failing the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub code: String,
    pub message: String,
}

impl Warning {
    pub const EXPIRATION_NOT_SCHEDULED: &'static str = "expiration_not_scheduled";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedTransaction {
    pub transaction: Transaction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

/// Creates transactions on behalf of merchants.
pub struct Checkout {
    directory: AccountDirectoryRef,
    store: PaymentStoreRef,
    scheduler: Arc<ExpirationScheduler>,
    retry: RetryPolicy,
}

impl Checkout {
    pub fn new(
        directory: AccountDirectoryRef,
        store: PaymentStoreRef,
        scheduler: Arc<ExpirationScheduler>,
    ) -> Self {
        Self {
            directory,
            store,
            scheduler,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn create(&self, request: CheckoutRequest) -> Result<CreatedTransaction> {
        request.kind.ensure_supported()?;
        let account = request.account.trim();
        let settings = self.directory.settings(account).await?.ok_or_else(|| {
            GatewayError::ValidationError(format!("Unknown account {account:?}"))
        })?;

        let lifetime = request
            .timeout_secs
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| settings.default_timeout());
        let created = Utc::now();
        let expires = Duration::from_std(lifetime)
            .ok()
            .and_then(|lifetime| created.checked_add_signed(lifetime))
            .ok_or_else(|| {
                GatewayError::ValidationError(format!(
                    "Timeout of {}s is out of range",
                    lifetime.as_secs()
                ))
            })?;

        let tx = Transaction::new(NewTransaction {
            kind: request.kind,
            account: account.to_string(),
            value: request.value,
            currency: request.currency.unwrap_or(settings.default_currency),
            acceptable_issuers: request
                .acceptable_issuers
                .unwrap_or(settings.acceptable_issuers),
            order_id: request.order_id,
            seller: request.seller,
            return_url: request.return_url,
            callback_url: request.callback_url,
            created,
            expires,
        })?;

        retry_transient(&self.retry, "insert", || self.store.insert(tx.clone())).await?;
        info!(
            transaction_id = %tx.id,
            account = %tx.account,
            value = %tx.value,
            currency = %tx.currency,
            "transaction created"
        );

        let mut warnings = Vec::new();
        if let Err(err) = self.scheduler.schedule(tx.id, tx.expires) {
            warn!(transaction_id = %tx.id, error = %err, "expiration not scheduled");
            warnings.push(Warning {
                code: Warning::EXPIRATION_NOT_SCHEDULED.to_string(),
                message: err.to_string(),
            });
        }

        Ok(CreatedTransaction {
            transaction: tx,
            warnings,
        })
    }
}
