use super::money::{Amount, CurrencyCode};
use super::transaction::{Transaction, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only settlement record, written once per resolved transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub account: String,
    pub currency: CurrencyCode,
    pub value: Amount,
    pub date: DateTime<Utc>,
    pub transaction_id: TransactionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl LedgerEntry {
    /// Builds the entry crediting `value` to the transaction's account, taking
    /// payer metadata from the reservation.
    pub fn for_settlement(tx: &Transaction, value: Amount, date: DateTime<Utc>) -> Self {
        let details = tx.confirmation_details.as_ref();
        Self {
            account: tx.account.clone(),
            currency: tx.currency.clone(),
            value,
            date,
            transaction_id: tx.id,
            memo: details.and_then(|d| d.memo.clone()),
            client_type: details.and_then(|d| d.client_type.clone()),
            order_id: tx.order_id.clone(),
        }
    }
}
