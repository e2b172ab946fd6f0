use super::account::AccountSettings;
use super::issuer::{IssuerIntent, IssuerSession, VerifyOutcome, VerifyRequest};
use super::ledger::LedgerEntry;
use super::transaction::{Transaction, TransactionId, TransactionStatus, TransactionUpdate};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Persistence for transaction records.
///
/// Errors classified as [`GatewayError::PersistenceTransient`] may be retried
/// by re-issuing the same call; every other error is final.
///
/// [`GatewayError::PersistenceTransient`]: crate::error::GatewayError::PersistenceTransient
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Inserts a new record; fails with `Duplicate` if the id exists.
    async fn insert(&self, tx: Transaction) -> Result<()>;
    async fn find(&self, id: &TransactionId) -> Result<Option<Transaction>>;
    async fn find_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>>;
    /// Applies `update` only if the stored status equals `expected`.
    ///
    /// Returns the updated record, or `None` when the condition did not hold.
    /// A missing record is `NotFound`.
    async fn update_if(
        &self,
        id: &TransactionId,
        expected: TransactionStatus,
        update: TransactionUpdate,
    ) -> Result<Option<Transaction>>;
}

/// Append-only settlement ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Appends an entry; fails with `Duplicate` if the transaction already
    /// has one.
    async fn append(&self, entry: LedgerEntry) -> Result<()>;
    async fn find_by_transaction(&self, id: &TransactionId) -> Result<Option<LedgerEntry>>;
    async fn entries(&self) -> Result<Vec<LedgerEntry>>;
}

/// A unit of work over transactions and the ledger.
///
/// Operations are staged locally and take effect together on `commit`.
/// Commit re-checks every staged status condition against the stored
/// records; a failed condition aborts the whole unit with
/// `PreconditionFailed`. A transient commit failure leaves the staged
/// operations intact so the commit can be re-issued.
#[async_trait]
pub trait StoreSession: Send {
    fn update_if(
        &mut self,
        id: TransactionId,
        expected: TransactionStatus,
        update: TransactionUpdate,
    );
    fn append_ledger(&mut self, entry: LedgerEntry);
    async fn commit(&mut self) -> Result<()>;
    async fn abort(&mut self) -> Result<()>;
}

pub type StoreSessionBox = Box<dyn StoreSession>;

#[async_trait]
pub trait PaymentStore: TransactionStore + LedgerStore {
    async fn begin(&self) -> Result<StoreSessionBox>;
}

pub type PaymentStoreRef = Arc<dyn PaymentStore>;

/// The three-step issuer confirmation protocol. Implementations perform no
/// retries of their own.
#[async_trait]
pub trait IssuerClient: Send + Sync {
    async fn begin(&self, domain: &str, intent: IssuerIntent) -> Result<IssuerSession>;
    async fn verify(&self, session: &IssuerSession, request: VerifyRequest)
    -> Result<VerifyOutcome>;
    async fn end(&self, session: &IssuerSession) -> Result<()>;
}

pub type IssuerClientRef = Arc<dyn IssuerClient>;

/// Read access to merchant settings.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn settings(&self, account: &str) -> Result<Option<AccountSettings>>;
}

pub type AccountDirectoryRef = Arc<dyn AccountDirectory>;
