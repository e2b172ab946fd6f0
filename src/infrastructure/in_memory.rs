use crate::domain::account::AccountSettings;
use crate::domain::ledger::LedgerEntry;
use crate::domain::ports::{
    AccountDirectory, LedgerStore, PaymentStore, StoreSession, StoreSessionBox, TransactionStore,
};
use crate::domain::transaction::{
    Transaction, TransactionId, TransactionStatus, TransactionUpdate,
};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    transactions: HashMap<TransactionId, Transaction>,
    ledger: Vec<LedgerEntry>,
}

impl State {
    fn has_ledger_entry(&self, id: &TransactionId) -> bool {
        self.ledger.iter().any(|e| &e.transaction_id == id)
    }
}

/// A thread-safe in-memory store for transactions and the ledger.
///
/// Both tables live behind one `RwLock`, so a session commit is atomic with
/// respect to every other read and write.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn insert(&self, tx: Transaction) -> Result<()> {
        let mut state = self.state.write().await;
        if state.transactions.contains_key(&tx.id) {
            return Err(GatewayError::Duplicate(format!("transaction {}", tx.id)));
        }
        state.transactions.insert(tx.id, tx);
        Ok(())
    }

    async fn find(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state.transactions.get(id).cloned())
    }

    async fn find_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|tx| tx.status == status)
            .cloned()
            .collect())
    }

    async fn update_if(
        &self,
        id: &TransactionId,
        expected: TransactionStatus,
        update: TransactionUpdate,
    ) -> Result<Option<Transaction>> {
        let mut state = self.state.write().await;
        let tx = state
            .transactions
            .get_mut(id)
            .ok_or(GatewayError::NotFound(*id))?;
        if tx.apply_if(expected, update)? {
            Ok(Some(tx.clone()))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn append(&self, entry: LedgerEntry) -> Result<()> {
        let mut state = self.state.write().await;
        if state.has_ledger_entry(&entry.transaction_id) {
            return Err(GatewayError::Duplicate(format!(
                "ledger entry for transaction {}",
                entry.transaction_id
            )));
        }
        state.ledger.push(entry);
        Ok(())
    }

    async fn find_by_transaction(&self, id: &TransactionId) -> Result<Option<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state
            .ledger
            .iter()
            .find(|e| &e.transaction_id == id)
            .cloned())
    }

    async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state.ledger.clone())
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn begin(&self) -> Result<StoreSessionBox> {
        Ok(Box::new(InMemorySession {
            state: Arc::clone(&self.state),
            ops: Vec::new(),
            closed: false,
        }))
    }
}

enum StagedOp {
    Update {
        id: TransactionId,
        expected: TransactionStatus,
        update: TransactionUpdate,
    },
    Append(LedgerEntry),
}

/// Buffers operations until commit, then validates and applies them under
/// the store's write lock.
pub struct InMemorySession {
    state: Arc<RwLock<State>>,
    ops: Vec<StagedOp>,
    closed: bool,
}

#[async_trait]
impl StoreSession for InMemorySession {
    fn update_if(
        &mut self,
        id: TransactionId,
        expected: TransactionStatus,
        update: TransactionUpdate,
    ) {
        self.ops.push(StagedOp::Update {
            id,
            expected,
            update,
        });
    }

    fn append_ledger(&mut self, entry: LedgerEntry) {
        self.ops.push(StagedOp::Append(entry));
    }

    async fn commit(&mut self) -> Result<()> {
        if self.closed {
            return Err(GatewayError::PersistenceFatal(
                "session already closed".to_string(),
            ));
        }
        let mut state = self.state.write().await;

        // Apply to copies first so a failed condition leaves nothing behind.
        let mut touched: HashMap<TransactionId, Transaction> = HashMap::new();
        let mut appended: Vec<LedgerEntry> = Vec::new();
        for op in &self.ops {
            match op {
                StagedOp::Update {
                    id,
                    expected,
                    update,
                } => {
                    let current = match touched.remove(id) {
                        Some(tx) => tx,
                        None => state
                            .transactions
                            .get(id)
                            .cloned()
                            .ok_or(GatewayError::NotFound(*id))?,
                    };
                    let mut next = current;
                    if !next.apply_if(*expected, update.clone())? {
                        return Err(GatewayError::PreconditionFailed(*id));
                    }
                    touched.insert(*id, next);
                }
                StagedOp::Append(entry) => {
                    let id = &entry.transaction_id;
                    if state.has_ledger_entry(id) || appended.iter().any(|e| &e.transaction_id == id)
                    {
                        return Err(GatewayError::Duplicate(format!(
                            "ledger entry for transaction {id}"
                        )));
                    }
                    appended.push(entry.clone());
                }
            }
        }

        state.transactions.extend(touched);
        state.ledger.extend(appended);
        self.ops.clear();
        self.closed = true;
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        self.ops.clear();
        self.closed = true;
        Ok(())
    }
}

/// Account settings held in memory, typically loaded from a JSON file.
#[derive(Default, Clone)]
pub struct InMemoryAccountDirectory {
    accounts: Arc<RwLock<HashMap<String, AccountSettings>>>,
}

impl InMemoryAccountDirectory {
    /// Creates a new, empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = AccountSettings>) -> Self {
        let map = accounts
            .into_iter()
            .map(|settings| (settings.account.clone(), settings))
            .collect();
        Self {
            accounts: Arc::new(RwLock::new(map)),
        }
    }

    /// Parses a JSON array of [`AccountSettings`].
    pub fn from_json(json: &str) -> Result<Self> {
        let accounts: Vec<AccountSettings> = serde_json::from_str(json)?;
        Ok(Self::with_accounts(accounts))
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn settings(&self, account: &str) -> Result<Option<AccountSettings>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(account).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Amount, CurrencyCode};
    use crate::domain::transaction::{
        AcceptableIssuers, ConfirmationDetails, NewTransaction, TransactionKind,
    };
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn transaction() -> Transaction {
        let created = Utc::now();
        Transaction::new(NewTransaction {
            kind: TransactionKind::Payment,
            account: "merchant-1".to_string(),
            value: Amount::new(dec!(1.0)).unwrap(),
            currency: CurrencyCode::parse("XBT").unwrap(),
            acceptable_issuers: AcceptableIssuers::Any,
            order_id: None,
            seller: None,
            return_url: None,
            callback_url: None,
            created,
            expires: created + Duration::minutes(5),
        })
        .unwrap()
    }

    fn entry(tx: &Transaction) -> LedgerEntry {
        LedgerEntry::for_settlement(tx, tx.value, Utc::now())
    }

    #[tokio::test]
    async fn test_in_memory_insert_and_find() {
        let store = InMemoryStore::new();
        let tx = transaction();

        store.insert(tx.clone()).await.unwrap();
        let retrieved = store.find(&tx.id).await.unwrap().unwrap();
        assert_eq!(retrieved, tx);

        assert!(store.find(&TransactionId::new()).await.unwrap().is_none());
        assert!(matches!(
            store.insert(tx).await,
            Err(GatewayError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_conditional_update() {
        let store = InMemoryStore::new();
        let tx = transaction();
        store.insert(tx.clone()).await.unwrap();

        let skipped = store
            .update_if(&tx.id, TransactionStatus::Processing, TransactionUpdate::Release)
            .await
            .unwrap();
        assert!(skipped.is_none());

        let expired = store
            .update_if(&tx.id, TransactionStatus::Initial, TransactionUpdate::Expire)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(expired.status, TransactionStatus::Expired);
        assert_eq!(
            store.find_by_status(TransactionStatus::Expired).await.unwrap().len(),
            1
        );

        assert!(matches!(
            store
                .update_if(
                    &TransactionId::new(),
                    TransactionStatus::Initial,
                    TransactionUpdate::Expire
                )
                .await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_session_commit_applies_all_operations() {
        let store = InMemoryStore::new();
        let tx = transaction();
        store.insert(tx.clone()).await.unwrap();

        let mut session = store.begin().await.unwrap();
        session.update_if(
            tx.id,
            TransactionStatus::Initial,
            TransactionUpdate::Reserve(ConfirmationDetails::default()),
        );
        session.append_ledger(entry(&tx));

        // Nothing is visible before commit.
        assert_eq!(
            store.find(&tx.id).await.unwrap().unwrap().status,
            TransactionStatus::Initial
        );

        session.commit().await.unwrap();
        assert_eq!(
            store.find(&tx.id).await.unwrap().unwrap().status,
            TransactionStatus::Processing
        );
        assert!(store.find_by_transaction(&tx.id).await.unwrap().is_some());
        assert!(session.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_session_commit_is_conditional() {
        let store = InMemoryStore::new();
        let tx = transaction();
        store.insert(tx.clone()).await.unwrap();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        for session in [&mut first, &mut second] {
            session.update_if(
                tx.id,
                TransactionStatus::Initial,
                TransactionUpdate::Reserve(ConfirmationDetails::default()),
            );
            session.append_ledger(entry(&tx));
        }

        first.commit().await.unwrap();
        assert!(matches!(
            second.commit().await,
            Err(GatewayError::PreconditionFailed(id)) if id == tx.id
        ));
        assert_eq!(store.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_abort_discards_operations() {
        let store = InMemoryStore::new();
        let tx = transaction();
        store.insert(tx.clone()).await.unwrap();

        let mut session = store.begin().await.unwrap();
        session.update_if(tx.id, TransactionStatus::Initial, TransactionUpdate::Expire);
        session.abort().await.unwrap();

        assert_eq!(
            store.find(&tx.id).await.unwrap().unwrap().status,
            TransactionStatus::Initial
        );
    }

    #[tokio::test]
    async fn test_ledger_rejects_second_entry() {
        let store = InMemoryStore::new();
        let tx = transaction();
        store.append(entry(&tx)).await.unwrap();
        assert!(matches!(
            store.append(entry(&tx)).await,
            Err(GatewayError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_account_directory() {
        let json = r#"[{"account":"m1","default_currency":"XBT","default_timeout_secs":60}]"#;
        let directory = InMemoryAccountDirectory::from_json(json).unwrap();
        assert!(directory.settings("m1").await.unwrap().is_some());
        assert!(directory.settings("m2").await.unwrap().is_none());
    }
}
