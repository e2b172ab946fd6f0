use crate::domain::ledger::LedgerEntry;
use crate::domain::ports::{
    LedgerStore, PaymentStore, StoreSession, StoreSessionBox, TransactionStore,
};
use crate::domain::transaction::{
    Transaction, TransactionId, TransactionStatus, TransactionUpdate,
};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for storing transaction records.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family for storing ledger entries, keyed by transaction id.
pub const CF_LEDGER: &str = "ledger";

/// A persistent store implementation using RocksDB.
///
/// Conditional writes and session commits read, check and write under a
/// single commit lock; the writes of a session land in one `WriteBatch`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    commit_lock: Arc<Mutex<()>>,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| GatewayError::PersistenceFatal(format!("Serialization error: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| GatewayError::PersistenceFatal(format!("Deserialization error: {e}")))
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families ("transactions" and "ledger") exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_transactions = ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default());
        let cf_ledger = ColumnFamilyDescriptor::new(CF_LEDGER, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_transactions, cf_ledger])?;

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            GatewayError::PersistenceFatal(format!("{name} column family not found"))
        })
    }

    fn read_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        let cf = self.cf(CF_TRANSACTIONS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn has_ledger_entry(&self, id: &TransactionId) -> Result<bool> {
        let cf = self.cf(CF_LEDGER)?;
        Ok(self.db.get_pinned_cf(cf, id.as_bytes())?.is_some())
    }

    fn scan<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let cf = self.cf(name)?;
        let mut items = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            items.push(decode(&value)?);
        }
        Ok(items)
    }
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn insert(&self, tx: Transaction) -> Result<()> {
        let _guard = self.commit_lock.lock().await;
        if self.read_transaction(&tx.id)?.is_some() {
            return Err(GatewayError::Duplicate(format!("transaction {}", tx.id)));
        }
        let cf = self.cf(CF_TRANSACTIONS)?;
        self.db.put_cf(cf, tx.id.as_bytes(), encode(&tx)?)?;
        Ok(())
    }

    async fn find(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        self.read_transaction(id)
    }

    async fn find_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>> {
        let all: Vec<Transaction> = self.scan(CF_TRANSACTIONS)?;
        Ok(all.into_iter().filter(|tx| tx.status == status).collect())
    }

    async fn update_if(
        &self,
        id: &TransactionId,
        expected: TransactionStatus,
        update: TransactionUpdate,
    ) -> Result<Option<Transaction>> {
        let _guard = self.commit_lock.lock().await;
        let mut tx = self.read_transaction(id)?.ok_or(GatewayError::NotFound(*id))?;
        if !tx.apply_if(expected, update)? {
            return Ok(None);
        }
        let cf = self.cf(CF_TRANSACTIONS)?;
        self.db.put_cf(cf, id.as_bytes(), encode(&tx)?)?;
        Ok(Some(tx))
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn append(&self, entry: LedgerEntry) -> Result<()> {
        let _guard = self.commit_lock.lock().await;
        if self.has_ledger_entry(&entry.transaction_id)? {
            return Err(GatewayError::Duplicate(format!(
                "ledger entry for transaction {}",
                entry.transaction_id
            )));
        }
        let cf = self.cf(CF_LEDGER)?;
        self.db
            .put_cf(cf, entry.transaction_id.as_bytes(), encode(&entry)?)?;
        Ok(())
    }

    async fn find_by_transaction(&self, id: &TransactionId) -> Result<Option<LedgerEntry>> {
        let cf = self.cf(CF_LEDGER)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self.scan(CF_LEDGER)?;
        entries.sort_by_key(|e| e.date);
        Ok(entries)
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn begin(&self) -> Result<StoreSessionBox> {
        Ok(Box::new(RocksDBSession {
            store: self.clone(),
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

pub struct RocksDBSession {
    store: RocksDBStore,
    ops: Vec<StagedOp>,
    closed: bool,
}

#[async_trait]
impl StoreSession for RocksDBSession {
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
        let store = &self.store;
        let _guard = store.commit_lock.lock().await;

        let mut touched: HashMap<TransactionId, Transaction> = HashMap::new();
        let mut batch = WriteBatch::default();
        let cf_ledger = store.cf(CF_LEDGER)?;
        let mut appended: Vec<TransactionId> = Vec::new();

        for op in &self.ops {
            match op {
                StagedOp::Update {
                    id,
                    expected,
                    update,
                } => {
                    let mut tx = match touched.remove(id) {
                        Some(tx) => tx,
                        None => store
                            .read_transaction(id)?
                            .ok_or(GatewayError::NotFound(*id))?,
                    };
                    if !tx.apply_if(*expected, update.clone())? {
                        return Err(GatewayError::PreconditionFailed(*id));
                    }
                    touched.insert(*id, tx);
                }
                StagedOp::Append(entry) => {
                    let id = entry.transaction_id;
                    if appended.contains(&id) || store.has_ledger_entry(&id)? {
                        return Err(GatewayError::Duplicate(format!(
                            "ledger entry for transaction {id}"
                        )));
                    }
                    batch.put_cf(cf_ledger, id.as_bytes(), encode(entry)?);
                    appended.push(id);
                }
            }
        }

        let cf_transactions = store.cf(CF_TRANSACTIONS)?;
        for (id, tx) in &touched {
            batch.put_cf(cf_transactions, id.as_bytes(), encode(tx)?);
        }
        store.db.write(batch)?;

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
