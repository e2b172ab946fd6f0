#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokenpay::application::engine::PaymentSubmission;
use tokenpay::domain::issuer::{IssuerIntent, IssuerSession, VerifyOutcome, VerifyRequest};
use tokenpay::domain::ledger::LedgerEntry;
use tokenpay::domain::money::{Amount, CurrencyCode};
use tokenpay::domain::ports::{
    IssuerClient, LedgerStore, PaymentStore, StoreSession, StoreSessionBox, TransactionStore,
};
use tokenpay::domain::token::{self, EncodedToken};
use tokenpay::domain::transaction::{
    AcceptableIssuers, NewTransaction, Transaction, TransactionId, TransactionKind,
    TransactionStatus, TransactionUpdate,
};
use tokenpay::error::{GatewayError, Result};
use tokenpay::infrastructure::in_memory::InMemoryStore;

pub const ISSUER: &str = "issuer.example";

/// Encodes a token the way wallets do: base64 of `{"c","v","d"}`.
pub fn token(currency: &str, value: &str, domain: &str) -> EncodedToken {
    EncodedToken::new(STANDARD.encode(format!(
        r#"{{"c":"{currency}","v":"{value}","d":"{domain}"}}"#
    )))
}

pub fn submission(tokens: Vec<EncodedToken>) -> PaymentSubmission {
    PaymentSubmission {
        tokens,
        wallet_id: Some("wallet-1".to_string()),
        memo: Some("order memo".to_string()),
        client_type: Some("test-wallet".to_string()),
    }
}

pub fn transaction_with(value: Amount, currency: &str, lifetime: Duration) -> Transaction {
    let created = Utc::now();
    Transaction::new(NewTransaction {
        kind: TransactionKind::Payment,
        account: "merchant-1".to_string(),
        value,
        currency: CurrencyCode::parse(currency).unwrap(),
        acceptable_issuers: AcceptableIssuers::Any,
        order_id: Some("order-1".to_string()),
        seller: None,
        return_url: None,
        callback_url: None,
        created,
        expires: created + lifetime,
    })
    .unwrap()
}

/// A 0.01 XBT payment that expires in ten minutes.
pub fn transaction() -> Transaction {
    transaction_with(Amount::new(dec!(0.01)).unwrap(), "XBT", Duration::minutes(10))
}

/// Issuer double that records every call and fails on demand.
///
/// Unless told otherwise it values a submission at the sum of its tokens.
#[derive(Default)]
pub struct ScriptedIssuer {
    calls: Mutex<Vec<String>>,
    begin_failures: Mutex<VecDeque<GatewayError>>,
    verify_failures: Mutex<VecDeque<GatewayError>>,
    end_failures: Mutex<VecDeque<GatewayError>>,
    actual_value: Mutex<Option<Amount>>,
    verify_delay: Mutex<Option<std::time::Duration>>,
    sessions: AtomicUsize,
}

impl ScriptedIssuer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_begin(&self, err: GatewayError) {
        self.begin_failures.lock().push_back(err);
    }

    pub fn fail_verify(&self, err: GatewayError) {
        self.verify_failures.lock().push_back(err);
    }

    pub fn fail_end(&self, err: GatewayError) {
        self.end_failures.lock().push_back(err);
    }

    pub fn value_at(&self, value: Amount) {
        *self.actual_value.lock() = Some(value);
    }

    pub fn delay_verify(&self, delay: std::time::Duration) {
        *self.verify_delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of calls to `op` (`begin`, `verify` or `end`).
    pub fn count(&self, op: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.split(':').next() == Some(op))
            .count()
    }
}

#[async_trait]
impl IssuerClient for ScriptedIssuer {
    async fn begin(&self, domain: &str, _intent: IssuerIntent) -> Result<IssuerSession> {
        self.calls.lock().push(format!("begin:{domain}"));
        if let Some(err) = self.begin_failures.lock().pop_front() {
            return Err(err);
        }
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IssuerSession {
            tid: format!("tid-{n}"),
            domain: domain.to_string(),
            fee: None,
        })
    }

    async fn verify(&self, session: &IssuerSession, request: VerifyRequest) -> Result<VerifyOutcome> {
        self.calls.lock().push(format!("verify:{}", session.tid));
        let delay = *self.verify_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.verify_failures.lock().pop_front() {
            return Err(err);
        }
        let fixed = *self.actual_value.lock();
        let actual_value = match fixed {
            Some(value) => value,
            None => token::aggregate_value(&request.tokens)?,
        };
        Ok(VerifyOutcome {
            verified_tokens: request.tokens,
            actual_value,
        })
    }

    async fn end(&self, session: &IssuerSession) -> Result<()> {
        self.calls.lock().push(format!("end:{}", session.tid));
        match self.end_failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// In-memory store whose session commits fail on demand.
///
/// Commits are numbered from 1 across all sessions; a scripted failure is
/// returned instead of committing, leaving the staged operations in place.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    commits: Arc<AtomicUsize>,
    failures: Arc<Mutex<HashMap<usize, GatewayError>>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_commit(&self, ordinal: usize, err: GatewayError) {
        self.failures.lock().insert(ordinal, err);
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionStore for FlakyStore {
    async fn insert(&self, tx: Transaction) -> Result<()> {
        self.inner.insert(tx).await
    }

    async fn find(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        self.inner.find(id).await
    }

    async fn find_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>> {
        self.inner.find_by_status(status).await
    }

    async fn update_if(
        &self,
        id: &TransactionId,
        expected: TransactionStatus,
        update: TransactionUpdate,
    ) -> Result<Option<Transaction>> {
        self.inner.update_if(id, expected, update).await
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn append(&self, entry: LedgerEntry) -> Result<()> {
        self.inner.append(entry).await
    }

    async fn find_by_transaction(&self, id: &TransactionId) -> Result<Option<LedgerEntry>> {
        self.inner.find_by_transaction(id).await
    }

    async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        self.inner.entries().await
    }
}

#[async_trait]
impl PaymentStore for FlakyStore {
    async fn begin(&self) -> Result<StoreSessionBox> {
        Ok(Box::new(FlakySession {
            inner: self.inner.begin().await?,
            commits: Arc::clone(&self.commits),
            failures: Arc::clone(&self.failures),
        }))
    }
}

struct FlakySession {
    inner: StoreSessionBox,
    commits: Arc<AtomicUsize>,
    failures: Arc<Mutex<HashMap<usize, GatewayError>>>,
}

#[async_trait]
impl StoreSession for FlakySession {
    fn update_if(
        &mut self,
        id: TransactionId,
        expected: TransactionStatus,
        update: TransactionUpdate,
    ) {
        self.inner.update_if(id, expected, update);
    }

    fn append_ledger(&mut self, entry: LedgerEntry) {
        self.inner.append_ledger(entry);
    }

    async fn commit(&mut self) -> Result<()> {
        let ordinal = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        let injected = self.failures.lock().remove(&ordinal);
        match injected {
            Some(err) => Err(err),
            None => self.inner.commit().await,
        }
    }

    async fn abort(&mut self) -> Result<()> {
        self.inner.abort().await
    }
}
