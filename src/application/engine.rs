use super::retry::retry_transient;
use crate::config::EngineConfig;
use crate::domain::issuer::{IssuerIntent, IssuerSession, VerifyRequest};
use crate::domain::ledger::LedgerEntry;
use crate::domain::money::Amount;
use crate::domain::ports::{
    IssuerClient, IssuerClientRef, PaymentStoreRef, StoreSessionBox, TransactionStore,
};
use crate::domain::token::{self, Coin};
use crate::domain::transaction::{
    ConfirmationDetails, Transaction, TransactionId, TransactionStatus, TransactionUpdate,
    VerifyDetails,
};
use crate::error::{GatewayError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, error, info, warn};
use url::Url;

/// What the payer submits against a transaction.
pub type PaymentSubmission = ConfirmationDetails;

/// The reply handed back to the payer's wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// `"ok"` or a failure code.
    pub status: String,
    pub wallet_id: Option<String>,
    pub return_url: Option<Url>,
    pub memo: Option<String>,
    pub seller: Option<Url>,
}

impl Acknowledgement {
    pub const OK: &'static str = "ok";

    fn ok(tx: &Transaction, submission: &PaymentSubmission) -> Self {
        Self {
            status: Self::OK.to_string(),
            wallet_id: submission.wallet_id.clone(),
            return_url: tx.return_url.clone(),
            memo: submission.memo.clone(),
            seller: tx.seller.clone(),
        }
    }

    /// `tx` is the transaction as stored when the payment failed, absent
    /// when it could not be loaded.
    fn failure(err: &GatewayError, submission: &PaymentSubmission, tx: Option<&Transaction>) -> Self {
        Self {
            status: err.failure_code().to_string(),
            wallet_id: submission.wallet_id.clone(),
            return_url: tx.and_then(|tx| tx.return_url.clone()),
            memo: submission.memo.clone(),
            seller: tx.and_then(|tx| tx.seller.clone()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Self::OK
    }
}

/// Checks a submission against a transaction without touching any state.
///
/// Returns the issuing domain every token shares.
pub fn validate_submission(
    tx: &Transaction,
    submission: &PaymentSubmission,
    now: chrono::DateTime<Utc>,
) -> Result<String> {
    tx.ensure_payable(now)?;

    if submission.tokens.is_empty() {
        return Err(GatewayError::ValidationError(
            "No tokens submitted".to_string(),
        ));
    }
    let coins: Vec<Coin> = token::decode_all(&submission.tokens)?;

    if let Some(coin) = coins.iter().find(|c| c.currency != tx.currency) {
        return Err(GatewayError::ValidationError(format!(
            "Token currency {} does not match transaction currency {}",
            coin.currency, tx.currency
        )));
    }

    let total = Amount::checked_sum(coins.iter().map(|c| c.value))?;
    if total < tx.value {
        return Err(GatewayError::ValidationError(format!(
            "Submitted value {total} is below the required {}",
            tx.value
        )));
    }

    let domain = coins[0].issuing_domain.clone();
    if coins.iter().any(|c| c.issuing_domain != domain) {
        return Err(GatewayError::ValidationError(
            "Tokens come from more than one issuer".to_string(),
        ));
    }
    if !tx.acceptable_issuers.permits(&domain) {
        return Err(GatewayError::ValidationError(format!(
            "Issuer {domain} is not accepted for this transaction"
        )));
    }
    Ok(domain)
}

/// Drives a payment from `initial` to `resolved`.
///
/// Each `pay` call reserves the transaction through a conditional session
/// commit, confirms the tokens with their issuer and settles in a second
/// session. Any failure after the reservation is compensated by rolling the
/// transaction back to `initial`.
pub struct PaymentEngine {
    store: PaymentStoreRef,
    issuer: IssuerClientRef,
    config: EngineConfig,
}

impl PaymentEngine {
    /// Creates a new `PaymentEngine` instance.
    ///
    /// # Arguments
    ///
    /// * `store` - Transaction and ledger persistence.
    /// * `issuer` - Client for the issuer confirmation protocol.
    pub fn new(store: PaymentStoreRef, issuer: IssuerClientRef) -> Self {
        Self::with_config(store, issuer, EngineConfig::default())
    }

    pub fn with_config(store: PaymentStoreRef, issuer: IssuerClientRef, config: EngineConfig) -> Self {
        Self {
            store,
            issuer,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn transaction(&self, id: &TransactionId) -> Result<Transaction> {
        self.store
            .find(id)
            .await?
            .ok_or(GatewayError::NotFound(*id))
    }

    /// Like [`PaymentEngine::pay`], folding any error into a failed
    /// acknowledgement.
    pub async fn respond(&self, id: &TransactionId, submission: PaymentSubmission) -> Acknowledgement {
        let fallback = submission.clone();
        match self.pay(id, submission).await {
            Ok(ack) => ack,
            Err(err) => {
                let known = match err {
                    GatewayError::NotFound(_) => None,
                    _ => self.store.find(id).await.ok().flatten(),
                };
                Acknowledgement::failure(&err, &fallback, known.as_ref())
            }
        }
    }

    /// Pays transaction `id` with the submitted tokens.
    pub async fn pay(&self, id: &TransactionId, submission: PaymentSubmission) -> Result<Acknowledgement> {
        let paid = self.process(id, submission).await;
        if let Err(err) = &paid {
            let code = err.failure_code();
            if err.is_client_error() {
                debug!(transaction_id = %id, code, error = %err, "payment rejected");
            } else {
                warn!(transaction_id = %id, code, error = %err, "payment failed");
            }
        }
        paid
    }

    async fn process(&self, id: &TransactionId, submission: PaymentSubmission) -> Result<Acknowledgement> {
        let tx = self.transaction(id).await?;
        let domain = validate_submission(&tx, &submission, Utc::now())?;

        let session = self.reserve(&tx, &submission, &domain).await?;
        info!(transaction_id = %id, tid = %session.tid, domain = %domain, "transaction reserved");

        match self.settle(&tx, &submission, &session).await {
            Ok(()) => {
                self.end_issuer_session(&session).await;
                info!(transaction_id = %id, "transaction resolved");
                Ok(Acknowledgement::ok(&tx, &submission))
            }
            Err(err) => {
                warn!(transaction_id = %id, error = %err, "resolution failed, compensating");
                self.compensate(&tx, &session).await;
                Err(err)
            }
        }
    }

    /// Opens the issuer session and durably moves the transaction to
    /// `processing`. Nothing is left behind when this fails.
    async fn reserve(
        &self,
        tx: &Transaction,
        submission: &PaymentSubmission,
        domain: &str,
    ) -> Result<IssuerSession> {
        let mut unit = self.begin_unit().await?;
        unit.update_if(
            tx.id,
            TransactionStatus::Initial,
            TransactionUpdate::Reserve(submission.clone()),
        );

        let session = match self
            .call_issuer("begin", || self.issuer.begin(domain, IssuerIntent::Verify))
            .await
        {
            Ok(session) => session,
            Err(err) => {
                self.abort_unit(&mut unit).await;
                return Err(err);
            }
        };

        match self.commit_unit(&mut unit).await {
            Ok(()) => Ok(session),
            Err(err) => {
                self.end_issuer_session(&session).await;
                self.abort_unit(&mut unit).await;
                match err {
                    GatewayError::PreconditionFailed(id) => Err(self.state_conflict(&id).await),
                    other => Err(other),
                }
            }
        }
    }

    /// Confirms the tokens and records the settlement.
    async fn settle(
        &self,
        tx: &Transaction,
        submission: &PaymentSubmission,
        session: &IssuerSession,
    ) -> Result<()> {
        let request = VerifyRequest {
            expiry: tx.expires,
            tokens: submission.tokens.clone(),
            target_value: tx.value,
        };
        let outcome = self
            .call_issuer("verify", || self.issuer.verify(session, request.clone()))
            .await?;
        if outcome.actual_value < tx.value {
            return Err(GatewayError::IssuerRejected(format!(
                "issuer valued tokens at {}, {} required",
                outcome.actual_value, tx.value
            )));
        }

        let paid = Utc::now();
        let mut reserved = tx.clone();
        reserved.confirmation_details = Some(submission.clone());
        let entry = LedgerEntry::for_settlement(&reserved, outcome.actual_value, paid);
        let details = VerifyDetails::from_outcome(&session.tid, &session.domain, outcome);

        let mut unit = self.begin_unit().await?;
        unit.append_ledger(entry);
        unit.update_if(
            tx.id,
            TransactionStatus::Processing,
            TransactionUpdate::Resolve { details, paid },
        );
        if let Err(err) = self.commit_unit(&mut unit).await {
            self.abort_unit(&mut unit).await;
            return Err(err);
        }
        Ok(())
    }

    /// Rolls a reserved transaction back to `initial`. A failure here leaves
    /// the transaction in `processing` and needs manual intervention.
    async fn compensate(&self, tx: &Transaction, session: &IssuerSession) {
        self.end_issuer_session(session).await;

        if let Err(err) = self.release(&tx.id).await {
            error!(
                transaction_id = %tx.id,
                stuck = true,
                error = %err,
                "compensation failed, transaction left in processing"
            );
            return;
        }
        info!(transaction_id = %tx.id, "reservation released");

        // The expiry timer is a no-op while a payment is in flight, so a
        // deadline that passed meanwhile is applied here.
        if Utc::now() >= tx.expires {
            let expired = retry_transient(&self.config.retry, "expire", || {
                self.store
                    .update_if(&tx.id, TransactionStatus::Initial, TransactionUpdate::Expire)
            })
            .await;
            match expired {
                Ok(Some(_)) => info!(transaction_id = %tx.id, "transaction expired"),
                Ok(None) => {}
                Err(err) => warn!(transaction_id = %tx.id, error = %err, "failed to expire transaction"),
            }
        }
    }

    async fn release(&self, id: &TransactionId) -> Result<()> {
        let mut unit = self.begin_unit().await?;
        unit.update_if(*id, TransactionStatus::Processing, TransactionUpdate::Release);
        let committed = self.commit_unit(&mut unit).await;
        if committed.is_err() {
            self.abort_unit(&mut unit).await;
        }
        committed
    }

    /// Closes the issuer session; failures are logged and never retried.
    async fn end_issuer_session(&self, session: &IssuerSession) {
        let ended = tokio::time::timeout(self.config.issuer_timeout, self.issuer.end(session)).await;
        match ended {
            Ok(Ok(())) => debug!(tid = %session.tid, "issuer session closed"),
            Ok(Err(err)) => warn!(tid = %session.tid, error = %err, "failed to close issuer session"),
            Err(_) => warn!(tid = %session.tid, "timed out closing issuer session"),
        }
    }

    /// Runs one issuer call under the request timeout, retrying while the
    /// issuer defers and the attempt budget lasts.
    async fn call_issuer<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(self.config.issuer_timeout, call()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(GatewayError::IssuerUnavailable(format!(
                    "{operation} timed out after {:?}",
                    self.config.issuer_timeout
                ))),
            };
            match outcome {
                Err(GatewayError::IssuerDeferred(reason)) if attempt < self.config.issuer_attempts => {
                    debug!(operation, attempt, %reason, "issuer deferred, retrying");
                    tokio::time::sleep(self.config.issuer_backoff).await;
                    attempt += 1;
                }
                Err(GatewayError::IssuerDeferred(reason)) => {
                    return Err(GatewayError::IssuerRejected(format!(
                        "{operation} still deferred after {attempt} attempts: {reason}"
                    )));
                }
                other => return other,
            }
        }
    }

    async fn begin_unit(&self) -> Result<StoreSessionBox> {
        retry_transient(&self.config.retry, "begin session", || self.store.begin()).await
    }

    /// Commits a unit of work, re-issuing the commit on transient conflicts.
    async fn commit_unit(&self, unit: &mut StoreSessionBox) -> Result<()> {
        let mut retry = 0;
        loop {
            match unit.commit().await {
                Err(err) if err.is_transient() => match self.config.retry.backoff(retry) {
                    Some(delay) => {
                        warn!(retry = retry + 1, error = %err, "commit conflict, retrying");
                        tokio::time::sleep(delay).await;
                        retry += 1;
                    }
                    None => {
                        return Err(GatewayError::PersistenceFatal(format!(
                            "commit conflict persisted after {retry} retries: {err}"
                        )));
                    }
                },
                other => return other,
            }
        }
    }

    async fn abort_unit(&self, unit: &mut StoreSessionBox) {
        if let Err(err) = unit.abort().await {
            warn!(error = %err, "failed to abort store session");
        }
    }

    /// Re-reads a transaction that lost the reservation race and reports
    /// the conflict matching its current status.
    async fn state_conflict(&self, id: &TransactionId) -> GatewayError {
        match self.transaction(id).await {
            Ok(tx) => match tx.ensure_payable(Utc::now()) {
                Err(err) => err,
                Ok(()) => GatewayError::AlreadyProcessing(*id),
            },
            Err(err) => err,
        }
    }
}
