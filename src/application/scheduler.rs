use super::retry::{RetryPolicy, retry_transient};
use crate::domain::ports::{PaymentStoreRef, TransactionStore};
use crate::domain::transaction::{TransactionId, TransactionStatus, TransactionUpdate};
use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A pending timer. `generation` tells a registration apart from a later
/// one for the same transaction.
struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

type Timers = Mutex<HashMap<TransactionId, Timer>>;

/// Expires unpaid transactions at their deadline.
///
/// Each registration spawns a one-shot task that sleeps until the deadline
/// and then moves the transaction from `initial` to `expired`. The update is
/// conditional, so a transaction already in `processing` or `resolved` is
/// left alone.
pub struct ExpirationScheduler {
    store: PaymentStoreRef,
    retry: RetryPolicy,
    timers: Arc<Timers>,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

impl ExpirationScheduler {
    pub fn new(store: PaymentStoreRef, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Registers the expiry of `id` at `expires`. A deadline in the past
    /// fires immediately.
    pub fn schedule(&self, id: TransactionId, expires: DateTime<Utc>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GatewayError::Scheduling(
                "expiration scheduler has been shut down".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| GatewayError::Scheduling(format!("no async runtime available: {e}")))?;

        let delay = (expires - Utc::now()).to_std().unwrap_or_default();
        let store = Arc::clone(&self.store);
        let retry = self.retry;
        let timers = Arc::clone(&self.timers);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        // Hold the lock across the spawn so a zero-delay timer cannot remove
        // its entry before it is inserted.
        let mut registered = self.timers.lock();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = expire(&store, &retry, &id).await {
                warn!(transaction_id = %id, error = %err, "failed to expire transaction");
            }
            release_timer(&timers, &id, generation);
        });
        if let Some(previous) = registered.insert(id, Timer { generation, handle }) {
            previous.handle.abort();
        }
        debug!(transaction_id = %id, delay_ms = delay.as_millis() as u64, "expiration scheduled");
        Ok(())
    }

    /// Drops the timer for `id`, if one is pending.
    pub fn cancel(&self, id: &TransactionId) -> bool {
        match self.timers.lock().remove(id) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Number of timers that have not fired yet.
    pub fn pending(&self) -> usize {
        self.timers.lock().len()
    }

    /// Expires every `initial` transaction whose deadline has passed.
    pub async fn sweep_overdue(&self) -> Result<usize> {
        let now = Utc::now();
        let mut expired = 0;
        for tx in self.store.find_by_status(TransactionStatus::Initial).await? {
            if tx.expires <= now && expire(&self.store, &self.retry, &tx.id).await? {
                expired += 1;
            }
        }
        if expired > 0 {
            info!(expired, "expired overdue transactions");
        }
        Ok(expired)
    }

    /// Sweeps overdue transactions and re-registers timers for the rest.
    /// Used after a restart, when timers held in memory were lost.
    pub async fn restore(&self) -> Result<usize> {
        self.sweep_overdue().await?;
        let pending = self.store.find_by_status(TransactionStatus::Initial).await?;
        for tx in &pending {
            self.schedule(tx.id, tx.expires)?;
        }
        Ok(pending.len())
    }

    /// Aborts all timers and refuses further registrations.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        for (_, timer) in self.timers.lock().drain() {
            timer.handle.abort();
        }
    }
}

impl Drop for ExpirationScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Forgets the timer of `id` unless a later registration replaced it.
fn release_timer(timers: &Timers, id: &TransactionId, generation: u64) -> bool {
    let mut timers = timers.lock();
    if timers.get(id).is_some_and(|timer| timer.generation == generation) {
        timers.remove(id);
        return true;
    }
    false
}

/// Moves `id` to `expired` if it is still `initial`. Returns whether the
/// transaction was expired.
async fn expire(store: &PaymentStoreRef, retry: &RetryPolicy, id: &TransactionId) -> Result<bool> {
    let updated = retry_transient(retry, "expire", || {
        store.update_if(id, TransactionStatus::Initial, TransactionUpdate::Expire)
    })
    .await?;
    match updated {
        Some(_) => {
            info!(transaction_id = %id, "transaction expired");
            Ok(true)
        }
        None => {
            debug!(transaction_id = %id, "expiry skipped, transaction no longer initial");
            Ok(false)
        }
    }
}
