//! Application layer orchestrating the domain.
//!
//! `Checkout` opens transactions, `PaymentEngine` resolves them against the
//! issuer, and `ExpirationScheduler` expires the ones nobody paid.

pub mod checkout;
pub mod engine;
pub mod retry;
pub mod scheduler;
