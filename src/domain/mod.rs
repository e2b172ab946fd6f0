//! Domain layer: typed records, the transaction state machine, the token
//! codec and the port traits adapters implement.

pub mod account;
pub mod issuer;
pub mod ledger;
pub mod money;
pub mod ports;
pub mod token;
pub mod transaction;
