//! Adapters implementing the domain ports.

pub mod in_memory;
pub mod issuer_http;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
