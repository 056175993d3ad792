// Postgres persistence layer for the task worker
//
// This crate provides:
// - Storage: the degrade-don't-crash facade the worker and processors call
// - RecordStore: the fallible backend seam
// - PostgresRecordStore: per-call connections with explicit transactions
// - InMemoryRecordStore: test backend with an outage switch

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod storage;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryRecordStore;
pub use models::*;
pub use postgres::PostgresRecordStore;
pub use storage::Storage;
pub use store::RecordStore;
