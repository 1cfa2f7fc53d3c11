//! Pending storage commitment transaction ledger.
//!
//! The ledger records every outgoing storage commitment request and later receives the
//! matching confirmation. Records are looked up by the requester-assigned transaction UID.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryTransactionLedger;
pub use postgres::PostgresTransactionLedger;
pub use r#trait::{LedgerError, TransactionLedger};
