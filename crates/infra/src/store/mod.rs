//! Ledger persistence boundary.
//!
//! [`LedgerStore`] is implemented in memory (tests/dev) and on Postgres.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use query::{AgreementFilter, Page, Pagination, TransactionFilter};
pub use r#trait::{
    ChallanPreparer, InvoicePreparer, LedgerDecision, LedgerStore, StoreError, StoreResult,
    constraint,
};
