//! `paybook-core`: foundation building blocks shared by the ledger crates.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! typed identifiers, the domain error model, audit/version metadata, money
//! rounding and the Indian financial-year calendar.

pub mod aggregate;
pub mod audit;
pub mod entity;
pub mod error;
pub mod fiscal;
pub mod id;
pub mod money;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use audit::AuditInfo;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use fiscal::FinancialYear;
pub use id::{
    ActorId, AgreementId, ChallanId, ProjectId, ReleaseId, ScheduleLineId, TaxInvoiceId,
    TransactionId,
};
pub use value_object::ValueObject;
