//! `paybook-payments`: the payment ledger domain.
//!
//! Pure decision logic for design-package payment agreements, their
//! installment schedules, the transactions recorded against installments,
//! retention holdback/release, GST tax invoices and payment challans.
//!
//! Nothing here performs IO. Persistence and orchestration live in
//! `paybook-infra`; this crate only turns a loaded [`ledger::LedgerSnapshot`]
//! plus a command into the set of records to write.

#[macro_use]
mod macros;

pub mod agreement;
pub mod challan;
pub mod error;
pub mod ledger;
pub mod numbering;
pub mod policy;
pub mod retention;
pub mod schedule;
pub mod tax_invoice;
pub mod transaction;
pub mod words;

pub use agreement::{
    AgreementAmounts, AgreementStatus, CreateAgreement, PackageTerms, PaymentAgreement,
    PaymentType, RetentionStatus, SetRetentionTerms,
};
pub use challan::{
    Challan, ChallanDocument, ChallanDraft, ChallanFilter, ChallanStatus, IssueChallan,
};
pub use error::{ErrorKind, PaymentError, PaymentResult};
pub use ledger::{LedgerChanges, LedgerSnapshot};
pub use numbering::DocumentKind;
pub use policy::{LedgerPolicy, NumberingPolicy, PaymentPolicy, RetentionPolicy, TaxPolicy};
pub use retention::{
    ReleaseRetention, ReleaseStatus, ReleaseTransition, RetentionRelease, TransitionRelease,
};
pub use schedule::{Installment, InstallmentPlan, LineStatus, ScheduleLine};
pub use tax_invoice::{GenerateInvoice, GstSplit, InvoiceDraft, TaxInvoice};
pub use transaction::{
    AmendTransaction, PaymentCategory, PaymentMethod, RecordTransaction, ReverseTransaction,
    TdsDeductedBy, Transaction, TransactionKind, TransactionStatus,
};
