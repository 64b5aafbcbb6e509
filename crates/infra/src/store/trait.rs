use thiserror::Error;

use paybook_core::{
    AgreementId, ChallanId, ProjectId, ReleaseId, ScheduleLineId, TaxInvoiceId, TransactionId,
};
use paybook_payments::{
    Challan, ChallanDraft, ChallanFilter, InvoiceDraft, LedgerChanges, LedgerSnapshot,
    PaymentAgreement, PaymentError, RetentionRelease, ScheduleLine, TaxInvoice, Transaction,
};

use super::query::{AgreementFilter, Page, Pagination, TransactionFilter};

/// Storage-level failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The decision run inside the unit of work refused the change.
    #[error(transparent)]
    Rejected(#[from] PaymentError),

    /// A record changed underneath the unit of work (version mismatch).
    #[error("concurrency conflict: {0}")]
    Conflict(String),

    /// A uniqueness constraint fired. Carries the constraint name.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Constraint names reported through [`StoreError::UniqueViolation`].
pub mod constraint {
    pub const AGREEMENT_PROJECT: &str = "payment_agreements_project_id_key";
    pub const CHALLAN_TRANSACTION: &str = "payment_challans_transaction_id_key";
    pub const CHALLAN_SEQUENCE: &str = "payment_challans_sequence_key";
    pub const CHALLAN_NUMBER: &str = "payment_challans_number_key";
    pub const INVOICE_TRANSACTION: &str = "tax_invoices_transaction_id_key";
    pub const INVOICE_SEQUENCE: &str = "tax_invoices_sequence_key";
    pub const INVOICE_NUMBER: &str = "tax_invoices_invoice_number_key";

    /// Collisions on a document number, as opposed to a duplicate document.
    pub fn is_document_number(name: &str) -> bool {
        [CHALLAN_SEQUENCE, CHALLAN_NUMBER, INVOICE_SEQUENCE, INVOICE_NUMBER].contains(&name)
    }
}

/// Pure decision over one agreement's ledger, run while the agreement is locked.
pub type LedgerDecision =
    Box<dyn FnOnce(&LedgerSnapshot) -> Result<LedgerChanges, PaymentError> + Send>;

/// Builds a challan draft from the locked transaction and its agreement.
pub type ChallanPreparer =
    Box<dyn FnOnce(&Transaction, &PaymentAgreement) -> Result<ChallanDraft, PaymentError> + Send>;

/// Builds an invoice draft from the locked transaction and its agreement.
pub type InvoicePreparer =
    Box<dyn FnOnce(&Transaction, &PaymentAgreement) -> Result<InvoiceDraft, PaymentError> + Send>;

/// Persistence boundary for the payment ledger.
///
/// Writes that touch an agreement's ledger go through
/// [`LedgerStore::mutate_agreement`]; document issuance goes through
/// `issue_challan` / `issue_tax_invoice`, which allocate the per-financial-year
/// sequence number in the same atomic unit that inserts the document and links
/// it to its transaction.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new agreement with its schedule. A second agreement for the
    /// same project is rejected with `DuplicateAgreement`.
    async fn create_agreement(
        &self,
        agreement: PaymentAgreement,
        lines: Vec<ScheduleLine>,
    ) -> StoreResult<()>;

    async fn agreement(&self, id: AgreementId) -> StoreResult<Option<PaymentAgreement>>;

    async fn agreement_for_project(&self, project_id: ProjectId) -> StoreResult<Option<PaymentAgreement>>;

    /// Consistent read of one agreement's ledger.
    async fn snapshot(&self, id: AgreementId) -> StoreResult<Option<LedgerSnapshot>>;

    async fn agreement_for_line(&self, line_id: ScheduleLineId) -> StoreResult<Option<AgreementId>>;

    async fn transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>>;

    async fn release(&self, id: ReleaseId) -> StoreResult<Option<RetentionRelease>>;

    async fn list_agreements(
        &self,
        filter: &AgreementFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<PaymentAgreement>>;

    /// Newest payment date first.
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<Transaction>>;

    /// Lock the agreement, run `decide` on its snapshot and persist the
    /// result. Nothing is written when `decide` fails or returns no changes.
    async fn mutate_agreement(
        &self,
        id: AgreementId,
        decide: LedgerDecision,
    ) -> StoreResult<LedgerChanges>;

    async fn issue_challan(
        &self,
        transaction_id: TransactionId,
        prefix: &str,
        prepare: ChallanPreparer,
    ) -> StoreResult<Challan>;

    async fn issue_tax_invoice(
        &self,
        transaction_id: TransactionId,
        prefix: &str,
        prepare: InvoicePreparer,
    ) -> StoreResult<TaxInvoice>;

    async fn challan(&self, id: ChallanId) -> StoreResult<Option<Challan>>;

    async fn challan_for_transaction(&self, transaction_id: TransactionId) -> StoreResult<Option<Challan>>;

    /// Ordered by financial year, then sequence number.
    async fn search_challans(&self, filter: &ChallanFilter) -> StoreResult<Vec<Challan>>;

    async fn tax_invoice(&self, id: TaxInvoiceId) -> StoreResult<Option<TaxInvoice>>;

    async fn invoice_for_transaction(&self, transaction_id: TransactionId) -> StoreResult<Option<TaxInvoice>>;
}
