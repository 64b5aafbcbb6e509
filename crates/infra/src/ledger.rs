//! Payment ledger service.
//!
//! Orchestrates the pure decisions in `paybook-payments` against a
//! [`LedgerStore`]: every agreement-scoped write runs as one
//! `mutate_agreement` unit of work, and document issuance retries a bounded
//! number of times when two issuers collide on a document number.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use paybook_core::{ActorId, AgreementId, ChallanId, ProjectId, ReleaseId, TaxInvoiceId, TransactionId};
use paybook_payments::agreement::create_agreement;
use paybook_payments::{
    AmendTransaction, Challan, ChallanDocument, ChallanDraft, ChallanFilter, CreateAgreement,
    DocumentKind, ErrorKind, GenerateInvoice, InvoiceDraft, IssueChallan, LedgerSnapshot,
    PaymentAgreement, PaymentError, RecordTransaction, ReleaseRetention, ReleaseTransition,
    RetentionRelease, ReverseTransaction, ScheduleLine, SetRetentionTerms, TaxInvoice, Transaction,
    TransitionRelease,
};

use crate::config::EngineConfig;
use crate::documents::{DocumentRenderer, RenderedDocument};
use crate::store::{
    AgreementFilter, LedgerDecision, LedgerStore, Page, Pagination, StoreError, StoreResult,
    TransactionFilter, constraint,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("concurrency conflict: {0}")]
    Conflict(String),

    #[error("could not allocate a {kind} number after {attempts} attempts")]
    SequenceContention { kind: DocumentKind, attempts: u32 },

    /// The transaction already carries a document of the requested kind.
    #[error("document already issued for this transaction")]
    Duplicate,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("document rendering failed: {0}")]
    Render(String),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(e) => LedgerError::Payment(e),
            StoreError::Conflict(msg) => LedgerError::Conflict(msg),
            StoreError::UniqueViolation(name) => {
                LedgerError::Conflict(format!("unique constraint {name} violated"))
            }
            StoreError::Backend(msg) => LedgerError::Storage(msg),
        }
    }
}

impl LedgerError {
    /// `None` for infrastructure failures.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            LedgerError::Payment(e) => Some(e.kind()),
            LedgerError::Conflict(_) | LedgerError::Duplicate | LedgerError::SequenceContention { .. } => {
                Some(ErrorKind::Conflict)
            }
            LedgerError::Storage(_) | LedgerError::Render(_) => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Payment(e) => e.code(),
            LedgerError::Conflict(_) => "concurrency_conflict",
            LedgerError::Duplicate => "document_exists",
            LedgerError::SequenceContention { .. } => "sequence_contention",
            LedgerError::Storage(_) => "storage_error",
            LedgerError::Render(_) => "render_error",
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// One installment with its running balance and the entries recorded against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentView {
    #[serde(flatten)]
    pub line: ScheduleLine,
    pub balance_due: Decimal,
    pub transactions: Vec<Transaction>,
}

/// Agreement with its schedule, payments and retention releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementView {
    #[serde(flatten)]
    pub agreement: PaymentAgreement,
    pub total_paid: Decimal,
    pub balance_due: Decimal,
    pub retention_remaining: Decimal,
    pub schedule: Vec<InstallmentView>,
    pub releases: Vec<RetentionRelease>,
}

impl From<LedgerSnapshot> for AgreementView {
    fn from(snapshot: LedgerSnapshot) -> Self {
        let total_paid = snapshot.total_paid();
        let balance_due = snapshot.balance_due();
        let LedgerSnapshot {
            agreement,
            lines,
            transactions,
            releases,
        } = snapshot;

        let schedule = lines
            .into_iter()
            .map(|line| InstallmentView {
                balance_due: line.balance_due(),
                transactions: transactions
                    .iter()
                    .filter(|t| t.schedule_line_id == line.id)
                    .cloned()
                    .collect(),
                line,
            })
            .collect();

        Self {
            retention_remaining: agreement.retention_remaining(),
            agreement,
            total_paid,
            balance_due,
            schedule,
            releases,
        }
    }
}

#[derive(Clone)]
pub struct PaymentLedger {
    store: Arc<dyn LedgerStore>,
    renderer: Arc<dyn DocumentRenderer>,
    config: Arc<EngineConfig>,
}

impl PaymentLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        renderer: Arc<dyn DocumentRenderer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            renderer,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---------------------------------------------------------------------
    // Agreements and schedules
    // ---------------------------------------------------------------------

    #[instrument(skip(self, cmd), fields(project_id = %cmd.project_id, agreement_id = %cmd.agreement_id), err)]
    pub async fn create_agreement(&self, cmd: CreateAgreement) -> LedgerResult<AgreementView> {
        let (agreement, lines) = create_agreement(&cmd, &self.config.policy)?;
        self.store
            .create_agreement(agreement.clone(), lines.clone())
            .await?;
        info!(total_amount = %agreement.total_amount, installments = lines.len(), "payment agreement created");

        Ok(LedgerSnapshot {
            agreement,
            lines,
            transactions: Vec::new(),
            releases: Vec::new(),
        }
        .into())
    }

    pub async fn agreement(&self, id: AgreementId) -> LedgerResult<AgreementView> {
        let snapshot = self
            .store
            .snapshot(id)
            .await?
            .ok_or(PaymentError::AgreementNotFound(id))?;
        Ok(snapshot.into())
    }

    pub async fn agreement_for_project(&self, project_id: ProjectId) -> LedgerResult<AgreementView> {
        let agreement = self
            .store
            .agreement_for_project(project_id)
            .await?
            .ok_or(PaymentError::ProjectAgreementNotFound(project_id))?;
        self.agreement(agreement.id).await
    }

    pub async fn list_agreements(
        &self,
        filter: &AgreementFilter,
        pagination: Pagination,
    ) -> LedgerResult<Page<PaymentAgreement>> {
        Ok(self.store.list_agreements(filter, pagination).await?)
    }

    /// Agreements that are not fully paid.
    pub async fn pending_agreements(&self, pagination: Pagination) -> LedgerResult<Page<PaymentAgreement>> {
        self.list_agreements(&AgreementFilter::pending(), pagination).await
    }

    /// Re-evaluate overdue installments as of `at`.
    #[instrument(skip(self), err)]
    pub async fn refresh_schedule(
        &self,
        id: AgreementId,
        actor: ActorId,
        at: DateTime<Utc>,
    ) -> LedgerResult<AgreementView> {
        let changes = self
            .mutate(id, Box::new(move |s: &LedgerSnapshot| Ok(s.refresh_schedule(actor, at))))
            .await?;
        if !changes.lines.is_empty() {
            info!(changed_lines = changes.lines.len(), "schedule statuses refreshed");
        }
        self.agreement(id).await
    }

    #[instrument(skip(self, cmd), fields(agreement_id = %cmd.agreement_id), err)]
    pub async fn set_retention_terms(&self, cmd: SetRetentionTerms) -> LedgerResult<PaymentAgreement> {
        let id = cmd.agreement_id;
        let changes = self
            .mutate(id, Box::new(move |s: &LedgerSnapshot| s.set_retention_terms(&cmd)))
            .await?;
        changes
            .agreement
            .ok_or_else(|| LedgerError::Storage(format!("agreement {id} missing from change set")))
    }

    // ---------------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------------

    #[instrument(
        skip(self, cmd),
        fields(schedule_line_id = %cmd.schedule_line_id, transaction_id = %cmd.transaction_id, amount = %cmd.amount),
        err
    )]
    pub async fn record_transaction(&self, cmd: RecordTransaction) -> LedgerResult<Transaction> {
        let agreement_id = self
            .store
            .agreement_for_line(cmd.schedule_line_id)
            .await?
            .ok_or(PaymentError::ScheduleLineNotFound(cmd.schedule_line_id))?;
        let id = cmd.transaction_id;
        let policy = self.config.policy.ledger.clone();

        let changes = self
            .mutate(
                agreement_id,
                Box::new(move |s: &LedgerSnapshot| s.record_transaction(&cmd, &policy)),
            )
            .await?;
        info!(agreement_id = %agreement_id, "transaction recorded");
        changed_transaction(&changes.transactions, id)
    }

    /// Returns the offsetting reversal entry.
    #[instrument(skip(self, cmd), fields(transaction_id = %cmd.transaction_id), err)]
    pub async fn reverse_transaction(&self, cmd: ReverseTransaction) -> LedgerResult<Transaction> {
        let agreement_id = self.transaction(cmd.transaction_id).await?.agreement_id;
        let reversal_id = cmd.reversal_id;
        let changes = self
            .mutate(agreement_id, Box::new(move |s: &LedgerSnapshot| s.reverse_transaction(&cmd)))
            .await?;
        info!(reversal_id = %reversal_id, "transaction reversed");
        changed_transaction(&changes.transactions, reversal_id)
    }

    #[instrument(skip(self, cmd), fields(transaction_id = %cmd.transaction_id), err)]
    pub async fn amend_transaction(&self, cmd: AmendTransaction) -> LedgerResult<Transaction> {
        let agreement_id = self.transaction(cmd.transaction_id).await?.agreement_id;
        let id = cmd.transaction_id;
        let policy = self.config.policy.ledger.clone();
        let changes = self
            .mutate(
                agreement_id,
                Box::new(move |s: &LedgerSnapshot| s.amend_transaction(&cmd, &policy)),
            )
            .await?;
        changed_transaction(&changes.transactions, id)
    }

    pub async fn transaction(&self, id: TransactionId) -> LedgerResult<Transaction> {
        Ok(self
            .store
            .transaction(id)
            .await?
            .ok_or(PaymentError::TransactionNotFound(id))?)
    }

    pub async fn transaction_history(
        &self,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> LedgerResult<Page<Transaction>> {
        Ok(self.store.list_transactions(filter, pagination).await?)
    }

    // ---------------------------------------------------------------------
    // Retention
    // ---------------------------------------------------------------------

    #[instrument(skip(self, cmd), fields(agreement_id = %cmd.agreement_id, amount = %cmd.amount), err)]
    pub async fn release_retention(&self, cmd: ReleaseRetention) -> LedgerResult<RetentionRelease> {
        let agreement_id = cmd.agreement_id;
        let id = cmd.release_id;
        let policy = self.config.policy.retention.clone();
        let changes = self
            .mutate(
                agreement_id,
                Box::new(move |s: &LedgerSnapshot| s.release_retention(&cmd, &policy)),
            )
            .await?;
        let release = changed_release(&changes.releases, id)?;
        info!(release_id = %id, status = %release.status, "retention release requested");
        Ok(release)
    }

    pub async fn releases(&self, agreement_id: AgreementId) -> LedgerResult<Vec<RetentionRelease>> {
        Ok(self.agreement(agreement_id).await?.releases)
    }

    #[instrument(skip(self, cmd), fields(release_id = %cmd.release_id, transition = ?cmd.transition), err)]
    pub async fn transition_release(&self, cmd: TransitionRelease) -> LedgerResult<RetentionRelease> {
        let agreement_id = self
            .store
            .release(cmd.release_id)
            .await?
            .ok_or(PaymentError::ReleaseNotFound(cmd.release_id))?
            .agreement_id;
        let id = cmd.release_id;
        let changes = self
            .mutate(agreement_id, Box::new(move |s: &LedgerSnapshot| s.transition_release(&cmd)))
            .await?;
        changed_release(&changes.releases, id)
    }

    pub async fn approve_release(&self, id: ReleaseId, actor: ActorId, at: DateTime<Utc>) -> LedgerResult<RetentionRelease> {
        self.transition_release(release_transition(id, ReleaseTransition::Approve, actor, at))
            .await
    }

    pub async fn mark_release_paid(&self, id: ReleaseId, actor: ActorId, at: DateTime<Utc>) -> LedgerResult<RetentionRelease> {
        self.transition_release(release_transition(id, ReleaseTransition::MarkPaid, actor, at))
            .await
    }

    pub async fn reject_release(&self, id: ReleaseId, actor: ActorId, at: DateTime<Utc>) -> LedgerResult<RetentionRelease> {
        self.transition_release(release_transition(id, ReleaseTransition::Reject, actor, at))
            .await
    }

    // ---------------------------------------------------------------------
    // Tax invoices
    // ---------------------------------------------------------------------

    #[instrument(skip(self, cmd), fields(transaction_id = %cmd.transaction_id, invoice_id = %cmd.invoice_id), err)]
    pub async fn generate_invoice(&self, cmd: GenerateInvoice) -> LedgerResult<TaxInvoice> {
        let transaction_id = cmd.transaction_id;
        let store = self.store.as_ref();
        let prefix = self.config.policy.numbering.invoice_prefix.as_str();
        let tax = &self.config.policy.tax;

        let result = self
            .with_sequence_retry(DocumentKind::TaxInvoice, constraint::INVOICE_TRANSACTION, || {
                let cmd = cmd.clone();
                let tax = tax.clone();
                async move {
                    store
                        .issue_tax_invoice(
                            transaction_id,
                            prefix,
                            Box::new(move |txn: &Transaction, agreement: &PaymentAgreement| {
                                InvoiceDraft::prepare(&cmd, txn, agreement, &tax)
                            }),
                        )
                        .await
                }
            })
            .await;

        let invoice = match result {
            Err(LedgerError::Payment(PaymentError::TransactionNotFound(id))) => {
                return Err(PaymentError::PaymentNotFound(id).into());
            }
            Err(LedgerError::Duplicate) => {
                return Err(PaymentError::InvoiceAlreadyExists(transaction_id).into());
            }
            other => other?,
        };
        info!(invoice_number = %invoice.invoice_number, total = %invoice.invoice_total, "tax invoice generated");
        Ok(invoice)
    }

    pub async fn invoice(&self, id: TaxInvoiceId) -> LedgerResult<TaxInvoice> {
        Ok(self
            .store
            .tax_invoice(id)
            .await?
            .ok_or(PaymentError::InvoiceNotFound(id))?)
    }

    pub async fn invoice_for_transaction(&self, transaction_id: TransactionId) -> LedgerResult<Option<TaxInvoice>> {
        Ok(self.store.invoice_for_transaction(transaction_id).await?)
    }

    // ---------------------------------------------------------------------
    // Challans
    // ---------------------------------------------------------------------

    /// Issue the challan for a completed payment. A transaction gets at most
    /// one challan; use [`PaymentLedger::challan_for_transaction`] to fetch it.
    #[instrument(skip(self, cmd), fields(transaction_id = %cmd.transaction_id, challan_id = %cmd.challan_id), err)]
    pub async fn issue_challan(&self, cmd: IssueChallan) -> LedgerResult<Challan> {
        let transaction_id = cmd.transaction_id;
        let store = self.store.as_ref();
        let prefix = self.config.policy.numbering.challan_prefix.as_str();

        let result = self
            .with_sequence_retry(DocumentKind::Challan, constraint::CHALLAN_TRANSACTION, || {
                let cmd = cmd.clone();
                async move {
                    store
                        .issue_challan(
                            transaction_id,
                            prefix,
                            Box::new(move |txn: &Transaction, agreement: &PaymentAgreement| {
                                ChallanDraft::prepare(&cmd, txn, agreement)
                            }),
                        )
                        .await
                }
            })
            .await;

        let challan = match result {
            Err(LedgerError::Duplicate) => {
                return Err(PaymentError::ChallanAlreadyIssued(transaction_id).into());
            }
            other => other?,
        };
        info!(challan_number = %challan.challan_number, "challan issued");
        Ok(challan)
    }

    pub async fn challan(&self, id: ChallanId) -> LedgerResult<Challan> {
        Ok(self
            .store
            .challan(id)
            .await?
            .ok_or(PaymentError::ChallanNotFound(id))?)
    }

    pub async fn challan_for_transaction(&self, transaction_id: TransactionId) -> LedgerResult<Option<Challan>> {
        Ok(self.store.challan_for_transaction(transaction_id).await?)
    }

    pub async fn search_challans(&self, filter: &ChallanFilter) -> LedgerResult<Vec<Challan>> {
        Ok(self.store.search_challans(filter).await?)
    }

    /// Challan plus the agreement and installment context printed on it.
    pub async fn challan_document(&self, id: ChallanId) -> LedgerResult<ChallanDocument> {
        let challan = self.challan(id).await?;
        self.assemble_document(challan).await
    }

    pub async fn render_challan(&self, id: ChallanId) -> LedgerResult<RenderedDocument> {
        let document = self.challan_document(id).await?;
        self.renderer
            .render(&document)
            .map_err(|e| LedgerError::Render(e.to_string()))
    }

    /// Exactly the requested challans, in request order; any unknown id fails
    /// the whole archive.
    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    pub async fn generate_bulk_archive(&self, ids: &[ChallanId]) -> LedgerResult<RenderedDocument> {
        if ids.is_empty() {
            return Err(PaymentError::validation("at least one challan id is required").into());
        }
        let found = self
            .store
            .search_challans(&ChallanFilter {
                ids: ids.to_vec(),
                ..Default::default()
            })
            .await?;

        let mut snapshots: HashMap<AgreementId, LedgerSnapshot> = HashMap::new();
        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            let challan = found
                .iter()
                .find(|c| c.id == *id)
                .cloned()
                .ok_or(PaymentError::ChallanNotFound(*id))?;
            if !snapshots.contains_key(&challan.agreement_id) {
                let snapshot = self.load_snapshot(challan.agreement_id).await?;
                snapshots.insert(challan.agreement_id, snapshot);
            }
            let snapshot = &snapshots[&challan.agreement_id];
            documents.push(document_from_snapshot(challan, snapshot)?);
        }

        self.renderer
            .render_archive(&documents)
            .map_err(|e| LedgerError::Render(e.to_string()))
    }

    async fn assemble_document(&self, challan: Challan) -> LedgerResult<ChallanDocument> {
        let snapshot = self.load_snapshot(challan.agreement_id).await?;
        document_from_snapshot(challan, &snapshot)
    }

    async fn load_snapshot(&self, agreement_id: AgreementId) -> LedgerResult<LedgerSnapshot> {
        Ok(self
            .store
            .snapshot(agreement_id)
            .await?
            .ok_or(PaymentError::AgreementNotFound(agreement_id))?)
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    async fn mutate(
        &self,
        agreement_id: AgreementId,
        decide: LedgerDecision,
    ) -> LedgerResult<paybook_payments::LedgerChanges> {
        Ok(self.store.mutate_agreement(agreement_id, decide).await?)
    }

    /// Re-run `attempt` while it collides on a document number, up to
    /// `max_sequence_retries` times. A violation of `transaction_key` means a
    /// concurrent issuer already documented the transaction.
    async fn with_sequence_retry<T, F, Fut>(
        &self,
        kind: DocumentKind,
        transaction_key: &str,
        mut attempt: F,
    ) -> LedgerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let max_attempts = self.config.max_sequence_retries.max(1);
        for n in 1..=max_attempts {
            match attempt().await {
                Err(StoreError::UniqueViolation(name)) if name == transaction_key => {
                    return Err(LedgerError::Duplicate);
                }
                Err(StoreError::UniqueViolation(name)) if constraint::is_document_number(&name) => {
                    warn!(%kind, attempt = n, max_attempts, constraint = %name, "document number collision, retrying");
                }
                other => return other.map_err(LedgerError::from),
            }
        }
        Err(LedgerError::SequenceContention {
            kind,
            attempts: max_attempts,
        })
    }
}

fn release_transition(
    release_id: ReleaseId,
    transition: ReleaseTransition,
    actor: ActorId,
    occurred_at: DateTime<Utc>,
) -> TransitionRelease {
    TransitionRelease {
        release_id,
        transition,
        actor,
        occurred_at,
    }
}

fn changed_transaction(transactions: &[Transaction], id: TransactionId) -> LedgerResult<Transaction> {
    transactions
        .iter()
        .find(|t| t.id == id)
        .cloned()
        .ok_or_else(|| LedgerError::Storage(format!("transaction {id} missing from change set")))
}

fn changed_release(releases: &[RetentionRelease], id: ReleaseId) -> LedgerResult<RetentionRelease> {
    releases
        .iter()
        .find(|r| r.id == id)
        .cloned()
        .ok_or_else(|| LedgerError::Storage(format!("release {id} missing from change set")))
}

fn document_from_snapshot(challan: Challan, snapshot: &LedgerSnapshot) -> LedgerResult<ChallanDocument> {
    let txn = snapshot
        .transaction(challan.transaction_id)
        .ok_or(PaymentError::TransactionNotFound(challan.transaction_id))?;
    let line = snapshot
        .line(txn.schedule_line_id)
        .ok_or(PaymentError::ScheduleLineNotFound(txn.schedule_line_id))?;
    Ok(ChallanDocument::assemble(challan, txn, &snapshot.agreement, line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::JsonDocumentRenderer;
    use crate::store::InMemoryLedgerStore;
    use chrono::{NaiveDate, TimeZone};
    use paybook_payments::{
        AgreementStatus, LineStatus, PackageTerms, PaymentCategory, PaymentMethod, PaymentType,
        ReleaseStatus, TdsDeductedBy, TransactionStatus,
    };
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn at(y: i32, m: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, day, 10, 0, 0).unwrap()
    }

    fn ledger() -> PaymentLedger {
        PaymentLedger::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(JsonDocumentRenderer),
            EngineConfig::default(),
        )
    }

    async fn agreement(ledger: &PaymentLedger, actor: ActorId) -> AgreementView {
        ledger
            .create_agreement(CreateAgreement {
                agreement_id: AgreementId::new(),
                project_id: ProjectId::new(),
                terms: PackageTerms {
                    package_name: "Premium".to_string(),
                    rate_per_sqft: d("100"),
                    total_sqft: d("1000"),
                    discount_percentage: Decimal::ZERO,
                },
                payment_type: PaymentType::Installment,
                plan: None,
                full_payment_due_date: None,
                retention_percentage: None,
                defect_liability_end_date: None,
                actor,
                occurred_at: at(2024, 5, 1),
            })
            .await
            .unwrap()
    }

    fn payment(line: &ScheduleLine, amount: &str, actor: ActorId) -> RecordTransaction {
        RecordTransaction {
            transaction_id: TransactionId::new(),
            schedule_line_id: line.id,
            amount: d(amount),
            method: PaymentMethod::Upi,
            reference_number: Some("UTR-1".to_string()),
            payment_date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            tds_percentage: d("2"),
            tds_deducted_by: TdsDeductedBy::Customer,
            category: PaymentCategory::Advance,
            notes: None,
            actor,
            occurred_at: at(2024, 6, 3),
        }
    }

    #[tokio::test]
    async fn worked_example_settles_lines_and_agreement() {
        let ledger = ledger();
        let actor = ActorId::new();
        let view = agreement(&ledger, actor).await;
        assert_eq!(view.agreement.total_amount, d("118000.00"));
        assert_eq!(view.schedule.len(), 3);

        for inst in &view.schedule {
            let amount = inst.line.amount.to_string();
            ledger.record_transaction(payment(&inst.line, &amount, actor)).await.unwrap();
        }

        let view = ledger.agreement(view.agreement.id).await.unwrap();
        assert_eq!(view.agreement.status, AgreementStatus::Paid);
        assert!(view.schedule.iter().all(|i| i.line.status == LineStatus::Paid));
        assert_eq!(view.total_paid, d("118000.00"));
        assert_eq!(view.balance_due, Decimal::ZERO);
    }

    #[tokio::test]
    async fn unknown_line_is_reported() {
        let ledger = ledger();
        let mut cmd = payment(
            &agreement(&ledger, ActorId::new()).await.schedule[0].line,
            "10",
            ActorId::new(),
        );
        cmd.schedule_line_id = paybook_core::ScheduleLineId::new();
        let err = ledger.record_transaction(cmd.clone()).await.unwrap_err();
        assert_eq!(err, LedgerError::Payment(PaymentError::ScheduleLineNotFound(cmd.schedule_line_id)));
    }

    #[tokio::test]
    async fn duplicate_project_is_a_conflict() {
        let ledger = ledger();
        let view = agreement(&ledger, ActorId::new()).await;
        let err = ledger
            .create_agreement(CreateAgreement {
                agreement_id: AgreementId::new(),
                project_id: view.agreement.project_id,
                terms: PackageTerms {
                    package_name: "Basic".to_string(),
                    rate_per_sqft: d("50"),
                    total_sqft: d("100"),
                    discount_percentage: Decimal::ZERO,
                },
                payment_type: PaymentType::Full,
                plan: None,
                full_payment_due_date: None,
                retention_percentage: None,
                defect_liability_end_date: None,
                actor: ActorId::new(),
                occurred_at: at(2024, 5, 2),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Conflict));
        assert_eq!(err.code(), "duplicate_agreement");
    }

    #[tokio::test]
    async fn challan_is_issued_once_and_freezes_the_transaction() {
        let ledger = ledger();
        let actor = ActorId::new();
        let view = agreement(&ledger, actor).await;
        let txn = ledger
            .record_transaction(payment(&view.schedule[0].line, "1000", actor))
            .await
            .unwrap();

        let challan = ledger
            .issue_challan(IssueChallan {
                challan_id: ChallanId::new(),
                transaction_id: txn.id,
                actor,
                occurred_at: at(2024, 6, 4),
            })
            .await
            .unwrap();
        assert_eq!(challan.challan_number, "CH/2024-25/001");

        let again = ledger
            .issue_challan(IssueChallan {
                challan_id: ChallanId::new(),
                transaction_id: txn.id,
                actor,
                occurred_at: at(2024, 6, 5),
            })
            .await
            .unwrap_err();
        assert_eq!(again, LedgerError::Payment(PaymentError::ChallanAlreadyIssued(txn.id)));
        assert_eq!(ledger.challan_for_transaction(txn.id).await.unwrap(), Some(challan.clone()));

        let err = ledger
            .amend_transaction(AmendTransaction {
                transaction_id: txn.id,
                amount: d("900"),
                tds_percentage: Decimal::ZERO,
                actor,
                occurred_at: at(2024, 6, 6),
            })
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::Payment(PaymentError::TransactionFrozen(txn.id)));

        let rendered = ledger.render_challan(challan.id).await.unwrap();
        assert_eq!(rendered.file_name, "Challan_2024-25_CH_2024-25_001.json");
        let body: serde_json::Value = serde_json::from_slice(&rendered.bytes).unwrap();
        assert_eq!(body["installment"], "Advance");
    }

    #[tokio::test]
    async fn invoice_for_missing_payment_is_payment_not_found() {
        let ledger = ledger();
        let id = TransactionId::new();
        let err = ledger
            .generate_invoice(GenerateInvoice {
                invoice_id: TaxInvoiceId::new(),
                transaction_id: id,
                place_of_supply: "Kerala".to_string(),
                customer_gstin: None,
                invoice_date: None,
                actor: ActorId::new(),
                occurred_at: at(2024, 6, 3),
            })
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::Payment(PaymentError::PaymentNotFound(id)));
    }

    #[tokio::test]
    async fn interstate_invoice_uses_igst() {
        let ledger = ledger();
        let actor = ActorId::new();
        let view = agreement(&ledger, actor).await;
        let txn = ledger
            .record_transaction(payment(&view.schedule[0].line, "10000", actor))
            .await
            .unwrap();

        let invoice = ledger
            .generate_invoice(GenerateInvoice {
                invoice_id: TaxInvoiceId::new(),
                transaction_id: txn.id,
                place_of_supply: "Tamil Nadu".to_string(),
                customer_gstin: None,
                invoice_date: NaiveDate::from_ymd_opt(2025, 3, 31),
                actor,
                occurred_at: at(2025, 3, 31),
            })
            .await
            .unwrap();
        assert!(invoice.is_interstate);
        assert_eq!(invoice.total_tax, d("1800.00"));
        assert_eq!(invoice.invoice_total, d("11800.00"));
        assert_eq!(invoice.invoice_number, "INV/2024-25/0001");

        let err = ledger
            .generate_invoice(GenerateInvoice {
                invoice_id: TaxInvoiceId::new(),
                transaction_id: txn.id,
                place_of_supply: "Kerala".to_string(),
                customer_gstin: None,
                invoice_date: None,
                actor,
                occurred_at: at(2025, 4, 2),
            })
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::Payment(PaymentError::InvoiceAlreadyExists(txn.id)));
    }

    #[tokio::test]
    async fn reversal_reopens_the_installment() {
        let ledger = ledger();
        let actor = ActorId::new();
        let view = agreement(&ledger, actor).await;
        let line = view.schedule[0].line.clone();
        let txn = ledger
            .record_transaction(payment(&line, &line.amount.to_string(), actor))
            .await
            .unwrap();

        let reversal = ledger
            .reverse_transaction(ReverseTransaction {
                reversal_id: TransactionId::new(),
                transaction_id: txn.id,
                reason: "cheque bounced".to_string(),
                actor,
                occurred_at: at(2024, 6, 10),
            })
            .await
            .unwrap();
        assert_eq!(reversal.reverses, Some(txn.id));
        assert_eq!(ledger.transaction(txn.id).await.unwrap().status, TransactionStatus::Reversed);

        let view = ledger.agreement(view.agreement.id).await.unwrap();
        assert_eq!(view.schedule[0].line.paid_amount, Decimal::ZERO);
        assert_eq!(view.agreement.status, AgreementStatus::Pending);
    }

    #[tokio::test]
    async fn retention_lifecycle() {
        let ledger = ledger();
        let actor = ActorId::new();
        let view = agreement(&ledger, actor).await;
        let id = view.agreement.id;
        assert_eq!(view.agreement.retention_amount, d("11800.00"));

        let release = ledger
            .release_retention(ReleaseRetention {
                release_id: ReleaseId::new(),
                agreement_id: id,
                amount: d("5000"),
                notes: None,
                release_date: None,
                actor,
                occurred_at: at(2025, 1, 1),
            })
            .await
            .unwrap();
        assert_eq!(release.status, ReleaseStatus::Pending);

        let err = ledger
            .release_retention(ReleaseRetention {
                release_id: ReleaseId::new(),
                agreement_id: id,
                amount: d("7000"),
                notes: None,
                release_date: None,
                actor,
                occurred_at: at(2025, 1, 2),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Payment(PaymentError::RetentionExceeded { .. })));

        ledger.approve_release(release.id, actor, at(2025, 1, 3)).await.unwrap();
        let paid = ledger.mark_release_paid(release.id, actor, at(2025, 1, 4)).await.unwrap();
        assert_eq!(paid.status, ReleaseStatus::Paid);

        let err = ledger.reject_release(release.id, actor, at(2025, 1, 5)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Payment(PaymentError::InvalidReleaseTransition { .. })));

        let view = ledger.agreement(id).await.unwrap();
        assert_eq!(view.agreement.retention_released_amount, d("5000.00"));
        assert_eq!(view.retention_remaining, d("6800.00"));
        assert_eq!(ledger.releases(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bulk_archive_keeps_request_order_and_rejects_unknown_ids() {
        let ledger = ledger();
        let actor = ActorId::new();
        let view = agreement(&ledger, actor).await;

        let mut challans = Vec::new();
        for _ in 0..3 {
            let txn = ledger
                .record_transaction(payment(&view.schedule[1].line, "100", actor))
                .await
                .unwrap();
            challans.push(
                ledger
                    .issue_challan(IssueChallan {
                        challan_id: ChallanId::new(),
                        transaction_id: txn.id,
                        actor,
                        occurred_at: at(2024, 6, 4),
                    })
                    .await
                    .unwrap(),
            );
        }

        let ids = vec![challans[2].id, challans[0].id];
        let archive = ledger.generate_bulk_archive(&ids).await.unwrap();
        let entries: Vec<serde_json::Value> = serde_json::from_slice(&archive.bytes).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["document"]["challan"]["challan_number"], "CH/2024-25/003");
        assert_eq!(entries[1]["document"]["challan"]["challan_number"], "CH/2024-25/001");

        let missing = ChallanId::new();
        let err = ledger.generate_bulk_archive(&[challans[0].id, missing]).await.unwrap_err();
        assert_eq!(err, LedgerError::Payment(PaymentError::ChallanNotFound(missing)));
    }

    #[tokio::test]
    async fn bulk_archive_spanning_agreements_pairs_each_challan_with_its_own_agreement() {
        let ledger = ledger();
        let actor = ActorId::new();
        let first = agreement(&ledger, actor).await;
        let second = agreement(&ledger, actor).await;

        let mut ids = Vec::new();
        for (view, line) in [(&first, 0), (&second, 2), (&first, 1)] {
            let txn = ledger
                .record_transaction(payment(&view.schedule[line].line, "100", actor))
                .await
                .unwrap();
            let challan = ledger
                .issue_challan(IssueChallan {
                    challan_id: ChallanId::new(),
                    transaction_id: txn.id,
                    actor,
                    occurred_at: at(2024, 6, 4),
                })
                .await
                .unwrap();
            ids.push(challan.id);
        }

        let archive = ledger.generate_bulk_archive(&ids).await.unwrap();
        let entries: Vec<serde_json::Value> = serde_json::from_slice(&archive.bytes).unwrap();
        let owners: Vec<_> = entries
            .iter()
            .map(|e| e["document"]["challan"]["agreement_id"].clone())
            .collect();
        let expected: Vec<_> = [first.agreement.id, second.agreement.id, first.agreement.id]
            .into_iter()
            .map(|id| serde_json::to_value(id).unwrap())
            .collect();
        assert_eq!(owners, expected);
        let installments: Vec<_> = entries.iter().map(|e| e["document"]["installment"].clone()).collect();
        assert_eq!(installments, ["Advance", "Post-Design", "Design Phase"]);
    }

    #[tokio::test]
    async fn history_filters_by_method_and_pages() {
        let ledger = ledger();
        let actor = ActorId::new();
        let view = agreement(&ledger, actor).await;
        for _ in 0..3 {
            ledger
                .record_transaction(payment(&view.schedule[0].line, "10", actor))
                .await
                .unwrap();
        }
        let mut cash = payment(&view.schedule[0].line, "10", actor);
        cash.method = PaymentMethod::Cash;
        ledger.record_transaction(cash).await.unwrap();

        let page = ledger
            .transaction_history(
                &TransactionFilter {
                    method: Some(PaymentMethod::Upi),
                    ..Default::default()
                },
                Pagination::new(Some(2), None),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_more);

        let pending = ledger.pending_agreements(Pagination::default()).await.unwrap();
        assert_eq!(pending.total, 1);
    }
}
