use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

use paybook_core::{
    AgreementId, AuditInfo, ChallanId, FinancialYear, ProjectId, ReleaseId, ScheduleLineId,
    TaxInvoiceId, TransactionId,
};
use paybook_payments::{
    Challan, ChallanFilter, DocumentKind, LedgerChanges, LedgerSnapshot, PaymentAgreement,
    PaymentError, RetentionRelease, ScheduleLine, TaxInvoice, Transaction,
};

use super::query::{AgreementFilter, Page, Pagination, TransactionFilter};
use super::r#trait::{
    ChallanPreparer, InvoicePreparer, LedgerDecision, LedgerStore, StoreError, StoreResult,
};

#[derive(Debug, Default)]
struct Tables {
    agreements: HashMap<AgreementId, PaymentAgreement>,
    lines: HashMap<ScheduleLineId, ScheduleLine>,
    transactions: HashMap<TransactionId, Transaction>,
    releases: HashMap<ReleaseId, RetentionRelease>,
    challans: HashMap<ChallanId, Challan>,
    invoices: HashMap<TaxInvoiceId, TaxInvoice>,
    sequences: HashMap<(DocumentKind, FinancialYear), u32>,
}

impl Tables {
    fn snapshot(&self, id: AgreementId) -> Option<LedgerSnapshot> {
        let agreement = self.agreements.get(&id)?.clone();
        let mut lines: Vec<ScheduleLine> = self
            .lines
            .values()
            .filter(|l| l.agreement_id == id)
            .cloned()
            .collect();
        lines.sort_by_key(|l| l.installment_number);
        let mut transactions: Vec<Transaction> = self
            .transactions
            .values()
            .filter(|t| t.agreement_id == id)
            .cloned()
            .collect();
        transactions.sort_by_key(|t| (t.payment_date, t.audit.created_at, t.id));
        let mut releases: Vec<RetentionRelease> = self
            .releases
            .values()
            .filter(|r| r.agreement_id == id)
            .cloned()
            .collect();
        releases.sort_by_key(|r| (r.audit.created_at, r.id));

        Some(LedgerSnapshot {
            agreement,
            lines,
            transactions,
            releases,
        })
    }

    /// Version-check every record first so a failed write leaves nothing behind.
    fn persist(&mut self, changes: &LedgerChanges) -> StoreResult<()> {
        if let Some(agreement) = &changes.agreement {
            check_version(&self.agreements, &agreement.id, &agreement.audit, |a| &a.audit)?;
        }
        for line in &changes.lines {
            check_version(&self.lines, &line.id, &line.audit, |l| &l.audit)?;
        }
        for txn in &changes.transactions {
            check_version(&self.transactions, &txn.id, &txn.audit, |t| &t.audit)?;
        }
        for release in &changes.releases {
            check_version(&self.releases, &release.id, &release.audit, |r| &r.audit)?;
        }

        if let Some(agreement) = &changes.agreement {
            self.agreements.insert(agreement.id, agreement.clone());
        }
        for line in &changes.lines {
            self.lines.insert(line.id, line.clone());
        }
        for txn in &changes.transactions {
            self.transactions.insert(txn.id, txn.clone());
        }
        for release in &changes.releases {
            self.releases.insert(release.id, release.clone());
        }
        Ok(())
    }

    /// Locked transaction plus its agreement.
    fn document_source(&self, transaction_id: TransactionId) -> StoreResult<(Transaction, PaymentAgreement)> {
        let txn = self
            .transactions
            .get(&transaction_id)
            .cloned()
            .ok_or(PaymentError::TransactionNotFound(transaction_id))?;
        let agreement = self
            .agreements
            .get(&txn.agreement_id)
            .cloned()
            .ok_or(PaymentError::AgreementNotFound(txn.agreement_id))?;
        Ok((txn, agreement))
    }

    fn next_sequence(&self, kind: DocumentKind, fy: FinancialYear) -> u32 {
        self.sequences.get(&(kind, fy)).copied().unwrap_or(0) + 1
    }
}

fn check_version<K, V>(
    table: &HashMap<K, V>,
    key: &K,
    audit: &AuditInfo,
    audit_of: impl Fn(&V) -> &AuditInfo,
) -> StoreResult<()>
where
    K: Eq + Hash,
{
    let actual = table.get(key).map(|v| audit_of(v).version);
    audit
        .expected_previous()
        .check(actual)
        .map_err(|e| StoreError::Conflict(e.to_string()))
}

/// In-memory ledger store.
///
/// One mutex guards every table, so each unit of work is serialized and
/// atomic. Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    tables: Mutex<Tables>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_agreement(
        &self,
        agreement: PaymentAgreement,
        lines: Vec<ScheduleLine>,
    ) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if tables
            .agreements
            .values()
            .any(|a| a.project_id == agreement.project_id)
        {
            return Err(PaymentError::DuplicateAgreement(agreement.project_id).into());
        }
        tables.persist(&LedgerChanges {
            agreement: Some(agreement),
            lines,
            ..Default::default()
        })
    }

    async fn agreement(&self, id: AgreementId) -> StoreResult<Option<PaymentAgreement>> {
        Ok(self.lock()?.agreements.get(&id).cloned())
    }

    async fn agreement_for_project(&self, project_id: ProjectId) -> StoreResult<Option<PaymentAgreement>> {
        Ok(self
            .lock()?
            .agreements
            .values()
            .find(|a| a.project_id == project_id)
            .cloned())
    }

    async fn snapshot(&self, id: AgreementId) -> StoreResult<Option<LedgerSnapshot>> {
        Ok(self.lock()?.snapshot(id))
    }

    async fn agreement_for_line(&self, line_id: ScheduleLineId) -> StoreResult<Option<AgreementId>> {
        Ok(self.lock()?.lines.get(&line_id).map(|l| l.agreement_id))
    }

    async fn transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        Ok(self.lock()?.transactions.get(&id).cloned())
    }

    async fn release(&self, id: ReleaseId) -> StoreResult<Option<RetentionRelease>> {
        Ok(self.lock()?.releases.get(&id).cloned())
    }

    async fn list_agreements(
        &self,
        filter: &AgreementFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<PaymentAgreement>> {
        let tables = self.lock()?;
        let mut rows: Vec<PaymentAgreement> = tables
            .agreements
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.audit.created_at.cmp(&a.audit.created_at).then(b.id.cmp(&a.id)));
        Ok(Page::new(pagination.slice(&rows), rows.len() as u64, pagination))
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<Transaction>> {
        let tables = self.lock()?;
        let mut rows: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.payment_date
                .cmp(&a.payment_date)
                .then(b.audit.created_at.cmp(&a.audit.created_at))
                .then(b.id.cmp(&a.id))
        });
        Ok(Page::new(pagination.slice(&rows), rows.len() as u64, pagination))
    }

    async fn mutate_agreement(
        &self,
        id: AgreementId,
        decide: LedgerDecision,
    ) -> StoreResult<LedgerChanges> {
        let mut tables = self.lock()?;
        let snapshot = tables
            .snapshot(id)
            .ok_or(PaymentError::AgreementNotFound(id))?;
        let changes = decide(&snapshot)?;
        if !changes.is_empty() {
            tables.persist(&changes)?;
        }
        Ok(changes)
    }

    async fn issue_challan(
        &self,
        transaction_id: TransactionId,
        prefix: &str,
        prepare: ChallanPreparer,
    ) -> StoreResult<Challan> {
        let mut tables = self.lock()?;
        let (mut txn, agreement) = tables.document_source(transaction_id)?;
        if txn.challan_id.is_some() {
            return Err(PaymentError::ChallanAlreadyIssued(transaction_id).into());
        }
        let draft = prepare(&txn, &agreement)?;

        let fy = draft.financial_year();
        let sequence = tables.next_sequence(DocumentKind::Challan, fy);
        let challan = draft.issue(prefix, sequence);
        txn.link_challan(challan.id, challan.generated_by, challan.generated_at)?;

        tables.persist(&LedgerChanges {
            transactions: vec![txn],
            ..Default::default()
        })?;
        tables.sequences.insert((DocumentKind::Challan, fy), sequence);
        tables.challans.insert(challan.id, challan.clone());
        Ok(challan)
    }

    async fn issue_tax_invoice(
        &self,
        transaction_id: TransactionId,
        prefix: &str,
        prepare: InvoicePreparer,
    ) -> StoreResult<TaxInvoice> {
        let mut tables = self.lock()?;
        let (mut txn, agreement) = tables.document_source(transaction_id)?;
        if txn.tax_invoice_id.is_some() {
            return Err(PaymentError::InvoiceAlreadyExists(transaction_id).into());
        }
        let draft = prepare(&txn, &agreement)?;

        let fy = draft.financial_year();
        let sequence = tables.next_sequence(DocumentKind::TaxInvoice, fy);
        let invoice = draft.issue(prefix, sequence);
        txn.link_tax_invoice(invoice.id, invoice.created_by, invoice.audit.created_at)?;

        tables.persist(&LedgerChanges {
            transactions: vec![txn],
            ..Default::default()
        })?;
        tables.sequences.insert((DocumentKind::TaxInvoice, fy), sequence);
        tables.invoices.insert(invoice.id, invoice.clone());
        Ok(invoice)
    }

    async fn challan(&self, id: ChallanId) -> StoreResult<Option<Challan>> {
        Ok(self.lock()?.challans.get(&id).cloned())
    }

    async fn challan_for_transaction(&self, transaction_id: TransactionId) -> StoreResult<Option<Challan>> {
        let tables = self.lock()?;
        Ok(tables
            .transactions
            .get(&transaction_id)
            .and_then(|t| t.challan_id)
            .and_then(|id| tables.challans.get(&id))
            .cloned())
    }

    async fn search_challans(&self, filter: &ChallanFilter) -> StoreResult<Vec<Challan>> {
        let tables = self.lock()?;
        let mut rows: Vec<Challan> = tables
            .challans
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        rows.sort_by_key(|c| (c.financial_year, c.sequence_number));
        Ok(rows)
    }

    async fn tax_invoice(&self, id: TaxInvoiceId) -> StoreResult<Option<TaxInvoice>> {
        Ok(self.lock()?.invoices.get(&id).cloned())
    }

    async fn invoice_for_transaction(&self, transaction_id: TransactionId) -> StoreResult<Option<TaxInvoice>> {
        let tables = self.lock()?;
        Ok(tables
            .transactions
            .get(&transaction_id)
            .and_then(|t| t.tax_invoice_id)
            .and_then(|id| tables.invoices.get(&id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use paybook_core::ActorId;
    use paybook_payments::agreement::create_agreement;
    use paybook_payments::{
        ChallanDraft, CreateAgreement, IssueChallan, LedgerPolicy, PackageTerms, PaymentCategory,
        PaymentMethod, PaymentPolicy, PaymentType, RecordTransaction, TdsDeductedBy,
    };
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap()
    }

    fn seeded() -> (PaymentAgreement, Vec<ScheduleLine>) {
        create_agreement(
            &CreateAgreement {
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
                actor: ActorId::new(),
                occurred_at: at(),
            },
            &PaymentPolicy::default(),
        )
        .unwrap()
    }

    fn record(line: ScheduleLineId, amount: &str) -> LedgerDecision {
        let cmd = RecordTransaction {
            transaction_id: TransactionId::new(),
            schedule_line_id: line,
            amount: d(amount),
            method: PaymentMethod::BankTransfer,
            reference_number: None,
            payment_date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            tds_percentage: Decimal::ZERO,
            tds_deducted_by: TdsDeductedBy::Customer,
            category: PaymentCategory::Progress,
            notes: None,
            actor: ActorId::new(),
            occurred_at: at(),
        };
        Box::new(move |s: &LedgerSnapshot| s.record_transaction(&cmd, &LedgerPolicy::default()))
    }

    #[tokio::test]
    async fn duplicate_project_is_rejected() {
        let store = InMemoryLedgerStore::new();
        let (agreement, lines) = seeded();
        let project = agreement.project_id;
        store.create_agreement(agreement.clone(), lines).await.unwrap();

        let mut second = agreement;
        second.id = AgreementId::new();
        let err = store.create_agreement(second, vec![]).await.unwrap_err();
        assert_eq!(err, StoreError::Rejected(PaymentError::DuplicateAgreement(project)));
    }

    #[tokio::test]
    async fn rejected_decision_writes_nothing() {
        let store = InMemoryLedgerStore::new();
        let (agreement, lines) = seeded();
        let id = agreement.id;
        let line = lines[0].id;
        store.create_agreement(agreement, lines).await.unwrap();

        let err = store.mutate_agreement(id, record(line, "999999999")).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(PaymentError::OverpaymentRejected { .. })));

        let snapshot = store.snapshot(id).await.unwrap().unwrap();
        assert!(snapshot.transactions.is_empty());
        assert_eq!(snapshot.agreement.audit.version, 1);
    }

    #[tokio::test]
    async fn stale_write_is_a_conflict() {
        let store = InMemoryLedgerStore::new();
        let (agreement, lines) = seeded();
        let id = agreement.id;
        let line = lines[0].id;
        store.create_agreement(agreement, lines).await.unwrap();

        let stale = store.snapshot(id).await.unwrap().unwrap();
        store.mutate_agreement(id, record(line, "100")).await.unwrap();

        let changes = record(line, "100")(&stale).unwrap();
        let err = store.lock().unwrap().persist(&changes).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn challans_number_per_financial_year() {
        let store = InMemoryLedgerStore::new();
        let (agreement, lines) = seeded();
        let id = agreement.id;
        let line = lines[0].id;
        store.create_agreement(agreement, lines).await.unwrap();

        let mut numbers = Vec::new();
        for _ in 0..2 {
            let changes = store.mutate_agreement(id, record(line, "100")).await.unwrap();
            let txn = changes.transactions[0].id;
            let cmd = IssueChallan {
                challan_id: ChallanId::new(),
                transaction_id: txn,
                actor: ActorId::new(),
                occurred_at: at(),
            };
            let challan = store
                .issue_challan(
                    txn,
                    "CH",
                    Box::new(move |t: &Transaction, a: &PaymentAgreement| ChallanDraft::prepare(&cmd, t, a)),
                )
                .await
                .unwrap();
            numbers.push(challan.challan_number);

            let linked = store.transaction(txn).await.unwrap().unwrap();
            assert_eq!(linked.challan_id, Some(challan.id));
        }
        assert_eq!(numbers, vec!["CH/2024-25/001", "CH/2024-25/002"]);
    }

    fn challan_for(txn: TransactionId) -> ChallanPreparer {
        let cmd = IssueChallan {
            challan_id: ChallanId::new(),
            transaction_id: txn,
            actor: ActorId::new(),
            occurred_at: at(),
        };
        Box::new(move |t: &Transaction, a: &PaymentAgreement| ChallanDraft::prepare(&cmd, t, a))
    }

    #[tokio::test]
    async fn second_challan_for_a_linked_transaction_consumes_no_number() {
        let store = InMemoryLedgerStore::new();
        let (agreement, lines) = seeded();
        let id = agreement.id;
        let line = lines[0].id;
        store.create_agreement(agreement, lines).await.unwrap();

        let first = store.mutate_agreement(id, record(line, "100")).await.unwrap().transactions[0].id;
        let issued = store.issue_challan(first, "CH", challan_for(first)).await.unwrap();
        assert_eq!(store.challan_for_transaction(first).await.unwrap(), Some(issued));

        let err = store.issue_challan(first, "CH", challan_for(first)).await.unwrap_err();
        assert_eq!(err, StoreError::Rejected(PaymentError::ChallanAlreadyIssued(first)));

        let second = store.mutate_agreement(id, record(line, "100")).await.unwrap().transactions[0].id;
        assert_eq!(store.challan_for_transaction(second).await.unwrap(), None);
        let next = store.issue_challan(second, "CH", challan_for(second)).await.unwrap();
        assert_eq!(next.challan_number, "CH/2024-25/002");
    }
}
