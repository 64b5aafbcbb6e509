//! Postgres-backed ledger store.
//!
//! ## Units of work
//!
//! * `mutate_agreement` opens a transaction, locks the agreement row with
//!   `SELECT ... FOR UPDATE`, loads the rest of the ledger, runs the decision
//!   and writes the returned records.
//! * `issue_challan` / `issue_tax_invoice` lock the owning agreement and then
//!   the transaction (same order as `mutate_agreement`), allocate the next
//!   per-(kind, financial year) number from `document_sequences`, insert the
//!   document and link it back. A rollback also undoes the counter increment.
//!
//! Every write is version-checked: inserts carry version 1, updates use
//! `WHERE version = <previous>` and zero affected rows is a `Conflict`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `UniqueViolation(constraint)` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / RowNotFound / other | N/A | `Backend` |

use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use paybook_core::{
    ActorId, AgreementId, AuditInfo, ChallanId, FinancialYear, ProjectId, ReleaseId,
    ScheduleLineId, TaxInvoiceId, TransactionId,
};
use paybook_payments::{
    Challan, ChallanFilter, DocumentKind, GstSplit, LedgerChanges, LedgerSnapshot,
    PaymentAgreement, PaymentError, RetentionRelease, ScheduleLine, TaxInvoice, Transaction,
};

use super::query::{AgreementFilter, Page, Pagination, TransactionFilter};
use super::r#trait::{
    ChallanPreparer, InvoicePreparer, LedgerDecision, LedgerStore, StoreError, StoreResult,
    constraint,
};

type Tx<'c> = sqlx::Transaction<'c, Postgres>;
type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

macro_rules! agreement_columns {
    () => {
        "id, project_id, package_name, payment_type, rate_per_sqft, total_sqft, base_amount, \
         gst_percentage, gst_amount, discount_percentage, discount_amount, total_amount, \
         retention_percentage, retention_amount, retention_released_amount, retention_status, \
         defect_liability_end_date, status, \
         created_at, created_by, updated_at, updated_by, deleted_at, version"
    };
}

macro_rules! line_columns {
    () => {
        "id, agreement_id, installment_number, description, amount, due_date, status, \
         paid_amount, paid_date, \
         created_at, created_by, updated_at, updated_by, deleted_at, version"
    };
}

macro_rules! transaction_columns {
    () => {
        "id, schedule_line_id, agreement_id, kind, reverses, amount, method, reference_number, \
         notes, payment_date, tds_percentage, tds_amount, net_amount, tds_deducted_by, category, \
         status, recorded_by, challan_id, tax_invoice_id, \
         created_at, created_by, updated_at, updated_by, deleted_at, version"
    };
}

macro_rules! release_columns {
    () => {
        "id, agreement_id, release_date, amount, notes, status, requested_by, approved_by, \
         created_at, created_by, updated_at, updated_by, deleted_at, version"
    };
}

macro_rules! challan_columns {
    () => {
        "id, transaction_id, agreement_id, project_id, financial_year, sequence_number, \
         challan_number, transaction_date, amount, status, generated_by, generated_at, \
         created_at, created_by, updated_at, updated_by, deleted_at, version"
    };
}

macro_rules! invoice_columns {
    () => {
        "id, transaction_id, agreement_id, project_id, invoice_number, sequence_number, \
         financial_year, invoice_date, company_gstin, customer_gstin, place_of_supply, \
         is_interstate, taxable_value, cgst_rate, cgst_amount, sgst_rate, sgst_amount, \
         igst_rate, igst_amount, total_tax, invoice_total, \
         created_at, created_by, updated_at, updated_by, deleted_at, version"
    };
}

/// Postgres-backed ledger store.
///
/// `Send + Sync`; all work goes through the SQLx connection pool.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        info!(max_connections, "connecting to PostgreSQL");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    #[instrument(skip(self), err)]
    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))?;
        info!("ledger migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> StoreResult<Tx<'static>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    /// Agreement owning `transaction_id`, locked, then the transaction itself, locked.
    async fn lock_document_source(
        tx: &mut Tx<'_>,
        transaction_id: TransactionId,
    ) -> StoreResult<(Transaction, PaymentAgreement)> {
        let agreement_id: Option<Uuid> =
            sqlx::query_scalar("SELECT agreement_id FROM payment_transactions WHERE id = $1")
                .bind(*transaction_id.as_uuid())
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("find_transaction_agreement", e))?;
        let agreement_id = agreement_id
            .map(AgreementId::from_uuid)
            .ok_or(PaymentError::TransactionNotFound(transaction_id))?;

        let agreement = sqlx::query_as::<_, AgreementRow>(concat!(
            "SELECT ",
            agreement_columns!(),
            " FROM payment_agreements WHERE id = $1 FOR UPDATE"
        ))
        .bind(*agreement_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_agreement", e))?
        .map(|r| r.0)
        .ok_or(PaymentError::AgreementNotFound(agreement_id))?;

        let txn = sqlx::query_as::<_, TransactionRow>(concat!(
            "SELECT ",
            transaction_columns!(),
            " FROM payment_transactions WHERE id = $1 FOR UPDATE"
        ))
        .bind(*transaction_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_transaction", e))?
        .map(|r| r.0)
        .ok_or(PaymentError::TransactionNotFound(transaction_id))?;

        Ok((txn, agreement))
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(
        skip(self, agreement, lines),
        fields(agreement_id = %agreement.id, project_id = %agreement.project_id, line_count = lines.len()),
        err
    )]
    async fn create_agreement(
        &self,
        agreement: PaymentAgreement,
        lines: Vec<ScheduleLine>,
    ) -> StoreResult<()> {
        let mut tx = self.begin().await?;
        match write_agreement(&mut tx, &agreement).await {
            Err(StoreError::UniqueViolation(name)) if name == constraint::AGREEMENT_PROJECT => {
                return rollback(tx, PaymentError::DuplicateAgreement(agreement.project_id).into()).await;
            }
            other => other?,
        }
        for line in &lines {
            write_line(&mut tx, line).await?;
        }
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn agreement(&self, id: AgreementId) -> StoreResult<Option<PaymentAgreement>> {
        let row = sqlx::query_as::<_, AgreementRow>(concat!(
            "SELECT ",
            agreement_columns!(),
            " FROM payment_agreements WHERE id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_agreement", e))?;
        Ok(row.map(|r| r.0))
    }

    async fn agreement_for_project(&self, project_id: ProjectId) -> StoreResult<Option<PaymentAgreement>> {
        let row = sqlx::query_as::<_, AgreementRow>(concat!(
            "SELECT ",
            agreement_columns!(),
            " FROM payment_agreements WHERE project_id = $1"
        ))
        .bind(*project_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_project_agreement", e))?;
        Ok(row.map(|r| r.0))
    }

    async fn snapshot(&self, id: AgreementId) -> StoreResult<Option<LedgerSnapshot>> {
        let mut tx = self.begin().await?;
        let snapshot = load_snapshot(&mut tx, id, false).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(snapshot)
    }

    async fn agreement_for_line(&self, line_id: ScheduleLineId) -> StoreResult<Option<AgreementId>> {
        let id: Option<Uuid> = sqlx::query_scalar("SELECT agreement_id FROM schedule_lines WHERE id = $1")
            .bind(*line_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_line_agreement", e))?;
        Ok(id.map(AgreementId::from_uuid))
    }

    async fn transaction(&self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(concat!(
            "SELECT ",
            transaction_columns!(),
            " FROM payment_transactions WHERE id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_transaction", e))?;
        Ok(row.map(|r| r.0))
    }

    async fn release(&self, id: ReleaseId) -> StoreResult<Option<RetentionRelease>> {
        let row = sqlx::query_as::<_, ReleaseRow>(concat!(
            "SELECT ",
            release_columns!(),
            " FROM retention_releases WHERE id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_release", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn list_agreements(
        &self,
        filter: &AgreementFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<PaymentAgreement>> {
        let search = filter.search_pattern();
        let status = filter.status.map(|s| s.as_str());
        let exclude = filter.exclude_status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM payment_agreements
            WHERE deleted_at IS NULL
                AND ($1::text IS NULL OR package_name ILIKE $1)
                AND ($2::text IS NULL OR status = $2)
                AND ($3::text IS NULL OR status <> $3)
            "#,
        )
        .bind(search.as_deref())
        .bind(status)
        .bind(exclude)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_agreements", e))?;

        let rows = sqlx::query_as::<_, AgreementRow>(concat!(
            "SELECT ",
            agreement_columns!(),
            r#"
            FROM payment_agreements
            WHERE deleted_at IS NULL
                AND ($1::text IS NULL OR package_name ILIKE $1)
                AND ($2::text IS NULL OR status = $2)
                AND ($3::text IS NULL OR status <> $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(search.as_deref())
        .bind(status)
        .bind(exclude)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_agreements", e))?;

        Ok(Page::new(
            rows.into_iter().map(|r| r.0).collect(),
            total.max(0) as u64,
            pagination,
        ))
    }

    #[instrument(skip(self), err)]
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> StoreResult<Page<Transaction>> {
        let agreement = filter.agreement_id.map(Uuid::from);
        let search = filter.search_pattern();
        let method = filter.method.map(|m| m.as_str());
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM payment_transactions
            WHERE deleted_at IS NULL
                AND ($1::uuid IS NULL OR agreement_id = $1)
                AND ($2::text IS NULL OR reference_number ILIKE $2 OR notes ILIKE $2)
                AND ($3::text IS NULL OR method = $3)
                AND ($4::text IS NULL OR status = $4)
                AND ($5::date IS NULL OR payment_date >= $5)
                AND ($6::date IS NULL OR payment_date <= $6)
            "#,
        )
        .bind(agreement)
        .bind(search.as_deref())
        .bind(method)
        .bind(status)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_transactions", e))?;

        let rows = sqlx::query_as::<_, TransactionRow>(concat!(
            "SELECT ",
            transaction_columns!(),
            r#"
            FROM payment_transactions
            WHERE deleted_at IS NULL
                AND ($1::uuid IS NULL OR agreement_id = $1)
                AND ($2::text IS NULL OR reference_number ILIKE $2 OR notes ILIKE $2)
                AND ($3::text IS NULL OR method = $3)
                AND ($4::text IS NULL OR status = $4)
                AND ($5::date IS NULL OR payment_date >= $5)
                AND ($6::date IS NULL OR payment_date <= $6)
            ORDER BY payment_date DESC, created_at DESC, id DESC
            LIMIT $7 OFFSET $8
            "#
        ))
        .bind(agreement)
        .bind(search.as_deref())
        .bind(method)
        .bind(status)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_transactions", e))?;

        Ok(Page::new(
            rows.into_iter().map(|r| r.0).collect(),
            total.max(0) as u64,
            pagination,
        ))
    }

    #[instrument(skip(self, decide), fields(agreement_id = %id), err)]
    async fn mutate_agreement(
        &self,
        id: AgreementId,
        decide: LedgerDecision,
    ) -> StoreResult<LedgerChanges> {
        let mut tx = self.begin().await?;
        let Some(snapshot) = load_snapshot(&mut tx, id, true).await? else {
            return rollback(tx, PaymentError::AgreementNotFound(id).into()).await;
        };

        let changes = match decide(&snapshot) {
            Ok(changes) => changes,
            Err(err) => return rollback(tx, err.into()).await,
        };
        if changes.is_empty() {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(changes);
        }

        persist(&mut tx, &changes).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(changes)
    }

    #[instrument(skip(self, prepare), fields(transaction_id = %transaction_id), err)]
    async fn issue_challan(
        &self,
        transaction_id: TransactionId,
        prefix: &str,
        prepare: ChallanPreparer,
    ) -> StoreResult<Challan> {
        let mut tx = self.begin().await?;
        let (mut txn, agreement) = Self::lock_document_source(&mut tx, transaction_id).await?;
        let draft = match prepare(&txn, &agreement) {
            Ok(draft) => draft,
            Err(err) => return rollback(tx, err.into()).await,
        };

        let sequence = next_sequence(&mut tx, DocumentKind::Challan, draft.financial_year()).await?;
        let challan = draft.issue(prefix, sequence);
        insert_challan(&mut tx, &challan).await?;

        txn.link_challan(challan.id, challan.generated_by, challan.generated_at)?;
        write_transaction(&mut tx, &txn).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(challan)
    }

    #[instrument(skip(self, prepare), fields(transaction_id = %transaction_id), err)]
    async fn issue_tax_invoice(
        &self,
        transaction_id: TransactionId,
        prefix: &str,
        prepare: InvoicePreparer,
    ) -> StoreResult<TaxInvoice> {
        let mut tx = self.begin().await?;
        let (mut txn, agreement) = Self::lock_document_source(&mut tx, transaction_id).await?;
        let draft = match prepare(&txn, &agreement) {
            Ok(draft) => draft,
            Err(err) => return rollback(tx, err.into()).await,
        };

        let sequence =
            next_sequence(&mut tx, DocumentKind::TaxInvoice, draft.financial_year()).await?;
        let invoice = draft.issue(prefix, sequence);
        insert_invoice(&mut tx, &invoice).await?;

        txn.link_tax_invoice(invoice.id, invoice.created_by, invoice.audit.created_at)?;
        write_transaction(&mut tx, &txn).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(invoice)
    }

    async fn challan(&self, id: ChallanId) -> StoreResult<Option<Challan>> {
        let row = sqlx::query_as::<_, ChallanRow>(concat!(
            "SELECT ",
            challan_columns!(),
            " FROM payment_challans WHERE id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_challan", e))?;
        Ok(row.map(|r| r.0))
    }

    async fn challan_for_transaction(&self, transaction_id: TransactionId) -> StoreResult<Option<Challan>> {
        let row = sqlx::query_as::<_, ChallanRow>(concat!(
            "SELECT ",
            challan_columns!(),
            " FROM payment_challans WHERE transaction_id = $1"
        ))
        .bind(*transaction_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_transaction_challan", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn search_challans(&self, filter: &ChallanFilter) -> StoreResult<Vec<Challan>> {
        let ids: Vec<Uuid> = filter.ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query_as::<_, ChallanRow>(concat!(
            "SELECT ",
            challan_columns!(),
            r#"
            FROM payment_challans
            WHERE (cardinality($1::uuid[]) = 0 OR id = ANY($1))
                AND ($2::text IS NULL OR financial_year = $2)
                AND ($3::date IS NULL OR transaction_date >= $3)
                AND ($4::date IS NULL OR transaction_date <= $4)
                AND ($5::uuid IS NULL OR project_id = $5)
            ORDER BY financial_year ASC, sequence_number ASC
            "#
        ))
        .bind(ids)
        .bind(filter.financial_year.map(|fy| fy.label()))
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.project_id.map(Uuid::from))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("search_challans", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn tax_invoice(&self, id: TaxInvoiceId) -> StoreResult<Option<TaxInvoice>> {
        let row = sqlx::query_as::<_, InvoiceRow>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM tax_invoices WHERE id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_invoice", e))?;
        Ok(row.map(|r| r.0))
    }

    async fn invoice_for_transaction(&self, transaction_id: TransactionId) -> StoreResult<Option<TaxInvoice>> {
        let row = sqlx::query_as::<_, InvoiceRow>(concat!(
            "SELECT ",
            invoice_columns!(),
            " FROM tax_invoices WHERE transaction_id = $1"
        ))
        .bind(*transaction_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_transaction_invoice", e))?;
        Ok(row.map(|r| r.0))
    }
}

/// Roll back and surface `err`.
async fn rollback<T>(tx: Tx<'_>, err: StoreError) -> StoreResult<T> {
    tx.rollback()
        .await
        .map_err(|e| map_sqlx_error("rollback", e))?;
    Err(err)
}

async fn load_snapshot(
    tx: &mut Tx<'_>,
    id: AgreementId,
    for_update: bool,
) -> StoreResult<Option<LedgerSnapshot>> {
    let agreement_sql = if for_update {
        concat!("SELECT ", agreement_columns!(), " FROM payment_agreements WHERE id = $1 FOR UPDATE")
    } else {
        concat!("SELECT ", agreement_columns!(), " FROM payment_agreements WHERE id = $1")
    };
    let Some(AgreementRow(agreement)) = sqlx::query_as::<_, AgreementRow>(agreement_sql)
        .bind(*id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("load_agreement", e))?
    else {
        return Ok(None);
    };

    let lines = sqlx::query_as::<_, LineRow>(concat!(
        "SELECT ",
        line_columns!(),
        " FROM schedule_lines WHERE agreement_id = $1 ORDER BY installment_number ASC"
    ))
    .bind(*id.as_uuid())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("load_schedule", e))?;

    let transactions = sqlx::query_as::<_, TransactionRow>(concat!(
        "SELECT ",
        transaction_columns!(),
        " FROM payment_transactions WHERE agreement_id = $1 ORDER BY payment_date ASC, created_at ASC, id ASC"
    ))
    .bind(*id.as_uuid())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("load_transactions", e))?;

    let releases = sqlx::query_as::<_, ReleaseRow>(concat!(
        "SELECT ",
        release_columns!(),
        " FROM retention_releases WHERE agreement_id = $1 ORDER BY created_at ASC, id ASC"
    ))
    .bind(*id.as_uuid())
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("load_releases", e))?;

    Ok(Some(LedgerSnapshot {
        agreement,
        lines: lines.into_iter().map(|r| r.0).collect(),
        transactions: transactions.into_iter().map(|r| r.0).collect(),
        releases: releases.into_iter().map(|r| r.0).collect(),
    }))
}

async fn persist(tx: &mut Tx<'_>, changes: &LedgerChanges) -> StoreResult<()> {
    if let Some(agreement) = &changes.agreement {
        write_agreement(tx, agreement).await?;
    }
    for line in &changes.lines {
        write_line(tx, line).await?;
    }
    for txn in &changes.transactions {
        write_transaction(tx, txn).await?;
    }
    for release in &changes.releases {
        write_release(tx, release).await?;
    }
    Ok(())
}

/// Next gapless number for `(kind, fy)`; the row lock is held until commit.
async fn next_sequence(tx: &mut Tx<'_>, kind: DocumentKind, fy: FinancialYear) -> StoreResult<u32> {
    let value: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO document_sequences (kind, financial_year, last_value)
        VALUES ($1, $2, 1)
        ON CONFLICT (kind, financial_year)
        DO UPDATE SET last_value = document_sequences.last_value + 1
        RETURNING last_value
        "#,
    )
    .bind(kind.as_str())
    .bind(fy.label())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("next_sequence", e))?;

    u32::try_from(value)
        .map_err(|_| StoreError::Backend(format!("sequence for {kind} {fy} out of range: {value}")))
}

fn bind_audit<'q>(query: PgQuery<'q>, audit: &AuditInfo) -> PgQuery<'q> {
    query
        .bind(audit.created_at)
        .bind(Uuid::from(audit.created_by))
        .bind(audit.updated_at)
        .bind(Uuid::from(audit.updated_by))
        .bind(audit.deleted_at)
        .bind(audit.version as i64)
}

fn ensure_written(rows_affected: u64, what: &str, id: impl Display, audit: &AuditInfo) -> StoreResult<()> {
    if rows_affected == 1 {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!(
            "{what} {id} is no longer at version {}",
            audit.version.saturating_sub(1)
        )))
    }
}

async fn write_agreement(tx: &mut Tx<'_>, a: &PaymentAgreement) -> StoreResult<()> {
    let result = if a.audit.is_new() {
        let query = sqlx::query(concat!(
            "INSERT INTO payment_agreements (",
            agreement_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20, $21, $22, $23, $24)"
        ))
        .bind(*a.id.as_uuid())
        .bind(*a.project_id.as_uuid())
        .bind(&a.package_name)
        .bind(a.payment_type.as_str())
        .bind(a.rate_per_sqft)
        .bind(a.total_sqft)
        .bind(a.base_amount)
        .bind(a.gst_percentage)
        .bind(a.gst_amount)
        .bind(a.discount_percentage)
        .bind(a.discount_amount)
        .bind(a.total_amount)
        .bind(a.retention_percentage)
        .bind(a.retention_amount)
        .bind(a.retention_released_amount)
        .bind(a.retention_status.as_str())
        .bind(a.defect_liability_end_date)
        .bind(a.status.as_str());
        bind_audit(query, &a.audit).execute(&mut **tx).await
    } else {
        sqlx::query(
            r#"
            UPDATE payment_agreements
            SET retention_percentage = $2,
                retention_amount = $3,
                retention_released_amount = $4,
                retention_status = $5,
                defect_liability_end_date = $6,
                status = $7,
                updated_at = $8,
                updated_by = $9,
                deleted_at = $10,
                version = $11
            WHERE id = $1 AND version = $12
            "#,
        )
        .bind(*a.id.as_uuid())
        .bind(a.retention_percentage)
        .bind(a.retention_amount)
        .bind(a.retention_released_amount)
        .bind(a.retention_status.as_str())
        .bind(a.defect_liability_end_date)
        .bind(a.status.as_str())
        .bind(a.audit.updated_at)
        .bind(Uuid::from(a.audit.updated_by))
        .bind(a.audit.deleted_at)
        .bind(a.audit.version as i64)
        .bind(a.audit.version as i64 - 1)
        .execute(&mut **tx)
        .await
    }
    .map_err(|e| map_sqlx_error("write_agreement", e))?;

    ensure_written(result.rows_affected(), "payment agreement", a.id, &a.audit)
}

async fn write_line(tx: &mut Tx<'_>, line: &ScheduleLine) -> StoreResult<()> {
    let result = if line.audit.is_new() {
        let query = sqlx::query(concat!(
            "INSERT INTO schedule_lines (",
            line_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        ))
        .bind(*line.id.as_uuid())
        .bind(*line.agreement_id.as_uuid())
        .bind(line.installment_number as i32)
        .bind(&line.description)
        .bind(line.amount)
        .bind(line.due_date)
        .bind(line.status.as_str())
        .bind(line.paid_amount)
        .bind(line.paid_date);
        bind_audit(query, &line.audit).execute(&mut **tx).await
    } else {
        sqlx::query(
            r#"
            UPDATE schedule_lines
            SET status = $2,
                paid_amount = $3,
                paid_date = $4,
                updated_at = $5,
                updated_by = $6,
                deleted_at = $7,
                version = $8
            WHERE id = $1 AND version = $9
            "#,
        )
        .bind(*line.id.as_uuid())
        .bind(line.status.as_str())
        .bind(line.paid_amount)
        .bind(line.paid_date)
        .bind(line.audit.updated_at)
        .bind(Uuid::from(line.audit.updated_by))
        .bind(line.audit.deleted_at)
        .bind(line.audit.version as i64)
        .bind(line.audit.version as i64 - 1)
        .execute(&mut **tx)
        .await
    }
    .map_err(|e| map_sqlx_error("write_schedule_line", e))?;

    ensure_written(result.rows_affected(), "schedule line", line.id, &line.audit)
}

async fn write_transaction(tx: &mut Tx<'_>, t: &Transaction) -> StoreResult<()> {
    let result = if t.audit.is_new() {
        let query = sqlx::query(concat!(
            "INSERT INTO payment_transactions (",
            transaction_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20, $21, $22, $23, $24, $25)"
        ))
        .bind(*t.id.as_uuid())
        .bind(*t.schedule_line_id.as_uuid())
        .bind(*t.agreement_id.as_uuid())
        .bind(t.kind.as_str())
        .bind(t.reverses.map(Uuid::from))
        .bind(t.amount)
        .bind(t.method.as_str())
        .bind(t.reference_number.as_deref())
        .bind(t.notes.as_deref())
        .bind(t.payment_date)
        .bind(t.tds_percentage)
        .bind(t.tds_amount)
        .bind(t.net_amount)
        .bind(t.tds_deducted_by.as_str())
        .bind(t.category.as_str())
        .bind(t.status.as_str())
        .bind(Uuid::from(t.recorded_by))
        .bind(t.challan_id.map(Uuid::from))
        .bind(t.tax_invoice_id.map(Uuid::from));
        bind_audit(query, &t.audit).execute(&mut **tx).await
    } else {
        sqlx::query(
            r#"
            UPDATE payment_transactions
            SET amount = $2,
                tds_percentage = $3,
                tds_amount = $4,
                net_amount = $5,
                status = $6,
                challan_id = $7,
                tax_invoice_id = $8,
                updated_at = $9,
                updated_by = $10,
                deleted_at = $11,
                version = $12
            WHERE id = $1 AND version = $13
            "#,
        )
        .bind(*t.id.as_uuid())
        .bind(t.amount)
        .bind(t.tds_percentage)
        .bind(t.tds_amount)
        .bind(t.net_amount)
        .bind(t.status.as_str())
        .bind(t.challan_id.map(Uuid::from))
        .bind(t.tax_invoice_id.map(Uuid::from))
        .bind(t.audit.updated_at)
        .bind(Uuid::from(t.audit.updated_by))
        .bind(t.audit.deleted_at)
        .bind(t.audit.version as i64)
        .bind(t.audit.version as i64 - 1)
        .execute(&mut **tx)
        .await
    }
    .map_err(|e| map_sqlx_error("write_transaction", e))?;

    ensure_written(result.rows_affected(), "transaction", t.id, &t.audit)
}

async fn write_release(tx: &mut Tx<'_>, r: &RetentionRelease) -> StoreResult<()> {
    let result = if r.audit.is_new() {
        let query = sqlx::query(concat!(
            "INSERT INTO retention_releases (",
            release_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(*r.id.as_uuid())
        .bind(*r.agreement_id.as_uuid())
        .bind(r.release_date)
        .bind(r.amount)
        .bind(r.notes.as_deref())
        .bind(r.status.as_str())
        .bind(Uuid::from(r.requested_by))
        .bind(r.approved_by.map(Uuid::from));
        bind_audit(query, &r.audit).execute(&mut **tx).await
    } else {
        sqlx::query(
            r#"
            UPDATE retention_releases
            SET status = $2,
                approved_by = $3,
                updated_at = $4,
                updated_by = $5,
                deleted_at = $6,
                version = $7
            WHERE id = $1 AND version = $8
            "#,
        )
        .bind(*r.id.as_uuid())
        .bind(r.status.as_str())
        .bind(r.approved_by.map(Uuid::from))
        .bind(r.audit.updated_at)
        .bind(Uuid::from(r.audit.updated_by))
        .bind(r.audit.deleted_at)
        .bind(r.audit.version as i64)
        .bind(r.audit.version as i64 - 1)
        .execute(&mut **tx)
        .await
    }
    .map_err(|e| map_sqlx_error("write_release", e))?;

    ensure_written(result.rows_affected(), "retention release", r.id, &r.audit)
}

async fn insert_challan(tx: &mut Tx<'_>, c: &Challan) -> StoreResult<()> {
    let query = sqlx::query(concat!(
        "INSERT INTO payment_challans (",
        challan_columns!(),
        ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
    ))
    .bind(*c.id.as_uuid())
    .bind(*c.transaction_id.as_uuid())
    .bind(*c.agreement_id.as_uuid())
    .bind(*c.project_id.as_uuid())
    .bind(c.financial_year.label())
    .bind(c.sequence_number as i32)
    .bind(&c.challan_number)
    .bind(c.transaction_date)
    .bind(c.amount)
    .bind(c.status.as_str())
    .bind(Uuid::from(c.generated_by))
    .bind(c.generated_at);
    bind_audit(query, &c.audit)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_challan", e))?;
    Ok(())
}

async fn insert_invoice(tx: &mut Tx<'_>, i: &TaxInvoice) -> StoreResult<()> {
    let (cgst_rate, cgst_amount, sgst_rate, sgst_amount, igst_rate, igst_amount) = match &i.gst {
        GstSplit::Intrastate {
            cgst_rate,
            cgst_amount,
            sgst_rate,
            sgst_amount,
        } => (
            Some(*cgst_rate),
            Some(*cgst_amount),
            Some(*sgst_rate),
            Some(*sgst_amount),
            None,
            None,
        ),
        GstSplit::Interstate {
            igst_rate,
            igst_amount,
        } => (None, None, None, None, Some(*igst_rate), Some(*igst_amount)),
    };

    let query = sqlx::query(concat!(
        "INSERT INTO tax_invoices (",
        invoice_columns!(),
        ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
         $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27)"
    ))
    .bind(*i.id.as_uuid())
    .bind(*i.transaction_id.as_uuid())
    .bind(*i.agreement_id.as_uuid())
    .bind(*i.project_id.as_uuid())
    .bind(&i.invoice_number)
    .bind(i.sequence_number as i32)
    .bind(i.financial_year.label())
    .bind(i.invoice_date)
    .bind(&i.company_gstin)
    .bind(i.customer_gstin.as_deref())
    .bind(&i.place_of_supply)
    .bind(i.is_interstate)
    .bind(i.taxable_value)
    .bind(cgst_rate)
    .bind(cgst_amount)
    .bind(sgst_rate)
    .bind(sgst_amount)
    .bind(igst_rate)
    .bind(igst_amount)
    .bind(i.total_tax)
    .bind(i.invoice_total);
    bind_audit(query, &i.audit)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_invoice", e))?;
    Ok(())
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        if let sqlx::Error::Database(db_err) = &err {
            let constraint = db_err
                .constraint()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{operation}: {}", db_err.message()));
            return StoreError::UniqueViolation(constraint);
        }
    }
    match err {
        sqlx::Error::Database(db_err) => {
            StoreError::Backend(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            StoreError::Backend(format!("unexpected row not found in {}", operation))
        }
        other => StoreError::Backend(format!("sqlx error in {}: {}", operation, other)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

fn decode_error(column: &str, source: impl Into<sqlx::error::BoxDynError>) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: source.into(),
    }
}

/// Text column holding one of the ledger's closed vocabularies.
fn text<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e| decode_error(column, e))
}

fn unsigned(row: &PgRow, column: &str) -> Result<u32, sqlx::Error> {
    let raw: i32 = row.try_get(column)?;
    u32::try_from(raw).map_err(|e| decode_error(column, e))
}

fn uuid_as<T: From<Uuid>>(row: &PgRow, column: &str) -> Result<T, sqlx::Error> {
    let raw: Uuid = row.try_get(column)?;
    Ok(T::from(raw))
}

fn optional_uuid_as<T: From<Uuid>>(row: &PgRow, column: &str) -> Result<Option<T>, sqlx::Error> {
    let raw: Option<Uuid> = row.try_get(column)?;
    Ok(raw.map(T::from))
}

fn required_decimal(row: &PgRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: Option<Decimal> = row.try_get(column)?;
    raw.ok_or_else(|| decode_error(column, "missing GST component"))
}

fn audit_from_row(row: &PgRow) -> Result<AuditInfo, sqlx::Error> {
    let version: i64 = row.try_get("version")?;
    Ok(AuditInfo {
        created_at: row.try_get("created_at")?,
        created_by: uuid_as::<ActorId>(row, "created_by")?,
        updated_at: row.try_get("updated_at")?,
        updated_by: uuid_as::<ActorId>(row, "updated_by")?,
        deleted_at: row.try_get("deleted_at")?,
        version: u64::try_from(version).map_err(|e| decode_error("version", e))?,
    })
}

struct AgreementRow(PaymentAgreement);

impl<'r> FromRow<'r, PgRow> for AgreementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self(PaymentAgreement {
            id: uuid_as(row, "id")?,
            project_id: uuid_as(row, "project_id")?,
            package_name: row.try_get("package_name")?,
            payment_type: text(row, "payment_type")?,
            rate_per_sqft: row.try_get("rate_per_sqft")?,
            total_sqft: row.try_get("total_sqft")?,
            base_amount: row.try_get("base_amount")?,
            gst_percentage: row.try_get("gst_percentage")?,
            gst_amount: row.try_get("gst_amount")?,
            discount_percentage: row.try_get("discount_percentage")?,
            discount_amount: row.try_get("discount_amount")?,
            total_amount: row.try_get("total_amount")?,
            retention_percentage: row.try_get("retention_percentage")?,
            retention_amount: row.try_get("retention_amount")?,
            retention_released_amount: row.try_get("retention_released_amount")?,
            retention_status: text(row, "retention_status")?,
            defect_liability_end_date: row.try_get("defect_liability_end_date")?,
            status: text(row, "status")?,
            audit: audit_from_row(row)?,
        }))
    }
}

struct LineRow(ScheduleLine);

impl<'r> FromRow<'r, PgRow> for LineRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self(ScheduleLine {
            id: uuid_as(row, "id")?,
            agreement_id: uuid_as(row, "agreement_id")?,
            installment_number: unsigned(row, "installment_number")?,
            description: row.try_get("description")?,
            amount: row.try_get("amount")?,
            due_date: row.try_get("due_date")?,
            status: text(row, "status")?,
            paid_amount: row.try_get("paid_amount")?,
            paid_date: row.try_get("paid_date")?,
            audit: audit_from_row(row)?,
        }))
    }
}

struct TransactionRow(Transaction);

impl<'r> FromRow<'r, PgRow> for TransactionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self(Transaction {
            id: uuid_as(row, "id")?,
            schedule_line_id: uuid_as(row, "schedule_line_id")?,
            agreement_id: uuid_as(row, "agreement_id")?,
            kind: text(row, "kind")?,
            reverses: optional_uuid_as(row, "reverses")?,
            amount: row.try_get("amount")?,
            method: text(row, "method")?,
            reference_number: row.try_get("reference_number")?,
            notes: row.try_get("notes")?,
            payment_date: row.try_get("payment_date")?,
            tds_percentage: row.try_get("tds_percentage")?,
            tds_amount: row.try_get("tds_amount")?,
            net_amount: row.try_get("net_amount")?,
            tds_deducted_by: text(row, "tds_deducted_by")?,
            category: text(row, "category")?,
            status: text(row, "status")?,
            recorded_by: uuid_as(row, "recorded_by")?,
            challan_id: optional_uuid_as(row, "challan_id")?,
            tax_invoice_id: optional_uuid_as(row, "tax_invoice_id")?,
            audit: audit_from_row(row)?,
        }))
    }
}

struct ReleaseRow(RetentionRelease);

impl<'r> FromRow<'r, PgRow> for ReleaseRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self(RetentionRelease {
            id: uuid_as(row, "id")?,
            agreement_id: uuid_as(row, "agreement_id")?,
            release_date: row.try_get("release_date")?,
            amount: row.try_get("amount")?,
            notes: row.try_get("notes")?,
            status: text(row, "status")?,
            requested_by: uuid_as(row, "requested_by")?,
            approved_by: optional_uuid_as(row, "approved_by")?,
            audit: audit_from_row(row)?,
        }))
    }
}

struct ChallanRow(Challan);

impl<'r> FromRow<'r, PgRow> for ChallanRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self(Challan {
            id: uuid_as(row, "id")?,
            transaction_id: uuid_as(row, "transaction_id")?,
            agreement_id: uuid_as(row, "agreement_id")?,
            project_id: uuid_as(row, "project_id")?,
            financial_year: text(row, "financial_year")?,
            sequence_number: unsigned(row, "sequence_number")?,
            challan_number: row.try_get("challan_number")?,
            transaction_date: row.try_get("transaction_date")?,
            amount: row.try_get("amount")?,
            status: text(row, "status")?,
            generated_by: uuid_as(row, "generated_by")?,
            generated_at: row.try_get("generated_at")?,
            audit: audit_from_row(row)?,
        }))
    }
}

struct InvoiceRow(TaxInvoice);

impl<'r> FromRow<'r, PgRow> for InvoiceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let is_interstate: bool = row.try_get("is_interstate")?;
        let gst = if is_interstate {
            GstSplit::Interstate {
                igst_rate: required_decimal(row, "igst_rate")?,
                igst_amount: required_decimal(row, "igst_amount")?,
            }
        } else {
            GstSplit::Intrastate {
                cgst_rate: required_decimal(row, "cgst_rate")?,
                cgst_amount: required_decimal(row, "cgst_amount")?,
                sgst_rate: required_decimal(row, "sgst_rate")?,
                sgst_amount: required_decimal(row, "sgst_amount")?,
            }
        };
        Ok(Self(TaxInvoice {
            id: uuid_as(row, "id")?,
            transaction_id: uuid_as(row, "transaction_id")?,
            agreement_id: uuid_as(row, "agreement_id")?,
            project_id: uuid_as(row, "project_id")?,
            invoice_number: row.try_get("invoice_number")?,
            sequence_number: unsigned(row, "sequence_number")?,
            financial_year: text(row, "financial_year")?,
            invoice_date: row.try_get("invoice_date")?,
            company_gstin: row.try_get("company_gstin")?,
            customer_gstin: row.try_get("customer_gstin")?,
            place_of_supply: row.try_get("place_of_supply")?,
            is_interstate,
            taxable_value: row.try_get("taxable_value")?,
            gst,
            total_tax: row.try_get("total_tax")?,
            invoice_total: row.try_get("invoice_total")?,
            created_by: uuid_as(row, "created_by")?,
            audit: audit_from_row(row)?,
        }))
    }
}
