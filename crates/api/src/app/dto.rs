use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use paybook_core::{ActorId, AgreementId, ChallanId, FinancialYear, ProjectId, ReleaseId, ScheduleLineId, TaxInvoiceId, TransactionId};
use paybook_infra::store::{AgreementFilter, Pagination, TransactionFilter};
use paybook_payments::{
    AgreementStatus, AmendTransaction, ChallanFilter, CreateAgreement, GenerateInvoice, Installment,
    InstallmentPlan, PackageTerms, PaymentCategory, PaymentMethod, PaymentType, RecordTransaction,
    ReleaseRetention, ReverseTransaction, SetRetentionTerms, TdsDeductedBy, TransactionStatus,
};

use crate::app::errors;

type Rejection = axum::response::Response;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct InstallmentRequest {
    pub description: String,
    /// Relative share of the agreement total; defaults to an equal split.
    pub weight: Option<Decimal>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAgreementRequest {
    pub project_id: String,
    pub package_name: String,
    pub rate_per_sqft: Decimal,
    pub total_sqft: Decimal,
    #[serde(default)]
    pub discount_percentage: Decimal,
    pub payment_type: PaymentType,
    pub installments: Option<Vec<InstallmentRequest>>,
    pub full_payment_due_date: Option<NaiveDate>,
    pub retention_percentage: Option<Decimal>,
    pub defect_liability_end_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct RetentionTermsRequest {
    pub retention_percentage: Decimal,
    pub defect_liability_end_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    /// Evaluate overdue installments as of this instant instead of now.
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RecordTransactionRequest {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference_number: Option<String>,
    pub payment_date: NaiveDate,
    #[serde(default)]
    pub tds_percentage: Decimal,
    #[serde(default)]
    pub tds_deducted_by: TdsDeductedBy,
    #[serde(default)]
    pub category: PaymentCategory,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReverseTransactionRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct AmendTransactionRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub tds_percentage: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRetentionRequest {
    pub amount: Decimal,
    pub notes: Option<String>,
    pub release_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateInvoiceRequest {
    /// The payment (transaction) being invoiced.
    pub payment_id: String,
    #[serde(default)]
    pub place_of_supply: String,
    pub customer_gstin: Option<String>,
    pub invoice_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChallanSearchRequest {
    #[serde(default)]
    pub ids: Vec<String>,
    pub financial_year: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub project_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkDownloadRequest {
    pub ids: Vec<String>,
}

// -------------------------
// Query DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct AgreementListQuery {
    pub search: Option<String>,
    pub status: Option<AgreementStatus>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub agreement_id: Option<String>,
    pub search: Option<String>,
    pub method: Option<PaymentMethod>,
    pub status: Option<TransactionStatus>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

// -------------------------
// Mapping to ledger commands
// -------------------------

impl CreateAgreementRequest {
    pub fn into_command(self, actor: ActorId, now: DateTime<Utc>) -> Result<CreateAgreement, Rejection> {
        let project_id: ProjectId = errors::parse_id(&self.project_id, "project_id")?;
        let plan = self.installments.map(|installments| InstallmentPlan {
            installments: installments
                .into_iter()
                .map(|i| Installment {
                    description: i.description,
                    weight: i.weight.unwrap_or(Decimal::ONE),
                    due_date: i.due_date,
                })
                .collect(),
        });

        Ok(CreateAgreement {
            agreement_id: AgreementId::new(),
            project_id,
            terms: PackageTerms {
                package_name: self.package_name,
                rate_per_sqft: self.rate_per_sqft,
                total_sqft: self.total_sqft,
                discount_percentage: self.discount_percentage,
            },
            payment_type: self.payment_type,
            plan,
            full_payment_due_date: self.full_payment_due_date,
            retention_percentage: self.retention_percentage,
            defect_liability_end_date: self.defect_liability_end_date,
            actor,
            occurred_at: now,
        })
    }
}

impl RetentionTermsRequest {
    pub fn into_command(self, agreement_id: AgreementId, actor: ActorId, now: DateTime<Utc>) -> SetRetentionTerms {
        SetRetentionTerms {
            agreement_id,
            retention_percentage: self.retention_percentage,
            defect_liability_end_date: self.defect_liability_end_date,
            actor,
            occurred_at: now,
        }
    }
}

impl RecordTransactionRequest {
    pub fn into_command(self, schedule_line_id: ScheduleLineId, actor: ActorId, now: DateTime<Utc>) -> RecordTransaction {
        RecordTransaction {
            transaction_id: TransactionId::new(),
            schedule_line_id,
            amount: self.amount,
            method: self.method,
            reference_number: self.reference_number,
            payment_date: self.payment_date,
            tds_percentage: self.tds_percentage,
            tds_deducted_by: self.tds_deducted_by,
            category: self.category,
            notes: self.notes,
            actor,
            occurred_at: now,
        }
    }
}

impl ReverseTransactionRequest {
    pub fn into_command(self, transaction_id: TransactionId, actor: ActorId, now: DateTime<Utc>) -> ReverseTransaction {
        ReverseTransaction {
            reversal_id: TransactionId::new(),
            transaction_id,
            reason: self.reason,
            actor,
            occurred_at: now,
        }
    }
}

impl AmendTransactionRequest {
    pub fn into_command(self, transaction_id: TransactionId, actor: ActorId, now: DateTime<Utc>) -> AmendTransaction {
        AmendTransaction {
            transaction_id,
            amount: self.amount,
            tds_percentage: self.tds_percentage,
            actor,
            occurred_at: now,
        }
    }
}

impl ReleaseRetentionRequest {
    pub fn into_command(self, agreement_id: AgreementId, actor: ActorId, now: DateTime<Utc>) -> ReleaseRetention {
        ReleaseRetention {
            release_id: ReleaseId::new(),
            agreement_id,
            amount: self.amount,
            notes: self.notes,
            release_date: self.release_date,
            actor,
            occurred_at: now,
        }
    }
}

impl GenerateInvoiceRequest {
    pub fn into_command(self, actor: ActorId, now: DateTime<Utc>) -> Result<GenerateInvoice, Rejection> {
        Ok(GenerateInvoice {
            invoice_id: TaxInvoiceId::new(),
            transaction_id: errors::parse_id(&self.payment_id, "payment_id")?,
            place_of_supply: self.place_of_supply,
            customer_gstin: self.customer_gstin,
            invoice_date: self.invoice_date,
            actor,
            occurred_at: now,
        })
    }
}

impl ChallanSearchRequest {
    pub fn into_filter(self) -> Result<ChallanFilter, Rejection> {
        let financial_year = self
            .financial_year
            .as_deref()
            .map(str::parse::<FinancialYear>)
            .transpose()
            .map_err(|e| {
                errors::json_error(axum::http::StatusCode::BAD_REQUEST, "validation_error", e.to_string())
            })?;
        let project_id = self
            .project_id
            .as_deref()
            .map(|raw| errors::parse_id::<ProjectId>(raw, "project_id"))
            .transpose()?;

        Ok(ChallanFilter {
            ids: parse_challan_ids(&self.ids)?,
            financial_year,
            start_date: self.start_date,
            end_date: self.end_date,
            project_id,
        })
    }
}

pub fn parse_challan_ids(raw: &[String]) -> Result<Vec<ChallanId>, Rejection> {
    raw.iter()
        .map(|id| errors::parse_id(id, "challan id"))
        .collect()
}

impl AgreementListQuery {
    pub fn filter(&self) -> AgreementFilter {
        AgreementFilter {
            search: self.search.clone(),
            status: self.status,
            exclude_status: None,
        }
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::page(self.page, self.size)
    }
}

impl HistoryQuery {
    pub fn filter(&self) -> Result<TransactionFilter, Rejection> {
        Ok(TransactionFilter {
            agreement_id: self
                .agreement_id
                .as_deref()
                .map(|raw| errors::parse_id::<AgreementId>(raw, "agreement_id"))
                .transpose()?,
            search: self.search.clone(),
            method: self.method,
            status: self.status,
            start_date: self.start_date,
            end_date: self.end_date,
        })
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::page(self.page, self.size)
    }
}
