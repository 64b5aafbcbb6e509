//! Payment challans: gapless, financial-year scoped receipts.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use paybook_core::{
    ActorId, AgreementId, AuditInfo, ChallanId, Entity, FinancialYear, ProjectId, TransactionId,
};

use crate::agreement::PaymentAgreement;
use crate::error::{PaymentError, PaymentResult};
use crate::numbering::DocumentKind;
use crate::schedule::ScheduleLine;
use crate::transaction::{PaymentMethod, Transaction};
use crate::words::amount_in_words;

/// `ISSUED` is terminal; cancellation is not supported.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallanStatus {
    Issued,
}

impl_text_enum!(ChallanStatus, "challan status", {
    Issued => "ISSUED",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challan {
    pub id: ChallanId,
    pub transaction_id: TransactionId,
    pub agreement_id: AgreementId,
    pub project_id: ProjectId,
    pub financial_year: FinancialYear,
    /// 1..N without gaps within `financial_year`.
    pub sequence_number: u32,
    pub challan_number: String,
    pub transaction_date: NaiveDate,
    pub amount: Decimal,
    pub status: ChallanStatus,
    pub generated_by: ActorId,
    pub generated_at: DateTime<Utc>,
    pub audit: AuditInfo,
}

impl Entity for Challan {
    type Id = ChallanId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Command: IssueChallan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueChallan {
    pub challan_id: ChallanId,
    pub transaction_id: TransactionId,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// A challan waiting for its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallanDraft {
    id: ChallanId,
    transaction_id: TransactionId,
    agreement_id: AgreementId,
    project_id: ProjectId,
    financial_year: FinancialYear,
    transaction_date: NaiveDate,
    amount: Decimal,
    actor: ActorId,
    occurred_at: DateTime<Utc>,
}

impl ChallanDraft {
    /// The financial year comes from the payment date, not the issue date.
    pub fn prepare(
        cmd: &IssueChallan,
        transaction: &Transaction,
        agreement: &PaymentAgreement,
    ) -> PaymentResult<Self> {
        if transaction.id != cmd.transaction_id {
            return Err(PaymentError::TransactionNotFound(cmd.transaction_id));
        }
        if transaction.challan_id.is_some() {
            return Err(PaymentError::ChallanAlreadyIssued(transaction.id));
        }
        transaction.ensure_documentable()?;

        Ok(Self {
            id: cmd.challan_id,
            transaction_id: transaction.id,
            agreement_id: agreement.id,
            project_id: agreement.project_id,
            financial_year: FinancialYear::for_date(transaction.payment_date),
            transaction_date: transaction.payment_date,
            amount: transaction.amount,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })
    }

    pub fn financial_year(&self) -> FinancialYear {
        self.financial_year
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn issue(self, prefix: &str, sequence_number: u32) -> Challan {
        Challan {
            id: self.id,
            transaction_id: self.transaction_id,
            agreement_id: self.agreement_id,
            project_id: self.project_id,
            financial_year: self.financial_year,
            sequence_number,
            challan_number: DocumentKind::Challan.format_number(prefix, self.financial_year, sequence_number),
            transaction_date: self.transaction_date,
            amount: self.amount,
            status: ChallanStatus::Issued,
            generated_by: self.actor,
            generated_at: self.occurred_at,
            audit: AuditInfo::created(self.actor, self.occurred_at),
        }
    }
}

/// Search criteria; every present criterion must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallanFilter {
    #[serde(default)]
    pub ids: Vec<ChallanId>,
    pub financial_year: Option<FinancialYear>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub project_id: Option<ProjectId>,
}

impl ChallanFilter {
    pub fn matches(&self, challan: &Challan) -> bool {
        (self.ids.is_empty() || self.ids.contains(&challan.id))
            && self.financial_year.is_none_or(|fy| fy == challan.financial_year)
            && self.start_date.is_none_or(|d| challan.transaction_date >= d)
            && self.end_date.is_none_or(|d| challan.transaction_date <= d)
            && self.project_id.is_none_or(|p| p == challan.project_id)
    }
}

/// Data handed to the document renderer for one challan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallanDocument {
    pub challan: Challan,
    pub package_name: String,
    pub installment: String,
    pub payment_method: PaymentMethod,
    pub reference_number: Option<String>,
    pub tds_percentage: Decimal,
    pub tds_amount: Decimal,
    pub net_amount: Decimal,
    pub amount_in_words: String,
}

impl ChallanDocument {
    pub fn assemble(
        challan: Challan,
        transaction: &Transaction,
        agreement: &PaymentAgreement,
        line: &ScheduleLine,
    ) -> Self {
        Self {
            amount_in_words: amount_in_words(challan.amount),
            package_name: agreement.package_name.clone(),
            installment: line.description.clone(),
            payment_method: transaction.method,
            reference_number: transaction.reference_number.clone(),
            tds_percentage: transaction.tds_percentage,
            tds_amount: transaction.tds_amount,
            net_amount: transaction.net_amount,
            challan,
        }
    }

    /// e.g. `Challan_2024-25_CH_2024-25_007.pdf`.
    pub fn file_name(&self, extension: &str) -> String {
        format!(
            "Challan_{}_{}.{extension}",
            self.challan.financial_year,
            self.challan.challan_number.replace('/', "_")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{PaymentCategory, TdsDeductedBy, TransactionKind, TransactionStatus};
    use crate::agreement::{CreateAgreement, PackageTerms, PaymentType, create_agreement};
    use crate::policy::PaymentPolicy;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn fixtures(payment_date: NaiveDate) -> (PaymentAgreement, Vec<ScheduleLine>, Transaction) {
        let actor = ActorId::new();
        let at = Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap();
        let (agreement, lines) = create_agreement(
            &CreateAgreement {
                agreement_id: AgreementId::new(),
                project_id: ProjectId::new(),
                terms: PackageTerms {
                    package_name: "Residence".to_string(),
                    rate_per_sqft: d("50"),
                    total_sqft: d("2000"),
                    discount_percentage: Decimal::ZERO,
                },
                payment_type: PaymentType::Installment,
                plan: None,
                full_payment_due_date: None,
                retention_percentage: None,
                defect_liability_end_date: None,
                actor,
                occurred_at: at,
            },
            &PaymentPolicy::default(),
        )
        .unwrap();
        let t = Transaction {
            id: TransactionId::new(),
            schedule_line_id: lines[0].id,
            agreement_id: agreement.id,
            kind: TransactionKind::Payment,
            reverses: None,
            amount: d("500000.00"),
            method: PaymentMethod::Cheque,
            reference_number: Some("CHQ-0042".to_string()),
            notes: None,
            payment_date,
            tds_percentage: d("1"),
            tds_amount: d("5000.00"),
            net_amount: d("495000.00"),
            tds_deducted_by: TdsDeductedBy::Customer,
            category: PaymentCategory::Advance,
            status: TransactionStatus::Completed,
            recorded_by: actor,
            challan_id: None,
            tax_invoice_id: None,
            audit: AuditInfo::created(actor, at),
        };
        (agreement, lines, t)
    }

    fn issue_cmd(t: &Transaction) -> IssueChallan {
        IssueChallan {
            challan_id: ChallanId::new(),
            transaction_id: t.id,
            actor: ActorId::new(),
            occurred_at: Utc.with_ymd_and_hms(2024, 4, 2, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn financial_year_comes_from_payment_date() {
        let (agreement, _, t) = fixtures(NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        let challan = ChallanDraft::prepare(&issue_cmd(&t), &t, &agreement)
            .unwrap()
            .issue("CH", 7);
        assert_eq!(challan.financial_year.to_string(), "2023-24");
        assert_eq!(challan.challan_number, "CH/2023-24/007");
        assert_eq!(challan.status, ChallanStatus::Issued);
        assert_eq!(challan.amount, d("500000.00"));
    }

    #[test]
    fn already_linked_transaction_is_rejected() {
        let (agreement, _, mut t) = fixtures(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        t.challan_id = Some(ChallanId::new());
        let err = ChallanDraft::prepare(&issue_cmd(&t), &t, &agreement).unwrap_err();
        assert_eq!(err, PaymentError::ChallanAlreadyIssued(t.id));
    }

    #[test]
    fn reversal_entries_get_no_challan() {
        let (agreement, _, mut t) = fixtures(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        t.kind = TransactionKind::Reversal;
        let err = ChallanDraft::prepare(&issue_cmd(&t), &t, &agreement).unwrap_err();
        assert!(matches!(err, PaymentError::InvalidTransactionState { .. }));
    }

    #[test]
    fn filter_combines_criteria() {
        let (agreement, _, t) = fixtures(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        let challan = ChallanDraft::prepare(&issue_cmd(&t), &t, &agreement)
            .unwrap()
            .issue("CH", 1);

        assert!(ChallanFilter::default().matches(&challan));
        assert!(
            ChallanFilter {
                financial_year: Some(FinancialYear::starting(2024)),
                project_id: Some(agreement.project_id),
                start_date: NaiveDate::from_ymd_opt(2024, 5, 1),
                ..Default::default()
            }
            .matches(&challan)
        );
        assert!(
            !ChallanFilter {
                end_date: NaiveDate::from_ymd_opt(2024, 4, 30),
                ..Default::default()
            }
            .matches(&challan)
        );
        assert!(
            !ChallanFilter {
                ids: vec![ChallanId::new()],
                ..Default::default()
            }
            .matches(&challan)
        );
    }

    #[test]
    fn document_carries_words_and_file_name() {
        let (agreement, lines, t) = fixtures(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        let challan = ChallanDraft::prepare(&issue_cmd(&t), &t, &agreement)
            .unwrap()
            .issue("CH", 1);
        let doc = ChallanDocument::assemble(challan, &t, &agreement, &lines[0]);
        assert_eq!(doc.amount_in_words, "Rupees Five Lakh Only");
        assert_eq!(doc.installment, "Advance");
        assert_eq!(doc.file_name("pdf"), "Challan_2024-25_CH_2024-25_001.pdf");
    }
}
